//! In-memory implementations of the storage seams.
//!
//! Used by engine tests and by embedders that keep their own persistence.
//! Each type guards its state with one mutex, so every operation is atomic.

use crate::{split_extension, validate_relative, GenericCache, JobScheduler, ObjectStore, StoreError};
use chrono::{DateTime, Utc};
use imageshop_schema::{AttachmentId, AttachmentRecord, DocumentId, SyncJob};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Objects {
    records: BTreeMap<AttachmentId, AttachmentRecord>,
    files: HashMap<String, Vec<u8>>,
}

#[derive(Default)]
pub struct MemoryObjectStore {
    inner: Mutex<Objects>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience for tests: store a file at an exact path.
    pub fn add_file(&self, file_name: &str, data: &[u8]) {
        lock(&self.inner)
            .files
            .insert(file_name.to_owned(), data.to_vec());
    }
}

impl ObjectStore for MemoryObjectStore {
    fn get(&self, id: AttachmentId) -> Result<Option<AttachmentRecord>, StoreError> {
        Ok(lock(&self.inner).records.get(&id).cloned())
    }

    fn put(&self, record: &AttachmentRecord) -> Result<(), StoreError> {
        lock(&self.inner).records.insert(record.id, record.clone());
        Ok(())
    }

    fn insert(&self, mut record: AttachmentRecord) -> Result<AttachmentRecord, StoreError> {
        let mut inner = lock(&self.inner);
        let next = inner
            .records
            .keys()
            .next_back()
            .map_or(1, |id| id.get() + 1);
        record.id = AttachmentId::new(next);
        inner.records.insert(record.id, record.clone());
        Ok(record)
    }

    fn delete(&self, id: AttachmentId) -> Result<(), StoreError> {
        lock(&self.inner).records.remove(&id);
        Ok(())
    }

    fn list(&self) -> Result<Vec<AttachmentRecord>, StoreError> {
        Ok(lock(&self.inner).records.values().cloned().collect())
    }

    fn find_by_document(&self, document: DocumentId) -> Result<Option<AttachmentId>, StoreError> {
        Ok(lock(&self.inner)
            .records
            .values()
            .find(|r| r.document_id == Some(document))
            .map(|r| r.id))
    }

    fn update(
        &self,
        id: AttachmentId,
        mutate: &mut dyn FnMut(&mut AttachmentRecord),
    ) -> Result<Option<AttachmentRecord>, StoreError> {
        let mut inner = lock(&self.inner);
        let Some(record) = inner.records.get_mut(&id) else {
            return Ok(None);
        };
        mutate(record);
        record.id = id;
        Ok(Some(record.clone()))
    }

    fn read_file(&self, file_name: &str) -> Result<Vec<u8>, StoreError> {
        lock(&self.inner)
            .files
            .get(file_name)
            .cloned()
            .ok_or_else(|| StoreError::FileNotFound(file_name.to_owned()))
    }

    fn put_file(&self, file_name: &str, data: &[u8]) -> Result<String, StoreError> {
        let base = file_name.rsplit('/').next().unwrap_or(file_name);
        validate_relative(base)?;
        let mut inner = lock(&self.inner);
        let (stem, ext) = split_extension(base);
        let mut candidate = base.to_owned();
        let mut n = 1;
        while inner.files.contains_key(&candidate) {
            candidate = format!("{stem}-{n}{ext}");
            n += 1;
        }
        inner.files.insert(candidate.clone(), data.to_vec());
        Ok(candidate)
    }
}

#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (serde_json::Value, Option<Instant>)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = lock(&self.entries).keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl GenericCache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        let mut entries = lock(&self.entries);
        let expired = matches!(entries.get(key), Some((_, Some(expiry))) if *expiry <= Instant::now());
        if expired {
            entries.remove(key);
            return Ok(None);
        }
        Ok(entries.get(key).map(|(value, _)| value.clone()))
    }

    fn set(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let expiry = ttl.map(|d| Instant::now() + d);
        lock(&self.entries).insert(key.to_owned(), (value, expiry));
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        lock(&self.entries).remove(key);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryScheduler {
    jobs: Mutex<Vec<SyncJob>>,
}

impl MemoryScheduler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobScheduler for MemoryScheduler {
    fn schedule_once(&self, job: SyncJob) -> Result<(), StoreError> {
        let mut jobs = lock(&self.jobs);
        let at = jobs.partition_point(|j| j.scheduled_at <= job.scheduled_at);
        jobs.insert(at, job);
        Ok(())
    }

    fn is_pending(&self, hook: &str) -> Result<bool, StoreError> {
        Ok(lock(&self.jobs).iter().any(|j| j.hook() == hook))
    }

    fn take_due(&self, now: DateTime<Utc>) -> Result<Option<SyncJob>, StoreError> {
        let mut jobs = lock(&self.jobs);
        Ok(jobs
            .iter()
            .position(|j| j.scheduled_at <= now)
            .map(|i| jobs.remove(i)))
    }

    fn pending_jobs(&self) -> Result<Vec<SyncJob>, StoreError> {
        Ok(lock(&self.jobs).clone())
    }
}
