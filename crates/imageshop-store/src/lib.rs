//! Storage seams for the Imageshop media mirror.
//!
//! The host's persistence is modelled as three collaborators: an
//! [`ObjectStore`] for attachment records and their files, a [`GenericCache`]
//! with per-entry TTLs, and a [`JobScheduler`] that holds deferred sync jobs.
//! Each comes with a file-backed implementation (atomic JSON writes guarded by
//! an exclusive store lock) and an in-memory one for tests and embedding.

pub mod cache;
pub mod layout;
pub mod lock;
pub mod memory;
pub mod objects;
pub mod scheduler;

pub use cache::FileCache;
pub use layout::{StoreLayout, STORE_FORMAT_VERSION};
pub use lock::StoreLock;
pub use memory::{MemoryCache, MemoryObjectStore, MemoryScheduler};
pub use objects::FileObjectStore;
pub use scheduler::FileScheduler;

use chrono::{DateTime, Utc};
use imageshop_schema::{AttachmentId, AttachmentRecord, DocumentId, SyncJob};
use std::io::Write;
use std::path::{Component, Path};
use std::time::Duration;
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("attachment not found: {0}")]
    AttachmentNotFound(AttachmentId),
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("invalid file path: {0}")]
    InvalidPath(String),
    #[error("lock acquisition failed: {0}")]
    LockFailed(String),
    #[error("store format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// Persistence for attachment records and the files attached to them.
pub trait ObjectStore: Send + Sync {
    fn get(&self, id: AttachmentId) -> Result<Option<AttachmentRecord>, StoreError>;

    /// Insert or overwrite a record under its own id.
    fn put(&self, record: &AttachmentRecord) -> Result<(), StoreError>;

    /// Store a new record under a freshly allocated id and return it.
    fn insert(&self, record: AttachmentRecord) -> Result<AttachmentRecord, StoreError>;

    fn delete(&self, id: AttachmentId) -> Result<(), StoreError>;

    /// All records, ordered by id.
    fn list(&self) -> Result<Vec<AttachmentRecord>, StoreError>;

    /// First attachment linked to the given remote document.
    fn find_by_document(&self, document: DocumentId) -> Result<Option<AttachmentId>, StoreError>;

    /// Atomic read-modify-write of one record. Returns the updated record,
    /// or `None` when the attachment does not exist.
    fn update(
        &self,
        id: AttachmentId,
        mutate: &mut dyn FnMut(&mut AttachmentRecord),
    ) -> Result<Option<AttachmentRecord>, StoreError>;

    fn read_file(&self, file_name: &str) -> Result<Vec<u8>, StoreError>;

    /// Store file bytes under a unique name derived from `file_name` and
    /// return the stored relative path.
    fn put_file(&self, file_name: &str, data: &[u8]) -> Result<String, StoreError>;
}

/// Short-lived key/value cache. Entries without a TTL never expire.
pub trait GenericCache: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError>;
    fn set(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError>;
    fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Deferred job queue, keyed by hook name.
pub trait JobScheduler: Send + Sync {
    fn schedule_once(&self, job: SyncJob) -> Result<(), StoreError>;

    /// Whether any job for `hook` is still waiting to run.
    fn is_pending(&self, hook: &str) -> Result<bool, StoreError>;

    /// Remove and return the earliest job whose run time is at or before `now`.
    fn take_due(&self, now: DateTime<Utc>) -> Result<Option<SyncJob>, StoreError>;

    /// Every queued job in run order.
    fn pending_jobs(&self) -> Result<Vec<SyncJob>, StoreError>;
}

/// Fsync a directory so that a preceding `rename()` is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

/// Write `data` to `dest` via a temp file in the same directory, then rename.
pub(crate) fn atomic_write(dest: &Path, data: &[u8]) -> Result<(), StoreError> {
    let dir = dest
        .parent()
        .ok_or_else(|| StoreError::InvalidPath(dest.display().to_string()))?;
    std::fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| StoreError::Io(e.error))?;
    fsync_dir(dir)?;
    Ok(())
}

/// Reject absolute paths and parent traversal in caller-supplied file names.
pub(crate) fn validate_relative(file_name: &str) -> Result<(), StoreError> {
    let path = Path::new(file_name);
    if file_name.is_empty()
        || path
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(StoreError::InvalidPath(file_name.to_owned()));
    }
    Ok(())
}

/// Split `name.ext` into `("name", ".ext")`.
pub(crate) fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(i) if i > 0 => (&name[..i], &name[i..]),
        _ => (name, ""),
    }
}
