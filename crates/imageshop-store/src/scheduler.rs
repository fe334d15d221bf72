use crate::layout::StoreLayout;
use crate::lock::StoreLock;
use crate::{atomic_write, JobScheduler, StoreError};
use chrono::{DateTime, Utc};
use imageshop_schema::SyncJob;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// File-backed [`JobScheduler`]. Each queued job is one JSON file in the jobs
/// directory; taking a job deletes its file under the store lock.
pub struct FileScheduler {
    layout: StoreLayout,
    seq: AtomicU64,
}

impl FileScheduler {
    pub fn new(layout: StoreLayout) -> Self {
        Self {
            layout,
            seq: AtomicU64::new(0),
        }
    }

    fn load_all(&self) -> Result<Vec<(PathBuf, SyncJob)>, StoreError> {
        let dir = self.layout.jobs_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut jobs = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read_to_string(&path)
                .map_err(StoreError::from)
                .and_then(|c| Ok(serde_json::from_str::<SyncJob>(&c)?))
            {
                Ok(job) => jobs.push((path, job)),
                Err(e) => warn!("skipping unreadable job file {}: {e}", path.display()),
            }
        }
        jobs.sort_by(|(pa, a), (pb, b)| a.scheduled_at.cmp(&b.scheduled_at).then(pa.cmp(pb)));
        Ok(jobs)
    }
}

impl JobScheduler for FileScheduler {
    fn schedule_once(&self, job: SyncJob) -> Result<(), StoreError> {
        let _lock = StoreLock::acquire(&self.layout.lock_file())?;
        let name = format!(
            "{}-{:020}-{:06}.json",
            job.hook(),
            job.scheduled_at.timestamp_nanos_opt().unwrap_or_default(),
            self.seq.fetch_add(1, Ordering::Relaxed)
        );
        let content = serde_json::to_string_pretty(&job)?;
        atomic_write(&self.layout.jobs_dir().join(&name), content.as_bytes())?;
        debug!("scheduled {} job {name} ({} items)", job.direction, job.batch.len());
        Ok(())
    }

    fn is_pending(&self, hook: &str) -> Result<bool, StoreError> {
        Ok(self.load_all()?.iter().any(|(_, j)| j.hook() == hook))
    }

    fn take_due(&self, now: DateTime<Utc>) -> Result<Option<SyncJob>, StoreError> {
        let _lock = StoreLock::acquire(&self.layout.lock_file())?;
        let Some((path, job)) = self
            .load_all()?
            .into_iter()
            .find(|(_, j)| j.scheduled_at <= now)
        else {
            return Ok(None);
        };
        fs::remove_file(&path)?;
        Ok(Some(job))
    }

    fn pending_jobs(&self) -> Result<Vec<SyncJob>, StoreError> {
        Ok(self.load_all()?.into_iter().map(|(_, j)| j).collect())
    }
}
