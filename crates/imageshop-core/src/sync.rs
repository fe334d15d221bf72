//! Chunked push/pull synchronization between the local library and the DAM.
//!
//! A sync run is split into chunks, each scheduled as an independent job on
//! the [`JobScheduler`](imageshop_store::JobScheduler). Only one run per
//! direction may be outstanding: a start request while any job of that
//! direction is still queued is rejected, never queued behind it.

use crate::{CoreError, MediaLibrary};
use chrono::Utc;
use imageshop_remote::{SearchCriteria, SortDirection};
use imageshop_schema::{
    mime_for_file_name, AttachmentId, AttachmentRecord, DocumentId, SyncDirection, SyncItem,
    SyncJob,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

const CONFLICT_MESSAGE: &str =
    "A previous import is still in progress, please wait for it to finish before scheduling another.";
const NOTHING_TO_IMPORT: &str = "nothing to import";

/// Answer to a sync start request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStart {
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Number of chunks scheduled.
    pub jobs: usize,
}

impl SyncStart {
    fn rejected(reason: &str) -> Self {
        Self {
            accepted: false,
            reason: Some(reason.to_owned()),
            jobs: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Image attachments in the local library.
    pub total: usize,
    /// Those already linked to a document.
    pub imported: usize,
}

/// Per-item tally of one or more processed chunks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobOutcome {
    pub processed: usize,
    pub failed: usize,
}

impl std::ops::AddAssign for JobOutcome {
    fn add_assign(&mut self, rhs: Self) {
        self.processed += rhs.processed;
        self.failed += rhs.failed;
    }
}

impl MediaLibrary {
    /// Schedule a full sync run in `direction`.
    pub fn start_sync(&self, direction: SyncDirection) -> Result<SyncStart, CoreError> {
        if self.scheduler().is_pending(direction.hook())? {
            info!("{direction} sync rejected: a previous run is still queued");
            return Ok(SyncStart::rejected(CONFLICT_MESSAGE));
        }
        let items: Vec<SyncItem> = match direction {
            SyncDirection::Push => self
                .store()
                .list()?
                .into_iter()
                .filter(|r| r.is_image() && !r.is_linked())
                .map(|r| SyncItem::Local { id: r.id })
                .collect(),
            SyncDirection::Pull => {
                let criteria = SearchCriteria::default()
                    .page(0, 0)
                    .sort(SortDirection::Asc);
                self.search(&criteria)?
                    .documents
                    .into_iter()
                    .map(|d| {
                        let file_name = if d.file_name.is_empty() {
                            d.name
                        } else {
                            d.file_name
                        };
                        SyncItem::Remote {
                            document_id: d.document_id,
                            file_name,
                        }
                    })
                    .collect()
            }
        };
        self.schedule(direction, &items)
    }

    /// Schedule a pull of an explicit set of documents.
    pub fn start_pull_for(&self, items: Vec<(DocumentId, String)>) -> Result<SyncStart, CoreError> {
        let direction = SyncDirection::Pull;
        if self.scheduler().is_pending(direction.hook())? {
            return Ok(SyncStart::rejected(CONFLICT_MESSAGE));
        }
        let items: Vec<SyncItem> = items
            .into_iter()
            .map(|(document_id, file_name)| SyncItem::Remote {
                document_id,
                file_name,
            })
            .collect();
        self.schedule(direction, &items)
    }

    fn schedule(&self, direction: SyncDirection, items: &[SyncItem]) -> Result<SyncStart, CoreError> {
        if items.is_empty() {
            return Ok(SyncStart::rejected(NOTHING_TO_IMPORT));
        }
        let chunk_size = match direction {
            SyncDirection::Push => self.config().push_chunk_size,
            SyncDirection::Pull => self.config().pull_chunk_size,
        }
        .max(1);

        let now = Utc::now();
        let mut jobs = 0;
        for chunk in items.chunks(chunk_size) {
            self.scheduler().schedule_once(SyncJob {
                direction,
                batch: chunk.to_vec(),
                scheduled_at: now,
            })?;
            jobs += 1;
        }
        info!(
            "scheduled {direction} sync of {} items in {jobs} chunks",
            items.len()
        );
        Ok(SyncStart {
            accepted: true,
            reason: None,
            jobs,
        })
    }

    /// Process one chunk. Items are handled in order with a pause between
    /// them; a failing item is logged and skipped.
    pub fn run_job(&self, job: &SyncJob) -> JobOutcome {
        let mut outcome = JobOutcome::default();
        let delay = self.config().sync_item_delay;
        for (n, item) in job.batch.iter().enumerate() {
            if n > 0 && !delay.is_zero() {
                std::thread::sleep(delay);
            }
            let result = match item {
                SyncItem::Local { id } => self.export_single(*id, false).map(|_| ()),
                SyncItem::Remote {
                    document_id,
                    file_name,
                } => self.import_document(*document_id, file_name).map(|_| ()),
            };
            match result {
                Ok(()) => outcome.processed += 1,
                Err(e) => {
                    warn!("{} sync item {item:?} failed: {e}", job.direction);
                    outcome.failed += 1;
                }
            }
        }
        debug!(
            "{} chunk done: {} processed, {} failed",
            job.direction, outcome.processed, outcome.failed
        );
        outcome
    }

    /// Run every job that is due, one at a time, until none remain.
    pub fn run_pending(&self) -> Result<JobOutcome, CoreError> {
        let mut total = JobOutcome::default();
        while let Some(job) = self.scheduler().take_due(Utc::now())? {
            total += self.run_job(&job);
        }
        Ok(total)
    }

    /// Download a document's original into the local library.
    ///
    /// An attachment already linked to the document gets the new file;
    /// otherwise a new attachment is created and linked.
    pub fn import_document(
        &self,
        document_id: DocumentId,
        file_name: &str,
    ) -> Result<AttachmentId, CoreError> {
        let url = self.dam().download(document_id)?;
        let bytes = self.dam().fetch(&url)?;
        let stored = self.store().put_file(file_name, &bytes)?;
        let mime = mime_for_file_name(&stored).to_owned();

        let id = match self.store().find_by_document(document_id)? {
            Some(id) => {
                self.store()
                    .update(id, &mut |r| {
                        r.file_name.clone_from(&stored);
                        r.mime_type.clone_from(&mime);
                        r.media_sizes = None;
                    })?
                    .ok_or(CoreError::AttachmentNotFound(id))?;
                id
            }
            None => {
                let mut record =
                    AttachmentRecord::new(AttachmentId::default(), file_stem(file_name), stored.as_str());
                record.document_id = Some(document_id);
                self.store().insert(record)?.id
            }
        };
        info!("imported document {document_id} as attachment {id}");

        if let Err(e) = self.project(id) {
            warn!("imported attachment {id} not projected yet: {e}");
        }
        Ok(id)
    }

    pub fn sync_status(&self) -> Result<SyncStatus, CoreError> {
        let records = self.store().list()?;
        let images = records.iter().filter(|r| r.is_image());
        let (total, imported) = images.fold((0, 0), |(t, i), r| (t + 1, i + usize::from(r.is_linked())));
        Ok(SyncStatus { total, imported })
    }
}

fn file_stem(file_name: &str) -> &str {
    let base = file_name.rsplit('/').next().unwrap_or(file_name);
    match base.rfind('.') {
        Some(dot) if dot > 0 => &base[..dot],
        _ => base,
    }
}
