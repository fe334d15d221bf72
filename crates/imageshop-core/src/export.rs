use crate::{CoreError, MediaLibrary};
use base64::Engine;
use imageshop_remote::RemoteError;
use imageshop_schema::{AttachmentId, DocumentId, MediaSizes};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// One row of [`MediaLibrary::report`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedAttachment {
    pub id: AttachmentId,
    pub title: String,
    pub document_id: DocumentId,
}

/// Outcome of a bulk export.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportReport {
    pub exported: Vec<AttachmentId>,
    pub failed: Vec<(AttachmentId, String)>,
}

impl MediaLibrary {
    /// Upload an image attachment to the DAM and link it to the new document.
    ///
    /// An attachment that is already linked is left alone unless `force` is
    /// set, in which case it is uploaded again and everything derived from
    /// the old document is dropped.
    pub fn export_single(&self, id: AttachmentId, force: bool) -> Result<AttachmentId, CoreError> {
        let record = self.attachment(id)?;
        if !record.is_image() {
            return Err(CoreError::Validation(format!(
                "attachment {id} is {}, not an image",
                record.mime_type
            )));
        }
        if record.is_linked() && !force {
            debug!("attachment {id} already linked, skipping export");
            return Ok(id);
        }

        let bytes = self.store().read_file(&record.file_name)?;
        let content = base64::engine::general_purpose::STANDARD.encode(&bytes);
        let document_id = self.dam().create_document(&content, record.base_name())?;

        self.store()
            .update(id, &mut |r| {
                r.document_id = Some(document_id);
                r.media_sizes = None;
                r.permalinks.clear();
            })?
            .ok_or(CoreError::AttachmentNotFound(id))?;
        info!("exported attachment {id} as document {document_id}");
        Ok(id)
    }

    fn export_each(
        &self,
        ids: impl IntoIterator<Item = AttachmentId>,
        force: bool,
        delay: Duration,
    ) -> ExportReport {
        let mut report = ExportReport::default();
        for (n, id) in ids.into_iter().enumerate() {
            if n > 0 && !delay.is_zero() {
                std::thread::sleep(delay);
            }
            match self.export_single(id, force) {
                Ok(id) => report.exported.push(id),
                Err(e) => {
                    warn!("export of attachment {id} failed: {e}");
                    report.failed.push((id, e.to_string()));
                }
            }
        }
        report
    }

    /// Export every image attachment that has no document yet.
    pub fn export_missing(&self, delay: Duration) -> Result<ExportReport, CoreError> {
        let ids: Vec<_> = self
            .store()
            .list()?
            .into_iter()
            .filter(|r| r.is_image() && !r.is_linked())
            .map(|r| r.id)
            .collect();
        Ok(self.export_each(ids, false, delay))
    }

    /// Export every image attachment, re-uploading linked ones when forced.
    pub fn export_all(&self, force: bool, delay: Duration) -> Result<ExportReport, CoreError> {
        let ids: Vec<_> = self
            .store()
            .list()?
            .into_iter()
            .filter(|r| r.is_image())
            .map(|r| r.id)
            .collect();
        Ok(self.export_each(ids, force, delay))
    }

    /// Make sure a linked attachment still points at a usable document,
    /// re-exporting it when it does not. Returns whether it was re-exported.
    pub fn validate_reference(&self, id: AttachmentId) -> Result<bool, CoreError> {
        let record = self.attachment(id)?;
        if !record.is_image() {
            return Ok(false);
        }
        let valid = match record.document_id {
            None => false,
            Some(document_id) => match self.dam().get_document(document_id) {
                Ok(doc) => !doc.sub_document_list.is_empty(),
                Err(RemoteError::NotFound(_)) => false,
                Err(e) => return Err(e.into()),
            },
        };
        if valid {
            return Ok(false);
        }
        warn!("attachment {id} has no usable document, exporting again");
        self.export_single(id, true)?;
        Ok(true)
    }

    /// Repair the link if needed, then rebuild the size index from scratch.
    pub fn refresh_metadata(&self, id: AttachmentId) -> Result<MediaSizes, CoreError> {
        self.validate_reference(id)?;
        self.flush_references(id)
    }

    /// Every attachment linked to a document.
    pub fn report(&self) -> Result<Vec<LinkedAttachment>, CoreError> {
        Ok(self
            .store()
            .list()?
            .into_iter()
            .filter_map(|r| {
                r.document_id.map(|document_id| LinkedAttachment {
                    id: r.id,
                    title: r.title,
                    document_id,
                })
            })
            .collect())
    }
}
