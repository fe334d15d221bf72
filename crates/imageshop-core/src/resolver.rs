//! Size resolution: turn an attachment and a [`SizeSpec`] into a delivery URL
//! with the box it actually serves.
//!
//! Lookup order for a box is the durable permalink index on the attachment,
//! then the remote document (memoised per session, with a one-time probe of
//! originals the DAM reports as 0x0), then the permalink session. Every
//! freshly resolved box is written back to the durable index under the exact
//! key that was requested.

use crate::geometry::fit_box;
use crate::permalink::{permalink_token, PermalinkSession};
use crate::{CoreError, MediaLibrary};
use imageshop_remote::{probe_dimensions, PermalinkRequest, RemoteError};
use imageshop_schema::{
    AttachmentId, AttachmentRecord, Dimensions, Document, DocumentId, PermalinkKey, ResolvedSize,
    SizeSpec,
};
use std::collections::HashMap;
use tracing::{debug, warn};

/// A unit of work against one [`MediaLibrary`].
///
/// Holds the document and probe memos and the queue of batched permalink
/// creations. Close it with [`close`](Self::close) at the end of the request
/// or job; dropping it with queued creations only logs a warning.
pub struct ResolverSession<'a> {
    library: &'a MediaLibrary,
    permalinks: PermalinkSession<'a>,
    documents: HashMap<DocumentId, Option<Document>>,
    probed: HashMap<DocumentId, Dimensions>,
}

impl<'a> ResolverSession<'a> {
    pub(crate) fn new(library: &'a MediaLibrary) -> Self {
        let config = library.config();
        Self {
            library,
            permalinks: PermalinkSession::new(
                library.dam(),
                library.cache(),
                config.permalink_cache_ttl,
                config.batch_permalinks,
            ),
            documents: HashMap::new(),
            probed: HashMap::new(),
        }
    }

    pub fn library(&self) -> &'a MediaLibrary {
        self.library
    }

    /// Permalink creations queued so far.
    pub fn pending_permalinks(&self) -> usize {
        self.permalinks.pending()
    }

    /// Send queued permalink creations now. The session stays usable.
    pub fn flush(&mut self) -> Result<usize, CoreError> {
        self.permalinks.flush()
    }

    /// Flush and end the session.
    pub fn close(mut self) -> Result<usize, CoreError> {
        self.flush()
    }

    /// Remote document, fetched at most once per session. A document the
    /// DAM no longer has is `None`.
    pub(crate) fn document(&mut self, id: DocumentId) -> Result<Option<Document>, CoreError> {
        if let Some(doc) = self.documents.get(&id) {
            return Ok(doc.clone());
        }
        let doc = match self.library.dam().get_document(id) {
            Ok(doc) => Some(doc),
            Err(RemoteError::NotFound(_)) => {
                debug!("document {id} no longer exists remotely");
                None
            }
            Err(e) => return Err(e.into()),
        };
        self.documents.insert(id, doc.clone());
        Ok(doc)
    }

    /// Dimensions of the document's original, probing the file once when the
    /// DAM has not reported them. `None` when there is no original at all.
    pub(crate) fn original_dimensions(&mut self, doc: &Document) -> Option<Dimensions> {
        let rendition = doc.original()?;
        let reported = rendition.dimensions();
        if !reported.is_unknown() {
            return Some(reported);
        }
        let dam = self.library.dam();
        let probed = *self
            .probed
            .entry(doc.document_id)
            .or_insert_with(|| probe_dimensions(dam, doc, rendition));
        Some(if probed.is_unknown() { reported } else { probed })
    }

    /// Load a record, deriving and persisting its permalink token on first use.
    pub(crate) fn record_with_token(&self, id: AttachmentId) -> Result<AttachmentRecord, CoreError> {
        let record = self.library.attachment(id)?;
        if record.permalink_token.is_some() {
            return Ok(record);
        }
        let token = permalink_token(&self.library.config().site_url, &record);
        self.library
            .store()
            .update(id, &mut |r| {
                if r.permalink_token.is_none() {
                    r.permalink_token = Some(token.clone());
                }
            })?
            .ok_or(CoreError::AttachmentNotFound(id))
    }

    /// Resolve one size of an attachment.
    ///
    /// `Ok(None)` means "use the local representation": the attachment is not
    /// linked, the document is gone, or the geometry is degenerate. Unknown
    /// slugs are a validation error. Transport failures propagate.
    pub fn resolve_size(
        &mut self,
        id: AttachmentId,
        spec: &SizeSpec,
    ) -> Result<Option<ResolvedSize>, CoreError> {
        if let SizeSpec::Box {
            width: 0,
            height: 0,
            ..
        } = spec
        {
            return Ok(None);
        }
        let record = self.record_with_token(id)?;
        let Some(document_id) = record.document_id else {
            debug!("attachment {id} is not linked to a document");
            return Ok(None);
        };

        match spec {
            SizeSpec::Original => {
                if let Some(size) = record.size("original").filter(|s| !s.is_degenerate()) {
                    return Ok(Some(size.clone()));
                }
                match self.document(document_id)? {
                    Some(doc) => self.original_entry(&record, &doc),
                    None => Ok(None),
                }
            }
            SizeSpec::Named(slug) if slug == "full" || slug == "original" => {
                self.resolve_size(id, &SizeSpec::Original)
            }
            SizeSpec::Named(slug) => {
                let size = self.library.sizes().get(slug).ok_or_else(|| {
                    CoreError::Validation(format!("unknown image size '{slug}'"))
                })?;
                self.resolve_box(
                    &record,
                    document_id,
                    Dimensions::new(size.width, size.height),
                    size.crop,
                )
            }
            SizeSpec::Box {
                width,
                height,
                crop,
            } => self.resolve_box(&record, document_id, Dimensions::new(*width, *height), *crop),
        }
    }

    pub(crate) fn resolve_box(
        &mut self,
        record: &AttachmentRecord,
        document_id: DocumentId,
        requested: Dimensions,
        crop: bool,
    ) -> Result<Option<ResolvedSize>, CoreError> {
        if requested.is_empty() {
            return Ok(None);
        }

        let key = PermalinkKey::new(record.title.clone(), requested.width, requested.height, crop);
        if let Some(hit) = record.permalink(&key) {
            debug!("permalink index hit {key} on attachment {}", record.id);
            return Ok(Some(hit.clone()));
        }

        let Some(doc) = self.document(document_id)? else {
            return Ok(None);
        };
        let Some(original) = self.original_dimensions(&doc) else {
            debug!("document {document_id} has no original rendition");
            return Ok(None);
        };
        let Some(fitted) = fit_box(original, requested, crop) else {
            warn!(
                "degenerate geometry for attachment {}: {requested} on original {original}",
                record.id
            );
            return Ok(None);
        };

        let request = PermalinkRequest {
            document_id,
            width: fitted.width,
            height: fitted.height,
            token: record.permalink_token.clone(),
        };
        let size = ResolvedSize {
            width: fitted.width,
            height: fitted.height,
            source_url: self.permalinks.url_for(request, &record.file_name)?,
            file: record.title.clone(),
        };

        self.library
            .store()
            .update(record.id, &mut |r| {
                r.remember_permalink(&key, size.clone());
            })?
            .ok_or(CoreError::AttachmentNotFound(record.id))?;
        Ok(Some(size))
    }

    /// Entry for the original rendition at its real dimensions.
    pub(crate) fn original_entry(
        &mut self,
        record: &AttachmentRecord,
        doc: &Document,
    ) -> Result<Option<ResolvedSize>, CoreError> {
        let Some(dims) = self.original_dimensions(doc).filter(|d| !d.is_unknown()) else {
            return Ok(None);
        };
        let request = PermalinkRequest {
            document_id: doc.document_id,
            width: dims.width,
            height: dims.height,
            token: record.permalink_token.clone(),
        };
        Ok(Some(ResolvedSize {
            width: dims.width,
            height: dims.height,
            source_url: self.permalinks.url_for(request, &record.file_name)?,
            file: record.title.clone(),
        }))
    }
}
