use crate::{CoreError, ResolverSession};
use imageshop_schema::{AttachmentId, Dimensions, MediaSizes};
use std::collections::BTreeMap;
use tracing::{debug, warn};

impl ResolverSession<'_> {
    /// Rebuild the size index of an attachment from its remote document.
    ///
    /// Every registered size is resolved; sizes that resolve to nothing are
    /// left out. An `original` entry at the original's real dimensions is
    /// always added when they are known, and mirrored as `full`. The stored
    /// index is replaced wholesale. While the attachment is cooling down, or
    /// when it is not linked, the result is empty and nothing is written.
    pub fn project(&mut self, id: AttachmentId) -> Result<MediaSizes, CoreError> {
        let library = self.library();
        if library.is_cooling_down(id)? {
            debug!("attachment {id} is cooling down, not projecting");
            return Ok(MediaSizes::default());
        }
        let record = self.record_with_token(id)?;
        let Some(document_id) = record.document_id else {
            return Ok(MediaSizes::default());
        };
        let Some(doc) = self.document(document_id)? else {
            return Ok(MediaSizes::default());
        };

        let mut sizes = BTreeMap::new();
        for (slug, size) in library.sizes().iter() {
            let requested = Dimensions::new(size.width, size.height);
            if let Some(resolved) = self.resolve_box(&record, document_id, requested, size.crop)? {
                sizes.insert(slug.to_owned(), resolved);
            }
        }
        if let Some(original) = self.original_entry(&record, &doc)? {
            sizes
                .entry("full".to_owned())
                .or_insert_with(|| original.clone());
            sizes.insert("original".to_owned(), original);
        }

        let credits = doc.credits.trim();
        let media = MediaSizes {
            sizes,
            caption: doc.caption(),
            credits: (!credits.is_empty()).then(|| credits.to_owned()),
        };
        library
            .store()
            .update(id, &mut |r| r.media_sizes = Some(media.clone()))?
            .ok_or(CoreError::AttachmentNotFound(id))?;
        debug!(
            "projected {} sizes of document {document_id} onto attachment {id}",
            media.sizes.len()
        );
        Ok(media)
    }

    /// Caption of a linked attachment in the active language, cached.
    pub fn caption(&mut self, id: AttachmentId) -> Result<Option<String>, CoreError> {
        let library = self.library();
        let key = library.caption_key(id);
        match library.cache().get(&key) {
            Ok(Some(serde_json::Value::String(caption))) => return Ok(Some(caption)),
            Ok(_) => {}
            Err(e) => warn!("caption cache read failed: {e}"),
        }

        let record = library.attachment(id)?;
        let Some(document_id) = record.document_id else {
            return Ok(None);
        };
        let Some(caption) = self.document(document_id)?.and_then(|d| d.caption()) else {
            return Ok(None);
        };
        library.cache().set(
            &key,
            serde_json::Value::String(caption.clone()),
            Some(library.config().caption_ttl),
        )?;
        Ok(Some(caption))
    }
}
