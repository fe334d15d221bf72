use crate::{CoreError, LibraryConfig, ResolverSession, Srcset};
use imageshop_remote::{DamApi, Interface, MetadataFields, RemoteError, SearchCriteria, SearchResult};
use imageshop_schema::{
    AttachmentId, AttachmentRecord, DocumentId, ImageSizeTable, MediaSizes, ResolvedSize, SizeSpec,
};
use imageshop_store::{GenericCache, JobScheduler, ObjectStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

const INTERFACES_KEY: &str = "imageshop_interfaces";

/// Metadata as the host edits it, read back from the DAM after an update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteMetadata {
    pub title: String,
    pub alt: String,
    pub caption: String,
    pub description: String,
}

/// Composition root: owns the DAM client, the storage seams, the size table
/// and the tunables. Everything else borrows from here.
pub struct MediaLibrary {
    dam: Arc<dyn DamApi>,
    store: Arc<dyn ObjectStore>,
    cache: Arc<dyn GenericCache>,
    scheduler: Arc<dyn JobScheduler>,
    sizes: ImageSizeTable,
    config: LibraryConfig,
}

impl MediaLibrary {
    pub fn new(
        dam: Arc<dyn DamApi>,
        store: Arc<dyn ObjectStore>,
        cache: Arc<dyn GenericCache>,
        scheduler: Arc<dyn JobScheduler>,
        config: LibraryConfig,
    ) -> Self {
        Self {
            dam,
            store,
            cache,
            scheduler,
            sizes: ImageSizeTable::wordpress_defaults(),
            config,
        }
    }

    #[must_use]
    pub fn with_sizes(mut self, sizes: ImageSizeTable) -> Self {
        self.sizes = sizes;
        self
    }

    pub fn dam(&self) -> &dyn DamApi {
        self.dam.as_ref()
    }

    pub fn store(&self) -> &dyn ObjectStore {
        self.store.as_ref()
    }

    pub fn cache(&self) -> &dyn GenericCache {
        self.cache.as_ref()
    }

    pub fn scheduler(&self) -> &dyn JobScheduler {
        self.scheduler.as_ref()
    }

    pub fn sizes(&self) -> &ImageSizeTable {
        &self.sizes
    }

    pub fn config(&self) -> &LibraryConfig {
        &self.config
    }

    /// Open a unit of work. Call [`ResolverSession::close`] when done so
    /// queued permalink creations reach the DAM.
    pub fn session(&self) -> ResolverSession<'_> {
        ResolverSession::new(self)
    }

    pub fn attachment(&self, id: AttachmentId) -> Result<AttachmentRecord, CoreError> {
        self.store
            .get(id)?
            .ok_or(CoreError::AttachmentNotFound(id))
    }

    /// One-shot [`ResolverSession::resolve_size`].
    pub fn resolve_size(
        &self,
        id: AttachmentId,
        spec: &SizeSpec,
    ) -> Result<Option<ResolvedSize>, CoreError> {
        let mut session = self.session();
        let resolved = session.resolve_size(id, spec)?;
        session.close()?;
        Ok(resolved)
    }

    /// One-shot [`ResolverSession::project`].
    pub fn project(&self, id: AttachmentId) -> Result<MediaSizes, CoreError> {
        let mut session = self.session();
        let sizes = session.project(id)?;
        session.close()?;
        Ok(sizes)
    }

    /// One-shot [`ResolverSession::image_src`]. Never fails.
    pub fn image_src(&self, id: AttachmentId, spec: &SizeSpec) -> Option<ResolvedSize> {
        let mut session = self.session();
        let src = session.image_src(id, spec);
        if let Err(e) = session.close() {
            warn!("permalink batch for attachment {id} not sent: {e}");
        }
        src
    }

    /// One-shot [`ResolverSession::srcset`]. Never fails.
    pub fn srcset(&self, id: AttachmentId, spec: &SizeSpec) -> Option<Srcset> {
        let mut session = self.session();
        let srcset = session.srcset(id, spec);
        if let Err(e) = session.close() {
            warn!("permalink batch for attachment {id} not sent: {e}");
        }
        srcset
    }

    /// One-shot [`ResolverSession::caption`].
    pub fn caption(&self, id: AttachmentId) -> Result<Option<String>, CoreError> {
        self.session().caption(id)
    }

    pub(crate) fn processing_key(id: AttachmentId) -> String {
        format!("_imageshop_attachment_{id}_processing")
    }

    pub(crate) fn caption_key(&self, id: AttachmentId) -> String {
        format!("_imageshop_attachment_caption_{}_{id}", self.dam.language())
    }

    /// Whether the attachment is inside its 0x0 cooldown window.
    pub fn is_cooling_down(&self, id: AttachmentId) -> Result<bool, CoreError> {
        Ok(self.cache.get(&Self::processing_key(id))?.is_some())
    }

    pub(crate) fn start_cooldown(&self, id: AttachmentId) -> Result<(), CoreError> {
        self.cache.set(
            &Self::processing_key(id),
            serde_json::Value::Bool(true),
            Some(self.config.processing_cooldown),
        )?;
        Ok(())
    }

    pub(crate) fn clear_size_index(&self, id: AttachmentId) -> Result<(), CoreError> {
        self.store
            .update(id, &mut |r| r.media_sizes = None)?
            .ok_or(CoreError::AttachmentNotFound(id))?;
        Ok(())
    }

    /// Drop every remembered permalink of an attachment.
    pub fn clear_permalinks(&self, id: AttachmentId) -> Result<(), CoreError> {
        self.store
            .update(id, &mut |r| r.permalinks.clear())?
            .ok_or(CoreError::AttachmentNotFound(id))?;
        debug!("cleared permalink index of attachment {id}");
        Ok(())
    }

    /// Forget everything derived from the DAM for this attachment and
    /// project it again from scratch.
    pub fn flush_references(&self, id: AttachmentId) -> Result<MediaSizes, CoreError> {
        self.store
            .update(id, &mut |r| {
                r.permalinks.clear();
                r.media_sizes = None;
            })?
            .ok_or(CoreError::AttachmentNotFound(id))?;
        self.cache.delete(&self.caption_key(id))?;
        self.cache.delete(&Self::processing_key(id))?;
        info!("flushed DAM references of attachment {id}");
        self.project(id)
    }

    /// Interfaces visible to the token, cached for `interfaces_ttl`.
    pub fn interfaces(&self) -> Result<Vec<Interface>, CoreError> {
        if let Some(cached) = self.cache.get(INTERFACES_KEY)? {
            match serde_json::from_value(cached) {
                Ok(interfaces) => return Ok(interfaces),
                Err(e) => warn!("ignoring malformed interface cache: {e}"),
            }
        }
        let interfaces = self.dam.interfaces()?;
        let value = serde_json::to_value(&interfaces).map_err(RemoteError::from)?;
        self.cache
            .set(INTERFACES_KEY, value, Some(self.config.interfaces_ttl))?;
        Ok(interfaces)
    }

    /// Search every interface the token can see unless the criteria name some.
    pub fn search(&self, criteria: &SearchCriteria) -> Result<SearchResult, CoreError> {
        let mut criteria = criteria.clone();
        if criteria.interface_ids.is_empty() {
            criteria.interface_ids = self.interfaces()?.iter().map(|i| i.id).collect();
        }
        Ok(self.dam.search(&criteria)?)
    }

    /// Push edited fields to the DAM and read back what it stored.
    pub fn update_remote_metadata(
        &self,
        document_id: DocumentId,
        fields: &MetadataFields,
    ) -> Result<RemoteMetadata, CoreError> {
        if fields.is_empty() {
            return Err(CoreError::Validation(
                "no metadata fields to update".to_owned(),
            ));
        }
        self.dam.set_metadata(document_id, fields)?;
        let doc = self.dam.get_document(document_id)?;

        if let Some(id) = self.store.find_by_document(document_id)? {
            self.cache.delete(&self.caption_key(id))?;
        }
        info!("updated metadata of document {document_id}");
        Ok(RemoteMetadata {
            title: doc.name.clone(),
            alt: doc.description.clone(),
            caption: doc.caption().unwrap_or_default(),
            description: doc.description,
        })
    }
}
