//! In-memory [`DamApi`] for deterministic tests.
//!
//! Every trait call is counted by operation name (`"get_document"`,
//! `"fetch"`, ...). Failures can be injected per operation with
//! [`MockDam::fail_next`].

use crate::probe::decode_dimensions;
use crate::wire::{Interface, MetadataFields, PermalinkRequest, SearchCriteria, SearchResult};
use crate::{DamApi, RemoteError, SortDirection, DEFAULT_CDN_PREFIX};
use base64::Engine;
use imageshop_schema::{mime_for_file_name, Document, DocumentId, InterfaceRef, Rendition};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

const FILE_SCHEME: &str = "mock://files/";
const DOWNLOAD_SCHEME: &str = "mock://download/";

#[derive(Debug, Clone)]
struct StoredFile {
    content_type: String,
    bytes: Vec<u8>,
}

#[derive(Default)]
struct MockState {
    documents: BTreeMap<DocumentId, Document>,
    files: HashMap<String, StoredFile>,
    calls: HashMap<&'static str, usize>,
    failures: HashMap<&'static str, RemoteError>,
    deleted: Vec<DocumentId>,
    permalink_batches: Vec<Vec<PermalinkRequest>>,
    metadata_writes: Vec<(DocumentId, MetadataFields)>,
    uploads: Vec<(DocumentId, String)>,
    interfaces: Vec<Interface>,
    next_id: u64,
}

pub struct MockDam {
    state: Mutex<MockState>,
    language: String,
    cdn_prefix: String,
    url_hint: String,
    can_upload: bool,
}

impl Default for MockDam {
    fn default() -> Self {
        Self {
            state: Mutex::new(MockState {
                interfaces: vec![Interface {
                    id: 1,
                    name: "Web".to_owned(),
                }],
                next_id: 1000,
                ..MockState::default()
            }),
            language: crate::language::FALLBACK_LANGUAGE.to_owned(),
            cdn_prefix: DEFAULT_CDN_PREFIX.to_owned(),
            url_hint: "http://localhost/".to_owned(),
            can_upload: true,
        }
    }
}

impl MockDam {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_language(mut self, language: &str) -> Self {
        language.clone_into(&mut self.language);
        self
    }

    #[must_use]
    pub fn with_cdn_prefix(mut self, prefix: &str) -> Self {
        prefix.trim_end_matches('/').clone_into(&mut self.cdn_prefix);
        self
    }

    #[must_use]
    pub fn with_upload_disabled(mut self) -> Self {
        self.can_upload = false;
        self
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count the call and surface an injected failure, if any.
    fn enter(&self, op: &'static str) -> Result<MutexGuard<'_, MockState>, RemoteError> {
        let mut state = self.state();
        *state.calls.entry(op).or_insert(0) += 1;
        match state.failures.remove(op) {
            Some(err) => Err(err),
            None => Ok(state),
        }
    }

    pub fn add_document(&self, document: Document) {
        let mut state = self.state();
        state.next_id = state.next_id.max(document.document_id.get() + 1);
        state.documents.insert(document.document_id, document);
    }

    pub fn add_file(&self, path: &str, content_type: &str, bytes: Vec<u8>) {
        self.state().files.insert(
            path.to_owned(),
            StoredFile {
                content_type: content_type.to_owned(),
                bytes,
            },
        );
    }

    pub fn set_interfaces(&self, interfaces: Vec<Interface>) {
        self.state().interfaces = interfaces;
    }

    /// Make the next call to `op` fail with `err`.
    pub fn fail_next(&self, op: &'static str, err: RemoteError) {
        self.state().failures.insert(op, err);
    }

    pub fn calls(&self, op: &str) -> usize {
        self.state().calls.get(op).copied().unwrap_or(0)
    }

    pub fn reset_calls(&self) {
        self.state().calls.clear();
    }

    pub fn document(&self, id: DocumentId) -> Option<Document> {
        self.state().documents.get(&id).cloned()
    }

    pub fn document_count(&self) -> usize {
        self.state().documents.len()
    }

    pub fn deleted(&self) -> Vec<DocumentId> {
        self.state().deleted.clone()
    }

    pub fn permalink_batches(&self) -> Vec<Vec<PermalinkRequest>> {
        self.state().permalink_batches.clone()
    }

    pub fn metadata_writes(&self) -> Vec<(DocumentId, MetadataFields)> {
        self.state().metadata_writes.clone()
    }

    /// Documents created through [`DamApi::create_document`], with the file
    /// name they were uploaded under.
    pub fn uploads(&self) -> Vec<(DocumentId, String)> {
        self.state().uploads.clone()
    }
}

fn file_stem(file_name: &str) -> &str {
    let base = file_name.rsplit('/').next().unwrap_or(file_name);
    base.rsplit_once('.').map_or(base, |(stem, _)| stem)
}

fn apply_metadata(doc: &mut Document, fields: &MetadataFields) {
    if let Some(ref name) = fields.name {
        name.clone_into(&mut doc.name);
    }
    if let Some(ref description) = fields.description {
        description.clone_into(&mut doc.description);
    }
    if let Some(ref credits) = fields.credits {
        credits.clone_into(&mut doc.credits);
    }
    if let Some(ref rights) = fields.rights {
        rights.clone_into(&mut doc.rights);
    }
    if let Some(ref tags) = fields.tags {
        doc.tags = tags
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_owned)
            .collect();
    }
}

impl DamApi for MockDam {
    fn language(&self) -> String {
        self.language.clone()
    }

    fn cdn_prefix(&self) -> String {
        self.cdn_prefix.clone()
    }

    fn url_hint(&self) -> String {
        self.url_hint.clone()
    }

    fn search(&self, criteria: &SearchCriteria) -> Result<SearchResult, RemoteError> {
        let state = self.enter("search")?;
        let needle = criteria.querystring.to_lowercase();
        let mut hits: Vec<&Document> = state
            .documents
            .values()
            .filter(|d| needle.is_empty() || d.name.to_lowercase().contains(&needle))
            .collect();
        if criteria.sort_direction == SortDirection::Desc {
            hits.reverse();
        }
        let total_count = hits.len() as u64;
        let documents = if criteria.pagesize == 0 {
            hits.into_iter().cloned().collect()
        } else {
            let size = criteria.pagesize as usize;
            hits.into_iter()
                .skip(criteria.page as usize * size)
                .take(size)
                .cloned()
                .collect()
        };
        Ok(SearchResult {
            total_count,
            documents,
        })
    }

    fn get_document(&self, id: DocumentId) -> Result<Document, RemoteError> {
        let state = self.enter("get_document")?;
        state
            .documents
            .get(&id)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(format!("document {id}")))
    }

    fn create_document(
        &self,
        content_b64: &str,
        file_name: &str,
    ) -> Result<DocumentId, RemoteError> {
        let mut state = self.enter("create_document")?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(content_b64)
            .map_err(|e| RemoteError::Serialization(e.to_string()))?;
        let dims = decode_dimensions(&bytes).unwrap_or_default();
        let id = DocumentId::new(state.next_id);
        state.next_id += 1;

        let path = format!("{id}/{file_name}");
        state.files.insert(
            path.clone(),
            StoredFile {
                content_type: mime_for_file_name(file_name).to_owned(),
                bytes,
            },
        );
        let interface = state.interfaces.first().cloned().unwrap_or(Interface {
            id: 0,
            name: "Web".to_owned(),
        });
        let document = Document {
            document_id: id,
            name: file_stem(file_name).to_owned(),
            file_name: file_name.to_owned(),
            is_image: true,
            sub_document_list: vec![Rendition {
                version_name: "Original".to_owned(),
                is_original: true,
                width: dims.width,
                height: dims.height,
                sub_document_path: path,
            }],
            interface_list: vec![InterfaceRef {
                name: interface.name,
                id: interface.id,
            }],
            ..Document::default()
        };
        state.documents.insert(id, document);
        state.uploads.push((id, file_name.to_owned()));
        Ok(id)
    }

    fn delete_document(&self, id: DocumentId) -> Result<(), RemoteError> {
        let mut state = self.enter("delete_document")?;
        if state.documents.remove(&id).is_none() {
            return Err(RemoteError::NotFound(format!("document {id}")));
        }
        state.deleted.push(id);
        Ok(())
    }

    fn set_metadata(&self, id: DocumentId, fields: &MetadataFields) -> Result<(), RemoteError> {
        let mut state = self.enter("set_metadata")?;
        let doc = state
            .documents
            .get_mut(&id)
            .ok_or_else(|| RemoteError::NotFound(format!("document {id}")))?;
        apply_metadata(doc, fields);
        state.metadata_writes.push((id, fields.clone()));
        Ok(())
    }

    fn get_permalink(&self, request: &PermalinkRequest) -> Result<String, RemoteError> {
        let state = self.enter("get_permalink")?;
        if !state.documents.contains_key(&request.document_id) {
            return Err(RemoteError::NotFound(format!(
                "document {}",
                request.document_id
            )));
        }
        let segment = request.permalink_token().unwrap_or_else(|| {
            format!(
                "{}-{}x{}",
                request.document_id, request.width, request.height
            )
        });
        Ok(format!("{}/{segment}", self.cdn_prefix))
    }

    fn create_permalinks(&self, requests: &[PermalinkRequest]) -> Result<(), RemoteError> {
        let mut state = self.enter("create_permalinks")?;
        state.permalink_batches.push(requests.to_vec());
        Ok(())
    }

    fn document_link(
        &self,
        _interface_name: &str,
        sub_document_path: &str,
    ) -> Result<Option<String>, RemoteError> {
        let state = self.enter("document_link")?;
        Ok(state
            .files
            .contains_key(sub_document_path)
            .then(|| format!("{FILE_SCHEME}{sub_document_path}")))
    }

    fn download(&self, id: DocumentId) -> Result<String, RemoteError> {
        let state = self.enter("download")?;
        if !state.documents.contains_key(&id) {
            return Err(RemoteError::NotFound(format!("document {id}")));
        }
        Ok(format!("{DOWNLOAD_SCHEME}{id}"))
    }

    fn fetch(&self, url: &str) -> Result<Vec<u8>, RemoteError> {
        let state = self.enter("fetch")?;
        let path = if let Some(path) = url.strip_prefix(FILE_SCHEME) {
            path.to_owned()
        } else if let Some(id) = url.strip_prefix(DOWNLOAD_SCHEME) {
            let id: DocumentId = id
                .parse()
                .map_err(|_| RemoteError::NotFound(url.to_owned()))?;
            state
                .documents
                .get(&id)
                .and_then(Document::original)
                .map(|r| r.sub_document_path.clone())
                .ok_or_else(|| RemoteError::NotFound(url.to_owned()))?
        } else {
            return Err(RemoteError::NotFound(url.to_owned()));
        };
        state
            .files
            .get(&path)
            .map(|f| f.bytes.clone())
            .ok_or_else(|| RemoteError::NotFound(url.to_owned()))
    }

    fn head_content_type(&self, url: &str) -> Result<Option<String>, RemoteError> {
        let state = self.enter("head")?;
        let path = url
            .strip_prefix(FILE_SCHEME)
            .ok_or_else(|| RemoteError::NotFound(url.to_owned()))?;
        state
            .files
            .get(path)
            .map(|f| Some(f.content_type.clone()))
            .ok_or_else(|| RemoteError::NotFound(url.to_owned()))
    }

    fn interfaces(&self) -> Result<Vec<Interface>, RemoteError> {
        let state = self.enter("interfaces")?;
        Ok(state.interfaces.clone())
    }

    fn can_upload(&self) -> Result<bool, RemoteError> {
        let _state = self.enter("can_upload")?;
        Ok(self.can_upload)
    }

    fn whoami(&self) -> Result<serde_json::Value, RemoteError> {
        let _state = self.enter("whoami")?;
        Ok(serde_json::json!({ "Name": "mock", "CanUpload": self.can_upload }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(id: u64, name: &str) -> Document {
        Document {
            document_id: DocumentId::new(id),
            name: name.to_owned(),
            ..Document::default()
        }
    }

    #[test]
    fn search_filters_and_pages() {
        let dam = MockDam::new();
        for i in 1..=5 {
            dam.add_document(named(i, "boat"));
        }
        dam.add_document(named(6, "car"));

        let all = dam
            .search(&SearchCriteria::default().query("BOAT").page(0, 0))
            .unwrap();
        assert_eq!(all.total_count, 5);
        assert_eq!(all.documents.len(), 5);
        assert_eq!(all.documents[0].document_id, DocumentId::new(5));

        let second = dam
            .search(
                &SearchCriteria::default()
                    .query("boat")
                    .page(1, 2)
                    .sort(SortDirection::Asc),
            )
            .unwrap();
        let ids: Vec<u64> = second.documents.iter().map(|d| d.document_id.get()).collect();
        assert_eq!(ids, [3, 4]);
        assert_eq!(dam.calls("search"), 2);
    }

    #[test]
    fn injected_failure_fires_once() {
        let dam = MockDam::new();
        dam.add_document(named(1, "a"));
        dam.fail_next("get_document", RemoteError::Transport("reset".into()));
        assert!(dam.get_document(DocumentId::new(1)).is_err());
        assert!(dam.get_document(DocumentId::new(1)).is_ok());
        assert_eq!(dam.calls("get_document"), 2);
    }

    #[test]
    fn create_then_download_returns_uploaded_bytes() {
        let dam = MockDam::new();
        let b64 = base64::engine::general_purpose::STANDARD.encode(b"raw bytes");
        let id = dam.create_document(&b64, "harbour.jpg").unwrap();
        let doc = dam.document(id).unwrap();
        assert_eq!(doc.name, "harbour");
        assert_eq!(doc.primary_interface(), Some("Web"));

        let url = dam.download(id).unwrap();
        assert_eq!(dam.fetch(&url).unwrap(), b"raw bytes");
        assert_eq!(dam.uploads(), vec![(id, "harbour.jpg".to_owned())]);
    }

    #[test]
    fn delete_records_and_removes() {
        let dam = MockDam::new();
        dam.add_document(named(9, "x"));
        dam.delete_document(DocumentId::new(9)).unwrap();
        assert_eq!(dam.deleted(), vec![DocumentId::new(9)]);
        assert!(matches!(
            dam.delete_document(DocumentId::new(9)),
            Err(RemoteError::NotFound(_))
        ));
    }

    #[test]
    fn set_metadata_updates_document() {
        let dam = MockDam::new();
        dam.add_document(named(2, "old"));
        let fields = MetadataFields {
            name: Some("new".into()),
            tags: Some("a, b".into()),
            ..MetadataFields::default()
        };
        dam.set_metadata(DocumentId::new(2), &fields).unwrap();
        let doc = dam.document(DocumentId::new(2)).unwrap();
        assert_eq!(doc.name, "new");
        assert_eq!(doc.tags, ["a", "b"]);
    }

    #[test]
    fn permalink_url_uses_token_segment() {
        let dam = MockDam::new().with_cdn_prefix("https://cdn.test/");
        dam.add_document(named(3, "x"));
        let url = dam
            .get_permalink(&PermalinkRequest {
                document_id: DocumentId::new(3),
                width: 10,
                height: 20,
                token: Some("site-1-abc".into()),
            })
            .unwrap();
        assert_eq!(url, "https://cdn.test/site-1-abc-10x20");
    }
}
