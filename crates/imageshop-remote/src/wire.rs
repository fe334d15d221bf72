//! Request and response bodies of the DAM JSON API.
//!
//! Field names follow the wire exactly: search and metadata use PascalCase,
//! permalink payloads are all lowercase, document creation is camelCase.

use imageshop_schema::{Document, DocumentId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

/// Body of `POST /Search2`. Defaults match what the DAM UI sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SearchCriteria {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub interface_ids: Vec<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub querystring: String,
    pub page: u32,
    pub pagesize: u32,
    pub document_type: Vec<String>,
    pub sort_by: String,
    pub sort_direction: SortDirection,
}

impl Default for SearchCriteria {
    fn default() -> Self {
        Self {
            interface_ids: Vec::new(),
            language: None,
            querystring: String::new(),
            page: 0,
            pagesize: 80,
            document_type: vec!["IMAGE".to_owned()],
            sort_by: "DEFAULT".to_owned(),
            sort_direction: SortDirection::Desc,
        }
    }
}

impl SearchCriteria {
    #[must_use]
    pub fn query(mut self, q: impl Into<String>) -> Self {
        self.querystring = q.into();
        self
    }

    #[must_use]
    pub fn page(mut self, page: u32, pagesize: u32) -> Self {
        self.page = page;
        self.pagesize = pagesize;
        self
    }

    #[must_use]
    pub fn sort(mut self, direction: SortDirection) -> Self {
        self.sort_direction = direction;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(rename = "NumberOfDocuments", default)]
    pub total_count: u64,
    #[serde(rename = "DocumentList", default)]
    pub documents: Vec<Document>,
}

impl SearchResult {
    /// Number of pages of `pagesize` needed to cover `total_count`.
    pub fn total_pages(&self, pagesize: u32) -> u64 {
        if pagesize == 0 {
            return 1;
        }
        self.total_count.div_ceil(u64::from(pagesize))
    }
}

/// One permalink to create: a document rendered into a `width x height` box.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PermalinkRequest {
    pub document_id: DocumentId,
    pub width: u32,
    pub height: u32,
    /// Attachment token. The wire token is suffixed with the box.
    pub token: Option<String>,
}

impl PermalinkRequest {
    /// `"{token}-{w}x{h}"`, the path segment the CDN serves this permalink under.
    pub fn permalink_token(&self) -> Option<String> {
        self.token
            .as_ref()
            .map(|t| format!("{t}-{}x{}", self.width, self.height))
    }

    pub fn payload(&self, language: &str, url_hint: &str) -> PermalinkPayload {
        PermalinkPayload {
            language: language.to_owned(),
            documentid: self.document_id,
            cropmode: "ZOOM".to_owned(),
            width: self.width,
            height: self.height,
            x1: 0,
            y1: 0,
            x2: 100,
            y2: 100,
            previewwidth: 100,
            previewheight: 100,
            optionalurlhint: url_hint.to_owned(),
            permalinktoken: self.permalink_token(),
        }
    }
}

/// Wire body of the permalink endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermalinkPayload {
    pub language: String,
    pub documentid: DocumentId,
    pub cropmode: String,
    pub width: u32,
    pub height: u32,
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
    pub previewwidth: u32,
    pub previewheight: u32,
    #[serde(default)]
    pub optionalurlhint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permalinktoken: Option<String>,
}

impl PermalinkPayload {
    /// Generic cache key for this exact payload.
    pub fn cache_key(&self) -> Result<String, serde_json::Error> {
        let bytes = serde_json::to_vec(self)?;
        let hash = blake3::hash(&bytes).to_hex();
        Ok(format!("imageshop_permalink_{}", &hash[..32]))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermalinkResponse {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDocumentPayload {
    #[serde(rename = "bFile")]
    pub b_file: String,
    #[serde(rename = "fileName")]
    pub file_name: String,
    #[serde(rename = "interfaceName")]
    pub interface_name: String,
    pub doc: NewDocument,
}

impl CreateDocumentPayload {
    /// Slashes are not allowed in DAM file names.
    pub fn new(content_b64: &str, file_name: &str, interface: &str) -> Self {
        Self {
            b_file: content_b64.to_owned(),
            file_name: file_name.replace('/', "_"),
            interface_name: interface.to_owned(),
            doc: NewDocument {
                active: true,
                interfaces: vec![InterfaceSelector {
                    id: interface.to_owned(),
                }],
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDocument {
    #[serde(rename = "Active")]
    pub active: bool,
    pub interfaces: Vec<InterfaceSelector>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceSelector {
    pub id: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CreatedDocument {
    #[serde(rename = "docId")]
    pub doc_id: DocumentId,
}

/// Editable document fields. Unset fields are left untouched remotely.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetadataFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credits: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rights: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl MetadataFields {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetMetadataPayload {
    #[serde(rename = "DocumentId")]
    pub document_id: DocumentId,
    #[serde(flatten)]
    pub fields: MetadataFields,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DownloadRequest {
    pub document_id: DocumentId,
    pub quality: String,
    pub download_as_attachment: bool,
}

impl DownloadRequest {
    pub fn original(document_id: DocumentId) -> Self {
        Self {
            document_id,
            quality: "OriginalFile".to_owned(),
            download_as_attachment: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DownloadResponse {
    pub url: String,
}

/// A DAM interface (a tenant-level collection documents are uploaded into).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Interface {
    pub id: u64,
    pub name: String,
}
