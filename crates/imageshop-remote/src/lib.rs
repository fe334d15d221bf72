//! Client side of the Imageshop DAM.
//!
//! [`DamApi`] is the seam every engine component talks through. [`HttpClient`]
//! implements it over the SaaS JSON API, and [`mock::MockDam`] implements it in
//! memory with call counters for deterministic tests. The crate also owns
//! locale-to-language resolution and the out-of-band probe that recovers
//! original dimensions the DAM has not reported yet.

pub mod config;
pub mod http;
pub mod language;
pub mod mock;
pub mod probe;
pub mod wire;

pub use config::RemoteConfig;
pub use http::HttpClient;
pub use language::resolve_language;
pub use probe::{decode_dimensions, probe_dimensions};
pub use wire::{
    Interface, MetadataFields, PermalinkPayload, PermalinkRequest, SearchCriteria, SearchResult,
    SortDirection,
};

use imageshop_schema::{Document, DocumentId};
use thiserror::Error;

/// Production API root.
pub const DEFAULT_API_URL: &str = "https://api.imageshop.no";
/// Production CDN root for permalink delivery URLs.
pub const DEFAULT_CDN_PREFIX: &str = "https://v.imgi.no";

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP transport error: {0}")]
    Transport(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("API error {code}: {message}")]
    Api { code: u16, message: String },
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("remote config error: {0}")]
    Config(String),
    #[error("dimension probe failed: {0}")]
    Probe(String),
}

impl RemoteError {
    /// Network failures, timeouts, throttling and 5xx responses. These are
    /// worth retrying on the next scheduled run, never within the same call.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Io(_) | Self::Transport(_) => true,
            Self::Api { code, .. } => *code >= 500 || *code == 429,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Operations the engine needs from the DAM.
///
/// Every method either returns a parsed payload or a [`RemoteError`]; nothing
/// panics across this boundary.
pub trait DamApi: Send + Sync {
    /// Language code attached to every call.
    fn language(&self) -> String;

    /// Root of permalink delivery URLs, without a trailing slash.
    fn cdn_prefix(&self) -> String;

    /// Site URL sent as the permalink URL hint.
    fn url_hint(&self) -> String;

    fn search(&self, criteria: &SearchCriteria) -> Result<SearchResult, RemoteError>;

    fn get_document(&self, id: DocumentId) -> Result<Document, RemoteError>;

    /// Upload a base64 encoded file into the configured interface.
    fn create_document(&self, content_b64: &str, file_name: &str)
        -> Result<DocumentId, RemoteError>;

    fn delete_document(&self, id: DocumentId) -> Result<(), RemoteError>;

    fn set_metadata(&self, id: DocumentId, fields: &MetadataFields) -> Result<(), RemoteError>;

    /// Create a single permalink synchronously and return its URL.
    fn get_permalink(&self, request: &PermalinkRequest) -> Result<String, RemoteError>;

    /// Create many permalinks in one call. Delivery URLs are already known to
    /// the caller, so nothing is returned.
    fn create_permalinks(&self, requests: &[PermalinkRequest]) -> Result<(), RemoteError>;

    /// Temporary direct link to a sub-document, `None` when the DAM has none.
    fn document_link(
        &self,
        interface_name: &str,
        sub_document_path: &str,
    ) -> Result<Option<String>, RemoteError>;

    /// Signed temporary URL for the original file of a document.
    fn download(&self, id: DocumentId) -> Result<String, RemoteError>;

    /// Fetch the body of an arbitrary URL.
    fn fetch(&self, url: &str) -> Result<Vec<u8>, RemoteError>;

    /// Content type reported by a HEAD request, if any.
    fn head_content_type(&self, url: &str) -> Result<Option<String>, RemoteError>;

    fn interfaces(&self) -> Result<Vec<Interface>, RemoteError>;

    fn can_upload(&self) -> Result<bool, RemoteError>;

    /// Identity of the token owner. Succeeds only for a valid token.
    fn whoami(&self) -> Result<serde_json::Value, RemoteError>;
}
