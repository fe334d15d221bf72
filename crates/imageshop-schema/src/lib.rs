//! Data model shared by every Imageshop crate.
//!
//! This crate holds the typed projections of remote DAM documents
//! ([`Document`], [`Rendition`]), the persisted local attachment record
//! ([`AttachmentRecord`]) with its size and permalink indices, the image size
//! table used to derive named sizes, and the [`SyncJob`] unit of work queued by
//! the sync orchestrator. Nothing here performs I/O.

pub mod attachment;
pub mod document;
pub mod sizes;
pub mod sync;
pub mod types;

pub use attachment::{
    is_allowed_mime, mime_for_file_name, AttachmentRecord, MediaSizes, PermalinkKey, ResolvedSize,
    ALLOWED_IMAGE_MIMES,
};
pub use document::{Document, InterfaceRef, Rendition};
pub use sizes::{ImageSize, ImageSizeTable, SizeSpec};
pub use sync::{SyncDirection, SyncItem, SyncJob};
pub use types::{AttachmentId, Dimensions, DocumentId};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("invalid size specification: {0}")]
    InvalidSize(String),
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_error_display_invalid_size() {
        let e = SchemaError::InvalidSize("12xq".to_owned());
        assert!(e.to_string().contains("12xq"));
    }

    #[test]
    fn schema_error_display_invalid_id() {
        let e = SchemaError::InvalidId("abc".to_owned());
        assert!(e.to_string().contains("invalid identifier"));
    }
}
