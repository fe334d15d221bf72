//! Core engine of the Imageshop media mirror.
//!
//! This crate ties the storage seams and the DAM client together into the
//! [`MediaLibrary`] composition root. Per request or per job a caller opens a
//! [`ResolverSession`] that resolves sizes through the two-layer permalink
//! cache, projects remote documents onto the local size index, and picks the
//! delivery URL for rendering. The library also drives chunked push/pull
//! synchronization, single-document export and remote duplicate cleanup.

pub mod config;
pub mod export;
pub mod geometry;
pub mod library;
pub mod maintenance;
pub mod permalink;
pub mod projector;
pub mod render;
pub mod resolver;
pub mod sync;

pub use config::LibraryConfig;
pub use export::{ExportReport, LinkedAttachment};
pub use geometry::{fit_box, matches_ratio};
pub use library::{MediaLibrary, RemoteMetadata};
pub use maintenance::DuplicateReport;
pub use permalink::{permalink_token, site_domain, PermalinkSession};
pub use render::Srcset;
pub use resolver::ResolverSession;
pub use sync::{JobOutcome, SyncStart, SyncStatus};

use imageshop_schema::AttachmentId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("attachment not found: {0}")]
    AttachmentNotFound(AttachmentId),
    #[error("store error: {0}")]
    Store(#[from] imageshop_store::StoreError),
    #[error("remote error: {0}")]
    Remote(#[from] imageshop_remote::RemoteError),
    #[error("schema error: {0}")]
    Schema(#[from] imageshop_schema::SchemaError),
}

impl CoreError {
    /// Whether retrying on the next scheduled run may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Remote(e) => e.is_transient(),
            Self::Store(imageshop_store::StoreError::Io(_)) => true,
            _ => false,
        }
    }
}
