//! Units of work queued by the sync orchestrator.

use crate::types::{AttachmentId, DocumentId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    /// Local library to the DAM.
    Push,
    /// DAM to the local library.
    Pull,
}

impl SyncDirection {
    /// Scheduler hook name. Single-flight is enforced per hook.
    pub const fn hook(self) -> &'static str {
        match self {
            Self::Push => "imageshop_import_wp_to_imageshop",
            Self::Pull => "imageshop_import_imageshop_to_wp",
        }
    }

    pub fn from_hook(hook: &str) -> Option<Self> {
        [Self::Push, Self::Pull].into_iter().find(|d| d.hook() == hook)
    }
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Push => "push",
            Self::Pull => "pull",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SyncItem {
    Local {
        id: AttachmentId,
    },
    Remote {
        document_id: DocumentId,
        file_name: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncJob {
    pub direction: SyncDirection,
    pub batch: Vec<SyncItem>,
    pub scheduled_at: DateTime<Utc>,
}

impl SyncJob {
    pub fn hook(&self) -> &'static str {
        self.direction.hook()
    }
}
