//! The persisted local attachment record and its two size indices.

use crate::types::{AttachmentId, Dimensions, DocumentId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// MIME types the DAM accepts as images.
pub const ALLOWED_IMAGE_MIMES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/bmp",
    "image/tiff",
    "image/webp",
];

pub fn is_allowed_mime(mime: &str) -> bool {
    ALLOWED_IMAGE_MIMES.contains(&mime)
}

/// Guess a MIME type from a file extension.
pub fn mime_for_file_name(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, e)| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" | "jpe" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
}

/// One resolved delivery URL with the pixel box it serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedSize {
    pub width: u32,
    pub height: u32,
    pub source_url: String,
    pub file: String,
}

impl ResolvedSize {
    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }

    /// A stored 0x0 entry. These come from the DAM not having finished
    /// processing an upload and trigger the self-heal path.
    pub fn is_degenerate(&self) -> bool {
        self.width == 0 && self.height == 0
    }
}

/// Size index: the projection of a remote document onto named sizes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaSizes {
    #[serde(default)]
    pub sizes: BTreeMap<String, ResolvedSize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credits: Option<String>,
}

impl MediaSizes {
    pub fn original(&self) -> Option<&ResolvedSize> {
        self.sizes.get("original")
    }
}

/// Key of the durable permalink index: `{file}-{width}-{height}-{crop}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PermalinkKey {
    pub file: String,
    pub width: u32,
    pub height: u32,
    pub crop: bool,
}

impl PermalinkKey {
    pub fn new(file: impl Into<String>, width: u32, height: u32, crop: bool) -> Self {
        Self {
            file: file.into(),
            width,
            height,
            crop,
        }
    }
}

impl fmt::Display for PermalinkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}",
            self.file,
            self.width,
            self.height,
            u8::from(self.crop)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRecord {
    pub id: AttachmentId,
    pub title: String,
    /// Path of the attached file, relative to the uploads directory.
    pub file_name: String,
    pub mime_type: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<DocumentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permalink_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_sizes: Option<MediaSizes>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub permalinks: BTreeMap<String, ResolvedSize>,
}

impl AttachmentRecord {
    pub fn new(id: AttachmentId, title: impl Into<String>, file_name: impl Into<String>) -> Self {
        let file_name = file_name.into();
        let mime_type = mime_for_file_name(&file_name).to_owned();
        Self {
            id,
            title: title.into(),
            file_name,
            mime_type,
            created_at: Utc::now(),
            document_id: None,
            permalink_token: None,
            media_sizes: None,
            permalinks: BTreeMap::new(),
        }
    }

    pub fn is_image(&self) -> bool {
        is_allowed_mime(&self.mime_type)
    }

    pub fn is_linked(&self) -> bool {
        self.document_id.is_some()
    }

    /// Final path component of the attached file.
    pub fn base_name(&self) -> &str {
        self.file_name
            .rsplit('/')
            .next()
            .unwrap_or(&self.file_name)
    }

    pub fn permalink(&self, key: &PermalinkKey) -> Option<&ResolvedSize> {
        self.permalinks.get(&key.to_string())
    }

    /// Insert into the permalink index. Existing entries are never overwritten.
    pub fn remember_permalink(&mut self, key: &PermalinkKey, size: ResolvedSize) -> bool {
        use std::collections::btree_map::Entry;
        match self.permalinks.entry(key.to_string()) {
            Entry::Vacant(v) => {
                v.insert(size);
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    pub fn size(&self, slug: &str) -> Option<&ResolvedSize> {
        self.media_sizes.as_ref().and_then(|m| m.sizes.get(slug))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AttachmentRecord {
        AttachmentRecord::new(AttachmentId::new(3), "Boat", "2024/05/boat.JPG")
    }

    fn size(w: u32, h: u32) -> ResolvedSize {
        ResolvedSize {
            width: w,
            height: h,
            source_url: format!("https://cdn/{w}x{h}"),
            file: "Boat".into(),
        }
    }

    #[test]
    fn mime_is_guessed_from_extension() {
        let a = sample();
        assert_eq!(a.mime_type, "image/jpeg");
        assert!(a.is_image());
        assert_eq!(mime_for_file_name("doc.pdf"), "application/pdf");
        assert_eq!(mime_for_file_name("noext"), "application/octet-stream");
        assert!(!is_allowed_mime("image/svg+xml"));
    }

    #[test]
    fn base_name_strips_directories() {
        assert_eq!(sample().base_name(), "boat.JPG");
        let flat = AttachmentRecord::new(AttachmentId::new(1), "x", "x.png");
        assert_eq!(flat.base_name(), "x.png");
    }

    #[test]
    fn permalink_key_format() {
        assert_eq!(PermalinkKey::new("Boat", 300, 200, true).to_string(), "Boat-300-200-1");
        assert_eq!(PermalinkKey::new("Boat", 300, 0, false).to_string(), "Boat-300-0-0");
    }

    #[test]
    fn permalink_entries_are_immutable() {
        let mut a = sample();
        let key = PermalinkKey::new("Boat", 300, 200, false);
        assert!(a.remember_permalink(&key, size(300, 200)));
        assert!(!a.remember_permalink(&key, size(1, 1)));
        assert_eq!(a.permalink(&key), Some(&size(300, 200)));
    }

    #[test]
    fn record_serde_skips_empty_fields() {
        let a = sample();
        let json = serde_json::to_string(&a).unwrap();
        assert!(!json.contains("document_id"));
        assert!(!json.contains("permalinks"));
        let back: AttachmentRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, a);
    }

    #[test]
    fn degenerate_size_detection() {
        assert!(size(0, 0).is_degenerate());
        assert!(!size(0, 10).is_degenerate());
    }
}
