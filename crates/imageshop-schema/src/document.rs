//! Typed projection of a remote DAM document.
//!
//! The remote API returns loosely typed JSON with PascalCase keys, nullable
//! lists and fields that are sometimes a string and sometimes an array. All of
//! that is normalised here, once, at deserialization time. Unknown fields are
//! ignored and only `DocumentID` is required.

use crate::types::{Dimensions, DocumentId};
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Document {
    #[serde(rename = "DocumentID")]
    pub document_id: DocumentId,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub credits: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub rights: String,
    #[serde(default, deserialize_with = "string_or_list")]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub language: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub created: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_image: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_video: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub file_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub sub_document_list: Vec<Rendition>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub interface_list: Vec<InterfaceRef>,
}

/// One physical file variant of a [`Document`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Rendition {
    #[serde(default, deserialize_with = "null_as_default")]
    pub version_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_original: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub width: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub height: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub sub_document_path: String,
}

impl Rendition {
    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }
}

/// Interface membership as reported on a document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceRef {
    #[serde(rename = "InterfaceName", default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(rename = "InterfaceID", default, deserialize_with = "null_as_default")]
    pub id: u64,
}

impl Document {
    /// The rendition treated as the original file.
    ///
    /// An explicit `IsOriginal` flag wins. Otherwise the first rendition whose
    /// version name starts with "original" (any case) is used.
    pub fn original(&self) -> Option<&Rendition> {
        self.sub_document_list
            .iter()
            .find(|r| r.is_original)
            .or_else(|| {
                self.sub_document_list.iter().find(|r| {
                    r.version_name
                        .get(..8)
                        .is_some_and(|p| p.eq_ignore_ascii_case("original"))
                })
            })
    }

    /// Dimensions of the original rendition, zero when there is none.
    pub fn original_dimensions(&self) -> Dimensions {
        self.original()
            .map_or(Dimensions::ZERO, Rendition::dimensions)
    }

    /// Human readable caption: `"description (credits)"`, or whichever half is set.
    pub fn caption(&self) -> Option<String> {
        let desc = self.description.trim();
        let credits = self.credits.trim();
        match (desc.is_empty(), credits.is_empty()) {
            (true, true) => None,
            (false, true) => Some(desc.to_owned()),
            (true, false) => Some(credits.to_owned()),
            (false, false) => Some(format!("{desc} ({credits})")),
        }
    }

    /// Name of the first interface the document belongs to.
    pub fn primary_interface(&self) -> Option<&str> {
        self.interface_list.first().map(|i| i.name.as_str())
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Tags {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<Tags>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(Tags::Many(v)) => v,
        Some(Tags::One(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_owned)
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Document {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn minimal_document_parses() {
        let doc = parse(r#"{"DocumentID": 12}"#);
        assert_eq!(doc.document_id, DocumentId::new(12));
        assert!(doc.name.is_empty());
        assert!(doc.sub_document_list.is_empty());
        assert!(doc.original().is_none());
        assert_eq!(doc.original_dimensions(), Dimensions::ZERO);
    }

    #[test]
    fn missing_document_id_is_rejected() {
        let r: Result<Document, _> = serde_json::from_str(r#"{"Name": "x"}"#);
        assert!(r.is_err());
    }

    #[test]
    fn nulls_and_unknown_fields_are_tolerated() {
        let doc = parse(
            r#"{"DocumentID": 1, "Name": null, "SubDocumentList": null,
                "Tags": null, "SomethingNew": {"a": 1}}"#,
        );
        assert!(doc.name.is_empty());
        assert!(doc.tags.is_empty());
    }

    #[test]
    fn tags_accept_string_or_list() {
        let a = parse(r#"{"DocumentID": 1, "Tags": "sea, boat ,"}"#);
        assert_eq!(a.tags, vec!["sea", "boat"]);
        let b = parse(r#"{"DocumentID": 1, "Tags": ["sea", "boat"]}"#);
        assert_eq!(b.tags, vec!["sea", "boat"]);
    }

    #[test]
    fn original_prefers_flag() {
        let doc = parse(
            r#"{"DocumentID": 1, "SubDocumentList": [
                {"VersionName": "Original", "Width": 10, "Height": 10},
                {"VersionName": "Master", "IsOriginal": true, "Width": 4000, "Height": 3000}
            ]}"#,
        );
        assert_eq!(doc.original_dimensions(), Dimensions::new(4000, 3000));
    }

    #[test]
    fn original_falls_back_to_version_name_prefix() {
        let doc = parse(
            r#"{"DocumentID": 1, "SubDocumentList": [
                {"VersionName": "Thumb", "Width": 10, "Height": 10},
                {"VersionName": "ORIGINAL file", "Width": 800, "Height": 600},
                {"VersionName": "original", "Width": 1, "Height": 1}
            ]}"#,
        );
        assert_eq!(doc.original_dimensions(), Dimensions::new(800, 600));
    }

    #[test]
    fn short_version_names_do_not_match() {
        let doc = parse(
            r#"{"DocumentID": 1, "SubDocumentList": [{"VersionName": "orig"}]}"#,
        );
        assert!(doc.original().is_none());
    }

    #[test]
    fn caption_combinations() {
        let mut doc = parse(r#"{"DocumentID": 1}"#);
        assert_eq!(doc.caption(), None);
        doc.credits = "Jane".into();
        assert_eq!(doc.caption().as_deref(), Some("Jane"));
        doc.description = "A boat".into();
        assert_eq!(doc.caption().as_deref(), Some("A boat (Jane)"));
        doc.credits.clear();
        assert_eq!(doc.caption().as_deref(), Some("A boat"));
    }

    #[test]
    fn interface_list_parses() {
        let doc = parse(
            r#"{"DocumentID": 1, "InterfaceList": [{"InterfaceName": "Web", "InterfaceID": 7}]}"#,
        );
        assert_eq!(doc.primary_interface(), Some("Web"));
        assert_eq!(doc.interface_list[0].id, 7);
    }
}
