//! Registered image sizes and the requested-size vocabulary.

use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A registered size: a bounding box, optionally cropped to fill it exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub crop: bool,
}

impl ImageSize {
    pub const fn new(width: u32, height: u32, crop: bool) -> Self {
        Self {
            width,
            height,
            crop,
        }
    }
}

/// Ordered table of slug to [`ImageSize`]. Iteration follows registration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSizeTable {
    entries: Vec<(String, ImageSize)>,
}

impl ImageSizeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The sizes a stock WordPress install registers.
    pub fn wordpress_defaults() -> Self {
        let mut t = Self::new();
        t.register("thumbnail", ImageSize::new(150, 150, true));
        t.register("medium", ImageSize::new(300, 300, false));
        t.register("medium_large", ImageSize::new(768, 0, false));
        t.register("large", ImageSize::new(1024, 1024, false));
        t.register("1536x1536", ImageSize::new(1536, 1536, false));
        t.register("2048x2048", ImageSize::new(2048, 2048, false));
        t
    }

    /// Register or replace a size. Replacing keeps the original position.
    pub fn register(&mut self, slug: impl Into<String>, size: ImageSize) {
        let slug = slug.into();
        if let Some(entry) = self.entries.iter_mut().find(|(s, _)| *s == slug) {
            entry.1 = size;
        } else {
            self.entries.push((slug, size));
        }
    }

    pub fn get(&self, slug: &str) -> Option<ImageSize> {
        self.entries
            .iter()
            .find(|(s, _)| s == slug)
            .map(|(_, size)| *size)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ImageSize)> + '_ {
        self.entries.iter().map(|(s, size)| (s.as_str(), *size))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// What a caller asks for when resolving an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SizeSpec {
    /// A slug from the [`ImageSizeTable`].
    Named(String),
    /// A literal pixel box.
    Box { width: u32, height: u32, crop: bool },
    /// The original rendition. `"full"` is accepted as an alias.
    Original,
}

impl SizeSpec {
    pub fn named(slug: impl Into<String>) -> Self {
        Self::Named(slug.into())
    }

    pub const fn boxed(width: u32, height: u32) -> Self {
        Self::Box {
            width,
            height,
            crop: false,
        }
    }
}

impl FromStr for SizeSpec {
    type Err = SchemaError;

    /// Parses `original`/`full`, `WIDTHxHEIGHT` (optionally suffixed `-crop`),
    /// or falls back to a named slug.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(SchemaError::InvalidSize(s.to_owned()));
        }
        if s == "original" || s == "full" {
            return Ok(Self::Original);
        }
        let (dims, crop) = match s.strip_suffix("-crop") {
            Some(d) => (d, true),
            None => (s, false),
        };
        if let Some((w, h)) = dims.split_once('x') {
            let numeric = |p: &str| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit());
            if numeric(w) && numeric(h) {
                let parse = |p: &str| {
                    p.parse::<u32>()
                        .map_err(|_| SchemaError::InvalidSize(s.to_owned()))
                };
                return Ok(Self::Box {
                    width: parse(w)?,
                    height: parse(h)?,
                    crop,
                });
            }
        }
        Ok(Self::Named(s.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_ordered() {
        let t = ImageSizeTable::wordpress_defaults();
        let slugs: Vec<&str> = t.iter().map(|(s, _)| s).collect();
        assert_eq!(
            slugs,
            ["thumbnail", "medium", "medium_large", "large", "1536x1536", "2048x2048"]
        );
        assert_eq!(t.get("thumbnail"), Some(ImageSize::new(150, 150, true)));
        assert_eq!(t.get("medium_large").unwrap().height, 0);
    }

    #[test]
    fn register_replaces_in_place() {
        let mut t = ImageSizeTable::wordpress_defaults();
        t.register("medium", ImageSize::new(400, 400, true));
        t.register("hero", ImageSize::new(1920, 600, true));
        assert_eq!(t.len(), 7);
        assert_eq!(t.iter().nth(1).unwrap(), ("medium", ImageSize::new(400, 400, true)));
        assert_eq!(t.iter().last().unwrap().0, "hero");
    }

    #[test]
    fn parse_size_specs() {
        assert_eq!("full".parse::<SizeSpec>().unwrap(), SizeSpec::Original);
        assert_eq!("original".parse::<SizeSpec>().unwrap(), SizeSpec::Original);
        assert_eq!("800x0".parse::<SizeSpec>().unwrap(), SizeSpec::boxed(800, 0));
        assert_eq!(
            "300x200-crop".parse::<SizeSpec>().unwrap(),
            SizeSpec::Box {
                width: 300,
                height: 200,
                crop: true
            }
        );
        assert_eq!("medium".parse::<SizeSpec>().unwrap(), SizeSpec::named("medium"));
        assert_eq!("post-xl".parse::<SizeSpec>().unwrap(), SizeSpec::named("post-xl"));
        assert!("".parse::<SizeSpec>().is_err());
        assert!("99999999999x1".parse::<SizeSpec>().is_err());
    }
}
