//! Newtype wrappers for numeric identifiers, providing compile-time type safety.
//!
//! Both the remote DAM and the local object store key their records by plain
//! integers. Wrapping them keeps a document id from being passed where an
//! attachment id is expected. All newtypes serialize as bare numbers.

use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! numeric_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }

        impl FromStr for $name {
            type Err = SchemaError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim()
                    .parse::<u64>()
                    .map(Self)
                    .map_err(|_| SchemaError::InvalidId(s.to_owned()))
            }
        }
    };
}

numeric_newtype!(
    /// Identifier of a document on the remote DAM. Unique across the whole
    /// remote ecosystem, not just one interface.
    DocumentId
);

numeric_newtype!(
    /// Key of an attachment in the local object store.
    AttachmentId
);

/// A pixel box. Either side may be zero, meaning "unknown" for an original
/// rendition or "derive from the other side" for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub const ZERO: Dimensions = Dimensions {
        width: 0,
        height: 0,
    };

    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Both sides are zero.
    pub const fn is_empty(self) -> bool {
        self.width == 0 && self.height == 0
    }

    /// At least one side is zero. Such an original cannot anchor aspect ratio math.
    pub const fn is_unknown(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_id_serializes_as_number() {
        let id = DocumentId::new(4711);
        assert_eq!(serde_json::to_string(&id).unwrap(), "4711");
        let back: DocumentId = serde_json::from_str("4711").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn attachment_id_parses_from_str() {
        let id: AttachmentId = " 42 ".parse().unwrap();
        assert_eq!(id.get(), 42);
        assert!("forty-two".parse::<AttachmentId>().is_err());
    }

    #[test]
    fn dimensions_unknown_and_empty() {
        assert!(Dimensions::ZERO.is_empty());
        assert!(Dimensions::new(0, 10).is_unknown());
        assert!(!Dimensions::new(0, 10).is_empty());
        assert!(!Dimensions::new(4, 3).is_unknown());
        assert_eq!(Dimensions::new(4, 3).to_string(), "4x3");
    }
}
