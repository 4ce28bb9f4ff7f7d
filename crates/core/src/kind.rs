//! Collection kinds and item file naming.

use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Metadata key carrying the collection kind marker.
pub const KIND_METADATA_KEY: &str = "tag";

/// The kinds of collection whose contents may be bulk-loaded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollectionKind {
    /// `VCALENDAR`: calendar items stored as `.ics` files.
    Calendar,
    /// `VADDRESSBOOK`: contacts stored as `.vcf` files.
    AddressBook,
}

impl CollectionKind {
    /// Parse a kind marker value.
    pub fn from_marker(marker: &str) -> Option<Self> {
        match marker {
            "VCALENDAR" => Some(Self::Calendar),
            "VADDRESSBOOK" => Some(Self::AddressBook),
            _ => None,
        }
    }

    /// Read the kind marker from collection metadata.
    pub fn from_metadata(metadata: &BTreeMap<String, String>) -> Option<Self> {
        metadata
            .get(KIND_METADATA_KEY)
            .and_then(|marker| Self::from_marker(marker))
    }

    pub fn marker(&self) -> &'static str {
        match self {
            Self::Calendar => "VCALENDAR",
            Self::AddressBook => "VADDRESSBOOK",
        }
    }

    /// File extension for items of this kind.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Calendar => "ics",
            Self::AddressBook => "vcf",
        }
    }

    /// Synthesize an item file name.
    ///
    /// A uid made only of `[A-Za-z0-9_.@-]` is used verbatim; anything else
    /// falls back to the first 32 hex characters of the body digest.
    pub fn item_name(&self, uid: Option<&str>, data: &[u8]) -> String {
        let stem = match uid {
            Some(uid) if is_safe_uid(uid) => uid.to_string(),
            _ => ContentHash::compute(data).to_hex()[..32].to_string(),
        };
        format!("{stem}.{}", self.extension())
    }
}

fn is_safe_uid(uid: &str) -> bool {
    !uid.is_empty()
        && uid
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '@' | '-'))
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.marker())
    }
}
