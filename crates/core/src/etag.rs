//! Item content fingerprints and chained history fingerprints.

use crate::hash::{ContentHash, to_hex};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Content fingerprint of an item body.
///
/// Rendered as a quoted lowercase SHA-256 hex digest. The empty string marks
/// an item that is absent (deleted or moved away).
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Etag(String);

impl Etag {
    /// Fingerprint an item body.
    pub fn of(data: &[u8]) -> Self {
        Self(format!("\"{}\"", ContentHash::compute(data).to_hex()))
    }

    /// The etag of an absent item.
    pub fn absent() -> Self {
        Self(String::new())
    }

    /// Whether this etag marks an absent item.
    pub fn is_absent(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Etag {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for Etag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A point in an item's change lineage.
///
/// Two lineages that end at the same content still carry different history
/// etags unless every step of their history coincides.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistoryEtag(String);

impl HistoryEtag {
    /// Start a new lineage from 16 random bytes.
    pub fn fresh() -> Self {
        let mut bytes = [0u8; 16];
        rand::rng().fill_bytes(&mut bytes);
        Self(to_hex(&bytes))
    }

    /// Derive the next lineage point after the item changed to `etag`.
    pub fn advance(&self, etag: &Etag) -> Self {
        let mut hasher = ContentHash::hasher();
        hasher.update(self.0.as_bytes());
        hasher.update(b"/");
        hasher.update(etag.as_str().as_bytes());
        Self(hasher.finalize().to_hex())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for HistoryEtag {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for HistoryEtag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
