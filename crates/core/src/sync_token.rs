//! Sync tokens and collection state digests.
//!
//! A sync token is `SYNC_TOKEN_PREFIX` followed by 64 lowercase hex
//! characters. The hex part names a persisted collection snapshot and is the
//! SHA-256 digest of that snapshot's `name/history_etag` entries in
//! enumeration order.

use crate::etag::HistoryEtag;
use crate::hash::{ContentHash, ContentHasher};
use std::fmt;
use std::str::FromStr;

/// Namespace prefix of every sync token.
pub const SYNC_TOKEN_PREFIX: &str = "http://radicale.org/ns/sync/";

/// A validated sync token.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SyncToken(ContentHash);

impl SyncToken {
    /// Parse a client-supplied token.
    ///
    /// The empty string means "no prior state" and yields `None`.
    pub fn parse(token: &str) -> crate::Result<Option<Self>> {
        if token.is_empty() {
            return Ok(None);
        }
        token.parse().map(Some)
    }

    /// The snapshot name: 64 lowercase hex characters.
    pub fn name(&self) -> String {
        self.0.to_hex()
    }

    pub fn digest(&self) -> &ContentHash {
        &self.0
    }
}

impl FromStr for SyncToken {
    type Err = crate::Error;

    fn from_str(token: &str) -> crate::Result<Self> {
        let name = token
            .strip_prefix(SYNC_TOKEN_PREFIX)
            .ok_or_else(|| crate::Error::MalformedToken(token.to_string()))?;
        ContentHash::from_hex(name)
            .map(Self)
            .map_err(|_| crate::Error::MalformedToken(token.to_string()))
    }
}

impl fmt::Display for SyncToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SYNC_TOKEN_PREFIX}{}", self.0.to_hex())
    }
}

impl fmt::Debug for SyncToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SyncToken({})", self.0.to_hex())
    }
}

/// Incremental digest over a collection state.
///
/// Entries are hashed in the order they are pushed; callers own the
/// enumeration order.
#[derive(Default)]
pub struct StateDigest(ContentHasher);

impl StateDigest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one `name/history_etag` entry.
    pub fn update(&mut self, name: &str, history_etag: &HistoryEtag) {
        self.0.update(name.as_bytes());
        self.0.update(b"/");
        self.0.update(history_etag.as_str().as_bytes());
    }

    /// Finish the digest and return the token naming this state.
    pub fn finish(self) -> SyncToken {
        SyncToken(self.0.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_token() -> String {
        format!("{SYNC_TOKEN_PREFIX}{}", "a1".repeat(32))
    }

    #[test]
    fn test_empty_token_means_no_prior_state() {
        assert!(SyncToken::parse("").unwrap().is_none());
    }

    #[test]
    fn test_token_roundtrip() {
        let raw = sample_token();
        let token = SyncToken::parse(&raw).unwrap().unwrap();
        assert_eq!(token.to_string(), raw);
        assert_eq!(token.name(), "a1".repeat(32));
    }

    #[test]
    fn test_malformed_tokens_rejected() {
        let cases = [
            "a1".repeat(32),
            format!("http://example.com/ns/sync/{}", "a1".repeat(32)),
            format!("{SYNC_TOKEN_PREFIX}{}", "a1".repeat(31)),
            format!("{SYNC_TOKEN_PREFIX}{}", "A1".repeat(32)),
            format!("{SYNC_TOKEN_PREFIX}{}zz", "a1".repeat(31)),
            format!("{SYNC_TOKEN_PREFIX}{}00", "a1".repeat(32)),
        ];
        for case in cases {
            let err = SyncToken::parse(&case).unwrap_err();
            assert!(
                matches!(err, crate::Error::MalformedToken(_)),
                "expected malformed token for {case}"
            );
        }
    }

    #[test]
    fn test_digest_is_order_sensitive() {
        let a = HistoryEtag::from("1".to_string());
        let b = HistoryEtag::from("2".to_string());

        let mut forward = StateDigest::new();
        forward.update("a.ics", &a);
        forward.update("b.ics", &b);

        let mut backward = StateDigest::new();
        backward.update("b.ics", &b);
        backward.update("a.ics", &a);

        assert_ne!(forward.finish(), backward.finish());
    }

    #[test]
    fn test_digest_matches_concatenated_stream() {
        let etag = HistoryEtag::from("h".to_string());
        let mut digest = StateDigest::new();
        digest.update("x", &etag);
        digest.update("y", &etag);
        assert_eq!(
            digest.finish().name(),
            ContentHash::compute(b"x/hy/h").to_hex()
        );
    }

    #[test]
    fn test_empty_state_digest() {
        assert_eq!(
            StateDigest::new().finish().name(),
            ContentHash::compute(b"").to_hex()
        );
    }
}
