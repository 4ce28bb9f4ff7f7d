//! Core domain types for davstore.
//!
//! This crate defines the primitives shared by the store and its tooling:
//! - Logical collection paths
//! - Content hashing
//! - Item etags and chained history etags
//! - Sync tokens and collection state digests
//! - Collection kinds and item file naming
//! - Configuration

pub mod config;
pub mod error;
pub mod etag;
pub mod hash;
pub mod kind;
pub mod path;
pub mod sync_token;

pub use error::{Error, Result};
pub use etag::{Etag, HistoryEtag};
pub use hash::{ContentHash, ContentHasher};
pub use kind::CollectionKind;
pub use path::LogicalPath;
pub use sync_token::{SYNC_TOKEN_PREFIX, StateDigest, SyncToken};

/// Default maximum sync token age: 30 days.
pub const DEFAULT_MAX_TOKEN_AGE_SECS: u64 = 30 * 24 * 60 * 60;

/// Largest accepted maximum sync token age: 100 years.
pub const MAX_TOKEN_AGE_LIMIT_SECS: u64 = 36_525 * 24 * 60 * 60;
