//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed sync token: {0}")]
    MalformedToken(String),

    #[error("invalid hash: {0}")]
    InvalidHash(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
