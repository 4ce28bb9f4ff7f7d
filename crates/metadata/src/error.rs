//! Metadata store error types.

use thiserror::Error;

/// Metadata store operation errors.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("malformed sync token: {0}")]
    MalformedToken(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl MetadataError {
    /// Map a unique-key violation to `Constraint`, passing other errors through.
    pub(crate) fn from_insert(err: sqlx::Error, what: impl FnOnce() -> String) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                MetadataError::Constraint(what())
            }
            _ => MetadataError::Database(err),
        }
    }
}

impl From<davstore_core::Error> for MetadataError {
    fn from(err: davstore_core::Error) -> Self {
        match err {
            davstore_core::Error::MalformedToken(token) => MetadataError::MalformedToken(token),
            other => MetadataError::Internal(other.to_string()),
        }
    }
}

/// Result type for metadata operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;
