//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::Duration;

/// PostgreSQL SSL mode configuration.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PgSslMode {
    /// Disable SSL/TLS entirely.
    Disable,
    /// Prefer SSL/TLS but allow unencrypted connections (default).
    #[default]
    Prefer,
    /// Require SSL/TLS for all connections.
    Require,
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database file.
    Sqlite {
        /// Database file path (`:memory:` for an in-memory database).
        path: PathBuf,
        /// Query timeout in seconds (advisory only - SQLite cannot cancel queries).
        #[serde(default = "default_sqlite_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
    /// PostgreSQL database.
    Postgres {
        /// Connection URL (optional if using individual fields).
        /// Takes precedence over individual fields if both are provided.
        url: Option<String>,
        /// Database host.
        host: Option<String>,
        /// Database port (default: 5432).
        #[serde(default = "default_pg_port")]
        port: Option<u16>,
        /// Database username.
        username: Option<String>,
        /// Database password.
        /// WARNING: Prefer DAVSTORE_METADATA__PASSWORD env var over storing in config.
        password: Option<String>,
        /// Database name.
        database: Option<String>,
        /// SSL mode for connections.
        ssl_mode: Option<PgSslMode>,
        /// Maximum connections in the pool.
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        /// Statement timeout in milliseconds.
        #[serde(default = "default_statement_timeout_ms")]
        statement_timeout_ms: Option<u64>,
    },
}

fn default_max_connections() -> u32 {
    10
}

fn default_pg_port() -> Option<u16> {
    Some(5432)
}

fn default_statement_timeout_ms() -> Option<u64> {
    Some(30_000)
}

fn default_sqlite_query_timeout_secs() -> Option<u64> {
    Some(600) // advisory only
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/davstore.db"),
            query_timeout_secs: default_sqlite_query_timeout_secs(),
        }
    }
}

impl MetadataConfig {
    /// Validate metadata configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MetadataConfig::Sqlite { .. } => Ok(()),
            MetadataConfig::Postgres {
                url,
                host,
                database,
                ..
            } => match (url.as_ref(), host.as_ref(), database.as_ref()) {
                (Some(_), _, _) => Ok(()),
                (None, Some(_), Some(_)) => Ok(()),
                (None, None, _) => Err(
                    "postgres config requires either 'url' or 'host' + 'database'".to_string(),
                ),
                (None, Some(_), None) => Err(
                    "postgres config requires 'database' when using individual fields".to_string(),
                ),
            },
        }
    }
}

/// Sync history configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncConfig {
    /// How long a deleted item's history is kept, in seconds. A client
    /// syncing from a token older than this still sees the deletion, but a
    /// name deleted and re-created in between is reported only once.
    #[serde(default = "default_max_token_age_secs")]
    pub max_token_age_secs: u64,
}

fn default_max_token_age_secs() -> u64 {
    crate::DEFAULT_MAX_TOKEN_AGE_SECS
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_token_age_secs: default_max_token_age_secs(),
        }
    }
}

impl SyncConfig {
    /// Get the maximum token age as a Duration.
    pub fn max_token_age(&self) -> Duration {
        let secs = i64::try_from(self.max_token_age_secs).unwrap_or(i64::MAX);
        Duration::seconds(secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_token_age_secs > crate::MAX_TOKEN_AGE_LIMIT_SECS {
            return Err(format!(
                "sync.max_token_age_secs {} exceeds maximum value {}",
                self.max_token_age_secs,
                crate::MAX_TOKEN_AGE_LIMIT_SECS
            ));
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Metadata store configuration.
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Sync history configuration.
    #[serde(default)]
    pub sync: SyncConfig,
}

impl AppConfig {
    /// Create a test configuration backed by an in-memory SQLite database.
    ///
    /// **For testing only.**
    pub fn for_testing() -> Self {
        Self {
            metadata: MetadataConfig::Sqlite {
                path: PathBuf::from(":memory:"),
                query_timeout_secs: None,
            },
            sync: SyncConfig::default(),
        }
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.metadata.validate()?;
        self.sync.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_config_defaults_to_thirty_days() {
        let config = SyncConfig::default();
        assert_eq!(config.max_token_age_secs, 2_592_000);
        assert_eq!(config.max_token_age(), Duration::days(30));
    }

    #[test]
    fn test_sync_config_rejects_overflow() {
        let config = SyncConfig {
            max_token_age_secs: u64::MAX,
        };
        assert!(config.validate().is_err());
        assert_eq!(config.max_token_age(), Duration::seconds(i64::MAX));
    }

    #[test]
    fn test_sync_config_rejects_ages_past_a_century() {
        let config = SyncConfig {
            max_token_age_secs: 1_000_000_000_000,
        };
        let err = config.validate().unwrap_err();
        assert!(err.contains("max_token_age_secs"));

        let config = SyncConfig {
            max_token_age_secs: crate::MAX_TOKEN_AGE_LIMIT_SECS,
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.max_token_age(), Duration::days(36_525));
    }

    #[test]
    fn test_metadata_config_deserialize_sqlite() {
        let json = r#"{"type": "sqlite", "path": "/tmp/store.db"}"#;
        let config: MetadataConfig = serde_json::from_str(json).unwrap();
        match config {
            MetadataConfig::Sqlite {
                path,
                query_timeout_secs,
            } => {
                assert_eq!(path, PathBuf::from("/tmp/store.db"));
                assert_eq!(query_timeout_secs, Some(600));
            }
            _ => panic!("expected sqlite config"),
        }
    }

    #[test]
    fn test_postgres_config_validation() {
        let json = r#"{"type": "postgres", "host": "db"}"#;
        let config: MetadataConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());

        let json = r#"{"type": "postgres", "host": "db", "database": "dav"}"#;
        let config: MetadataConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());

        let json = r#"{"type": "postgres", "url": "postgres://localhost/dav"}"#;
        let config: MetadataConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());

        let json = r#"{"type": "postgres"}"#;
        let config: MetadataConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_app_config_sections_default() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert!(matches!(config.metadata, MetadataConfig::Sqlite { .. }));
        assert_eq!(config.sync.max_token_age_secs, 2_592_000);
        assert!(AppConfig::for_testing().validate().is_ok());
    }
}
