//! Relational collection store for davstore.
//!
//! This crate provides the storage engine behind a calendar/address book
//! server:
//! - The collection tree and its items (SQLite and PostgreSQL backends)
//! - Path resolution from logical paths to collections and items
//! - Per-item change history and sync tokens for incremental sync
//! - Mutations that keep history current inside each transaction
//! - Retention pruning and tree verification

pub mod error;
mod gateway;
mod history;
mod maintenance;
pub mod models;
pub mod postgres;
pub mod repos;
mod resolver;
mod sql;
pub mod storage;
pub mod store;
mod sync;

pub use error::{MetadataError, MetadataResult};
pub use models::{Collection, Item, NewItem, Node, PruneStats, SyncResult};
pub use postgres::PostgresStore;
pub use storage::Storage;
pub use store::{MetadataStore, SqliteStore, StoreTx};

use davstore_core::config::MetadataConfig;
use std::sync::Arc;

/// Create a metadata store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    match config {
        MetadataConfig::Sqlite {
            path,
            query_timeout_secs,
        } => {
            let store = SqliteStore::new(path, *query_timeout_secs).await?;
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
        MetadataConfig::Postgres {
            url,
            host,
            port,
            username,
            password,
            database,
            ssl_mode,
            max_connections,
            statement_timeout_ms,
        } => {
            let store = if let Some(url) = url {
                // URL takes precedence over individual fields
                tracing::info!("Connecting to PostgreSQL using connection URL");
                PostgresStore::from_url(url, *max_connections, *statement_timeout_ms).await?
            } else if let (Some(host), Some(database)) = (host.as_ref(), database.as_ref()) {
                PostgresStore::from_params(
                    host,
                    port.unwrap_or(5432),
                    username.as_deref(),
                    password.as_deref(),
                    database,
                    *ssl_mode,
                    *max_connections,
                    *statement_timeout_ms,
                )
                .await?
            } else {
                return Err(MetadataError::Config(
                    "postgres config requires either 'url' or 'host' + 'database'".to_string(),
                ));
            };
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
    }
}
