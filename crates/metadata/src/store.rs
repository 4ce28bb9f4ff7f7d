//! Metadata store traits and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{
    CollectionRepo, HierarchyRepo, HistoryRepo, ItemRepo, PropertyRepo, StateRepo,
};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite, Transaction};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// A caller-scoped storage transaction.
///
/// Dropping a transaction without committing rolls it back.
#[async_trait]
pub trait StoreTx:
    CollectionRepo + PropertyRepo + ItemRepo + HistoryRepo + StateRepo + HierarchyRepo + Send
{
    /// Commit every write made through this transaction.
    async fn commit(self: Box<Self>) -> MetadataResult<()>;

    /// Discard every write made through this transaction.
    async fn rollback(self: Box<Self>) -> MetadataResult<()>;
}

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;

    /// Begin a transaction.
    async fn begin(&self) -> MetadataResult<Box<dyn StoreTx>>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (creating if needed) a SQLite store and run migrations.
    ///
    /// `:memory:` opens a private in-memory database.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();
        let query_timeout_secs = query_timeout_secs.unwrap_or(600);
        let in_memory = path.as_os_str() == ":memory:";

        if !in_memory && let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let mut pool_opts = SqlitePoolOptions::new()
            // A single connection serializes transactions; SQLite allows one writer anyway.
            .max_connections(1);
        if in_memory {
            // The database lives only as long as its connection.
            pool_opts = pool_opts.idle_timeout(None).max_lifetime(None);
        }
        let pool = pool_opts.connect_with(opts).await?;

        let store = Self { pool };
        store.migrate().await?;

        tracing::info!(path = %path.display(), "SQLite metadata store opened");
        tracing::warn!(
            query_timeout_secs = query_timeout_secs,
            "SQLite query timeout is advisory only; long queries are not cancelled"
        );

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn begin(&self) -> MetadataResult<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteTx { tx }))
    }
}

/// An open SQLite transaction.
pub struct SqliteTx {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl StoreTx for SqliteTx {
    async fn commit(self: Box<Self>) -> MetadataResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> MetadataResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

// Implement all the repository traits for SqliteTx
mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use crate::sql::{self, Dialect};
    use sqlx::QueryBuilder;
    use time::OffsetDateTime;
    use uuid::Uuid;

    #[async_trait]
    impl CollectionRepo for SqliteTx {
        async fn get_collection(&mut self, id: Uuid) -> MetadataResult<Option<CollectionRow>> {
            let row = sqlx::query_as::<_, CollectionRow>(
                "SELECT id, parent_id, name, modified FROM collections WHERE id = ?",
            )
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
            Ok(row)
        }

        async fn get_root(&mut self) -> MetadataResult<Option<CollectionRow>> {
            let row = sqlx::query_as::<_, CollectionRow>(
                "SELECT id, parent_id, name, modified FROM collections WHERE parent_id IS NULL",
            )
            .fetch_optional(&mut *self.tx)
            .await?;
            Ok(row)
        }

        async fn insert_root(
            &mut self,
            id: Uuid,
            modified: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                "INSERT INTO collections (id, parent_id, name, modified) VALUES (?, NULL, NULL, ?) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(id)
            .bind(modified)
            .execute(&mut *self.tx)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn count_roots(&mut self) -> MetadataResult<u64> {
            let count: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM collections WHERE parent_id IS NULL")
                    .fetch_one(&mut *self.tx)
                    .await?;
            Ok(count as u64)
        }

        async fn find_child(
            &mut self,
            parent_id: Uuid,
            name: &str,
        ) -> MetadataResult<Option<CollectionRow>> {
            let row = sqlx::query_as::<_, CollectionRow>(
                "SELECT id, parent_id, name, modified FROM collections WHERE parent_id = ? AND name = ?",
            )
            .bind(parent_id)
            .bind(name)
            .fetch_optional(&mut *self.tx)
            .await?;
            Ok(row)
        }

        async fn insert_child(
            &mut self,
            id: Uuid,
            parent_id: Uuid,
            name: &str,
            modified: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                "INSERT INTO collections (id, parent_id, name, modified) VALUES (?, ?, ?, ?) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(id)
            .bind(parent_id)
            .bind(name)
            .bind(modified)
            .execute(&mut *self.tx)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn delete_collection(&mut self, id: Uuid) -> MetadataResult<u64> {
            let result = sqlx::query("DELETE FROM collections WHERE id = ?")
                .bind(id)
                .execute(&mut *self.tx)
                .await?;
            Ok(result.rows_affected())
        }

        async fn delete_children(&mut self, parent_id: Uuid) -> MetadataResult<u64> {
            let result = sqlx::query("DELETE FROM collections WHERE parent_id = ?")
                .bind(parent_id)
                .execute(&mut *self.tx)
                .await?;
            Ok(result.rows_affected())
        }

        async fn touch_collection(
            &mut self,
            id: Uuid,
            modified: OffsetDateTime,
        ) -> MetadataResult<()> {
            sqlx::query("UPDATE collections SET modified = ? WHERE id = ?")
                .bind(modified)
                .bind(id)
                .execute(&mut *self.tx)
                .await?;
            Ok(())
        }
    }

    #[async_trait]
    impl PropertyRepo for SqliteTx {
        async fn get_properties(
            &mut self,
            collection_id: Uuid,
        ) -> MetadataResult<Vec<CollectionMetadataRow>> {
            let rows = sqlx::query_as::<_, CollectionMetadataRow>(
                "SELECT collection_id, key, value FROM collection_metadata \
                 WHERE collection_id = ? ORDER BY key",
            )
            .bind(collection_id)
            .fetch_all(&mut *self.tx)
            .await?;
            Ok(rows)
        }

        async fn get_property(
            &mut self,
            collection_id: Uuid,
            key: &str,
        ) -> MetadataResult<Option<CollectionMetadataRow>> {
            let row = sqlx::query_as::<_, CollectionMetadataRow>(
                "SELECT collection_id, key, value FROM collection_metadata \
                 WHERE collection_id = ? AND key = ?",
            )
            .bind(collection_id)
            .bind(key)
            .fetch_optional(&mut *self.tx)
            .await?;
            Ok(row)
        }

        async fn insert_property(
            &mut self,
            collection_id: Uuid,
            key: &str,
            value: &str,
        ) -> MetadataResult<()> {
            sqlx::query("INSERT INTO collection_metadata (collection_id, key, value) VALUES (?, ?, ?)")
                .bind(collection_id)
                .bind(key)
                .bind(value)
                .execute(&mut *self.tx)
                .await
                .map_err(|e| {
                    MetadataError::from_insert(e, || {
                        format!("metadata key '{key}' already set on collection {collection_id}")
                    })
                })?;
            Ok(())
        }

        async fn delete_properties(&mut self, collection_id: Uuid) -> MetadataResult<u64> {
            let result = sqlx::query("DELETE FROM collection_metadata WHERE collection_id = ?")
                .bind(collection_id)
                .execute(&mut *self.tx)
                .await?;
            Ok(result.rows_affected())
        }
    }

    #[async_trait]
    impl ItemRepo for SqliteTx {
        async fn get_item(
            &mut self,
            collection_id: Uuid,
            name: &str,
        ) -> MetadataResult<Option<ItemRow>> {
            let row = sqlx::query_as::<_, ItemRow>(
                "SELECT id, collection_id, name, data, modified FROM items \
                 WHERE collection_id = ? AND name = ?",
            )
            .bind(collection_id)
            .bind(name)
            .fetch_optional(&mut *self.tx)
            .await?;
            Ok(row)
        }

        async fn get_items(
            &mut self,
            collection_id: Uuid,
            names: &[String],
        ) -> MetadataResult<Vec<ItemRow>> {
            if names.is_empty() {
                return Ok(Vec::new());
            }
            let mut builder = QueryBuilder::<Sqlite>::new(
                "SELECT id, collection_id, name, data, modified FROM items WHERE collection_id = ",
            );
            builder.push_bind(collection_id);
            builder.push(" AND name IN (");
            let mut separated = builder.separated(", ");
            for name in names {
                separated.push_bind(name);
            }
            separated.push_unseparated(") ORDER BY name");
            let rows = builder
                .build_query_as::<ItemRow>()
                .fetch_all(&mut *self.tx)
                .await?;
            Ok(rows)
        }

        async fn list_items(&mut self, collection_id: Uuid) -> MetadataResult<Vec<ItemRow>> {
            let rows = sqlx::query_as::<_, ItemRow>(
                "SELECT id, collection_id, name, data, modified FROM items \
                 WHERE collection_id = ? ORDER BY name",
            )
            .bind(collection_id)
            .fetch_all(&mut *self.tx)
            .await?;
            Ok(rows)
        }

        async fn search_items(
            &mut self,
            collection_id: Uuid,
            needle: &[u8],
        ) -> MetadataResult<Vec<ItemRow>> {
            let rows = sqlx::query_as::<_, ItemRow>(
                "SELECT id, collection_id, name, data, modified FROM items \
                 WHERE collection_id = ? AND instr(data, ?) > 0 ORDER BY name",
            )
            .bind(collection_id)
            .bind(needle)
            .fetch_all(&mut *self.tx)
            .await?;
            Ok(rows)
        }

        async fn insert_item(&mut self, item: &ItemRow) -> MetadataResult<bool> {
            let result = sqlx::query(
                "INSERT INTO items (id, collection_id, name, data, modified) VALUES (?, ?, ?, ?, ?) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(item.id)
            .bind(item.collection_id)
            .bind(&item.name)
            .bind(&item.data)
            .bind(item.modified)
            .execute(&mut *self.tx)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn update_item_data(
            &mut self,
            collection_id: Uuid,
            name: &str,
            data: &[u8],
            modified: OffsetDateTime,
        ) -> MetadataResult<u64> {
            let result = sqlx::query(
                "UPDATE items SET data = ?, modified = ? WHERE collection_id = ? AND name = ?",
            )
            .bind(data)
            .bind(modified)
            .bind(collection_id)
            .bind(name)
            .execute(&mut *self.tx)
            .await?;
            Ok(result.rows_affected())
        }

        async fn move_item(
            &mut self,
            from_collection_id: Uuid,
            from_name: &str,
            to_collection_id: Uuid,
            to_name: &str,
            modified: OffsetDateTime,
        ) -> MetadataResult<u64> {
            let result = sqlx::query(
                "UPDATE items SET collection_id = ?, name = ?, modified = ? \
                 WHERE collection_id = ? AND name = ?",
            )
            .bind(to_collection_id)
            .bind(to_name)
            .bind(modified)
            .bind(from_collection_id)
            .bind(from_name)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| {
                MetadataError::from_insert(e, || {
                    format!("item '{to_name}' already exists in collection {to_collection_id}")
                })
            })?;
            Ok(result.rows_affected())
        }

        async fn delete_item(&mut self, collection_id: Uuid, name: &str) -> MetadataResult<u64> {
            let result = sqlx::query("DELETE FROM items WHERE collection_id = ? AND name = ?")
                .bind(collection_id)
                .bind(name)
                .execute(&mut *self.tx)
                .await?;
            Ok(result.rows_affected())
        }

        async fn delete_items(&mut self, collection_id: Uuid) -> MetadataResult<u64> {
            let result = sqlx::query("DELETE FROM items WHERE collection_id = ?")
                .bind(collection_id)
                .execute(&mut *self.tx)
                .await?;
            Ok(result.rows_affected())
        }
    }

    #[async_trait]
    impl HistoryRepo for SqliteTx {
        async fn get_history(
            &mut self,
            collection_id: Uuid,
            name: &str,
        ) -> MetadataResult<Option<ItemHistoryRow>> {
            let row = sqlx::query_as::<_, ItemHistoryRow>(
                "SELECT id, collection_id, name, etag, history_etag, modified FROM item_history \
                 WHERE collection_id = ? AND name = ?",
            )
            .bind(collection_id)
            .bind(name)
            .fetch_optional(&mut *self.tx)
            .await?;
            Ok(row)
        }

        async fn insert_history(&mut self, row: &ItemHistoryRow) -> MetadataResult<bool> {
            let result = sqlx::query(
                "INSERT INTO item_history (id, collection_id, name, etag, history_etag, modified) \
                 VALUES (?, ?, ?, ?, ?, ?) ON CONFLICT DO NOTHING",
            )
            .bind(row.id)
            .bind(row.collection_id)
            .bind(&row.name)
            .bind(&row.etag)
            .bind(&row.history_etag)
            .bind(row.modified)
            .execute(&mut *self.tx)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn update_history(
            &mut self,
            collection_id: Uuid,
            name: &str,
            etag: &str,
            history_etag: &str,
            modified: OffsetDateTime,
        ) -> MetadataResult<u64> {
            let result = sqlx::query(
                "UPDATE item_history SET etag = ?, history_etag = ?, modified = ? \
                 WHERE collection_id = ? AND name = ?",
            )
            .bind(etag)
            .bind(history_etag)
            .bind(modified)
            .bind(collection_id)
            .bind(name)
            .execute(&mut *self.tx)
            .await?;
            Ok(result.rows_affected())
        }

        async fn list_deleted_history(
            &mut self,
            collection_id: Uuid,
        ) -> MetadataResult<Vec<String>> {
            let names = sqlx::query_scalar::<_, String>(
                "SELECT h.name FROM item_history h \
                 LEFT JOIN items i ON i.collection_id = h.collection_id AND i.name = h.name \
                 WHERE h.collection_id = ? AND i.id IS NULL ORDER BY h.name",
            )
            .bind(collection_id)
            .fetch_all(&mut *self.tx)
            .await?;
            Ok(names)
        }

        async fn prune_deleted_history(
            &mut self,
            cutoff: OffsetDateTime,
        ) -> MetadataResult<u64> {
            let result = sqlx::query(
                "DELETE FROM item_history WHERE modified < ? AND NOT EXISTS ( \
                     SELECT 1 FROM items i \
                     WHERE i.collection_id = item_history.collection_id AND i.name = item_history.name \
                 )",
            )
            .bind(cutoff)
            .execute(&mut *self.tx)
            .await?;
            Ok(result.rows_affected())
        }
    }

    #[async_trait]
    impl StateRepo for SqliteTx {
        async fn get_state(
            &mut self,
            collection_id: Uuid,
            name: &str,
        ) -> MetadataResult<Option<CollectionStateRow>> {
            let row = sqlx::query_as::<_, CollectionStateRow>(
                "SELECT collection_id, name, state, created_at FROM collection_states \
                 WHERE collection_id = ? AND name = ?",
            )
            .bind(collection_id)
            .bind(name)
            .fetch_optional(&mut *self.tx)
            .await?;
            Ok(row)
        }

        async fn insert_state(&mut self, row: &CollectionStateRow) -> MetadataResult<bool> {
            let result = sqlx::query(
                "INSERT INTO collection_states (collection_id, name, state, created_at) \
                 VALUES (?, ?, ?, ?) ON CONFLICT DO NOTHING",
            )
            .bind(row.collection_id)
            .bind(&row.name)
            .bind(&row.state)
            .bind(row.created_at)
            .execute(&mut *self.tx)
            .await?;
            Ok(result.rows_affected() > 0)
        }
    }

    #[async_trait]
    impl HierarchyRepo for SqliteTx {
        async fn resolve_path(&mut self, segments: &[String]) -> MetadataResult<Option<NodeRow>> {
            if segments.is_empty() {
                return Ok(None);
            }
            let sql = sql::resolve_path_query(Dialect::Sqlite, segments.len());
            let mut query = sqlx::query_as::<_, NodeRow>(&sql);
            for segment in segments.iter().rev() {
                query = query.bind(segment);
            }
            let row = query.fetch_optional(&mut *self.tx).await?;
            Ok(row)
        }

        async fn list_children(&mut self, parent_id: Uuid) -> MetadataResult<Vec<NodeRow>> {
            let sql = sql::list_children_query(Dialect::Sqlite);
            let rows = sqlx::query_as::<_, NodeRow>(&sql)
                .bind(parent_id)
                .fetch_all(&mut *self.tx)
                .await?;
            Ok(rows)
        }
    }
}

/// SQLite schema.
const SCHEMA_SQL: &str = r#"
-- Collection tree. The root is the single row without a parent.
CREATE TABLE IF NOT EXISTS collections (
    id BLOB PRIMARY KEY,
    parent_id BLOB REFERENCES collections(id) ON DELETE CASCADE,
    name TEXT,
    modified TEXT NOT NULL,
    UNIQUE (parent_id, name)
);
CREATE INDEX IF NOT EXISTS idx_collections_parent ON collections(parent_id);
-- At most one root (partial unique index)
CREATE UNIQUE INDEX IF NOT EXISTS idx_collections_root ON collections((parent_id IS NULL)) WHERE parent_id IS NULL;

CREATE TABLE IF NOT EXISTS collection_metadata (
    collection_id BLOB NOT NULL REFERENCES collections(id) ON DELETE CASCADE,
    key TEXT NOT NULL,
    value TEXT,
    PRIMARY KEY (collection_id, key)
);

CREATE TABLE IF NOT EXISTS items (
    id BLOB PRIMARY KEY,
    collection_id BLOB NOT NULL REFERENCES collections(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    data BLOB NOT NULL,
    modified TEXT NOT NULL,
    UNIQUE (collection_id, name)
);
CREATE INDEX IF NOT EXISTS idx_items_collection ON items(collection_id);

-- One row per (collection, name) ever observed; etag is '' while the item is absent.
CREATE TABLE IF NOT EXISTS item_history (
    id BLOB PRIMARY KEY,
    collection_id BLOB NOT NULL REFERENCES collections(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    etag TEXT NOT NULL,
    history_etag TEXT NOT NULL,
    modified TEXT NOT NULL,
    UNIQUE (collection_id, name)
);
CREATE INDEX IF NOT EXISTS idx_item_history_modified ON item_history(modified);

-- Append-only snapshots keyed by state digest.
CREATE TABLE IF NOT EXISTS collection_states (
    collection_id BLOB NOT NULL REFERENCES collections(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    state BLOB NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (collection_id, name)
);
"#;
