//! PostgreSQL-based metadata store implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{
    CollectionRepo, HierarchyRepo, HistoryRepo, ItemRepo, PropertyRepo, StateRepo,
};
use crate::store::{MetadataStore, StoreTx};
use async_trait::async_trait;
use davstore_core::config::PgSslMode;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode as SqlxPgSslMode};
use sqlx::{Pool, Postgres, Transaction};
use std::str::FromStr;

/// PostgreSQL schema (embedded).
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

fn postgres_schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                return None;
            }
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

/// PostgreSQL-based metadata store.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Create a store from a connection URL.
    pub async fn from_url(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;
        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    /// Create a store from individual connection parameters, so the
    /// password can be supplied separately (e.g. from the environment).
    #[allow(clippy::too_many_arguments)]
    pub async fn from_params(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        ssl_mode: Option<PgSslMode>,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database);

        if let Some(user) = username {
            opts = opts.username(user);
        }

        if let Some(pass) = password {
            opts = opts.password(pass);
        }

        if let Some(mode) = ssl_mode {
            let sqlx_mode = match mode {
                PgSslMode::Disable => SqlxPgSslMode::Disable,
                PgSslMode::Prefer => SqlxPgSslMode::Prefer,
                PgSslMode::Require => SqlxPgSslMode::Require,
            };
            opts = opts.ssl_mode(sqlx_mode);
        }

        tracing::info!(
            host = host,
            port = port,
            database = database,
            username = username.unwrap_or("<none>"),
            ssl_mode = ?ssl_mode,
            "Connecting to PostgreSQL"
        );

        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    async fn connect(
        mut opts: PgConnectOptions,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        if let Some(timeout_ms) = statement_timeout_ms {
            opts = opts.options([("statement_timeout", format!("{}ms", timeout_ms))]);
            tracing::info!("PostgreSQL statement_timeout set to {}ms", timeout_ms);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for PostgresStore {
    async fn migrate(&self) -> MetadataResult<()> {
        // Prepared statements hold one command each.
        for statement in postgres_schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn begin(&self) -> MetadataResult<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresTx { tx }))
    }
}

/// An open PostgreSQL transaction.
pub struct PostgresTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PostgresTx {
    async fn commit(self: Box<Self>) -> MetadataResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> MetadataResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

// Implement all the repository traits for PostgresTx
mod postgres_impl {
    use super::*;
    use crate::models::*;
    use crate::sql::{self, Dialect};
    use sqlx::QueryBuilder;
    use time::OffsetDateTime;
    use uuid::Uuid;

    #[async_trait]
    impl CollectionRepo for PostgresTx {
        async fn get_collection(&mut self, id: Uuid) -> MetadataResult<Option<CollectionRow>> {
            let row = sqlx::query_as::<_, CollectionRow>(
                "SELECT id, parent_id, name, modified FROM collections WHERE id = $1",
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
                "INSERT INTO collections (id, parent_id, name, modified) VALUES ($1, NULL, NULL, $2) \
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
                "SELECT id, parent_id, name, modified FROM collections WHERE parent_id = $1 AND name = $2",
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
                "INSERT INTO collections (id, parent_id, name, modified) VALUES ($1, $2, $3, $4) \
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
            let result = sqlx::query("DELETE FROM collections WHERE id = $1")
                .bind(id)
                .execute(&mut *self.tx)
                .await?;
            Ok(result.rows_affected())
        }

        async fn delete_children(&mut self, parent_id: Uuid) -> MetadataResult<u64> {
            let result = sqlx::query("DELETE FROM collections WHERE parent_id = $1")
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
            sqlx::query("UPDATE collections SET modified = $1 WHERE id = $2")
                .bind(modified)
                .bind(id)
                .execute(&mut *self.tx)
                .await?;
            Ok(())
        }
    }

    #[async_trait]
    impl PropertyRepo for PostgresTx {
        async fn get_properties(
            &mut self,
            collection_id: Uuid,
        ) -> MetadataResult<Vec<CollectionMetadataRow>> {
            let rows = sqlx::query_as::<_, CollectionMetadataRow>(
                "SELECT collection_id, key, value FROM collection_metadata \
                 WHERE collection_id = $1 ORDER BY key",
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
                 WHERE collection_id = $1 AND key = $2",
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
            sqlx::query("INSERT INTO collection_metadata (collection_id, key, value) VALUES ($1, $2, $3)")
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
            let result = sqlx::query("DELETE FROM collection_metadata WHERE collection_id = $1")
                .bind(collection_id)
                .execute(&mut *self.tx)
                .await?;
            Ok(result.rows_affected())
        }
    }

    #[async_trait]
    impl ItemRepo for PostgresTx {
        async fn get_item(
            &mut self,
            collection_id: Uuid,
            name: &str,
        ) -> MetadataResult<Option<ItemRow>> {
            let row = sqlx::query_as::<_, ItemRow>(
                "SELECT id, collection_id, name, data, modified FROM items \
                 WHERE collection_id = $1 AND name = $2",
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
            let mut builder = QueryBuilder::<Postgres>::new(
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
                 WHERE collection_id = $1 ORDER BY name",
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
                 WHERE collection_id = $1 AND position($2 in data) > 0 ORDER BY name",
            )
            .bind(collection_id)
            .bind(needle)
            .fetch_all(&mut *self.tx)
            .await?;
            Ok(rows)
        }

        async fn insert_item(&mut self, item: &ItemRow) -> MetadataResult<bool> {
            let result = sqlx::query(
                "INSERT INTO items (id, collection_id, name, data, modified) VALUES ($1, $2, $3, $4, $5) \
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
                "UPDATE items SET data = $1, modified = $2 WHERE collection_id = $3 AND name = $4",
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
                "UPDATE items SET collection_id = $1, name = $2, modified = $3 \
                 WHERE collection_id = $4 AND name = $5",
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
            let result = sqlx::query("DELETE FROM items WHERE collection_id = $1 AND name = $2")
                .bind(collection_id)
                .bind(name)
                .execute(&mut *self.tx)
                .await?;
            Ok(result.rows_affected())
        }

        async fn delete_items(&mut self, collection_id: Uuid) -> MetadataResult<u64> {
            let result = sqlx::query("DELETE FROM items WHERE collection_id = $1")
                .bind(collection_id)
                .execute(&mut *self.tx)
                .await?;
            Ok(result.rows_affected())
        }
    }

    #[async_trait]
    impl HistoryRepo for PostgresTx {
        async fn get_history(
            &mut self,
            collection_id: Uuid,
            name: &str,
        ) -> MetadataResult<Option<ItemHistoryRow>> {
            let row = sqlx::query_as::<_, ItemHistoryRow>(
                "SELECT id, collection_id, name, etag, history_etag, modified FROM item_history \
                 WHERE collection_id = $1 AND name = $2",
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
                 VALUES ($1, $2, $3, $4, $5, $6) ON CONFLICT DO NOTHING",
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
                "UPDATE item_history SET etag = $1, history_etag = $2, modified = $3 \
                 WHERE collection_id = $4 AND name = $5",
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
                 WHERE h.collection_id = $1 AND i.id IS NULL ORDER BY h.name",
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
                "DELETE FROM item_history WHERE modified < $1 AND NOT EXISTS ( \
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
    impl StateRepo for PostgresTx {
        async fn get_state(
            &mut self,
            collection_id: Uuid,
            name: &str,
        ) -> MetadataResult<Option<CollectionStateRow>> {
            let row = sqlx::query_as::<_, CollectionStateRow>(
                "SELECT collection_id, name, state, created_at FROM collection_states \
                 WHERE collection_id = $1 AND name = $2",
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
                 VALUES ($1, $2, $3, $4) ON CONFLICT DO NOTHING",
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
    impl HierarchyRepo for PostgresTx {
        async fn resolve_path(&mut self, segments: &[String]) -> MetadataResult<Option<NodeRow>> {
            if segments.is_empty() {
                return Ok(None);
            }
            let sql = sql::resolve_path_query(Dialect::Postgres, segments.len());
            let mut query = sqlx::query_as::<_, NodeRow>(&sql);
            for segment in segments.iter().rev() {
                query = query.bind(segment);
            }
            let row = query.fetch_optional(&mut *self.tx).await?;
            Ok(row)
        }

        async fn list_children(&mut self, parent_id: Uuid) -> MetadataResult<Vec<NodeRow>> {
            let sql = sql::list_children_query(Dialect::Postgres);
            let rows = sqlx::query_as::<_, NodeRow>(&sql)
                .bind(parent_id)
                .fetch_all(&mut *self.tx)
                .await?;
            Ok(rows)
        }
    }
}
