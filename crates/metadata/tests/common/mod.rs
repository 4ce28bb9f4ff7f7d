//! Storage test utilities.

use davstore_core::config::SyncConfig;
use davstore_metadata::{
    MetadataError, MetadataResult, MetadataStore, PostgresStore, SqliteStore, Storage,
};
use sqlx::{Pool, Postgres as SqlxPostgres, Sqlite};
use std::sync::Arc;
use tempfile::TempDir;
use testcontainers::{ContainerAsync, ImageExt, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;

/// Stable prefix for Docker/container startup failures in Postgres test setup.
pub const POSTGRES_CONTAINER_START_ERR_PREFIX: &str = "postgres-container-start:";

/// A SQLite-backed storage that cleans up on drop.
#[allow(dead_code)]
pub struct TestStorage {
    pub storage: Storage,
    sqlite_store: Arc<SqliteStore>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestStorage {
    /// Storage over a SQLite file in a temporary directory.
    pub async fn new() -> MetadataResult<Self> {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("test.db");
        let store = Arc::new(SqliteStore::new(&db_path, None).await?);
        Self::wrap(store, temp_dir).await
    }

    /// Storage over an in-memory SQLite database (faster for tests).
    pub async fn in_memory() -> MetadataResult<Self> {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let store = Arc::new(SqliteStore::new(":memory:", None).await?);
        Self::wrap(store, temp_dir).await
    }

    async fn wrap(store: Arc<SqliteStore>, temp_dir: TempDir) -> MetadataResult<Self> {
        let storage = Storage::open(store.clone(), &SyncConfig::default()).await?;
        Ok(Self {
            storage,
            sqlite_store: store,
            _temp_dir: temp_dir,
        })
    }

    pub fn storage(&self) -> Storage {
        self.storage.clone()
    }

    /// The SQLite connection pool for raw queries.
    pub fn pool(&self) -> &Pool<Sqlite> {
        self.sqlite_store.pool()
    }
}

/// PostgreSQL-backed storage that owns its testcontainer.
#[allow(dead_code)]
pub struct PostgresTestStorage {
    pub storage: Storage,
    postgres_store: Arc<PostgresStore>,
    _container: ContainerAsync<Postgres>,
}

#[allow(dead_code)]
impl PostgresTestStorage {
    pub async fn new() -> MetadataResult<Self> {
        let container = Postgres::default()
            .with_tag("15-alpine")
            .start()
            .await
            .map_err(|e| {
                MetadataError::Internal(format!(
                    "{} Failed to start PostgreSQL container: {e}",
                    POSTGRES_CONTAINER_START_ERR_PREFIX
                ))
            })?;

        let host = container.get_host().await.expect("Failed to get host");
        let port = container
            .get_host_port_ipv4(5432)
            .await
            .expect("Failed to get port");

        // Default credentials from testcontainers-modules postgres
        let url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

        let store = Arc::new(PostgresStore::from_url(&url, 5, None).await?);
        let storage = Storage::open(store.clone(), &SyncConfig::default()).await?;
        Ok(Self {
            storage,
            postgres_store: store,
            _container: container,
        })
    }

    pub fn storage(&self) -> Storage {
        self.storage.clone()
    }

    /// The PostgreSQL connection pool for raw queries.
    pub fn pool(&self) -> &Pool<SqlxPostgres> {
        self.postgres_store.pool()
    }
}

/// Run a test against both SQLite and PostgreSQL backends.
#[allow(dead_code)]
pub async fn run_storage_test_both<F, Fut>(test_fn: F)
where
    F: Fn(Storage) -> Fut + Clone,
    Fut: std::future::Future<Output = ()>,
{
    let sqlite = TestStorage::new()
        .await
        .expect("Failed to create SQLite test storage");
    test_fn.clone()(sqlite.storage()).await;

    // Requires Docker
    if std::env::var("SKIP_POSTGRES_TESTS").is_err() {
        match PostgresTestStorage::new().await {
            Ok(postgres) => {
                test_fn(postgres.storage()).await;
            }
            Err(err) => {
                eprintln!("Skipping PostgreSQL storage tests: {err}");
            }
        }
    }
}

/// Open a second `Storage` over the same store, as another process would.
#[allow(dead_code)]
pub async fn reopen(storage: &Storage) -> Storage {
    let store: Arc<dyn MetadataStore> = storage.store().clone();
    Storage::open(store, &SyncConfig::default())
        .await
        .expect("Failed to reopen storage")
}
