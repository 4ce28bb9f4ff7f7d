//! Item history repository.

use crate::error::MetadataResult;
use crate::models::ItemHistoryRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for per-name change history.
#[async_trait]
pub trait HistoryRepo: Send {
    /// Get the history row of `(collection_id, name)`.
    async fn get_history(
        &mut self,
        collection_id: Uuid,
        name: &str,
    ) -> MetadataResult<Option<ItemHistoryRow>>;

    /// Insert a history row unless one exists for the same name.
    /// Returns false when a concurrent writer inserted first.
    async fn insert_history(&mut self, row: &ItemHistoryRow) -> MetadataResult<bool>;

    /// Record a new `(etag, history_etag)` pair for a tracked name.
    async fn update_history(
        &mut self,
        collection_id: Uuid,
        name: &str,
        etag: &str,
        history_etag: &str,
        modified: OffsetDateTime,
    ) -> MetadataResult<u64>;

    /// Names tracked in history without a live item, ordered by name.
    async fn list_deleted_history(&mut self, collection_id: Uuid) -> MetadataResult<Vec<String>>;

    /// Delete history rows without a live item last modified before `cutoff`,
    /// across all collections.
    async fn prune_deleted_history(&mut self, cutoff: OffsetDateTime) -> MetadataResult<u64>;
}
