//! Collection snapshot repository.

use crate::error::MetadataResult;
use crate::models::CollectionStateRow;
use async_trait::async_trait;
use uuid::Uuid;

/// Repository for immutable collection snapshots.
#[async_trait]
pub trait StateRepo: Send {
    /// Get the snapshot `name` of a collection.
    async fn get_state(
        &mut self,
        collection_id: Uuid,
        name: &str,
    ) -> MetadataResult<Option<CollectionStateRow>>;

    /// Insert a snapshot. An existing snapshot with the same name is left
    /// untouched and false is returned.
    async fn insert_state(&mut self, row: &CollectionStateRow) -> MetadataResult<bool>;
}
