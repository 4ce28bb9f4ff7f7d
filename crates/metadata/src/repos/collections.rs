//! Collection repository.

use crate::error::MetadataResult;
use crate::models::CollectionRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for collection rows.
#[async_trait]
pub trait CollectionRepo: Send {
    /// Get a collection by id.
    async fn get_collection(&mut self, id: Uuid) -> MetadataResult<Option<CollectionRow>>;

    /// Get the root collection (the row without a parent).
    async fn get_root(&mut self) -> MetadataResult<Option<CollectionRow>>;

    /// Insert the root collection unless one already exists.
    /// Returns false when another root won the race.
    async fn insert_root(&mut self, id: Uuid, modified: OffsetDateTime) -> MetadataResult<bool>;

    /// Count rows without a parent.
    async fn count_roots(&mut self) -> MetadataResult<u64>;

    /// Find the child collection `name` of `parent_id`.
    async fn find_child(
        &mut self,
        parent_id: Uuid,
        name: &str,
    ) -> MetadataResult<Option<CollectionRow>>;

    /// Insert a child collection unless `(parent_id, name)` is taken.
    /// Returns false when the name already exists; callers re-select.
    async fn insert_child(
        &mut self,
        id: Uuid,
        parent_id: Uuid,
        name: &str,
        modified: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Delete a collection; children, metadata, items, history and snapshots
    /// cascade. Returns the number of rows deleted (0 or 1).
    async fn delete_collection(&mut self, id: Uuid) -> MetadataResult<u64>;

    /// Delete every child collection (and their subtrees) of `parent_id`.
    async fn delete_children(&mut self, parent_id: Uuid) -> MetadataResult<u64>;

    /// Mark a collection as modified.
    async fn touch_collection(&mut self, id: Uuid, modified: OffsetDateTime)
    -> MetadataResult<()>;
}
