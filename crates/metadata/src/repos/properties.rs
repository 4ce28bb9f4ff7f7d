//! Collection metadata repository.

use crate::error::MetadataResult;
use crate::models::CollectionMetadataRow;
use async_trait::async_trait;
use uuid::Uuid;

/// Repository for collection metadata key/value pairs.
#[async_trait]
pub trait PropertyRepo: Send {
    /// All metadata of a collection, ordered by key.
    async fn get_properties(
        &mut self,
        collection_id: Uuid,
    ) -> MetadataResult<Vec<CollectionMetadataRow>>;

    /// One metadata value. `None` when the key is unset.
    async fn get_property(
        &mut self,
        collection_id: Uuid,
        key: &str,
    ) -> MetadataResult<Option<CollectionMetadataRow>>;

    /// Insert one key. A duplicate key surfaces as `MetadataError::Constraint`.
    async fn insert_property(
        &mut self,
        collection_id: Uuid,
        key: &str,
        value: &str,
    ) -> MetadataResult<()>;

    /// Delete all metadata of a collection.
    async fn delete_properties(&mut self, collection_id: Uuid) -> MetadataResult<u64>;
}
