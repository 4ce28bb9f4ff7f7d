//! Item repository.

use crate::error::MetadataResult;
use crate::models::ItemRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for item rows.
#[async_trait]
pub trait ItemRepo: Send {
    /// Get an item by collection and name.
    async fn get_item(&mut self, collection_id: Uuid, name: &str)
    -> MetadataResult<Option<ItemRow>>;

    /// Get the items among `names` that exist, ordered by name.
    async fn get_items(
        &mut self,
        collection_id: Uuid,
        names: &[String],
    ) -> MetadataResult<Vec<ItemRow>>;

    /// All items directly owned by a collection, ordered by name.
    ///
    /// This ordering is the store iteration order used for state digests.
    async fn list_items(&mut self, collection_id: Uuid) -> MetadataResult<Vec<ItemRow>>;

    /// Items whose body contains `needle`, ordered by name.
    async fn search_items(
        &mut self,
        collection_id: Uuid,
        needle: &[u8],
    ) -> MetadataResult<Vec<ItemRow>>;

    /// Insert an item unless `(collection_id, name)` is taken.
    /// Returns false when the name already exists.
    async fn insert_item(&mut self, item: &ItemRow) -> MetadataResult<bool>;

    /// Replace an item body. Returns the number of rows updated.
    async fn update_item_data(
        &mut self,
        collection_id: Uuid,
        name: &str,
        data: &[u8],
        modified: OffsetDateTime,
    ) -> MetadataResult<u64>;

    /// Re-point an item to another collection and/or name.
    /// Returns the number of rows moved (0 when the source is missing).
    async fn move_item(
        &mut self,
        from_collection_id: Uuid,
        from_name: &str,
        to_collection_id: Uuid,
        to_name: &str,
        modified: OffsetDateTime,
    ) -> MetadataResult<u64>;

    /// Delete one item. Returns the number of rows deleted.
    async fn delete_item(&mut self, collection_id: Uuid, name: &str) -> MetadataResult<u64>;

    /// Delete every item of a collection.
    async fn delete_items(&mut self, collection_id: Uuid) -> MetadataResult<u64>;
}
