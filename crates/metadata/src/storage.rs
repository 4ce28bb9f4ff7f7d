//! The collection store handed to protocol layers.
//!
//! Every call runs in one transaction: it commits on success and rolls back
//! when an error is returned.

use crate::error::{MetadataError, MetadataResult};
use crate::models::{
    Collection, CollectionRow, Item, ItemHistoryRow, NewItem, Node, PruneStats, SyncResult,
};
use crate::repos::{CollectionRepo, HistoryRepo, ItemRepo, PropertyRepo};
use crate::store::MetadataStore;
use crate::{gateway, maintenance, resolver, sync};
use davstore_core::LogicalPath;
use davstore_core::config::SyncConfig;
use davstore_core::sync_token::SyncToken;
use std::collections::BTreeMap;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// Collection tree with incremental sync on top of a [`MetadataStore`].
#[derive(Clone)]
pub struct Storage {
    store: Arc<dyn MetadataStore>,
    root: CollectionRow,
    max_token_age: Duration,
}

impl Storage {
    /// Wrap a migrated store, creating the root collection if needed.
    pub async fn open(store: Arc<dyn MetadataStore>, config: &SyncConfig) -> MetadataResult<Self> {
        let root = bootstrap_root(store.as_ref()).await?;
        Ok(Self {
            store,
            root,
            max_token_age: config.max_token_age(),
        })
    }

    /// The underlying metadata store.
    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    /// The root collection as of when the store was opened.
    pub fn root(&self) -> Collection {
        Collection {
            id: self.root.id,
            path: LogicalPath::root(),
            modified: self.root.modified,
        }
    }

    /// Resolve `path`; see [`Node`]. An empty result means nothing lives there.
    pub async fn resolve(&self, path: &LogicalPath, depth: u32) -> MetadataResult<Vec<Node>> {
        let mut tx = self.store.begin().await?;
        let nodes = resolver::resolve(tx.as_mut(), self.root.id, path, depth).await?;
        tx.commit().await?;
        Ok(nodes)
    }

    /// The collection at `path`, if `path` names one.
    pub async fn find_collection(&self, path: &LogicalPath) -> MetadataResult<Option<Collection>> {
        let nodes = self.resolve(path, 0).await?;
        Ok(nodes.into_iter().find_map(|node| match node {
            Node::Collection(collection) => Some(collection),
            Node::Item { .. } => None,
        }))
    }

    /// All items of a collection, ordered by name.
    pub async fn list_items(&self, collection_id: Uuid) -> MetadataResult<Vec<Item>> {
        let mut tx = self.store.begin().await?;
        let items = tx.list_items(collection_id).await?;
        tx.commit().await?;
        Ok(items)
    }

    pub async fn get_item(&self, collection_id: Uuid, name: &str) -> MetadataResult<Option<Item>> {
        let mut tx = self.store.begin().await?;
        let item = tx.get_item(collection_id, name).await?;
        tx.commit().await?;
        Ok(item)
    }

    /// Fetch several items at once: found items first, then each missing
    /// name paired with `None`.
    pub async fn get_items(
        &self,
        collection_id: Uuid,
        names: &[String],
    ) -> MetadataResult<Vec<(String, Option<Item>)>> {
        let mut tx = self.store.begin().await?;
        let found = tx.get_items(collection_id, names).await?;
        tx.commit().await?;

        let missing: Vec<String> = names
            .iter()
            .filter(|name| !found.iter().any(|item| &item.name == *name))
            .cloned()
            .collect();
        let mut result: Vec<(String, Option<Item>)> = found
            .into_iter()
            .map(|item| (item.name.clone(), Some(item)))
            .collect();
        result.extend(missing.into_iter().map(|name| (name, None)));
        Ok(result)
    }

    /// Items whose body contains `needle`.
    pub async fn search_items(
        &self,
        collection_id: Uuid,
        needle: &[u8],
    ) -> MetadataResult<Vec<Item>> {
        let mut tx = self.store.begin().await?;
        let items = tx.search_items(collection_id, needle).await?;
        tx.commit().await?;
        Ok(items)
    }

    /// Create or replace an item. The returned item carries exactly `data`.
    pub async fn upload(
        &self,
        collection_id: Uuid,
        name: &str,
        data: &[u8],
    ) -> MetadataResult<Item> {
        let mut tx = self.store.begin().await?;
        let item = gateway::upload(tx.as_mut(), collection_id, name, data).await?;
        tx.commit().await?;
        tracing::debug!(collection_id = %collection_id, name = name, size = data.len(), "Uploaded item");
        Ok(item)
    }

    /// Delete one item (`Some(name)`) or the whole collection (`None`).
    pub async fn delete(&self, collection_id: Uuid, name: Option<&str>) -> MetadataResult<()> {
        let mut tx = self.store.begin().await?;
        match name {
            Some(name) => gateway::delete_item(tx.as_mut(), collection_id, name).await?,
            None => gateway::delete_collection(tx.as_mut(), self.root.id, collection_id).await?,
        }
        tx.commit().await?;
        Ok(())
    }

    /// Move an item, replacing any item already at the destination.
    pub async fn move_item(
        &self,
        item: &Item,
        to_collection_id: Uuid,
        to_name: &str,
    ) -> MetadataResult<()> {
        let mut tx = self.store.begin().await?;
        gateway::move_item(tx.as_mut(), item, to_collection_id, to_name).await?;
        tx.commit().await?;
        Ok(())
    }

    /// All metadata of a collection.
    pub async fn get_meta(&self, collection_id: Uuid) -> MetadataResult<BTreeMap<String, String>> {
        let mut tx = self.store.begin().await?;
        let rows = tx.get_properties(collection_id).await?;
        tx.commit().await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.value.map(|value| (row.key, value)))
            .collect())
    }

    /// One metadata value of a collection.
    pub async fn get_meta_value(
        &self,
        collection_id: Uuid,
        key: &str,
    ) -> MetadataResult<Option<String>> {
        let mut tx = self.store.begin().await?;
        let row = tx.get_property(collection_id, key).await?;
        tx.commit().await?;
        Ok(row.and_then(|row| row.value))
    }

    /// Replace all metadata of a collection.
    pub async fn set_meta(
        &self,
        collection_id: Uuid,
        properties: &BTreeMap<String, String>,
    ) -> MetadataResult<()> {
        let mut tx = self.store.begin().await?;
        gateway::set_properties(tx.as_mut(), collection_id, properties).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn last_modified(&self, collection_id: Uuid) -> MetadataResult<OffsetDateTime> {
        let mut tx = self.store.begin().await?;
        let collection = tx.get_collection(collection_id).await?;
        tx.commit().await?;
        collection
            .map(|c| c.modified)
            .ok_or_else(|| MetadataError::NotFound(format!("collection {collection_id}")))
    }

    /// Fingerprint of a collection's items and metadata.
    pub async fn collection_etag(&self, collection_id: Uuid) -> MetadataResult<String> {
        let mut tx = self.store.begin().await?;
        let etag = maintenance::collection_etag(tx.as_mut(), collection_id).await?;
        tx.commit().await?;
        Ok(etag)
    }

    /// Report the names changed since `old_token` (empty for a first sync)
    /// together with the token for the current state.
    pub async fn sync(&self, collection_id: Uuid, old_token: &str) -> MetadataResult<SyncResult> {
        let old = SyncToken::parse(old_token)?;

        let mut tx = self.store.begin().await?;
        if tx.get_collection(collection_id).await?.is_none() {
            return Err(MetadataError::NotFound(format!(
                "collection {collection_id}"
            )));
        }
        let result = sync::sync(tx.as_mut(), collection_id, old.as_ref()).await?;
        tx.commit().await?;

        tracing::debug!(
            collection_id = %collection_id,
            token = %result.token,
            changes = result.changes.len(),
            "Synced collection"
        );
        Ok(result)
    }

    /// The tracked history of one name, if it was ever observed.
    pub async fn item_history(
        &self,
        collection_id: Uuid,
        name: &str,
    ) -> MetadataResult<Option<ItemHistoryRow>> {
        let mut tx = self.store.begin().await?;
        let row = tx.get_history(collection_id, name).await?;
        tx.commit().await?;
        Ok(row)
    }

    /// Create every missing collection along `path`, optionally replacing
    /// the target's contents with `items` and `metadata`.
    pub async fn create_collection_path(
        &self,
        path: &LogicalPath,
        items: Option<Vec<NewItem>>,
        metadata: Option<BTreeMap<String, String>>,
    ) -> MetadataResult<Collection> {
        let mut tx = self.store.begin().await?;
        let row =
            gateway::create_collection_path(tx.as_mut(), &self.root, path, items, metadata).await?;
        tx.commit().await?;
        Ok(Collection {
            id: row.id,
            path: path.clone(),
            modified: row.modified,
        })
    }

    /// Prune deleted-item history older than the configured token age.
    pub async fn prune_expired(&self) -> MetadataResult<PruneStats> {
        self.prune_older_than(self.max_token_age).await
    }

    /// Prune tracked-but-deleted history older than `max_age`.
    ///
    /// Snapshots are kept: a client holding an old token still learns about
    /// names whose history was pruned since.
    pub async fn prune_older_than(&self, max_age: Duration) -> MetadataResult<PruneStats> {
        let mut tx = self.store.begin().await?;
        let stats = maintenance::prune(tx.as_mut(), max_age).await?;
        tx.commit().await?;
        tracing::info!(
            history_rows = stats.history_rows,
            max_age_secs = max_age.whole_seconds(),
            "Pruned sync history"
        );
        Ok(stats)
    }

    /// Whether the tree invariant (exactly one root) holds.
    pub async fn verify(&self) -> MetadataResult<bool> {
        let mut tx = self.store.begin().await?;
        let ok = maintenance::verify(tx.as_mut()).await?;
        tx.commit().await?;
        Ok(ok)
    }

    pub async fn health_check(&self) -> MetadataResult<()> {
        self.store.health_check().await
    }
}

async fn bootstrap_root(store: &dyn MetadataStore) -> MetadataResult<CollectionRow> {
    let mut tx = store.begin().await?;
    if let Some(root) = tx.get_root().await? {
        tx.commit().await?;
        return Ok(root);
    }

    let id = Uuid::new_v4();
    if tx.insert_root(id, OffsetDateTime::now_utc()).await? {
        tracing::info!(collection_id = %id, "Created root collection");
    } else {
        tracing::debug!("Root collection created concurrently");
    }
    let root = tx
        .get_root()
        .await?
        .ok_or_else(|| MetadataError::Internal("root collection missing after insert".to_string()))?;
    tx.commit().await?;
    Ok(root)
}
