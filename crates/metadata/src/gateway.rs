//! Mutations of the collection tree. Every item mutation applies the history
//! transition in the same transaction as the row change.

use crate::error::{MetadataError, MetadataResult};
use crate::history;
use crate::models::{CollectionRow, Item, ItemRow, NewItem};
use crate::repos::{CollectionRepo, ItemRepo, PropertyRepo};
use crate::store::StoreTx;
use davstore_core::{CollectionKind, Etag, LogicalPath};
use std::collections::{BTreeMap, BTreeSet};
use time::OffsetDateTime;
use uuid::Uuid;

/// Create or replace `name` in a collection.
pub(crate) async fn upload(
    tx: &mut dyn StoreTx,
    collection_id: Uuid,
    name: &str,
    data: &[u8],
) -> MetadataResult<Item> {
    if tx.get_collection(collection_id).await?.is_none() {
        return Err(MetadataError::NotFound(format!(
            "collection {collection_id}"
        )));
    }
    store_item(tx, collection_id, name, data).await
}

async fn store_item(
    tx: &mut dyn StoreTx,
    collection_id: Uuid,
    name: &str,
    data: &[u8],
) -> MetadataResult<Item> {
    let now = OffsetDateTime::now_utc();
    let existing = tx.get_item(collection_id, name).await?;

    let item = match existing {
        None => {
            let row = ItemRow {
                id: Uuid::new_v4(),
                collection_id,
                name: name.to_string(),
                data: data.to_vec(),
                modified: now,
            };
            if tx.insert_item(&row).await? {
                Some(row)
            } else {
                tracing::debug!(
                    collection_id = %collection_id,
                    name = name,
                    "Item inserted concurrently, replacing its data"
                );
                None
            }
        }
        Some(_) => None,
    };
    let item = match item {
        Some(item) => item,
        None => {
            tx.update_item_data(collection_id, name, data, now).await?;
            tx.get_item(collection_id, name).await?.ok_or_else(|| {
                MetadataError::Internal(format!(
                    "item '{name}' in {collection_id} vanished during update"
                ))
            })?
        }
    };

    tx.touch_collection(collection_id, now).await?;
    history::observe(tx, collection_id, name, &item.etag()).await?;
    Ok(item)
}

/// Remove one item. Removing a name that holds no item is not an error.
pub(crate) async fn delete_item(
    tx: &mut dyn StoreTx,
    collection_id: Uuid,
    name: &str,
) -> MetadataResult<()> {
    history::observe(tx, collection_id, name, &Etag::absent()).await?;
    if tx.delete_item(collection_id, name).await? > 0 {
        tx.touch_collection(collection_id, OffsetDateTime::now_utc())
            .await?;
    }
    Ok(())
}

/// Remove a collection together with everything below it.
pub(crate) async fn delete_collection(
    tx: &mut dyn StoreTx,
    root_id: Uuid,
    collection_id: Uuid,
) -> MetadataResult<()> {
    if collection_id == root_id {
        return Err(MetadataError::Constraint(
            "the root collection cannot be deleted".to_string(),
        ));
    }
    if tx.delete_collection(collection_id).await? == 0 {
        return Err(MetadataError::NotFound(format!(
            "collection {collection_id}"
        )));
    }
    tracing::info!(collection_id = %collection_id, "Deleted collection");
    Ok(())
}

/// Move `item` to `to_name` in `to_collection_id`, replacing whatever is there.
pub(crate) async fn move_item(
    tx: &mut dyn StoreTx,
    item: &Item,
    to_collection_id: Uuid,
    to_name: &str,
) -> MetadataResult<()> {
    let from_collection_id = item.collection_id;
    if from_collection_id == to_collection_id && item.name == to_name {
        return Ok(());
    }
    if tx.get_collection(to_collection_id).await?.is_none() {
        return Err(MetadataError::NotFound(format!(
            "collection {to_collection_id}"
        )));
    }

    let now = OffsetDateTime::now_utc();
    tx.delete_item(to_collection_id, to_name).await?;
    let moved = tx
        .move_item(from_collection_id, &item.name, to_collection_id, to_name, now)
        .await?;
    if moved == 0 {
        return Err(MetadataError::NotFound(format!(
            "item '{}' in collection {from_collection_id}",
            item.name
        )));
    }
    tx.touch_collection(from_collection_id, now).await?;
    tx.touch_collection(to_collection_id, now).await?;

    let moved = tx.get_item(to_collection_id, to_name).await?.ok_or_else(|| {
        MetadataError::Internal(format!(
            "moved item '{to_name}' missing from {to_collection_id}"
        ))
    })?;
    history::observe(tx, to_collection_id, to_name, &moved.etag()).await?;
    history::observe(tx, from_collection_id, &item.name, &Etag::absent()).await?;
    Ok(())
}

/// Replace the metadata of a collection.
pub(crate) async fn set_properties(
    tx: &mut dyn StoreTx,
    collection_id: Uuid,
    properties: &BTreeMap<String, String>,
) -> MetadataResult<()> {
    if tx.get_collection(collection_id).await?.is_none() {
        return Err(MetadataError::NotFound(format!(
            "collection {collection_id}"
        )));
    }
    tx.delete_properties(collection_id).await?;
    for (key, value) in properties {
        tx.insert_property(collection_id, key, value).await?;
    }
    tx.touch_collection(collection_id, OffsetDateTime::now_utc())
        .await?;
    Ok(())
}

/// Walk `path` from the root, creating every missing collection.
///
/// When `items` or `properties` are given, the target's children, metadata
/// and items are replaced by them.
pub(crate) async fn create_collection_path(
    tx: &mut dyn StoreTx,
    root: &CollectionRow,
    path: &LogicalPath,
    items: Option<Vec<NewItem>>,
    properties: Option<BTreeMap<String, String>>,
) -> MetadataResult<CollectionRow> {
    let mut collection = root.clone();
    for segment in path.segments() {
        collection = get_or_insert_child(tx, collection.id, segment).await?;
    }

    if items.is_none() && properties.is_none() {
        return Ok(collection);
    }

    let collection_id = collection.id;
    let replaced: Vec<String> = tx
        .list_items(collection_id)
        .await?
        .into_iter()
        .map(|item| item.name)
        .collect();
    let removed_children = tx.delete_children(collection_id).await?;
    tx.delete_properties(collection_id).await?;
    tx.delete_items(collection_id).await?;
    tracing::debug!(
        collection_id = %collection_id,
        path = %path,
        removed_children = removed_children,
        removed_items = replaced.len(),
        "Cleared collection for replacement"
    );

    let properties = properties.unwrap_or_default();
    for (key, value) in &properties {
        tx.insert_property(collection_id, key, value).await?;
    }

    let mut uploaded = BTreeSet::new();
    if let Some(items) = items {
        match CollectionKind::from_metadata(&properties) {
            Some(kind) => {
                for item in items {
                    let name = kind.item_name(item.uid.as_deref(), &item.data);
                    store_item(tx, collection_id, &name, &item.data).await?;
                    uploaded.insert(name);
                }
            }
            None if !items.is_empty() => {
                tracing::warn!(
                    collection_id = %collection_id,
                    path = %path,
                    dropped = items.len(),
                    "Collection has no recognised kind, dropping supplied items"
                );
            }
            None => {}
        }
    }

    for name in replaced.iter().filter(|name| !uploaded.contains(*name)) {
        history::observe(tx, collection_id, name, &Etag::absent()).await?;
    }

    let now = OffsetDateTime::now_utc();
    tx.touch_collection(collection_id, now).await?;
    Ok(CollectionRow {
        modified: now,
        ..collection
    })
}

async fn get_or_insert_child(
    tx: &mut dyn StoreTx,
    parent_id: Uuid,
    name: &str,
) -> MetadataResult<CollectionRow> {
    if let Some(existing) = tx.find_child(parent_id, name).await? {
        return Ok(existing);
    }

    let row = CollectionRow {
        id: Uuid::new_v4(),
        parent_id: Some(parent_id),
        name: Some(name.to_string()),
        modified: OffsetDateTime::now_utc(),
    };
    if tx
        .insert_child(row.id, parent_id, name, row.modified)
        .await?
    {
        tracing::debug!(collection_id = %row.id, parent_id = %parent_id, name = name, "Created collection");
        return Ok(row);
    }

    tracing::debug!(
        parent_id = %parent_id,
        name = name,
        "Collection created concurrently, re-selecting"
    );
    tx.find_child(parent_id, name).await?.ok_or_else(|| {
        MetadataError::Internal(format!(
            "collection '{name}' under {parent_id} vanished after insert conflict"
        ))
    })
}
