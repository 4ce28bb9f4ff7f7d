//! Path resolution over the collection tree.

use crate::error::{MetadataError, MetadataResult};
use crate::models::{Collection, ItemRow, NODE_KIND_ITEM, Node, NodeRow};
use crate::repos::{CollectionRepo, HierarchyRepo};
use crate::store::StoreTx;
use davstore_core::LogicalPath;
use uuid::Uuid;

/// Resolve `path` to its node, followed by its immediate children when the
/// node is a collection and `depth > 0`. Returns an empty list when nothing
/// lives at `path`.
pub(crate) async fn resolve(
    tx: &mut dyn StoreTx,
    root_id: Uuid,
    path: &LogicalPath,
    depth: u32,
) -> MetadataResult<Vec<Node>> {
    let node = if path.is_root() {
        let root = tx
            .get_collection(root_id)
            .await?
            .ok_or_else(|| MetadataError::Internal("root collection is missing".to_string()))?;
        Node::Collection(Collection {
            id: root.id,
            path: LogicalPath::root(),
            modified: root.modified,
        })
    } else {
        match tx.resolve_path(path.segments()).await? {
            Some(row) => node_from_row(row, path.clone())?,
            None => return Ok(Vec::new()),
        }
    };

    let collection_id = match &node {
        Node::Collection(collection) if depth > 0 => collection.id,
        _ => return Ok(vec![node]),
    };

    let children = tx.list_children(collection_id).await?;
    let mut nodes = Vec::with_capacity(children.len() + 1);
    nodes.push(node);
    for row in children {
        let name = row.name.clone().ok_or_else(|| {
            MetadataError::Internal(format!("unnamed child {} under {collection_id}", row.id))
        })?;
        nodes.push(node_from_row(row, path.join(&name))?);
    }
    Ok(nodes)
}

fn node_from_row(row: NodeRow, path: LogicalPath) -> MetadataResult<Node> {
    if row.kind != NODE_KIND_ITEM {
        return Ok(Node::Collection(Collection {
            id: row.id,
            path,
            modified: row.modified,
        }));
    }

    let collection_id = row
        .parent_id
        .ok_or_else(|| MetadataError::Internal(format!("item {} has no collection", row.id)))?;
    let name = row
        .name
        .ok_or_else(|| MetadataError::Internal(format!("item {} has no name", row.id)))?;
    Ok(Node::Item {
        path,
        item: ItemRow {
            id: row.id,
            collection_id,
            name,
            data: row.data.unwrap_or_default(),
            modified: row.modified,
        },
    })
}
