//! Database models mapping to the collection schema, and the node types
//! handed to callers.

use davstore_core::{Etag, LogicalPath};
use sqlx::FromRow;
use time::OffsetDateTime;
use time::macros::format_description;
use uuid::Uuid;

// =============================================================================
// Rows
// =============================================================================

/// Collection record. Exactly one row (the root) has no parent and no name.
#[derive(Debug, Clone, FromRow)]
pub struct CollectionRow {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    pub name: Option<String>,
    pub modified: OffsetDateTime,
}

/// Collection metadata key/value pair.
#[derive(Debug, Clone, FromRow)]
pub struct CollectionMetadataRow {
    pub collection_id: Uuid,
    pub key: String,
    pub value: Option<String>,
}

/// Item record.
#[derive(Debug, Clone, FromRow)]
pub struct ItemRow {
    pub id: Uuid,
    pub collection_id: Uuid,
    pub name: String,
    pub data: Vec<u8>,
    pub modified: OffsetDateTime,
}

impl ItemRow {
    /// Content fingerprint of the stored body.
    pub fn etag(&self) -> Etag {
        Etag::of(&self.data)
    }
}

/// Per-name change history. `etag` is empty while the item is absent.
#[derive(Debug, Clone, FromRow)]
pub struct ItemHistoryRow {
    pub id: Uuid,
    pub collection_id: Uuid,
    pub name: String,
    pub etag: String,
    pub history_etag: String,
    pub modified: OffsetDateTime,
}

/// Immutable collection snapshot keyed by its digest.
#[derive(Debug, Clone, FromRow)]
pub struct CollectionStateRow {
    pub collection_id: Uuid,
    pub name: String,
    pub state: Vec<u8>,
    pub created_at: OffsetDateTime,
}

/// One row of the unified collection/item view used by path resolution.
#[derive(Debug, Clone, FromRow)]
pub struct NodeRow {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    pub name: Option<String>,
    pub modified: OffsetDateTime,
    pub data: Option<Vec<u8>>,
    pub kind: String,
}

pub const NODE_KIND_COLLECTION: &str = "collection";
pub const NODE_KIND_ITEM: &str = "item";

// =============================================================================
// Nodes
// =============================================================================

/// Handle to a collection at a known path.
#[derive(Debug, Clone)]
pub struct Collection {
    pub id: Uuid,
    pub path: LogicalPath,
    pub modified: OffsetDateTime,
}

impl Collection {
    /// Last modification time in HTTP date form (`Mon, 02 Jan 2006 15:04:05 GMT`).
    pub fn http_last_modified(&self) -> String {
        format_http_date(self.modified)
    }
}

/// A stored item.
pub type Item = ItemRow;

/// A resolved tree node.
#[derive(Debug, Clone)]
pub enum Node {
    Collection(Collection),
    Item { path: LogicalPath, item: Item },
}

impl Node {
    pub fn path(&self) -> &LogicalPath {
        match self {
            Node::Collection(collection) => &collection.path,
            Node::Item { path, .. } => path,
        }
    }

    pub fn as_collection(&self) -> Option<&Collection> {
        match self {
            Node::Collection(collection) => Some(collection),
            Node::Item { .. } => None,
        }
    }

    pub fn as_item(&self) -> Option<&Item> {
        match self {
            Node::Item { item, .. } => Some(item),
            Node::Collection(_) => None,
        }
    }
}

/// An item supplied to a bulk collection load.
#[derive(Debug, Clone)]
pub struct NewItem {
    /// Item uid, used to name the stored file when it is file-name safe.
    pub uid: Option<String>,
    pub data: Vec<u8>,
}

/// Result of a sync call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncResult {
    /// The token naming the current collection state.
    pub token: String,
    /// Names whose history differs from the prior state, in report order.
    pub changes: Vec<String>,
}

/// Rows removed by a retention pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneStats {
    pub history_rows: u64,
}

pub(crate) fn format_http_date(at: OffsetDateTime) -> String {
    let format = format_description!(
        "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
    );
    at.to_offset(time::UtcOffset::UTC)
        .format(&format)
        .unwrap_or_default()
}
