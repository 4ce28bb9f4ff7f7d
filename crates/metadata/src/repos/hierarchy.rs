//! Path resolution over the unified collection/item view.

use crate::error::MetadataResult;
use crate::models::NodeRow;
use async_trait::async_trait;
use uuid::Uuid;

/// Repository for set-oriented tree queries.
#[async_trait]
pub trait HierarchyRepo: Send {
    /// Resolve a non-empty segment list (root first) to the node at its end.
    ///
    /// The whole ancestor chain is verified in one query. When a collection
    /// and an item share the final name, the collection is returned.
    async fn resolve_path(&mut self, segments: &[String]) -> MetadataResult<Option<NodeRow>>;

    /// Immediate child collections and items of a collection, collections
    /// first, each group ordered by name.
    async fn list_children(&mut self, parent_id: Uuid) -> MetadataResult<Vec<NodeRow>>;
}
