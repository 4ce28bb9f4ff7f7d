//! Per-item change history.
//!
//! Every observed `(collection, name)` carries the etag it was last seen with
//! and a history etag that advances exactly when that etag changes.

use crate::error::{MetadataError, MetadataResult};
use crate::models::ItemHistoryRow;
use crate::repos::HistoryRepo;
use crate::store::StoreTx;
use davstore_core::{Etag, HistoryEtag};
use time::OffsetDateTime;
use uuid::Uuid;

/// Record that `name` in `collection_id` is currently at `etag`.
///
/// Returns the history etag after the transition, or `None` for a name that
/// was never tracked and is observed as absent (nothing is written then).
pub(crate) async fn observe(
    tx: &mut dyn StoreTx,
    collection_id: Uuid,
    name: &str,
    etag: &Etag,
) -> MetadataResult<Option<HistoryEtag>> {
    if let Some(row) = tx.get_history(collection_id, name).await? {
        return advance(tx, row, etag).await.map(Some);
    }
    if etag.is_absent() {
        return Ok(None);
    }

    let history_etag = HistoryEtag::fresh().advance(etag);
    let row = ItemHistoryRow {
        id: Uuid::new_v4(),
        collection_id,
        name: name.to_string(),
        etag: etag.as_str().to_string(),
        history_etag: history_etag.as_str().to_string(),
        modified: OffsetDateTime::now_utc(),
    };
    if tx.insert_history(&row).await? {
        return Ok(Some(history_etag));
    }

    tracing::debug!(
        collection_id = %collection_id,
        name = name,
        "History row inserted concurrently, applying transition to it"
    );
    let row = tx.get_history(collection_id, name).await?.ok_or_else(|| {
        MetadataError::Internal(format!(
            "history row for '{name}' in {collection_id} vanished after insert conflict"
        ))
    })?;
    advance(tx, row, etag).await.map(Some)
}

async fn advance(
    tx: &mut dyn StoreTx,
    row: ItemHistoryRow,
    etag: &Etag,
) -> MetadataResult<HistoryEtag> {
    let current = HistoryEtag::from(row.history_etag);
    if row.etag == etag.as_str() {
        return Ok(current);
    }
    let next = current.advance(etag);
    tx.update_history(
        row.collection_id,
        &row.name,
        etag.as_str(),
        next.as_str(),
        OffsetDateTime::now_utc(),
    )
    .await?;
    Ok(next)
}
