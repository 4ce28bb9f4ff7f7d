//! Retention pruning and tree checks.

use crate::error::MetadataResult;
use crate::models::PruneStats;
use crate::repos::{CollectionRepo, HistoryRepo, ItemRepo, PropertyRepo};
use crate::store::StoreTx;
use davstore_core::ContentHash;
use std::collections::BTreeMap;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// Delete tracked-but-deleted history older than `max_age`.
///
/// A retention reaching back before the Unix epoch matches no row.
pub(crate) async fn prune(tx: &mut dyn StoreTx, max_age: Duration) -> MetadataResult<PruneStats> {
    let Some(cutoff) = OffsetDateTime::now_utc()
        .checked_sub(max_age)
        .filter(|cutoff| *cutoff > OffsetDateTime::UNIX_EPOCH)
    else {
        tracing::debug!(
            max_age_secs = max_age.whole_seconds(),
            "Retention predates every stored row, nothing to prune"
        );
        return Ok(PruneStats::default());
    };
    let history_rows = tx.prune_deleted_history(cutoff).await?;
    Ok(PruneStats { history_rows })
}

/// Whether the tree has exactly one root.
pub(crate) async fn verify(tx: &mut dyn StoreTx) -> MetadataResult<bool> {
    let roots = tx.count_roots().await?;
    if roots != 1 {
        tracing::warn!(roots = roots, "Collection tree does not have exactly one root");
    }
    Ok(roots == 1)
}

/// Fingerprint of a collection's items and metadata.
pub(crate) async fn collection_etag(
    tx: &mut dyn StoreTx,
    collection_id: Uuid,
) -> MetadataResult<String> {
    let mut hasher = ContentHash::hasher();
    for item in tx.list_items(collection_id).await? {
        hasher.update(item.name.as_bytes());
        hasher.update(b"/");
        hasher.update(item.etag().as_str().as_bytes());
    }
    let properties: BTreeMap<String, Option<String>> = tx
        .get_properties(collection_id)
        .await?
        .into_iter()
        .map(|row| (row.key, row.value))
        .collect();
    hasher.update(&serde_json::to_vec(&properties)?);
    Ok(format!("\"{}\"", hasher.finalize().to_hex()))
}
