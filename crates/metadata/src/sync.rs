//! Collection state digests and token diffing.

use crate::error::MetadataResult;
use crate::history;
use crate::models::{CollectionStateRow, SyncResult};
use crate::repos::{HistoryRepo, ItemRepo, StateRepo};
use crate::store::StoreTx;
use davstore_core::{Etag, HistoryEtag, StateDigest, SyncToken};
use std::collections::{BTreeMap, HashSet};
use time::OffsetDateTime;
use uuid::Uuid;

/// The full state of a collection: every observed name with its history
/// etag, in enumeration order, and the token naming it.
#[derive(Debug)]
pub(crate) struct CollectionState {
    pub entries: Vec<(String, HistoryEtag)>,
    pub token: SyncToken,
}

/// Observe every live item and every tracked-but-deleted name of a
/// collection and digest the result.
///
/// Live items come first (by name), then deleted names (by name). A name
/// seen a second time is skipped.
pub(crate) async fn compute_state(
    tx: &mut dyn StoreTx,
    collection_id: Uuid,
) -> MetadataResult<CollectionState> {
    let mut observed: Vec<(String, Etag)> = tx
        .list_items(collection_id)
        .await?
        .into_iter()
        .map(|item| {
            let etag = item.etag();
            (item.name, etag)
        })
        .collect();
    observed.extend(
        tx.list_deleted_history(collection_id)
            .await?
            .into_iter()
            .map(|name| (name, Etag::absent())),
    );

    let mut seen = HashSet::with_capacity(observed.len());
    let mut digest = StateDigest::new();
    let mut entries = Vec::with_capacity(observed.len());
    for (name, etag) in observed {
        if !seen.insert(name.clone()) {
            tracing::debug!(collection_id = %collection_id, name = %name, "Skipping duplicate name in state");
            continue;
        }
        let Some(history_etag) = history::observe(tx, collection_id, &name, &etag).await? else {
            continue;
        };
        digest.update(&name, &history_etag);
        entries.push((name, history_etag));
    }

    Ok(CollectionState {
        entries,
        token: digest.finish(),
    })
}

/// Compute the current token for a collection and the names that changed
/// since `old`.
pub(crate) async fn sync(
    tx: &mut dyn StoreTx,
    collection_id: Uuid,
    old: Option<&SyncToken>,
) -> MetadataResult<SyncResult> {
    let state = compute_state(tx, collection_id).await?;
    let new_name = state.token.name();

    if let Some(old) = old
        && old.name() == new_name
    {
        tracing::debug!(collection_id = %collection_id, "Sync token unchanged");
        return Ok(SyncResult {
            token: state.token.to_string(),
            changes: Vec::new(),
        });
    }

    let old_state: BTreeMap<String, String> = match old {
        Some(old) => match tx.get_state(collection_id, &old.name()).await? {
            Some(row) => serde_json::from_slice(&row.state)?,
            None => {
                tracing::debug!(
                    collection_id = %collection_id,
                    token = %old,
                    "No snapshot for sync token, reporting full state"
                );
                BTreeMap::new()
            }
        },
        None => BTreeMap::new(),
    };

    let snapshot: BTreeMap<&str, &str> = state
        .entries
        .iter()
        .map(|(name, history_etag)| (name.as_str(), history_etag.as_str()))
        .collect();
    let row = CollectionStateRow {
        collection_id,
        name: new_name,
        state: serde_json::to_vec(&snapshot)?,
        created_at: OffsetDateTime::now_utc(),
    };
    if tx.insert_state(&row).await? {
        tracing::debug!(collection_id = %collection_id, token = %state.token, "Stored collection snapshot");
    } else {
        tracing::debug!(collection_id = %collection_id, token = %state.token, "Collection snapshot already stored");
    }

    Ok(SyncResult {
        token: state.token.to_string(),
        changes: diff(&state.entries, &old_state),
    })
}

/// Names whose history differs between the two states: new-state names that
/// changed or appeared, followed by names only the old state knows.
pub(crate) fn diff(
    new_state: &[(String, HistoryEtag)],
    old_state: &BTreeMap<String, String>,
) -> Vec<String> {
    let mut changes: Vec<String> = new_state
        .iter()
        .filter(|(name, history_etag)| {
            old_state.get(name).map(String::as_str) != Some(history_etag.as_str())
        })
        .map(|(name, _)| name.clone())
        .collect();

    let current: HashSet<&str> = new_state.iter().map(|(name, _)| name.as_str()).collect();
    changes.extend(
        old_state
            .keys()
            .filter(|name| !current.contains(name.as_str()))
            .cloned(),
    );
    changes
}
