//! Index generations and alias cutover.
//!
//! Physical indices are named `<alias><generation>` (`tracks1`, `tracks2`, ...).
//! Readers only ever address the alias; a rebuild writes a new generation and
//! swaps the alias over in one atomic call once it is complete.

use serde_json::Value;
use tracing::{error, info};

use crate::error::ConnError;
use crate::store::{AliasAction, DocumentStore};

/// Physical index name for an alias generation.
pub fn generation_index_name(alias: &str, generation: u32) -> String {
    format!("{alias}{generation}")
}

/// Whether `index` is a generation of `alias`: the alias followed by digits only.
///
/// `playlists3` is not a generation of `plays`, nor is `plays_backup`.
pub fn is_generation_of(index: &str, alias: &str) -> bool {
    index
        .strip_prefix(alias)
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
}

/// Outcome of [`cutover_alias`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AliasCutover {
    /// The alias did not exist and now points at the index
    Attached,
    /// The alias moved from these indices to the index in one atomic update
    Swapped { from: Vec<String> },
    /// The alias already pointed at the index
    Unchanged,
}

/// Create an index, optionally dropping any existing index of that name first.
///
/// Returns `true` when a new index was created. An existing index is left
/// alone unless `drop_existing` is set.
pub async fn create_index(
    store: &dyn DocumentStore,
    name: &str,
    body: &Value,
    drop_existing: bool,
) -> Result<bool, ConnError> {
    if drop_existing && store.delete_index(name).await? {
        info!(index = %name, "dropped index");
    }
    let created = store.create_index(name, body).await?;
    if created {
        info!(index = %name, "created index");
    } else {
        info!(index = %name, "index already exists");
    }
    Ok(created)
}

/// Point `alias` at `index`, atomically moving it off any previous index.
pub async fn cutover_alias(
    store: &dyn DocumentStore,
    alias: &str,
    index: &str,
) -> Result<AliasCutover, ConnError> {
    let current = store.get_alias(alias).await?;

    if current.is_empty() {
        store.put_alias(index, alias).await?;
        info!(alias = %alias, index = %index, "attached alias");
        return Ok(AliasCutover::Attached);
    }

    if current.len() == 1 && current[0] == index {
        return Ok(AliasCutover::Unchanged);
    }

    let mut actions: Vec<AliasAction> = current
        .iter()
        .filter(|name| name.as_str() != index)
        .map(|name| AliasAction::Remove {
            index: name.clone(),
            alias: alias.to_string(),
        })
        .collect();
    actions.push(AliasAction::Add {
        index: index.to_string(),
        alias: alias.to_string(),
    });
    store.update_aliases(&actions).await?;

    let from: Vec<String> = current.into_iter().filter(|name| name != index).collect();
    info!(alias = %alias, index = %index, from = ?from, "swapped alias");
    Ok(AliasCutover::Swapped { from })
}

/// Delete every generation of `alias` other than `keep`.
///
/// Only `<alias><digits>` names are generations, not every name starting
/// with `alias`: cleaning `plays` never touches `playlists1`, and a
/// hand-made `tracks_old` is left alone.
///
/// A failed delete is logged and skipped; the next cleanup retries it.
/// Returns the names that were deleted.
pub async fn cleanup_old_generations(
    store: &dyn DocumentStore,
    alias: &str,
    keep: &str,
) -> Result<Vec<String>, ConnError> {
    let indices = store.cat_indices().await?;
    let mut deleted = Vec::new();

    for info in indices {
        if info.index == keep || !is_generation_of(&info.index, alias) {
            continue;
        }
        match store.delete_index(&info.index).await {
            Ok(_) => {
                info!(index = %info.index, "deleted old index");
                deleted.push(info.index);
            }
            Err(e) => error!(index = %info.index, error = %e, "failed to delete old index"),
        }
    }

    Ok(deleted)
}
