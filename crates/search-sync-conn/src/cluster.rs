//! Cluster-level housekeeping run once at startup.

use std::time::Duration;

use serde_json::json;
use tracing::{error, info, warn};

use crate::error::ConnError;
use crate::store::{DocumentStore, HealthStatus};

/// Wait for the cluster to reach yellow or better.
///
/// Fails if the cluster is still red when the wait times out.
pub async fn wait_for_healthy_cluster(
    store: &dyn DocumentStore,
    timeout: Duration,
) -> Result<HealthStatus, ConnError> {
    info!(timeout_secs = timeout.as_secs(), "waiting for cluster health");
    let health = store.cluster_health(HealthStatus::Yellow, timeout).await?;
    if health.status < HealthStatus::Yellow {
        return Err(ConnError::Store {
            status: 408,
            body: format!("cluster health is {} after {:?}", health.status, timeout),
        });
    }
    info!(status = %health.status, "cluster is healthy");
    Ok(health.status)
}

/// Refuse writes to indices that do not exist.
///
/// A misspelled alias then fails the bulk write instead of silently
/// creating a fresh empty index.
pub async fn disable_auto_create_index(store: &dyn DocumentStore) -> Result<(), ConnError> {
    store
        .put_cluster_settings(&json!({
            "persistent": { "action.auto_create_index": false }
        }))
        .await?;
    info!("disabled index auto-creation");
    Ok(())
}

/// Wait for red indices to recover, deleting any still red after `max_polls`.
///
/// Deleted indices are rebuilt by the next catchup. Returns the names that
/// were deleted.
pub async fn recover_red_indices(
    store: &dyn DocumentStore,
    max_polls: u32,
    interval: Duration,
) -> Result<Vec<String>, ConnError> {
    let mut red: Vec<String> = Vec::new();

    for poll in 0..max_polls {
        red = store
            .cat_indices()
            .await?
            .into_iter()
            .filter(|info| info.is_red())
            .map(|info| info.index)
            .collect();
        if red.is_empty() {
            return Ok(Vec::new());
        }
        warn!(poll = poll + 1, max_polls = max_polls, indices = ?red, "red indices, waiting");
        tokio::time::sleep(interval).await;
    }

    let mut deleted = Vec::new();
    for index in red {
        match store.delete_index(&index).await {
            Ok(_) => {
                warn!(index = %index, "deleted index that stayed red");
                deleted.push(index);
            }
            Err(e) => error!(index = %index, error = %e, "failed to delete red index"),
        }
    }
    Ok(deleted)
}
