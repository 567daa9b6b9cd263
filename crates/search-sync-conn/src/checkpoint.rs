//! Checkpoint computation from the live indices.

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use search_sync_types::{BlocknumberCheckpoint, WatchedTable};

use crate::error::ConnError;
use crate::store::{DocumentStore, SearchRequest};

fn max_version_search(table: WatchedTable) -> SearchRequest {
    SearchRequest {
        index: table.as_str().to_string(),
        body: json!({
            "size": 0,
            "aggs": {
                "max_version": { "max": { "field": table.version_field().as_str() } }
            }
        }),
    }
}

/// Read the aggregated max out of one multi-search response entry.
///
/// Errors (missing index) and empty indices both read as zero.
fn max_version(response: &Value) -> Option<i64> {
    if response.get("error").is_some() {
        return None;
    }
    let value = response.pointer("/aggregations/max_version/value")?;
    value.as_i64().or_else(|| value.as_f64().map(|f| f as i64))
}

/// Compute the highest indexed version for every table in `tables`.
///
/// One multi-search round trip covers every indexed table, each queried
/// through its alias. Tables without an index of their own, missing indices
/// and empty indices all get an explicit zero entry.
pub async fn compute_checkpoints(
    store: &dyn DocumentStore,
    tables: &[WatchedTable],
) -> Result<BlocknumberCheckpoint, ConnError> {
    let mut checkpoint = BlocknumberCheckpoint::zeroed(tables);

    let indexed: Vec<WatchedTable> = tables.iter().copied().filter(|t| t.is_indexed()).collect();
    if indexed.is_empty() {
        return Ok(checkpoint);
    }

    let searches: Vec<SearchRequest> = indexed.iter().map(|t| max_version_search(*t)).collect();
    let responses = store.msearch(&searches).await?;
    if responses.len() != indexed.len() {
        warn!(
            expected = indexed.len(),
            got = responses.len(),
            "multi-search returned an unexpected number of responses"
        );
    }

    for (table, response) in indexed.iter().zip(responses.iter()) {
        match max_version(response) {
            Some(version) => checkpoint.set(*table, version),
            None => debug!(table = %table, "no indexed rows, checkpoint is zero"),
        }
    }

    info!(checkpoint = ?checkpoint, "computed checkpoints");
    Ok(checkpoint)
}
