//! Document store interface.
//!
//! The sync engine only needs a narrow slice of an Elasticsearch-style API:
//! index lifecycle, aliases, bulk upsert and aggregation searches. The
//! [`DocumentStore`] trait captures that slice so the HTTP client and the
//! in-memory store are interchangeable.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use search_sync_types::Document;

use crate::error::ConnError;

/// One upsert in a bulk request. Always a full-document replace.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkOp {
    pub index: String,
    pub id: String,
    pub doc: Document,
}

/// Decoded bulk response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BulkResponse {
    /// True when at least one item failed
    #[serde(default)]
    pub errors: bool,
    /// Per-item results, in request order
    #[serde(default)]
    pub items: Vec<Value>,
}

impl BulkResponse {
    /// The first item that reports an error, for diagnostics.
    pub fn first_error(&self) -> Option<&Value> {
        self.items.iter().find(|item| {
            item.as_object()
                .and_then(|actions| actions.values().next())
                .and_then(|result| result.get("error"))
                .is_some()
        })
    }

    /// Number of failed items.
    pub fn error_count(&self) -> usize {
        self.items
            .iter()
            .filter(|item| {
                item.as_object()
                    .and_then(|actions| actions.values().next())
                    .and_then(|result| result.get("error"))
                    .is_some()
            })
            .count()
    }
}

/// A single step of an atomic alias update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AliasAction {
    Add { index: String, alias: String },
    Remove { index: String, alias: String },
}

/// Row of the index listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IndexInfo {
    pub index: String,
    #[serde(default)]
    pub health: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl IndexInfo {
    /// Whether the index reports red health.
    pub fn is_red(&self) -> bool {
        self.health.as_deref() == Some("red")
    }
}

/// Cluster health levels, worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Red,
    Yellow,
    Green,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Red => write!(f, "red"),
            HealthStatus::Yellow => write!(f, "yellow"),
            HealthStatus::Green => write!(f, "green"),
        }
    }
}

/// Cluster health response.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterHealth {
    pub status: HealthStatus,
    #[serde(default)]
    pub timed_out: bool,
}

/// Header + body pair of a multi-search request.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    /// Index or alias to search
    pub index: String,
    pub body: Value,
}

/// Narrow Elasticsearch-style document store API.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create an index from a settings/mappings body.
    ///
    /// Returns `false` when the index already existed.
    async fn create_index(&self, name: &str, body: &Value) -> Result<bool, ConnError>;

    /// Delete an index. Returns `false` when it did not exist.
    async fn delete_index(&self, name: &str) -> Result<bool, ConnError>;

    /// Make recent writes visible to search.
    async fn refresh_index(&self, name: &str) -> Result<(), ConnError>;

    /// Physical indices an alias points at (empty when unassigned).
    async fn get_alias(&self, alias: &str) -> Result<Vec<String>, ConnError>;

    /// Point an alias at an index.
    async fn put_alias(&self, index: &str, alias: &str) -> Result<(), ConnError>;

    /// Apply alias actions atomically in one call.
    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<(), ConnError>;

    /// List all indices with their health.
    async fn cat_indices(&self) -> Result<Vec<IndexInfo>, ConnError>;

    /// Upsert documents in one bulk request.
    async fn bulk(&self, ops: &[BulkOp]) -> Result<BulkResponse, ConnError>;

    /// Run several searches in one round trip; one response per request,
    /// in order. Per-search failures come back as `{"error": ..}` entries.
    async fn msearch(&self, searches: &[SearchRequest]) -> Result<Vec<Value>, ConnError>;

    /// Wait until the cluster reaches at least `wait_for` or the timeout passes.
    async fn cluster_health(
        &self,
        wait_for: HealthStatus,
        timeout: Duration,
    ) -> Result<ClusterHealth, ConnError>;

    /// Apply persistent cluster settings.
    async fn put_cluster_settings(&self, body: &Value) -> Result<(), ConnError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_first_error_skips_successful_items() {
        let resp: BulkResponse = serde_json::from_value(json!({
            "errors": true,
            "items": [
                {"index": {"_id": "1", "status": 200}},
                {"index": {"_id": "2", "status": 429, "error": {"type": "es_rejected_execution_exception"}}},
                {"index": {"_id": "3", "status": 429, "error": {"type": "es_rejected_execution_exception"}}}
            ]
        }))
        .unwrap();

        let first = resp.first_error().unwrap();
        assert_eq!(first["index"]["_id"], "2");
        assert_eq!(resp.error_count(), 2);
    }

    #[test]
    fn test_alias_action_wire_format() {
        let actions = vec![
            AliasAction::Remove {
                index: "tracks1".to_string(),
                alias: "tracks".to_string(),
            },
            AliasAction::Add {
                index: "tracks2".to_string(),
                alias: "tracks".to_string(),
            },
        ];
        assert_eq!(
            serde_json::to_value(&actions).unwrap(),
            json!([
                {"remove": {"index": "tracks1", "alias": "tracks"}},
                {"add": {"index": "tracks2", "alias": "tracks"}}
            ])
        );
    }

    #[test]
    fn test_health_ordering() {
        assert!(HealthStatus::Red < HealthStatus::Yellow);
        assert!(HealthStatus::Yellow < HealthStatus::Green);
        assert_eq!(HealthStatus::Yellow.to_string(), "yellow");
    }
}
