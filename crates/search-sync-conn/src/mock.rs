//! In-memory stand-ins for the database and document store.
//!
//! Useful for testing indexers and the listener without a running Postgres
//! or Elasticsearch.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{json, Value};

use search_sync_types::Document;

use crate::error::ConnError;
use crate::pg::{Database, RowCursor};
use crate::store::{
    AliasAction, BulkOp, BulkResponse, ClusterHealth, DocumentStore, HealthStatus, IndexInfo,
    SearchRequest,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct MemoryIndex {
    body: Value,
    docs: BTreeMap<String, Document>,
    health: String,
}

#[derive(Debug, Default)]
struct StoreState {
    indices: BTreeMap<String, MemoryIndex>,
    aliases: BTreeMap<String, String>,
    settings: Vec<Value>,
    alias_calls: usize,
    bulk_calls: usize,
    failing_bulks: usize,
    failing_deletes: Vec<String>,
    auto_create_index: bool,
}

/// Document store held in memory.
///
/// Supports bulk failure injection, alias bookkeeping and `max`
/// aggregations, which is all the sync engine asks of a store.
#[derive(Debug, Clone, Default)]
pub struct MemoryDocumentStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryDocumentStore {
    /// Create an empty store that auto-creates indices on write.
    pub fn new() -> Self {
        let store = Self::default();
        lock(&store.state).auto_create_index = true;
        store
    }

    /// Make the next `n` bulk requests fail every item.
    pub fn fail_next_bulks(&self, n: usize) {
        lock(&self.state).failing_bulks = n;
    }

    /// Make deleting `index` fail.
    pub fn fail_delete(&self, index: impl Into<String>) {
        lock(&self.state).failing_deletes.push(index.into());
    }

    /// Set the reported health of an index.
    pub fn set_health(&self, index: &str, health: &str) {
        if let Some(idx) = lock(&self.state).indices.get_mut(index) {
            idx.health = health.to_string();
        }
    }

    /// Number of bulk requests received.
    pub fn bulk_calls(&self) -> usize {
        lock(&self.state).bulk_calls
    }

    /// Number of alias-changing requests received.
    pub fn alias_calls(&self) -> usize {
        lock(&self.state).alias_calls
    }

    /// Cluster settings applied so far.
    pub fn cluster_settings(&self) -> Vec<Value> {
        lock(&self.state).settings.clone()
    }

    /// Names of every physical index.
    pub fn index_names(&self) -> Vec<String> {
        lock(&self.state).indices.keys().cloned().collect()
    }

    /// Creation body an index was created with.
    pub fn index_body(&self, index: &str) -> Option<Value> {
        lock(&self.state).indices.get(index).map(|i| i.body.clone())
    }

    /// Documents of an index or alias, keyed by id.
    pub fn documents(&self, index_or_alias: &str) -> BTreeMap<String, Document> {
        let state = lock(&self.state);
        let name = resolve(&state, index_or_alias);
        state
            .indices
            .get(&name)
            .map(|i| i.docs.clone())
            .unwrap_or_default()
    }

    /// A single document by id.
    pub fn document(&self, index_or_alias: &str, id: &str) -> Option<Document> {
        self.documents(index_or_alias).remove(id)
    }
}

fn resolve(state: &StoreState, name: &str) -> String {
    state
        .aliases
        .get(name)
        .cloned()
        .unwrap_or_else(|| name.to_string())
}

/// Epoch milliseconds for numeric or timestamp-string field values.
fn sortable(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|d| d.with_timezone(&Utc))
            .or_else(|_| {
                NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").map(|n| n.and_utc())
            })
            .ok()
            .map(|d| d.timestamp_millis() as f64),
        _ => None,
    }
}

fn aggregate(index: &MemoryIndex, body: &Value) -> Value {
    let mut aggregations = serde_json::Map::new();
    if let Some(aggs) = body.get("aggs").and_then(Value::as_object) {
        for (name, agg) in aggs {
            let Some(field) = agg.pointer("/max/field").and_then(Value::as_str) else {
                continue;
            };
            let max = index
                .docs
                .values()
                .filter_map(|d| d.get(field).and_then(sortable))
                .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))));
            aggregations.insert(name.clone(), json!({ "value": max }));
        }
    }
    json!({
        "hits": { "total": { "value": index.docs.len() } },
        "aggregations": aggregations,
    })
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn create_index(&self, name: &str, body: &Value) -> Result<bool, ConnError> {
        let mut state = lock(&self.state);
        if state.indices.contains_key(name) {
            return Ok(false);
        }
        state.indices.insert(
            name.to_string(),
            MemoryIndex {
                body: body.clone(),
                docs: BTreeMap::new(),
                health: "green".to_string(),
            },
        );
        Ok(true)
    }

    async fn delete_index(&self, name: &str) -> Result<bool, ConnError> {
        let mut state = lock(&self.state);
        if state.failing_deletes.iter().any(|n| n == name) {
            return Err(ConnError::Store {
                status: 500,
                body: format!("failed to delete {name}"),
            });
        }
        let existed = state.indices.remove(name).is_some();
        state.aliases.retain(|_, index| index != name);
        Ok(existed)
    }

    async fn refresh_index(&self, name: &str) -> Result<(), ConnError> {
        let state = lock(&self.state);
        if state.indices.contains_key(&resolve(&state, name)) {
            Ok(())
        } else {
            Err(ConnError::Store {
                status: 404,
                body: format!("no such index [{name}]"),
            })
        }
    }

    async fn get_alias(&self, alias: &str) -> Result<Vec<String>, ConnError> {
        Ok(lock(&self.state).aliases.get(alias).cloned().into_iter().collect())
    }

    async fn put_alias(&self, index: &str, alias: &str) -> Result<(), ConnError> {
        let mut state = lock(&self.state);
        if !state.indices.contains_key(index) {
            return Err(ConnError::Store {
                status: 404,
                body: format!("no such index [{index}]"),
            });
        }
        state.alias_calls += 1;
        state.aliases.insert(alias.to_string(), index.to_string());
        Ok(())
    }

    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<(), ConnError> {
        let mut state = lock(&self.state);
        state.alias_calls += 1;
        for action in actions {
            match action {
                AliasAction::Remove { index, alias } => {
                    if state.aliases.get(alias) == Some(index) {
                        state.aliases.remove(alias);
                    }
                }
                AliasAction::Add { index, alias } => {
                    state.aliases.insert(alias.clone(), index.clone());
                }
            }
        }
        Ok(())
    }

    async fn cat_indices(&self) -> Result<Vec<IndexInfo>, ConnError> {
        Ok(lock(&self.state)
            .indices
            .iter()
            .map(|(name, idx)| IndexInfo {
                index: name.clone(),
                health: Some(idx.health.clone()),
                status: Some("open".to_string()),
            })
            .collect())
    }

    async fn bulk(&self, ops: &[BulkOp]) -> Result<BulkResponse, ConnError> {
        let mut state = lock(&self.state);
        state.bulk_calls += 1;

        if state.failing_bulks > 0 {
            state.failing_bulks -= 1;
            let items = ops
                .iter()
                .map(|op| {
                    json!({"index": {
                        "_index": op.index,
                        "_id": op.id,
                        "status": 429,
                        "error": {"type": "es_rejected_execution_exception"}
                    }})
                })
                .collect();
            return Ok(BulkResponse {
                errors: true,
                items,
            });
        }

        let mut errors = false;
        let mut items = Vec::with_capacity(ops.len());
        for op in ops {
            let name = resolve(&state, &op.index);
            if !state.indices.contains_key(&name) {
                if state.auto_create_index {
                    state.indices.insert(
                        name.clone(),
                        MemoryIndex {
                            health: "green".to_string(),
                            ..Default::default()
                        },
                    );
                } else {
                    errors = true;
                    items.push(json!({"index": {
                        "_index": op.index,
                        "_id": op.id,
                        "status": 404,
                        "error": {"type": "index_not_found_exception"}
                    }}));
                    continue;
                }
            }
            if let Some(idx) = state.indices.get_mut(&name) {
                idx.docs.insert(op.id.clone(), op.doc.clone());
            }
            items.push(json!({"index": {"_index": name, "_id": op.id, "status": 200}}));
        }

        Ok(BulkResponse { errors, items })
    }

    async fn msearch(&self, searches: &[SearchRequest]) -> Result<Vec<Value>, ConnError> {
        let state = lock(&self.state);
        Ok(searches
            .iter()
            .map(|search| {
                let name = resolve(&state, &search.index);
                match state.indices.get(&name) {
                    Some(index) => aggregate(index, &search.body),
                    None => json!({
                        "error": {"type": "index_not_found_exception", "index": search.index},
                        "status": 404
                    }),
                }
            })
            .collect())
    }

    async fn cluster_health(
        &self,
        _wait_for: HealthStatus,
        _timeout: Duration,
    ) -> Result<ClusterHealth, ConnError> {
        let state = lock(&self.state);
        let status = if state.indices.values().any(|i| i.health == "red") {
            HealthStatus::Red
        } else {
            HealthStatus::Green
        };
        Ok(ClusterHealth {
            status,
            timed_out: false,
        })
    }

    async fn put_cluster_settings(&self, body: &Value) -> Result<(), ConnError> {
        let mut state = lock(&self.state);
        if body.pointer("/persistent/action.auto_create_index") == Some(&json!(false)) {
            state.auto_create_index = false;
        }
        state.settings.push(body.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ScriptState {
    queries: Vec<String>,
    responses: Vec<(String, Vec<Document>)>,
    id_responses: Vec<(String, i64, Vec<i64>)>,
    cursor_responses: Vec<(String, Vec<Document>)>,
    cursor_reads: Vec<usize>,
    open_cursors: usize,
    closed_cursors: usize,
}

/// Database that answers from canned responses keyed by SQL fragments.
///
/// The first registered response whose fragment appears in the statement
/// wins; unmatched queries return no rows. Every statement is recorded.
#[derive(Debug, Clone, Default)]
pub struct ScriptedDatabase {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `query` calls containing `fragment` with `rows`.
    pub fn on_query(&self, fragment: impl Into<String>, rows: Vec<Document>) -> &Self {
        lock(&self.state).responses.push((fragment.into(), rows));
        self
    }

    /// Answer `query_ids` calls containing `fragment` bound to `id`.
    pub fn on_ids(&self, fragment: impl Into<String>, id: i64, ids: Vec<i64>) -> &Self {
        lock(&self.state)
            .id_responses
            .push((fragment.into(), id, ids));
        self
    }

    /// Stream `rows` from cursors whose statement contains `fragment`.
    pub fn on_cursor(&self, fragment: impl Into<String>, rows: Vec<Document>) -> &Self {
        lock(&self.state)
            .cursor_responses
            .push((fragment.into(), rows));
        self
    }

    /// Every statement seen, in order.
    pub fn queries(&self) -> Vec<String> {
        lock(&self.state).queries.clone()
    }

    /// Row counts returned by each cursor read, in order.
    pub fn cursor_reads(&self) -> Vec<usize> {
        lock(&self.state).cursor_reads.clone()
    }

    /// Cursors opened and not yet closed.
    pub fn open_cursors(&self) -> usize {
        let state = lock(&self.state);
        state.open_cursors - state.closed_cursors
    }
}

#[async_trait]
impl Database for ScriptedDatabase {
    async fn query(&self, sql: &str) -> Result<Vec<Document>, ConnError> {
        let mut state = lock(&self.state);
        state.queries.push(sql.to_string());
        Ok(state
            .responses
            .iter()
            .find(|(fragment, _)| sql.contains(fragment.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default())
    }

    async fn query_ids(&self, sql: &str, id: i64) -> Result<Vec<i64>, ConnError> {
        let mut state = lock(&self.state);
        state.queries.push(sql.to_string());
        Ok(state
            .id_responses
            .iter()
            .find(|(fragment, bound, _)| *bound == id && sql.contains(fragment.as_str()))
            .map(|(_, _, ids)| ids.clone())
            .unwrap_or_default())
    }

    async fn open_cursor(&self, sql: &str) -> Result<Box<dyn RowCursor>, ConnError> {
        let mut state = lock(&self.state);
        state.queries.push(sql.to_string());
        state.open_cursors += 1;
        let rows = state
            .cursor_responses
            .iter()
            .find(|(fragment, _)| sql.contains(fragment.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default();
        Ok(Box::new(ScriptedCursor {
            rows: rows.into(),
            state: Arc::clone(&self.state),
        }))
    }
}

struct ScriptedCursor {
    rows: VecDeque<Document>,
    state: Arc<Mutex<ScriptState>>,
}

#[async_trait]
impl RowCursor for ScriptedCursor {
    async fn read(&mut self, max_rows: usize) -> Result<Vec<Document>, ConnError> {
        let n = max_rows.min(self.rows.len());
        let batch: Vec<Document> = self.rows.drain(..n).collect();
        lock(&self.state).cursor_reads.push(batch.len());
        Ok(batch)
    }

    async fn close(self: Box<Self>) -> Result<(), ConnError> {
        lock(&self.state).closed_cursors += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_bulk_upsert_replaces_whole_document() {
        let store = MemoryDocumentStore::new();
        let op = |doc: Value| BulkOp {
            index: "tracks1".to_string(),
            id: "1".to_string(),
            doc: doc.as_object().cloned().unwrap(),
        };

        store.bulk(&[op(json!({"title": "a", "genre": "jazz"}))]).await.unwrap();
        store.bulk(&[op(json!({"title": "b"}))]).await.unwrap();

        let stored = store.document("tracks1", "1").unwrap();
        assert_eq!(stored, doc(json!({"title": "b"})));
    }

    #[tokio::test]
    async fn test_bulk_respects_auto_create_setting() {
        let store = MemoryDocumentStore::new();
        store
            .put_cluster_settings(&json!({"persistent": {"action.auto_create_index": false}}))
            .await
            .unwrap();

        let resp = store
            .bulk(&[BulkOp {
                index: "trakcs".to_string(),
                id: "1".to_string(),
                doc: Document::new(),
            }])
            .await
            .unwrap();
        assert!(resp.errors);
        assert!(store.index_names().is_empty());
    }

    #[tokio::test]
    async fn test_failure_injection_counts_down() {
        let store = MemoryDocumentStore::new();
        store.fail_next_bulks(1);
        let ops = [BulkOp {
            index: "users1".to_string(),
            id: "1".to_string(),
            doc: Document::new(),
        }];
        assert!(store.bulk(&ops).await.unwrap().errors);
        assert!(!store.bulk(&ops).await.unwrap().errors);
        assert_eq!(store.bulk_calls(), 2);
    }

    #[tokio::test]
    async fn test_max_aggregation_over_timestamps() {
        let store = MemoryDocumentStore::new();
        store.create_index("plays1", &json!({})).await.unwrap();
        store
            .bulk(&[
                BulkOp {
                    index: "plays1".to_string(),
                    id: "1".to_string(),
                    doc: doc(json!({"created_at": "2024-01-01T00:00:00"})),
                },
                BulkOp {
                    index: "plays1".to_string(),
                    id: "2".to_string(),
                    doc: doc(json!({"created_at": "2024-01-01T00:00:01.5"})),
                },
            ])
            .await
            .unwrap();

        let responses = store
            .msearch(&[SearchRequest {
                index: "plays1".to_string(),
                body: json!({"size": 0, "aggs": {"max_version": {"max": {"field": "created_at"}}}}),
            }])
            .await
            .unwrap();
        assert_eq!(
            responses[0]["aggregations"]["max_version"]["value"],
            json!(1_704_067_201_500.0)
        );
    }

    #[tokio::test]
    async fn test_scripted_cursor_reads_in_batches() {
        let db = ScriptedDatabase::new();
        let rows: Vec<Document> = (0..5).map(|i| doc(json!({"id": i}))).collect();
        db.on_cursor("from users", rows);

        let mut cursor = db.open_cursor("select * from users").await.unwrap();
        assert_eq!(cursor.read(2).await.unwrap().len(), 2);
        assert_eq!(cursor.read(2).await.unwrap().len(), 2);
        assert_eq!(cursor.read(2).await.unwrap().len(), 1);
        assert!(cursor.read(2).await.unwrap().is_empty());
        assert_eq!(db.open_cursors(), 1);
        cursor.close().await.unwrap();
        assert_eq!(db.open_cursors(), 0);
        assert_eq!(db.cursor_reads(), vec![2, 2, 1, 0]);
    }
}
