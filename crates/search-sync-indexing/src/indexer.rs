//! The shared indexing engine.
//!
//! [`EntityIndexer`] drives one entity kind: it owns the index lifecycle,
//! streams catchup batches from a server-side cursor, re-indexes targeted
//! ids and writes every batch through the retrying bulk path.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use backoff::backoff::Backoff;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use search_sync_conn::{
    cleanup_old_generations, create_index, cutover_alias, AliasCutover, BulkOp, ConnError,
    Database, DocumentStore, RowCursor,
};
use search_sync_types::{BlocknumberCheckpoint, Document, Settings, WatchedTable};

use crate::error::IndexingError;
use crate::index_spec::EntityIndexSpec;
use crate::retry::LinearBackoff;
use crate::transform::id_list;

/// Bulk write retry settings.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Attempts per chunk before giving up
    pub bulk_max_attempts: u32,
    /// Wait after the n-th failed attempt is `n * bulk_backoff_base`
    pub bulk_backoff_base: Duration,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            bulk_max_attempts: 10,
            bulk_backoff_base: Duration::from_millis(5000),
        }
    }
}

impl IndexerConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            bulk_max_attempts: settings.bulk_max_attempts,
            bulk_backoff_base: Duration::from_millis(settings.bulk_backoff_base_ms),
        }
    }
}

/// Counters from one catchup run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatchupStats {
    /// Non-empty batches read and written
    pub batches: usize,
    /// Rows read from the cursor
    pub rows: usize,
}

/// Indexing engine for one entity kind.
pub struct EntityIndexer<S: EntityIndexSpec> {
    spec: S,
    db: Arc<dyn Database>,
    store: Arc<dyn DocumentStore>,
    config: IndexerConfig,
}

impl<S: EntityIndexSpec> EntityIndexer<S> {
    pub fn new(
        spec: S,
        db: Arc<dyn Database>,
        store: Arc<dyn DocumentStore>,
        config: IndexerConfig,
    ) -> Self {
        Self {
            spec,
            db,
            store,
            config,
        }
    }

    pub fn spec(&self) -> &S {
        &self.spec
    }

    /// Physical index this indexer writes to.
    pub fn index_name(&self) -> String {
        self.spec.index_name()
    }

    /// Create the physical index from the mapping.
    ///
    /// An existing index is kept unless `drop_existing` is set.
    pub async fn create_index(&self, drop_existing: bool) -> Result<bool, IndexingError> {
        let index = self.index_name();
        let body = self.spec.mapping();
        if !matches!(body.get("mappings"), Some(Value::Object(_))) {
            return Err(IndexingError::MissingMapping(index));
        }
        Ok(create_index(self.store.as_ref(), &index, &body, drop_existing).await?)
    }

    /// Make writes visible to search.
    pub async fn refresh(&self) -> Result<(), IndexingError> {
        Ok(self.store.refresh_index(&self.index_name()).await?)
    }

    /// Whether the alias already points at this generation.
    pub async fn is_live(&self) -> Result<bool, IndexingError> {
        let index = self.index_name();
        let current = self.store.get_alias(self.spec.alias()).await?;
        Ok(current.iter().any(|name| *name == index))
    }

    /// Point the alias at this generation.
    pub async fn cutover_alias(&self) -> Result<AliasCutover, IndexingError> {
        Ok(cutover_alias(self.store.as_ref(), self.spec.alias(), &self.index_name()).await?)
    }

    /// Delete every other generation of this alias.
    pub async fn cleanup_old_indices(&self) -> Result<Vec<String>, IndexingError> {
        Ok(cleanup_old_generations(self.store.as_ref(), self.spec.alias(), &self.index_name()).await?)
    }

    /// Catchup query: base select, optional checkpoint scope, version order.
    pub fn catchup_sql(&self, checkpoint: Option<&BlocknumberCheckpoint>) -> String {
        let mut sql = self.spec.base_select();
        if let Some(checkpoint) = checkpoint {
            sql.push_str(&self.spec.checkpoint_sql(checkpoint));
        }
        sql.push_str(&format!(" order by {} asc", self.spec.version_column()));
        sql
    }

    /// Stream rows changed since `checkpoint` (everything when `None`) into the index.
    ///
    /// At most one batch is held in memory. The cursor is closed on every
    /// exit path before any error is returned.
    pub async fn catchup(
        &self,
        checkpoint: Option<&BlocknumberCheckpoint>,
    ) -> Result<CatchupStats, IndexingError> {
        let index = self.index_name();
        let started = Instant::now();
        info!(index = %index, checkpoint = ?checkpoint, "catchup starting");

        let sql = self.catchup_sql(checkpoint);
        let mut cursor = self.db.open_cursor(&sql).await?;
        let result = self.read_batches(cursor.as_mut()).await;
        let closed = cursor.close().await;

        let stats = result?;
        closed?;
        info!(
            index = %index,
            batches = stats.batches,
            rows = stats.rows,
            lifetime_ms = started.elapsed().as_millis() as u64,
            "catchup done"
        );
        Ok(stats)
    }

    async fn read_batches(&self, cursor: &mut dyn RowCursor) -> Result<CatchupStats, IndexingError> {
        let batch_size = self.spec.batch_size();
        let mut stats = CatchupStats::default();
        loop {
            let rows = cursor.read(batch_size).await?;
            if rows.is_empty() {
                return Ok(stats);
            }
            stats.batches += 1;
            stats.rows += rows.len();
            self.index_rows(rows).await?;
        }
    }

    /// Re-index specific ids. An empty id list touches nothing.
    pub async fn index_ids(&self, ids: &[i64]) -> Result<usize, IndexingError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "{} and {} in ({})",
            self.spec.base_select(),
            self.spec.id_column(),
            id_list(ids.iter().copied())
        );
        let rows = self.db.query(&sql).await?;
        if rows.len() < ids.len() {
            debug!(
                index = %self.index_name(),
                requested = ids.len(),
                found = rows.len(),
                "some ids had no row"
            );
        }
        self.index_rows(rows).await
    }

    /// Enrich, finalize and bulk-write rows. Returns documents written.
    pub async fn index_rows(&self, rows: Vec<Document>) -> Result<usize, IndexingError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let index = self.index_name();
        let started = Instant::now();

        let mut docs = rows;
        self.spec.with_batch(self.db.as_ref(), &mut docs).await?;
        let with_batch_ms = started.elapsed().as_millis() as u64;
        for doc in docs.iter_mut() {
            self.spec.with_row(doc);
        }

        let ops = self.build_ops(&index, docs);
        let mut attempts = 0;
        for chunk in ops.chunks(self.spec.batch_size().max(1)) {
            attempts += self.write_chunk(chunk).await?;
        }

        info!(
            index = %index,
            updates = ops.len(),
            attempts = attempts,
            with_batch_ms = with_batch_ms,
            lifetime_ms = started.elapsed().as_millis() as u64,
            "indexed rows"
        );
        Ok(ops.len())
    }

    fn build_ops(&self, index: &str, docs: Vec<Document>) -> Vec<BulkOp> {
        docs.into_iter()
            .filter_map(|doc| match self.spec.document_id(&doc) {
                Some(id) => Some(BulkOp {
                    index: index.to_string(),
                    id,
                    doc,
                }),
                None => {
                    warn!(index = %index, "row has no document id, skipping");
                    None
                }
            })
            .collect()
    }

    /// Write one chunk, retrying with linear backoff. Returns attempts used.
    async fn write_chunk(&self, ops: &[BulkOp]) -> Result<u32, IndexingError> {
        let mut backoff =
            LinearBackoff::new(self.config.bulk_backoff_base, self.config.bulk_max_attempts);
        let mut attempts = 0;

        loop {
            attempts += 1;
            let failure = match self.store.bulk(ops).await {
                Ok(response) if !response.errors => return Ok(attempts),
                Ok(response) => {
                    let first = response.first_error().cloned().unwrap_or(Value::Null);
                    warn!(
                        index = %self.index_name(),
                        attempt = attempts,
                        failed = response.error_count(),
                        first_error = %first,
                        "bulk write had failures"
                    );
                    first.to_string()
                }
                Err(e) => {
                    warn!(index = %self.index_name(), attempt = attempts, error = %e, "bulk write failed");
                    e.to_string()
                }
            };

            match backoff.next_backoff() {
                Some(wait) => {
                    debug!(retry_in_ms = wait.as_millis() as u64, "retrying bulk write");
                    tokio::time::sleep(wait).await;
                }
                None => {
                    error!(index = %self.index_name(), attempts = attempts, "bulk write attempts exhausted");
                    return Err(ConnError::Bulk {
                        attempts,
                        detail: failure,
                    }
                    .into());
                }
            }
        }
    }
}

/// Lifecycle and catchup operations, object safe so kinds can be driven together.
#[async_trait]
pub trait ManagedIndex: Send + Sync {
    fn table(&self) -> WatchedTable;
    fn index_name(&self) -> String;
    async fn create_index(&self, drop_existing: bool) -> Result<bool, IndexingError>;
    async fn is_live(&self) -> Result<bool, IndexingError>;
    async fn catchup(
        &self,
        checkpoint: Option<&BlocknumberCheckpoint>,
    ) -> Result<CatchupStats, IndexingError>;
    async fn cutover_alias(&self) -> Result<AliasCutover, IndexingError>;
    async fn cleanup_old_indices(&self) -> Result<Vec<String>, IndexingError>;
    async fn refresh(&self) -> Result<(), IndexingError>;
}

#[async_trait]
impl<S: EntityIndexSpec> ManagedIndex for EntityIndexer<S> {
    fn table(&self) -> WatchedTable {
        self.spec.table()
    }

    fn index_name(&self) -> String {
        EntityIndexer::index_name(self)
    }

    async fn create_index(&self, drop_existing: bool) -> Result<bool, IndexingError> {
        EntityIndexer::create_index(self, drop_existing).await
    }

    async fn is_live(&self) -> Result<bool, IndexingError> {
        EntityIndexer::is_live(self).await
    }

    async fn catchup(
        &self,
        checkpoint: Option<&BlocknumberCheckpoint>,
    ) -> Result<CatchupStats, IndexingError> {
        EntityIndexer::catchup(self, checkpoint).await
    }

    async fn cutover_alias(&self) -> Result<AliasCutover, IndexingError> {
        EntityIndexer::cutover_alias(self).await
    }

    async fn cleanup_old_indices(&self) -> Result<Vec<String>, IndexingError> {
        EntityIndexer::cleanup_old_indices(self).await
    }

    async fn refresh(&self) -> Result<(), IndexingError> {
        EntityIndexer::refresh(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{PlaysSpec, TracksSpec, UsersSpec};
    use search_sync_conn::{MemoryDocumentStore, ScriptedDatabase};
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn indexer<S: EntityIndexSpec>(
        spec: S,
        db: &ScriptedDatabase,
        store: &MemoryDocumentStore,
    ) -> EntityIndexer<S> {
        EntityIndexer::new(
            spec,
            Arc::new(db.clone()),
            Arc::new(store.clone()),
            IndexerConfig {
                bulk_max_attempts: 3,
                bulk_backoff_base: Duration::from_millis(5000),
            },
        )
    }

    #[test]
    fn test_catchup_sql() {
        let db = ScriptedDatabase::new();
        let store = MemoryDocumentStore::new();
        let plays = indexer(PlaysSpec, &db, &store);

        assert_eq!(
            plays.catchup_sql(None),
            "select * from plays where 1 = 1 order by plays.created_at asc"
        );
        let cp = BlocknumberCheckpoint::default().with(WatchedTable::Plays, 1000);
        assert!(plays
            .catchup_sql(Some(&cp))
            .ends_with("to_timestamp(1000 / 1000.0) at time zone 'UTC' order by plays.created_at asc"));
    }

    #[tokio::test]
    async fn test_index_ids_empty_is_noop() {
        let db = ScriptedDatabase::new();
        let store = MemoryDocumentStore::new();
        let tracks = indexer(TracksSpec, &db, &store);

        assert_eq!(tracks.index_ids(&[]).await.unwrap(), 0);
        assert!(db.queries().is_empty());
        assert_eq!(store.bulk_calls(), 0);
    }

    #[tokio::test]
    async fn test_index_ids_scopes_query() {
        let db = ScriptedDatabase::new();
        db.on_query(
            "tracks.track_id in (42)",
            vec![doc(json!({"track_id": 42, "title": "Night Drive"}))],
        );
        let store = MemoryDocumentStore::new();
        let tracks = indexer(TracksSpec, &db, &store);

        assert_eq!(tracks.index_ids(&[42]).await.unwrap(), 1);
        assert_eq!(db.queries().len(), 1);
        let written = store.document("tracks1", "42").unwrap();
        assert_eq!(written["suggest"], "Night Drive");
    }

    #[tokio::test]
    async fn test_create_index_requires_mapping() {
        struct Unmapped;

        #[async_trait]
        impl EntityIndexSpec for Unmapped {
            fn table(&self) -> WatchedTable {
                WatchedTable::Users
            }
            fn generation(&self) -> u32 {
                9
            }
            fn mapping(&self) -> Value {
                json!({"settings": {}})
            }
            fn base_select(&self) -> String {
                String::new()
            }
            fn id_column(&self) -> &'static str {
                "users.user_id"
            }
            fn version_column(&self) -> &'static str {
                "users.blocknumber"
            }
            fn checkpoint_sql(&self, _checkpoint: &BlocknumberCheckpoint) -> String {
                String::new()
            }
        }

        let db = ScriptedDatabase::new();
        let store = MemoryDocumentStore::new();
        let result = indexer(Unmapped, &db, &store).create_index(false).await;
        assert!(matches!(result, Err(IndexingError::MissingMapping(name)) if name == "users9"));
        assert!(store.index_names().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bulk_retry_recovers() {
        let db = ScriptedDatabase::new();
        let store = MemoryDocumentStore::new();
        store.fail_next_bulks(2);
        let users = indexer(UsersSpec, &db, &store);

        let written = users
            .index_rows(vec![doc(json!({"user_id": 1, "handle": "lena"}))])
            .await
            .unwrap();

        assert_eq!(written, 1);
        assert_eq!(store.bulk_calls(), 3);
        assert!(store.document("users1", "1").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bulk_retry_is_bounded() {
        let db = ScriptedDatabase::new();
        let store = MemoryDocumentStore::new();
        store.fail_next_bulks(usize::MAX);
        let users = indexer(UsersSpec, &db, &store);

        let started = tokio::time::Instant::now();
        let result = users
            .index_rows(vec![doc(json!({"user_id": 1, "handle": "lena"}))])
            .await;

        assert!(matches!(
            result,
            Err(IndexingError::Conn(ConnError::Bulk { attempts: 3, .. }))
        ));
        assert_eq!(store.bulk_calls(), 3);
        // Waits of 5s then 10s between the three attempts.
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(15000));
        assert!(waited < Duration::from_millis(20000));
    }

    #[tokio::test]
    async fn test_rows_without_id_are_skipped() {
        let db = ScriptedDatabase::new();
        let store = MemoryDocumentStore::new();
        let users = indexer(UsersSpec, &db, &store);

        let written = users
            .index_rows(vec![
                doc(json!({"user_id": 1})),
                doc(json!({"handle": "ghost"})),
            ])
            .await
            .unwrap();
        assert_eq!(written, 1);
    }
}
