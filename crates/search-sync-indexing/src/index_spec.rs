//! Per-entity-kind indexing definition.

use async_trait::async_trait;
use serde_json::Value;

use search_sync_conn::{generation_index_name, ConnError, Database};
use search_sync_types::{doc_i64, BlocknumberCheckpoint, Document, WatchedTable};

/// Everything that differs between entity kinds.
///
/// The indexing engine ([`EntityIndexer`](crate::EntityIndexer)) is generic
/// over this trait. Required items describe the index and the source query;
/// the two hooks default to no-ops.
#[async_trait]
pub trait EntityIndexSpec: Send + Sync {
    /// Source table, which also names the alias.
    fn table(&self) -> WatchedTable;

    /// Generation of the physical index. Bump when the mapping changes.
    fn generation(&self) -> u32;

    /// Index creation body (`settings` and `mappings`).
    fn mapping(&self) -> Value;

    /// Enrichment query. Must end inside a `where` clause so that
    /// `and ...` predicates can be appended.
    fn base_select(&self) -> String;

    /// Qualified id column used by targeted re-indexing.
    fn id_column(&self) -> &'static str;

    /// Qualified version column catchup orders by.
    fn version_column(&self) -> &'static str;

    /// Predicate (starting with `and`) selecting rows changed since `checkpoint`.
    fn checkpoint_sql(&self, checkpoint: &BlocknumberCheckpoint) -> String;

    /// Rows read per cursor batch.
    fn batch_size(&self) -> usize {
        1000
    }

    /// Field of a row holding its id.
    fn id_field(&self) -> &'static str {
        self.id_column()
            .rsplit('.')
            .next()
            .unwrap_or_else(|| self.id_column())
    }

    /// Document id for a row. Rows without one are skipped.
    fn document_id(&self, doc: &Document) -> Option<String> {
        doc_i64(doc, self.id_field()).map(|id| id.to_string())
    }

    /// Alias readers query.
    fn alias(&self) -> &'static str {
        self.table().as_str()
    }

    /// Physical index written by this generation.
    fn index_name(&self) -> String {
        generation_index_name(self.alias(), self.generation())
    }

    /// Batch enrichment, run once over every row set before finalizing.
    async fn with_batch(&self, _db: &dyn Database, _docs: &mut [Document]) -> Result<(), ConnError> {
        Ok(())
    }

    /// Per-document finalize. Must be a pure function of the document.
    fn with_row(&self, _doc: &mut Document) {}
}
