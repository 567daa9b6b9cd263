//! # search-sync-conn
//!
//! Connections to the source database and the document store, plus the
//! index-level operations built directly on them.
//!
//! ## Modules
//!
//! - [`pg`]: pooled Postgres queries and server-side cursors
//! - [`listen`]: dedicated LISTEN/NOTIFY connection
//! - [`store`]: the [`DocumentStore`] interface
//! - [`es`]: HTTP implementation for Elasticsearch-compatible clusters
//! - [`mock`]: in-memory database and store for tests
//! - [`lifecycle`]: index generations, alias cutover and cleanup
//! - [`checkpoint`]: checkpoint computation from the live indices
//! - [`cluster`]: health wait, auto-create setting and red index recovery

pub mod checkpoint;
pub mod cluster;
pub mod error;
pub mod es;
pub mod lifecycle;
pub mod listen;
pub mod mock;
pub mod pg;
pub mod store;

pub use checkpoint::compute_checkpoints;
pub use cluster::{disable_auto_create_index, recover_red_indices, wait_for_healthy_cluster};
pub use error::ConnError;
pub use es::{EsClient, EsClientConfig};
pub use lifecycle::{
    cleanup_old_generations, create_index, cutover_alias, generation_index_name,
    is_generation_of, AliasCutover,
};
pub use listen::{Notification, PgListenConnection};
pub use mock::{MemoryDocumentStore, ScriptedDatabase};
pub use pg::{Database, PgDatabase, RowCursor};
pub use store::{
    AliasAction, BulkOp, BulkResponse, ClusterHealth, DocumentStore, HealthStatus, IndexInfo,
    SearchRequest,
};
