//! # search-sync-indexing
//!
//! Keeps search indices in step with the source database.
//!
//! ## Key Components
//!
//! - [`EntityIndexSpec`]: what differs per entity kind (mapping, queries, hooks)
//! - [`EntityIndexer`]: catchup, targeted re-index and retrying bulk writes
//! - [`entities`]: users, tracks, playlists, reposts, saves and plays
//! - [`ChangeListener`]: turns change notifications into [`PendingUpdates`]
//! - [`IndexerSet`]: drives every kind together
//!
//! ## Flow
//!
//! 1. Checkpoints are derived from the live indices
//! 2. Each kind catches up from its checkpoint, or in full for a new generation
//! 3. Aliases are cut over and old generations deleted
//! 4. The listener accumulates changes; a periodic drain re-indexes them

pub mod entities;
pub mod error;
pub mod index_spec;
pub mod indexer;
pub mod listener;
pub mod pending;
pub mod retry;
pub mod sync;
pub mod transform;

pub use error::IndexingError;
pub use index_spec::EntityIndexSpec;
pub use indexer::{CatchupStats, EntityIndexer, IndexerConfig, ManagedIndex};
pub use listener::ChangeListener;
pub use pending::{PendingBuffer, PendingUpdates};
pub use retry::LinearBackoff;
pub use sync::{CatchupMode, IndexerSet, KindCatchup};
