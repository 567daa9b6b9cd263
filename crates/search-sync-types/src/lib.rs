//! # search-sync-types
//!
//! Shared domain types for the search index sync engine.
//!
//! - [`Settings`]: layered runtime configuration
//! - [`WatchedTable`]: the fixed set of source tables the engine follows
//! - [`BlocknumberCheckpoint`]: per-table high-water marks derived from the index
//! - [`Document`]: a denormalized JSON document as written to the index

pub mod checkpoint;
pub mod config;
pub mod document;
pub mod error;
pub mod table;

pub use checkpoint::BlocknumberCheckpoint;
pub use config::Settings;
pub use document::{doc_i64, doc_str, Document};
pub use error::SyncError;
pub use table::{VersionField, WatchedTable};
