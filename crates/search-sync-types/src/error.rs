//! Error types shared across the sync engine.

use thiserror::Error;

/// Errors raised by shared types.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A channel or table name outside the watch set
    #[error("Unknown table: {0}")]
    UnknownTable(String),
}
