//! Error types for database and document store access.

use thiserror::Error;

/// Errors from the connection layer.
///
/// Nothing at this layer retries; callers decide what is transient.
#[derive(Debug, Error)]
pub enum ConnError {
    /// Postgres driver error
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// Could not check a connection out of the pool
    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// Transport-level failure talking to the document store
    #[error("HTTP error: {0}")]
    Http(String),

    /// Document store answered with a non-success status
    #[error("Store returned HTTP {status}: {body}")]
    Store { status: u16, body: String },

    /// Bulk write still failing after the retry ceiling
    #[error("Bulk write failed after {attempts} attempts: {detail}")]
    Bulk { attempts: u32, detail: String },

    /// Response or row could not be decoded
    #[error("Parse error: {0}")]
    Parse(String),

    /// Invalid connection configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for ConnError {
    fn from(err: serde_json::Error) -> Self {
        ConnError::Parse(err.to_string())
    }
}

impl From<reqwest::Error> for ConnError {
    fn from(err: reqwest::Error) -> Self {
        ConnError::Http(err.to_string())
    }
}
