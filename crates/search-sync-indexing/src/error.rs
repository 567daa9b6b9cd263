//! Error types for the indexing engine.

use search_sync_conn::ConnError;
use thiserror::Error;

/// Errors raised while indexing or handling change notifications.
#[derive(Error, Debug)]
pub enum IndexingError {
    /// Database or document store failure
    #[error(transparent)]
    Conn(#[from] ConnError),

    /// An entity kind has no usable index mapping
    #[error("Missing mapping for index {0}")]
    MissingMapping(String),

    /// A notification payload could not be decoded
    #[error("Invalid payload on channel {channel}: {detail}")]
    Payload { channel: String, detail: String },

    /// A notification arrived on a channel that is not watched
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IndexingError::MissingMapping("tracks1".to_string());
        assert_eq!(err.to_string(), "Missing mapping for index tracks1");

        let err = IndexingError::Payload {
            channel: "saves".to_string(),
            detail: "expected value".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid payload on channel saves: expected value");
    }

    #[test]
    fn test_conn_error_is_transparent() {
        let err: IndexingError = ConnError::Parse("bad row".to_string()).into();
        assert_eq!(err.to_string(), "Parse error: bad row");
    }
}
