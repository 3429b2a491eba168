//! Protocol error types

use thiserror::Error;

/// Protocol error types
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Malformed JSON document
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Server map references a server index that does not exist
    #[error("vbucket {vbucket} references server index {index} (have {servers} servers)")]
    ServerIndexOutOfRange {
        vbucket: u16,
        index: i32,
        servers: usize,
    },

    /// More vbuckets than the 16-bit id space can address
    #[error("vbucket map has {0} entries (max 65536)")]
    TooManyVBuckets(usize),
}

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;
