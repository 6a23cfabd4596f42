use std::time::Duration;

use thiserror::Error;

/// Errors from talking to a model-serving node.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("connect to {address} failed: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("http handshake failed: {0}")]
    Handshake(#[source] hyper::Error),

    #[error("request failed: {0}")]
    Request(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("node returned HTTP {0}")]
    Status(u16),

    #[error("invalid JSON from node: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("malformed response: {0}")]
    Malformed(String),
}

pub type NodeResult<T> = Result<T, NodeError>;

/// Errors that abort a whole discovery scan.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("invalid scan range {range:?}: {reason}")]
    InvalidRange { range: String, reason: String },
}
