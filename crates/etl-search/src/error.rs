//! Search error types.

use thiserror::Error;

/// Errors that can occur talking to the search index.
#[derive(Debug, Error)]
pub enum SearchError {
    /// Transport-level failure (connection refused, timeout, ...)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a status the operation does not accept
    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body did not have the expected shape
    #[error("Decode error: {0}")]
    Decode(String),

    /// Request body could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
