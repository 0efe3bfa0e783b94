//! Error types for the ETL pipeline.

use etl_search::SearchError;
use etl_storage::StorageError;
use etl_types::EtlError;
use thiserror::Error;

/// Errors that can occur in the pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Checkpoint storage operation failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Search index operation failed
    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    /// Domain type or configuration error
    #[error(transparent)]
    Types(#[from] EtlError),

    /// Relational query failed or no connection is available
    #[error("Query error: {0}")]
    Query(String),

    /// A source row could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Stored checkpoint has an unexpected shape
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Downstream stage rejected a batch
    #[error("Handoff error: {0}")]
    Handoff(String),

    /// JSON encoding/decoding errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Serialization(err.to_string())
    }
}

impl From<tokio_postgres::Error> for PipelineError {
    fn from(err: tokio_postgres::Error) -> Self {
        PipelineError::Query(err.to_string())
    }
}
