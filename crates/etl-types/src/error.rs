//! Error types shared across the ETL crates.

use thiserror::Error;

/// Unified error type for configuration and domain parsing.
#[derive(Debug, Error)]
pub enum EtlError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Unknown entity kind name
    #[error("Unknown entity kind: {0}")]
    UnknownEntity(String),

    /// Unknown stage name
    #[error("Unknown stage: {0}")]
    UnknownStage(String),
}
