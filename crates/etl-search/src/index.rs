//! Search index contract used by the loader.

use async_trait::async_trait;
use serde_json::Value;

use crate::bulk::{BulkAction, BulkSummary};
use crate::error::SearchError;

/// Operations the pipeline needs from a search index.
///
/// Writes are keyed by document id, so repeating a bulk write with the same
/// actions leaves the index unchanged.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Whether `index` exists.
    async fn exists(&self, index: &str) -> Result<bool, SearchError>;

    /// Create `index` with the given settings and mappings.
    ///
    /// Succeeds if the index already exists.
    async fn create(&self, index: &str, mapping: &Value) -> Result<(), SearchError>;

    /// Write all actions in one request.
    ///
    /// Per-document failures are returned in the summary, not as an error.
    async fn bulk(&self, actions: &[BulkAction]) -> Result<BulkSummary, SearchError>;

    /// Stored source of one document, or `None` if absent.
    async fn get(&self, index: &str, id: &str) -> Result<Option<Value>, SearchError>;
}
