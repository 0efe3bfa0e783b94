//! Relational source of changes and aggregates.

mod executor;
mod memory;
mod pg;
mod queries;

pub use executor::PgExecutor;
pub use memory::MemorySource;
pub use pg::PgSource;
pub use queries::{aggregate_query, change_query};

use async_trait::async_trait;

use etl_types::{ChangedRow, EntityKind, RawFilmWork, Watermark};

use crate::error::PipelineError;

/// Read access to the content tables.
///
/// Implementations absorb transient failures themselves; an error returned
/// here is one that retrying cannot fix.
#[async_trait]
pub trait ChangeSource: Send + Sync {
    /// Rows of `entity` strictly past `since` in `(modified, id)` order.
    async fn modified_since(
        &self,
        entity: EntityKind,
        since: &Watermark,
        limit: usize,
    ) -> Result<Vec<ChangedRow>, PipelineError>;

    /// Film work aggregates related to any of `pkeys` (ids of `entity`
    /// rows), with film work id greater than `after_id`, ordered by film
    /// work id.
    async fn aggregates(
        &self,
        entity: EntityKind,
        pkeys: &[String],
        after_id: &str,
        limit: usize,
    ) -> Result<Vec<RawFilmWork>, PipelineError>;
}
