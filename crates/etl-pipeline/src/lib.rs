//! Postgres to Elasticsearch synchronization pipeline.
//!
//! Propagates changes in the movies content tables into the search index
//! through four stages, each of which checkpoints its work so that a crash
//! at any point is recovered on the next start.
//!
//! ## Key Components
//!
//! - [`Extractor`]: polls each entity table for rows modified after its watermark
//! - [`Enricher`]: resolves changed keys into full film work aggregates, page by page
//! - [`Transformer`]: validates aggregates and reshapes them into index documents
//! - [`Loader`]: bulk-writes documents, logging per-document failures
//! - [`StageState`]: write-through view of one stage's checkpoint namespace
//! - [`BackoffPolicy`]: unbounded exponential retry for external calls
//! - [`Pipeline`]: assembles the chain, replays unfinished work, runs the loop
//!
//! ## Delivery
//!
//! Every stage persists its input before working on it and clears it only
//! once everything downstream has finished. A crash therefore replays work
//! rather than losing it, and since documents are written by id a replay
//! leaves the index unchanged.

pub mod enricher;
pub mod error;
pub mod extractor;
pub mod handoff;
pub mod loader;
pub mod pipeline;
pub mod retry;
pub mod source;
pub mod state;
pub mod transformer;

#[cfg(test)]
mod test_support;

pub use enricher::Enricher;
pub use error::PipelineError;
pub use extractor::{watermark_key, Extractor};
pub use handoff::Handoff;
pub use loader::Loader;
pub use pipeline::{CycleReport, Pipeline, PipelineConfig, StageChain};
pub use retry::BackoffPolicy;
pub use source::{ChangeSource, MemorySource, PgExecutor, PgSource};
pub use state::StageState;
pub use transformer::{transform, Transformer};
