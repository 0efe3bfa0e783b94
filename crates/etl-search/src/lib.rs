//! # etl-search
//!
//! Search index side of the movies ETL.
//!
//! ## Features
//! - [`SearchIndex`] trait: existence check, index creation, bulk write, point read
//! - [`ElasticIndex`]: implementation over the Elasticsearch HTTP API
//! - NDJSON bulk envelope and per-item error extraction
//! - Bundled `movies` index mapping
//! - [`MemoryIndex`]: in-memory index for tests

pub mod bulk;
pub mod elastic;
pub mod error;
pub mod index;
pub mod mapping;
pub mod memory;

pub use bulk::{BulkAction, BulkSummary};
pub use elastic::ElasticIndex;
pub use error::SearchError;
pub use index::SearchIndex;
pub use mapping::movies_mapping;
pub use memory::MemoryIndex;
