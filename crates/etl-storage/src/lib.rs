//! Checkpoint storage for the movies ETL.
//!
//! Provides RocksDB-backed storage with:
//! - One column family per pipeline stage, so each stage owns its namespace
//! - Synchronous (fsync'd) writes: a call returns only once the value is durable
//! - Full-namespace scans used to hydrate stage state at startup

pub mod column_families;
pub mod db;
pub mod error;
pub mod store;

pub use db::{Storage, StorageStats};
pub use error::StorageError;
pub use store::CheckpointStore;
