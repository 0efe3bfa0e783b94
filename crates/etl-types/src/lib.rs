//! # etl-types
//!
//! Shared domain types for the movies ETL pipeline.
//!
//! This crate defines the data structures passed between pipeline stages:
//! - Entity kinds and stage namespaces
//! - Change batches produced by the extractor
//! - Raw film work aggregates and the transformed index documents
//! - The [`Checkpoint`] union persisted by every stage
//! - [`Settings`]: layered process configuration

pub mod checkpoint;
pub mod config;
pub mod entity;
pub mod error;
pub mod film_work;

pub use checkpoint::{BulkItemError, Checkpoint, EnrichmentCursor, FailedWrite, Watermark};
pub use config::{
    BackoffSettings, CheckpointSettings, ElasticsearchSettings, LogFormat, PipelineSettings,
    PostgresSettings, Settings,
};
pub use entity::{EntityKind, Stage};
pub use error::EtlError;
pub use film_work::{
    ChangeBatch, ChangedRow, FilmWorkDocument, Person, PersonRef, PersonRole, RawFilmWork,
    ValidationError,
};
