//! End-to-end test infrastructure for the movies ETL.
//!
//! Provides a shared TestHarness wiring the real pipeline and a RocksDB
//! checkpoint store to the in-memory source and index.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use etl_pipeline::{MemorySource, Pipeline, PipelineConfig};
use etl_search::{movies_mapping, MemoryIndex};
use etl_storage::{CheckpointStore, Storage};
use etl_types::{PersonRef, RawFilmWork};

/// Index name used by every harness pipeline.
pub const INDEX: &str = "movies";

/// Shared test harness for E2E tests.
///
/// The source, index, and checkpoint store outlive any pipeline built from
/// them, so dropping a pipeline and building another is a process restart.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    /// Shared checkpoint store
    pub storage: Arc<Storage>,
    pub source: Arc<MemorySource>,
    pub index: Arc<MemoryIndex>,
}

impl TestHarness {
    /// Create a new test harness with temp directory and storage.
    pub fn new() -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let storage =
            Arc::new(Storage::open(temp_dir.path()).expect("Failed to open test storage"));

        Self {
            _temp_dir: temp_dir,
            storage,
            source: Arc::new(MemorySource::new()),
            index: Arc::new(MemoryIndex::new()),
        }
    }

    /// Small pages so that paging paths are exercised.
    pub fn config(&self) -> PipelineConfig {
        PipelineConfig::default()
            .with_page_size(2)
            .with_enrich_page_size(2)
            .with_delay(Duration::from_millis(10))
    }

    /// Build a pipeline with [`config`](Self::config); building replays
    /// pending work.
    pub async fn start(&self) -> Pipeline {
        self.start_with(self.config()).await
    }

    pub async fn start_with(&self, config: PipelineConfig) -> Pipeline {
        let store: Arc<dyn CheckpointStore> = self.storage.clone();
        let mapping = movies_mapping().expect("Bundled mapping must parse");
        Pipeline::build(
            self.source.clone(),
            self.index.clone(),
            store,
            config,
            Some(mapping),
        )
        .await
        .expect("Failed to build pipeline")
    }

    /// Indexed documents, ordered by id.
    pub fn documents(&self) -> Vec<Value> {
        self.index.documents(INDEX)
    }

    /// Ids of the indexed documents.
    pub fn document_ids(&self) -> Vec<String> {
        self.documents()
            .iter()
            .filter_map(|doc| doc["id"].as_str().map(str::to_string))
            .collect()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// `minute` minutes into 2024.
pub fn at(minute: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::minutes(minute)
}

/// Film `id` titled "Film {id}" with one director and one actor.
pub fn create_test_film(id: &str) -> RawFilmWork {
    RawFilmWork::new(id, format!("Film {}", id))
        .with_rating(7.0)
        .with_genre("Drama")
        .with_person(PersonRef::new("director", &format!("{}-dir", id), "Dana Director"))
        .with_person(PersonRef::new("actor", &format!("{}-act", id), "Alex Actor"))
}

/// Store `count` films `f0`, `f1`, ... modified one minute apart.
pub fn seed_films(source: &MemorySource, count: usize) -> Vec<String> {
    (0..count)
        .map(|i| {
            let id = format!("f{}", i);
            source.put_film(create_test_film(&id), at(i as i64 + 1));
            id
        })
        .collect()
}
