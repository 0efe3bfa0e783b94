//! Loading: bulk-writes documents into the search index.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, info};

use etl_search::{BulkAction, SearchError, SearchIndex};
use etl_storage::CheckpointStore;
use etl_types::{Checkpoint, FailedWrite, FilmWorkDocument, Stage};

use crate::error::PipelineError;
use crate::handoff::Handoff;
use crate::retry::BackoffPolicy;
use crate::state::StageState;

/// Checkpoint key of the batch being written.
pub const IN_FLIGHT_KEY: &str = "in_flight";

/// Checkpoint key of the failed-write log.
pub const FAILED_KEY: &str = "failed";

/// Tail of the pipeline.
pub struct Loader {
    index: Arc<dyn SearchIndex>,
    state: StageState,
    policy: BackoffPolicy,
    index_name: String,
}

impl Loader {
    /// Create the loader; with a `mapping`, the index is created first if
    /// it does not exist.
    pub async fn new(
        index: Arc<dyn SearchIndex>,
        store: Arc<dyn CheckpointStore>,
        policy: BackoffPolicy,
        index_name: impl Into<String>,
        mapping: Option<Value>,
    ) -> Result<Self, PipelineError> {
        let state = StageState::load(Stage::Loader, store, policy).await?;
        let loader = Self {
            index,
            state,
            policy,
            index_name: index_name.into(),
        };
        if let Some(mapping) = mapping {
            loader.ensure_index(&mapping).await;
        }
        Ok(loader)
    }

    /// Create the target index unless it exists. Returns whether it was created.
    pub async fn ensure_index(&self, mapping: &Value) -> bool {
        let name = self.index_name.as_str();
        let exists = self
            .policy
            .retry("index exists", || self.index.exists(name))
            .await;
        if exists {
            return false;
        }
        self.policy
            .retry("index create", || self.index.create(name, mapping))
            .await;
        info!(index = name, "Search index created");
        true
    }

    /// Batch left in flight by a previous run, if any.
    pub fn in_flight(&self) -> Result<Option<&Vec<FilmWorkDocument>>, PipelineError> {
        match self.state.get(IN_FLIGHT_KEY) {
            None => Ok(None),
            Some(Checkpoint::DocumentBatch(batch)) => Ok(Some(batch)),
            Some(other) => Err(PipelineError::Checkpoint(format!(
                "expected document batch, found {}",
                other.kind()
            ))),
        }
    }

    /// Recorded partial bulk failures, oldest first.
    pub fn failures(&self) -> Result<Vec<FailedWrite>, PipelineError> {
        match self.state.get(FAILED_KEY) {
            None => Ok(Vec::new()),
            Some(Checkpoint::FailedWrites(log)) => Ok(log.clone()),
            Some(other) => Err(PipelineError::Checkpoint(format!(
                "expected failed-write log, found {}",
                other.kind()
            ))),
        }
    }

    /// Re-write the batch a previous run did not finish.
    pub async fn resume(&mut self) -> Result<bool, PipelineError> {
        let Some(batch) = self.in_flight()?.filter(|b| !b.is_empty()).cloned() else {
            return Ok(false);
        };
        info!(count = batch.len(), "Resuming load");
        self.process(batch).await?;
        Ok(true)
    }

    /// Write `documents` in one bulk request.
    ///
    /// Documents the index rejects are appended to the failure log and not
    /// retried. Returns the number written.
    pub async fn process(&mut self, documents: Vec<FilmWorkDocument>) -> Result<usize, PipelineError> {
        if documents.is_empty() {
            return Ok(0);
        }
        self.state
            .set(IN_FLIGHT_KEY, Checkpoint::DocumentBatch(documents.clone()))
            .await?;

        let actions = documents
            .iter()
            .map(|doc| BulkAction::index(&self.index_name, &doc.id, doc))
            .collect::<Result<Vec<_>, SearchError>>()?;
        let summary = self
            .policy
            .retry("bulk write", || self.index.bulk(&actions))
            .await;

        if !summary.is_ok() {
            error!(
                index = %self.index_name,
                failed = summary.errors.len(),
                errors = ?summary.errors,
                "Bulk write reported failures"
            );
            let mut log = self.failures()?;
            log.push(FailedWrite::now(summary.errors.clone()));
            self.state
                .set(FAILED_KEY, Checkpoint::FailedWrites(log))
                .await?;
        }

        info!(
            index = %self.index_name,
            written = summary.succeeded(),
            "Loaded documents"
        );
        self.state.clear(IN_FLIGHT_KEY).await;
        Ok(summary.succeeded())
    }
}

#[async_trait]
impl Handoff<Vec<FilmWorkDocument>> for Loader {
    async fn handoff(&mut self, batch: Vec<FilmWorkDocument>) -> Result<(), PipelineError> {
        self.process(batch).await?;
        Ok(())
    }
}
