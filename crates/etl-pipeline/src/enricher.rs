//! Enrichment: resolves changed keys into full film work aggregates.
//!
//! A pass pages through the aggregates by film work id. Before each page is
//! fetched the cursor (keys plus the id the page starts after) is persisted,
//! so a pass interrupted anywhere resumes at the page that was in progress.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use etl_storage::CheckpointStore;
use etl_types::{ChangeBatch, Checkpoint, EnrichmentCursor, EntityKind, RawFilmWork, Stage};

use crate::error::PipelineError;
use crate::handoff::Handoff;
use crate::retry::BackoffPolicy;
use crate::source::ChangeSource;
use crate::state::StageState;

/// Checkpoint key of the pass in progress.
pub const CURSOR_KEY: &str = "cursor";

pub struct Enricher<H> {
    source: Arc<dyn ChangeSource>,
    state: StageState,
    next: H,
    page_size: usize,
}

impl<H> Enricher<H>
where
    H: Handoff<Vec<RawFilmWork>>,
{
    pub async fn new(
        source: Arc<dyn ChangeSource>,
        store: Arc<dyn CheckpointStore>,
        policy: BackoffPolicy,
        next: H,
        page_size: usize,
    ) -> Result<Self, PipelineError> {
        let state = StageState::load(Stage::Enricher, store, policy).await?;
        Ok(Self {
            source,
            state,
            next,
            page_size,
        })
    }

    /// Cursor of an unfinished pass, if any.
    pub fn cursor(&self) -> Result<Option<&EnrichmentCursor>, PipelineError> {
        match self.state.get(CURSOR_KEY) {
            None => Ok(None),
            Some(Checkpoint::Cursor(cursor)) => Ok(Some(cursor)),
            Some(other) => Err(PipelineError::Checkpoint(format!(
                "expected enrichment cursor, found {}",
                other.kind()
            ))),
        }
    }

    /// Finish a pass interrupted by a previous run.
    ///
    /// Returns whether there was one.
    pub async fn resume(&mut self) -> Result<bool, PipelineError> {
        let Some(cursor) = self.cursor()?.filter(|c| c.is_pending()).cloned() else {
            return Ok(false);
        };
        info!(
            entity = %cursor.entity,
            keys = cursor.pkeys.len(),
            last_id = %cursor.last_processed_id,
            "Resuming enrichment"
        );
        self.run(cursor).await?;
        Ok(true)
    }

    /// Enrich every film work related to `pkeys`.
    ///
    /// Returns the number of aggregates handed downstream.
    pub async fn process(
        &mut self,
        entity: EntityKind,
        pkeys: Vec<String>,
    ) -> Result<usize, PipelineError> {
        if pkeys.is_empty() {
            return Ok(0);
        }
        let cursor = EnrichmentCursor {
            entity,
            pkeys,
            last_processed_id: String::new(),
            page_size: self.page_size,
        };
        self.run(cursor).await
    }

    async fn run(&mut self, mut cursor: EnrichmentCursor) -> Result<usize, PipelineError> {
        let mut total = 0;
        loop {
            self.state
                .set(CURSOR_KEY, Checkpoint::Cursor(cursor.clone()))
                .await?;

            let page = self
                .source
                .aggregates(
                    cursor.entity,
                    &cursor.pkeys,
                    &cursor.last_processed_id,
                    cursor.page_size,
                )
                .await?;
            let Some(last) = page.last().map(|doc| doc.id.clone()) else {
                break;
            };

            total += page.len();
            debug!(
                entity = %cursor.entity,
                count = page.len(),
                last_id = %last,
                "Enriched page"
            );
            self.next.handoff(page).await?;
            cursor.last_processed_id = last;
        }

        self.state.clear(CURSOR_KEY).await;
        info!(entity = %cursor.entity, count = total, "Enrichment pass complete");
        Ok(total)
    }

    /// Downstream stage.
    pub fn next_mut(&mut self) -> &mut H {
        &mut self.next
    }
}

#[async_trait]
impl<H> Handoff<ChangeBatch> for Enricher<H>
where
    H: Handoff<Vec<RawFilmWork>>,
{
    async fn handoff(&mut self, batch: ChangeBatch) -> Result<(), PipelineError> {
        self.process(batch.entity, batch.primary_keys()).await?;
        Ok(())
    }
}
