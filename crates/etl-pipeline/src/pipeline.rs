//! Pipeline assembly and the polling loop.
//!
//! Stages are chained by value: `Extractor -> Enricher -> Transformer ->
//! Loader`. Building the chain replays unfinished work from the bottom up,
//! so that each stage's replay lands on a downstream stage that is already
//! clean, and no new batch can overwrite a stale snapshot.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info};

use etl_search::SearchIndex;
use etl_storage::CheckpointStore;
use etl_types::{EntityKind, Settings};

use crate::enricher::Enricher;
use crate::error::PipelineError;
use crate::extractor::Extractor;
use crate::loader::Loader;
use crate::retry::BackoffPolicy;
use crate::source::ChangeSource;
use crate::transformer::Transformer;

/// The full stage chain.
pub type StageChain = Extractor<Enricher<Transformer<Loader>>>;

/// Configuration for the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Entity kinds polled each cycle, in order
    pub entities: Vec<EntityKind>,
    /// Changed rows per detection query
    pub page_size: usize,
    /// Aggregates per enrichment page
    pub enrich_page_size: usize,
    /// Pause after each entity poll
    pub delay: Duration,
    /// Target search index
    pub index_name: String,
    /// Retry timing for every external call
    pub backoff: BackoffPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl PipelineConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            entities: settings.pipeline.entities.clone(),
            page_size: settings.pipeline.page_size,
            enrich_page_size: settings.pipeline.enrich_page_size,
            delay: settings.pipeline.delay(),
            index_name: settings.elasticsearch.index.clone(),
            backoff: BackoffPolicy::from_settings(&settings.backoff),
        }
    }

    /// Set the detection page size.
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self
    }

    /// Set the enrichment page size.
    pub fn with_enrich_page_size(mut self, size: usize) -> Self {
        self.enrich_page_size = size;
        self
    }

    /// Set the pause between entity polls.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Changed rows found per entity kind by one cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub detected: BTreeMap<EntityKind, usize>,
}

impl CycleReport {
    pub fn total(&self) -> usize {
        self.detected.values().sum()
    }
}

/// Assembled pipeline.
pub struct Pipeline {
    chain: StageChain,
    config: PipelineConfig,
}

impl Pipeline {
    /// Build every stage, hydrating its state from `store`, then replay the
    /// work a previous run left unfinished.
    ///
    /// With a `mapping`, the target index is created first if missing.
    pub async fn build(
        source: Arc<dyn ChangeSource>,
        index: Arc<dyn SearchIndex>,
        store: Arc<dyn CheckpointStore>,
        config: PipelineConfig,
        mapping: Option<Value>,
    ) -> Result<Self, PipelineError> {
        let policy = config.backoff;
        let loader = Loader::new(
            index,
            store.clone(),
            policy,
            config.index_name.clone(),
            mapping,
        )
        .await?;
        let transformer = Transformer::new(store.clone(), policy, loader).await?;
        let enricher = Enricher::new(
            source.clone(),
            store.clone(),
            policy,
            transformer,
            config.enrich_page_size,
        )
        .await?;
        let chain = Extractor::new(source, store, policy, enricher, config.page_size).await?;

        debug!(entities = ?config.entities, "Pipeline assembled");
        let mut pipeline = Self { chain, config };
        pipeline.resume().await?;
        Ok(pipeline)
    }

    pub fn extractor(&mut self) -> &mut StageChain {
        &mut self.chain
    }

    pub fn enricher(&mut self) -> &mut Enricher<Transformer<Loader>> {
        self.chain.next_mut()
    }

    pub fn transformer(&mut self) -> &mut Transformer<Loader> {
        self.enricher().next_mut()
    }

    pub fn loader(&mut self) -> &mut Loader {
        self.transformer().next_mut()
    }

    /// Replay work a previous run left unfinished, loader first.
    ///
    /// Runs as part of [`build`](Self::build); a no-op once every stage is clean.
    pub async fn resume(&mut self) -> Result<(), PipelineError> {
        let loader = self.loader().resume().await?;
        let transformer = self.transformer().resume().await?;
        let enricher = self.enricher().resume().await?;
        if loader || transformer || enricher {
            info!(loader, transformer, enricher, "Replayed unfinished work");
        }
        Ok(())
    }

    /// Poll every entity kind until it has no pending changes.
    pub async fn run_once(&mut self) -> Result<CycleReport, PipelineError> {
        let mut report = CycleReport::default();
        for entity in self.config.entities.clone() {
            let count = self.chain.drain(entity).await?;
            report.detected.insert(entity, count);
        }
        info!(total = report.total(), "Pass complete");
        Ok(report)
    }

    /// Poll the entity kinds in turn, one page each with a pause after it,
    /// until `shutdown` completes.
    ///
    /// Shutdown may interrupt a batch; that is no different from a crash
    /// and the next start replays it from the checkpoints.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<(), PipelineError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(
            entities = ?self.config.entities,
            delay_ms = self.config.delay.as_millis() as u64,
            "Pipeline running"
        );

        let entities = self.config.entities.clone();
        let delay = self.config.delay;
        loop {
            for &entity in &entities {
                tokio::select! {
                    biased;
                    _ = &mut shutdown => {
                        info!("Pipeline stopped");
                        return Ok(());
                    }
                    result = self.chain.detect(entity) => {
                        result?;
                    }
                }
                tokio::select! {
                    biased;
                    _ = &mut shutdown => {
                        info!("Pipeline stopped");
                        return Ok(());
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}
