//! Change detection: polls each entity table past its watermark.

use std::sync::Arc;

use tracing::{debug, info};

use etl_storage::CheckpointStore;
use etl_types::{ChangeBatch, Checkpoint, EntityKind, Stage, Watermark};

use crate::error::PipelineError;
use crate::handoff::Handoff;
use crate::retry::BackoffPolicy;
use crate::source::ChangeSource;
use crate::state::StageState;

/// Checkpoint key of an entity's watermark.
pub fn watermark_key(entity: EntityKind) -> String {
    format!("watermark:{}", entity.table())
}

/// Head of the pipeline.
pub struct Extractor<H> {
    source: Arc<dyn ChangeSource>,
    state: StageState,
    next: H,
    page_size: usize,
}

impl<H> Extractor<H>
where
    H: Handoff<ChangeBatch>,
{
    pub async fn new(
        source: Arc<dyn ChangeSource>,
        store: Arc<dyn CheckpointStore>,
        policy: BackoffPolicy,
        next: H,
        page_size: usize,
    ) -> Result<Self, PipelineError> {
        let state = StageState::load(Stage::Extractor, store, policy).await?;
        Ok(Self {
            source,
            state,
            next,
            page_size,
        })
    }

    /// Last row delivered for `entity`; [`Watermark::epoch`] before the
    /// first batch.
    pub fn watermark(&self, entity: EntityKind) -> Result<Watermark, PipelineError> {
        match self.state.get(&watermark_key(entity)) {
            None => Ok(Watermark::epoch()),
            Some(Checkpoint::Watermark(watermark)) => Ok(watermark.clone()),
            Some(other) => Err(PipelineError::Checkpoint(format!(
                "expected watermark for {}, found {}",
                entity,
                other.kind()
            ))),
        }
    }

    /// Detect one page of changes for `entity` and push it downstream.
    ///
    /// Rows are read in `(modified, id)` order strictly past the watermark,
    /// which then moves to the last row of the page. The watermark moves only
    /// after the downstream chain has finished with the batch, so a crash
    /// replays the page instead of skipping it. Returns the number of
    /// changed rows found.
    pub async fn detect(&mut self, entity: EntityKind) -> Result<usize, PipelineError> {
        let since = self.watermark(entity)?;
        let rows = self
            .source
            .modified_since(entity, &since, self.page_size)
            .await?;
        let batch = ChangeBatch::new(entity, rows);
        let Some(watermark) = batch.last_position() else {
            debug!(entity = %entity, since = %since.modified, "No changes");
            return Ok(0);
        };
        let count = batch.len();

        info!(entity = %entity, count, since = %since.modified, "Detected changes");
        self.next.handoff(batch).await?;

        self.state
            .set(&watermark_key(entity), Checkpoint::Watermark(watermark.clone()))
            .await?;
        debug!(
            entity = %entity,
            modified = %watermark.modified,
            last_id = %watermark.id,
            "Watermark advanced"
        );
        Ok(count)
    }

    /// Detect repeatedly until `entity` has no changes past its watermark.
    pub async fn drain(&mut self, entity: EntityKind) -> Result<usize, PipelineError> {
        let mut total = 0;
        loop {
            let count = self.detect(entity).await?;
            total += count;
            if count < self.page_size {
                return Ok(total);
            }
        }
    }

    /// Downstream stage.
    pub fn next_mut(&mut self) -> &mut H {
        &mut self.next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use crate::test_support::{at, create_test_store, Collector};

    async fn extractor(
        source: Arc<MemorySource>,
        store: Arc<dyn CheckpointStore>,
        page_size: usize,
    ) -> Extractor<Collector<ChangeBatch>> {
        Extractor::new(
            source,
            store,
            BackoffPolicy::default(),
            Collector::default(),
            page_size,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_default_watermark_is_epoch() {
        let (store, _temp) = create_test_store();
        let extractor = extractor(Arc::new(MemorySource::new()), store, 10).await;
        assert_eq!(
            extractor.watermark(EntityKind::FilmWork).unwrap(),
            Watermark::epoch()
        );
    }

    #[tokio::test]
    async fn test_empty_poll_is_noop() {
        let (store, _temp) = create_test_store();
        let mut extractor = extractor(Arc::new(MemorySource::new()), store.clone(), 10).await;

        assert_eq!(extractor.detect(EntityKind::Genre).await.unwrap(), 0);
        assert!(extractor.next_mut().batches.is_empty());
        assert!(store.all(Stage::Extractor).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_partial_page_advances_to_last_row() {
        let (store, _temp) = create_test_store();
        let source = Arc::new(MemorySource::new());
        source.touch(EntityKind::Person, "p1", at(1));
        source.touch(EntityKind::Person, "p2", at(3));
        source.touch(EntityKind::Person, "p3", at(2));
        let mut extractor = extractor(source, store, 10).await;

        assert_eq!(extractor.detect(EntityKind::Person).await.unwrap(), 3);
        assert_eq!(
            extractor.watermark(EntityKind::Person).unwrap(),
            Watermark::new(at(3), "p2")
        );
        assert_eq!(
            extractor.next_mut().batches[0].primary_keys(),
            vec!["p1", "p3", "p2"]
        );

        // Other entities keep their own watermark
        assert_eq!(
            extractor.watermark(EntityKind::Genre).unwrap(),
            Watermark::epoch()
        );
    }

    #[tokio::test]
    async fn test_full_page_resumes_inside_shared_timestamp() {
        let (store, _temp) = create_test_store();
        let source = Arc::new(MemorySource::new());
        source.touch(EntityKind::Person, "p1", at(1));
        source.touch(EntityKind::Person, "p2", at(2));
        source.touch(EntityKind::Person, "p3", at(2));
        let mut extractor = extractor(source, store, 2).await;

        // p3 shares p2's timestamp but did not fit in the page
        assert_eq!(extractor.detect(EntityKind::Person).await.unwrap(), 2);
        assert_eq!(
            extractor.watermark(EntityKind::Person).unwrap(),
            Watermark::new(at(2), "p2")
        );

        assert_eq!(extractor.detect(EntityKind::Person).await.unwrap(), 1);
        assert_eq!(extractor.next_mut().batches[1].primary_keys(), vec!["p3"]);
        assert_eq!(extractor.detect(EntityKind::Person).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_drain_delivers_timestamp_run_longer_than_page() {
        let (store, _temp) = create_test_store();
        let source = Arc::new(MemorySource::new());
        source.touch(EntityKind::Person, "a", at(1));
        for id in ["b", "c", "d"] {
            source.touch(EntityKind::Person, id, at(2));
        }
        let mut extractor = extractor(source, store, 2).await;

        // [a,b] [c,d] []: every row exactly once
        assert_eq!(extractor.drain(EntityKind::Person).await.unwrap(), 4);
        let delivered: Vec<String> = extractor
            .next_mut()
            .batches
            .iter()
            .flat_map(|b| b.primary_keys())
            .collect();
        assert_eq!(delivered, vec!["a", "b", "c", "d"]);
        assert_eq!(
            extractor.watermark(EntityKind::Person).unwrap(),
            Watermark::new(at(2), "d")
        );
    }

    #[tokio::test]
    async fn test_watermark_never_decreases() {
        let (store, _temp) = create_test_store();
        let source = Arc::new(MemorySource::new());
        source.touch(EntityKind::Genre, "g1", at(10));
        let mut extractor = extractor(source.clone(), store, 10).await;
        extractor.detect(EntityKind::Genre).await.unwrap();

        // A late write with an older timestamp stays behind the watermark
        source.touch(EntityKind::Genre, "g2", at(5));
        assert_eq!(extractor.detect(EntityKind::Genre).await.unwrap(), 0);
        assert_eq!(extractor.watermark(EntityKind::Genre).unwrap().modified, at(10));
    }

    #[tokio::test]
    async fn test_drain_delivers_every_row() {
        let (store, _temp) = create_test_store();
        let source = Arc::new(MemorySource::new());
        for i in 0..7 {
            source.touch(EntityKind::FilmWork, &format!("f{}", i), at(i + 1));
        }
        let mut extractor = extractor(source, store, 3).await;

        // [1,2,3] [4,5,6] [7]
        assert_eq!(extractor.drain(EntityKind::FilmWork).await.unwrap(), 7);
        assert_eq!(extractor.next_mut().batches.len(), 3);
        assert_eq!(
            extractor.watermark(EntityKind::FilmWork).unwrap(),
            Watermark::new(at(7), "f6")
        );
    }

    #[tokio::test]
    async fn test_failed_handoff_keeps_watermark() {
        let (store, _temp) = create_test_store();
        let source = Arc::new(MemorySource::new());
        source.touch(EntityKind::Genre, "g1", at(5));

        let mut failing = Extractor::new(
            source.clone(),
            store.clone(),
            BackoffPolicy::default(),
            Collector::<ChangeBatch>::failing(),
            10,
        )
        .await
        .unwrap();
        assert!(failing.detect(EntityKind::Genre).await.is_err());
        assert_eq!(
            failing.watermark(EntityKind::Genre).unwrap(),
            Watermark::epoch()
        );

        // A restarted extractor sees the same rows again
        let mut restarted = extractor(source, store, 10).await;
        assert_eq!(restarted.detect(EntityKind::Genre).await.unwrap(), 1);
        assert_eq!(
            restarted.watermark(EntityKind::Genre).unwrap(),
            Watermark::new(at(5), "g1")
        );
    }

    #[tokio::test]
    async fn test_watermark_survives_restart() {
        let (store, _temp) = create_test_store();
        let source = Arc::new(MemorySource::new());
        source.touch(EntityKind::FilmWork, "f1", at(1));
        source.touch(EntityKind::FilmWork, "f2", at(2));
        {
            let mut first = extractor(source.clone(), store.clone(), 10).await;
            first.detect(EntityKind::FilmWork).await.unwrap();
        }

        let mut restarted = extractor(source, store, 10).await;
        assert_eq!(
            restarted.watermark(EntityKind::FilmWork).unwrap(),
            Watermark::new(at(2), "f2")
        );
        assert_eq!(restarted.detect(EntityKind::FilmWork).await.unwrap(), 0);
    }
}
