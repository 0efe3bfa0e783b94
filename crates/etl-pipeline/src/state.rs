//! Per-stage view of the checkpoint store.
//!
//! A stage owns exactly one namespace. Its state is read once, at
//! construction, into an in-memory map; afterwards the map is the source of
//! truth for reads and every mutation is written through to the store.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use etl_storage::CheckpointStore;
use etl_types::{Checkpoint, Stage};

use crate::error::PipelineError;
use crate::retry::BackoffPolicy;

/// Write-through checkpoint cache for one stage.
pub struct StageState {
    stage: Stage,
    store: Arc<dyn CheckpointStore>,
    policy: BackoffPolicy,
    cache: HashMap<String, Checkpoint>,
}

impl StageState {
    /// Hydrate the stage's namespace from the store.
    ///
    /// An undecodable value is fatal: the stage cannot tell what work was
    /// in flight.
    pub async fn load(
        stage: Stage,
        store: Arc<dyn CheckpointStore>,
        policy: BackoffPolicy,
    ) -> Result<Self, PipelineError> {
        let entries = policy
            .retry("checkpoint load", || async { store.all(stage) })
            .await;

        let mut cache = HashMap::with_capacity(entries.len());
        for (key, bytes) in entries {
            let value = Checkpoint::from_bytes(&bytes).map_err(|e| {
                PipelineError::Checkpoint(format!("{}/{}: {}", stage, key, e))
            })?;
            cache.insert(key, value);
        }

        debug!(stage = %stage, keys = cache.len(), "Loaded stage state");
        Ok(Self {
            stage,
            store,
            policy,
            cache,
        })
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn get(&self, key: &str) -> Option<&Checkpoint> {
        self.cache.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Durably store `value` under `key`.
    pub async fn set(&mut self, key: &str, value: Checkpoint) -> Result<(), PipelineError> {
        let bytes = value.to_bytes()?;
        let stage = self.stage;
        let store = &self.store;
        self.policy
            .retry("checkpoint set", || async { store.set(stage, key, &bytes) })
            .await;
        self.cache.insert(key.to_string(), value);
        Ok(())
    }

    /// Durably remove `key`.
    pub async fn clear(&mut self, key: &str) {
        let stage = self.stage;
        let store = &self.store;
        self.policy
            .retry("checkpoint clear", || async { store.delete(stage, key) })
            .await;
        self.cache.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use etl_storage::Storage;
    use etl_types::Watermark;
    use tempfile::TempDir;

    fn create_test_store() -> (Arc<dyn CheckpointStore>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::open(temp_dir.path()).unwrap();
        (Arc::new(storage), temp_dir)
    }

    #[tokio::test]
    async fn test_set_is_visible_after_reload() {
        let (store, _temp) = create_test_store();
        let ts = Watermark::new(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(), "g1");

        let mut state = StageState::load(Stage::Extractor, store.clone(), BackoffPolicy::default())
            .await
            .unwrap();
        assert!(state.is_empty());
        state
            .set("watermark:genre", Checkpoint::Watermark(ts.clone()))
            .await
            .unwrap();
        assert_eq!(
            state.get("watermark:genre"),
            Some(&Checkpoint::Watermark(ts.clone()))
        );

        let reloaded = StageState::load(Stage::Extractor, store, BackoffPolicy::default())
            .await
            .unwrap();
        assert_eq!(
            reloaded.get("watermark:genre"),
            Some(&Checkpoint::Watermark(ts))
        );
    }

    #[tokio::test]
    async fn test_clear_removes_durably() {
        let (store, _temp) = create_test_store();
        let mut state = StageState::load(Stage::Loader, store.clone(), BackoffPolicy::default())
            .await
            .unwrap();
        state
            .set("in_flight", Checkpoint::DocumentBatch(Vec::new()))
            .await
            .unwrap();
        state.clear("in_flight").await;
        assert!(state.get("in_flight").is_none());

        let reloaded = StageState::load(Stage::Loader, store, BackoffPolicy::default())
            .await
            .unwrap();
        assert!(reloaded.is_empty());
    }

    #[tokio::test]
    async fn test_namespace_is_private_to_stage() {
        let (store, _temp) = create_test_store();
        let mut transformer =
            StageState::load(Stage::Transformer, store.clone(), BackoffPolicy::default())
                .await
                .unwrap();
        transformer
            .set("in_flight", Checkpoint::RawBatch(Vec::new()))
            .await
            .unwrap();

        let loader = StageState::load(Stage::Loader, store, BackoffPolicy::default())
            .await
            .unwrap();
        assert!(loader.get("in_flight").is_none());
    }

    #[tokio::test]
    async fn test_corrupt_value_is_fatal() {
        let (store, _temp) = create_test_store();
        store.set(Stage::Enricher, "cursor", b"{not json").unwrap();

        let result = StageState::load(Stage::Enricher, store, BackoffPolicy::default()).await;
        assert!(matches!(result, Err(PipelineError::Checkpoint(_))));
    }
}
