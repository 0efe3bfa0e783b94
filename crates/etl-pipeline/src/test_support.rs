//! Shared fixtures for stage tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;
use tempfile::TempDir;

use etl_storage::{CheckpointStore, Storage};

use crate::error::PipelineError;
use crate::handoff::Handoff;

pub fn create_test_store() -> (Arc<dyn CheckpointStore>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let storage = Storage::open(temp_dir.path()).unwrap();
    (Arc::new(storage), temp_dir)
}

/// `minute` minutes into 2024.
pub fn at(minute: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute)
}

/// Terminal stage that records what it receives.
pub struct Collector<T> {
    pub batches: Vec<T>,
    fail_after: Option<usize>,
}

impl<T> Default for Collector<T> {
    fn default() -> Self {
        Self {
            batches: Vec::new(),
            fail_after: None,
        }
    }
}

impl<T> Collector<T> {
    /// Rejects every batch.
    pub fn failing() -> Self {
        Self::failing_after(0)
    }

    /// Accepts `accepted` batches, then rejects the rest.
    pub fn failing_after(accepted: usize) -> Self {
        Self {
            batches: Vec::new(),
            fail_after: Some(accepted),
        }
    }
}

#[async_trait]
impl<T: Send + 'static> Handoff<T> for Collector<T> {
    async fn handoff(&mut self, batch: T) -> Result<(), PipelineError> {
        if self.fail_after.is_some_and(|n| self.batches.len() >= n) {
            return Err(PipelineError::Handoff("downstream unavailable".to_string()));
        }
        self.batches.push(batch);
        Ok(())
    }
}
