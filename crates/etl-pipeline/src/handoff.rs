//! Synchronous push between adjacent stages.

use async_trait::async_trait;

use crate::error::PipelineError;

/// Entry point of a downstream stage.
///
/// A stage is generic over the stage it feeds, so a whole chain is one
/// concrete type. `handoff` returns only after the receiving stage and
/// everything below it have finished with the batch.
#[async_trait]
pub trait Handoff<T: Send + 'static>: Send {
    async fn handoff(&mut self, batch: T) -> Result<(), PipelineError>;
}
