//! Checkpoint store contract.
//!
//! Values are opaque bytes at this layer; stages encode them as
//! [`etl_types::Checkpoint`]. Every method is scoped to one stage namespace.

use etl_types::Stage;

use crate::error::StorageError;

/// Durable key-value state, partitioned by stage.
///
/// Writes are synchronous: `set` and `delete` return only after the change
/// is durable.
pub trait CheckpointStore: Send + Sync {
    /// Persist `value` under `key`.
    fn set(&self, stage: Stage, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Last stored value, or `None` when absent.
    fn get(&self, stage: Stage, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Remove `key`. Removing an absent key is not an error.
    fn delete(&self, stage: Stage, key: &str) -> Result<(), StorageError>;

    /// Every key/value pair currently stored for the stage, ordered by key.
    fn all(&self, stage: Stage) -> Result<Vec<(String, Vec<u8>)>, StorageError>;
}
