//! RocksDB wrapper for checkpoint storage.
//!
//! Provides:
//! - Database open with one column family per stage
//! - Synced single-key writes and deletes
//! - Full scans of a stage namespace for startup hydration

use rocksdb::{IteratorMode, Options, WriteOptions, DB};
use std::path::Path;
use tracing::{debug, info};

use crate::column_families::{build_cf_descriptors, cf_name, ALL_CF_NAMES};
use crate::error::StorageError;
use crate::store::CheckpointStore;
use etl_types::Stage;

/// Durable checkpoint storage backed by RocksDB
pub struct Storage {
    db: DB,
}

impl Storage {
    /// Open storage at the given path, creating if necessary
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        info!("Opening checkpoint storage at {:?}", path);

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        // Checkpoints are tiny and rewritten constantly; keep background work low
        db_opts.set_max_background_jobs(2);

        let db = DB::open_cf_descriptors(&db_opts, path, build_cf_descriptors())?;
        Ok(Self { db })
    }

    fn cf(&self, stage: Stage) -> Result<&rocksdb::ColumnFamily, StorageError> {
        let name = cf_name(stage);
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(name.to_string()))
    }

    fn sync_write_options() -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(true);
        opts
    }

    /// Flush all column families to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        for cf_name in ALL_CF_NAMES {
            if let Some(cf) = self.db.cf_handle(cf_name) {
                self.db.flush_cf(cf)?;
            }
        }
        Ok(())
    }

    /// Count stored keys per stage and measure disk usage.
    pub fn get_stats(&self) -> Result<StorageStats, StorageError> {
        let mut stats = StorageStats::default();
        for stage in Stage::ALL {
            let count = self.count_cf_entries(self.cf(stage)?)?;
            stats.keys_per_stage.push((stage, count));
        }
        stats.disk_usage_bytes = self.get_disk_usage();
        Ok(stats)
    }

    fn count_cf_entries(&self, cf: &rocksdb::ColumnFamily) -> Result<u64, StorageError> {
        let mut count = 0u64;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    fn get_disk_usage(&self) -> u64 {
        let mut total_size = 0u64;
        if let Ok(entries) = std::fs::read_dir(self.db.path()) {
            for entry in entries.flatten() {
                if let Ok(metadata) = entry.metadata() {
                    total_size += metadata.len();
                }
            }
        }
        total_size
    }
}

impl CheckpointStore for Storage {
    fn set(&self, stage: Stage, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let cf = self.cf(stage)?;
        self.db
            .put_cf_opt(cf, key.as_bytes(), value, &Self::sync_write_options())?;
        debug!(stage = %stage, key, bytes = value.len(), "Checkpoint stored");
        Ok(())
    }

    fn get(&self, stage: Stage, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let cf = self.cf(stage)?;
        Ok(self.db.get_cf(cf, key.as_bytes())?)
    }

    fn delete(&self, stage: Stage, key: &str) -> Result<(), StorageError> {
        let cf = self.cf(stage)?;
        self.db
            .delete_cf_opt(cf, key.as_bytes(), &Self::sync_write_options())?;
        debug!(stage = %stage, key, "Checkpoint deleted");
        Ok(())
    }

    fn all(&self, stage: Stage) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let cf = self.cf(stage)?;
        let mut entries = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item?;
            let key = String::from_utf8(key.to_vec())
                .map_err(|e| StorageError::Key(format!("non-utf8 key in {}: {}", stage, e)))?;
            entries.push((key, value.to_vec()));
        }
        Ok(entries)
    }
}

/// Statistics about the checkpoint storage.
#[derive(Debug, Default)]
pub struct StorageStats {
    /// Number of keys held by each stage
    pub keys_per_stage: Vec<(Stage, u64)>,
    /// Total disk usage in bytes
    pub disk_usage_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use etl_types::{Checkpoint, Watermark};
    use tempfile::TempDir;

    fn create_test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::open(temp_dir.path()).unwrap();
        (storage, temp_dir)
    }

    #[test]
    fn test_open_creates_column_families() {
        let (storage, _temp) = create_test_storage();
        for cf_name in ALL_CF_NAMES {
            assert!(
                storage.db.cf_handle(cf_name).is_some(),
                "CF {} should exist",
                cf_name
            );
        }
    }

    #[test]
    fn test_set_and_get() {
        let (storage, _temp) = create_test_storage();
        storage.set(Stage::Enricher, "cursor", b"{}").unwrap();

        assert_eq!(
            storage.get(Stage::Enricher, "cursor").unwrap(),
            Some(b"{}".to_vec())
        );
        assert!(storage.get(Stage::Enricher, "missing").unwrap().is_none());
    }

    #[test]
    fn test_set_overwrites() {
        let (storage, _temp) = create_test_storage();
        storage.set(Stage::Loader, "in_flight", b"one").unwrap();
        storage.set(Stage::Loader, "in_flight", b"two").unwrap();
        assert_eq!(
            storage.get(Stage::Loader, "in_flight").unwrap(),
            Some(b"two".to_vec())
        );
    }

    #[test]
    fn test_namespaces_are_isolated() {
        let (storage, _temp) = create_test_storage();
        storage.set(Stage::Transformer, "in_flight", b"raw").unwrap();
        storage.set(Stage::Loader, "in_flight", b"docs").unwrap();

        assert_eq!(
            storage.get(Stage::Transformer, "in_flight").unwrap(),
            Some(b"raw".to_vec())
        );
        storage.delete(Stage::Loader, "in_flight").unwrap();
        assert!(storage.get(Stage::Loader, "in_flight").unwrap().is_none());
        assert!(storage.get(Stage::Transformer, "in_flight").unwrap().is_some());
        assert!(storage.all(Stage::Extractor).unwrap().is_empty());
    }

    #[test]
    fn test_delete_missing_key_is_ok() {
        let (storage, _temp) = create_test_storage();
        storage.delete(Stage::Enricher, "cursor").unwrap();
    }

    #[test]
    fn test_all_is_ordered_by_key() {
        let (storage, _temp) = create_test_storage();
        storage.set(Stage::Extractor, "watermark:person", b"2").unwrap();
        storage.set(Stage::Extractor, "watermark:film_work", b"1").unwrap();
        storage.set(Stage::Extractor, "watermark:genre", b"3").unwrap();

        let keys: Vec<String> = storage
            .all(Stage::Extractor)
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(
            keys,
            vec!["watermark:film_work", "watermark:genre", "watermark:person"]
        );
    }

    #[test]
    fn test_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let ts = Watermark::new(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(), "f1");
        let value = Checkpoint::Watermark(ts.clone()).to_bytes().unwrap();

        {
            let storage = Storage::open(temp_dir.path()).unwrap();
            storage
                .set(Stage::Extractor, "watermark:film_work", &value)
                .unwrap();
        }

        let storage = Storage::open(temp_dir.path()).unwrap();
        let bytes = storage
            .get(Stage::Extractor, "watermark:film_work")
            .unwrap()
            .unwrap();
        assert_eq!(Checkpoint::from_bytes(&bytes).unwrap(), Checkpoint::Watermark(ts));
    }

    #[test]
    fn test_stats_count_keys() {
        let (storage, _temp) = create_test_storage();
        storage.set(Stage::Loader, "in_flight", b"x").unwrap();
        storage.set(Stage::Loader, "failed", b"y").unwrap();
        storage.flush().unwrap();

        let stats = storage.get_stats().unwrap();
        let loader = stats
            .keys_per_stage
            .iter()
            .find(|(stage, _)| *stage == Stage::Loader)
            .unwrap();
        assert_eq!(loader.1, 2);
    }
}
