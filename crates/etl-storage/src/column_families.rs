//! Column family definitions for RocksDB.
//!
//! Each pipeline stage gets its own column family so that no stage can
//! observe another stage's keys:
//! - extractor: per-entity watermarks
//! - enricher: enrichment cursor
//! - transformer: in-flight raw batch
//! - loader: in-flight document batch and the failed-write log

use etl_types::Stage;
use rocksdb::{ColumnFamilyDescriptor, Options};

/// All column family names, one per stage
pub const ALL_CF_NAMES: &[&str] = &["extractor", "enricher", "transformer", "loader"];

/// Column family holding the given stage's checkpoints
pub fn cf_name(stage: Stage) -> &'static str {
    stage.namespace()
}

/// Options for the loader family: the failure log grows, so compress it
fn loader_options() -> Options {
    let mut opts = Options::default();
    opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
    opts
}

/// Build all column family descriptors
pub fn build_cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
    Stage::ALL
        .iter()
        .map(|stage| match stage {
            Stage::Loader => ColumnFamilyDescriptor::new(cf_name(*stage), loader_options()),
            _ => ColumnFamilyDescriptor::new(cf_name(*stage), Options::default()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_stage_has_a_family() {
        for stage in Stage::ALL {
            assert!(ALL_CF_NAMES.contains(&cf_name(stage)));
        }
        assert_eq!(build_cf_descriptors().len(), ALL_CF_NAMES.len());
    }
}
