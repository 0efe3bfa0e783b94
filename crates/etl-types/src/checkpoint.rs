//! Checkpoint values persisted by the pipeline stages.
//!
//! Every stage writes to its own namespace and each namespace holds a fixed
//! set of shapes, so values are a closed tagged union rather than opaque
//! blobs. Encoded as JSON for storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::EntityKind;
use crate::error::EtlError;
use crate::film_work::{ChangedRow, FilmWorkDocument, RawFilmWork};

/// Keyset position of the change detector: the last delivered row.
///
/// Rows are polled in `(modified, id)` order strictly after this position,
/// so rows sharing a timestamp across a page boundary are neither skipped
/// nor repeated. Field order gives the derived `Ord` the same ordering.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Watermark {
    pub modified: DateTime<Utc>,
    /// Id of the last delivered row (empty = before every row at `modified`)
    #[serde(default)]
    pub id: String,
}

impl Watermark {
    pub fn new(modified: DateTime<Utc>, id: impl Into<String>) -> Self {
        Self {
            modified,
            id: id.into(),
        }
    }

    /// Position before any row: the Unix epoch with an empty id.
    pub fn epoch() -> Self {
        Self::new(DateTime::<Utc>::UNIX_EPOCH, "")
    }

    /// Whether `row` lies strictly past this position.
    pub fn precedes(&self, row: &ChangedRow) -> bool {
        (&self.modified, self.id.as_str()) < (&row.modified, row.id.as_str())
    }
}

impl From<&ChangedRow> for Watermark {
    fn from(row: &ChangedRow) -> Self {
        Self::new(row.modified, row.id.clone())
    }
}

/// Resume point of an incomplete enrichment pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentCursor {
    /// Entity kind whose primary keys are being enriched
    pub entity: EntityKind,
    /// Primary keys requested by the change detector
    pub pkeys: Vec<String>,
    /// Root id after which the next page starts (empty = from the beginning)
    pub last_processed_id: String,
    /// Rows per enrichment page
    pub page_size: usize,
}

impl EnrichmentCursor {
    /// A cursor without pending keys carries no work.
    pub fn is_pending(&self) -> bool {
        !self.pkeys.is_empty()
    }
}

/// Per-document failure reported by a bulk write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkItemError {
    /// Document id the failure applies to
    pub id: String,
    /// HTTP status of the item
    pub status: u16,
    /// Error type reported by the index (e.g. `mapper_parsing_exception`)
    pub error_type: String,
    /// Human-readable reason
    pub reason: String,
}

/// Entry in the failed bulk-write log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedWrite {
    /// When the partial failure was observed (milliseconds since epoch in JSON)
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub time: DateTime<Utc>,
    /// Per-document errors
    pub details: Vec<BulkItemError>,
}

impl FailedWrite {
    pub fn now(details: Vec<BulkItemError>) -> Self {
        Self {
            time: Utc::now(),
            details,
        }
    }
}

/// A value stored in the checkpoint store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Checkpoint {
    /// Extractor: last delivered row of one entity kind
    Watermark(Watermark),
    /// Enricher: cursor of the pass in progress
    Cursor(EnrichmentCursor),
    /// Transformer: raw batch being transformed
    RawBatch(Vec<RawFilmWork>),
    /// Loader: documents being written
    DocumentBatch(Vec<FilmWorkDocument>),
    /// Loader: failed bulk-write log
    FailedWrites(Vec<FailedWrite>),
}

impl Checkpoint {
    /// Short name of the variant, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Checkpoint::Watermark(_) => "watermark",
            Checkpoint::Cursor(_) => "cursor",
            Checkpoint::RawBatch(_) => "raw_batch",
            Checkpoint::DocumentBatch(_) => "document_batch",
            Checkpoint::FailedWrites(_) => "failed_writes",
        }
    }

    /// Serialize to JSON bytes for storage
    pub fn to_bytes(&self) -> Result<Vec<u8>, EtlError> {
        serde_json::to_vec(self).map_err(EtlError::from)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EtlError> {
        serde_json::from_slice(bytes).map_err(EtlError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_cursor_pending() {
        let mut cursor = EnrichmentCursor {
            entity: EntityKind::Person,
            pkeys: vec!["p1".to_string()],
            last_processed_id: String::new(),
            page_size: 100,
        };
        assert!(cursor.is_pending());
        cursor.pkeys.clear();
        assert!(!cursor.is_pending());
    }

    #[test]
    fn test_watermark_json_format() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let watermark = Checkpoint::Watermark(Watermark::new(ts, "p7"));
        let bytes = watermark.to_bytes().unwrap();
        let json = String::from_utf8(bytes.clone()).unwrap();

        assert!(json.contains("\"kind\":\"watermark\""));
        assert!(json.contains("\"modified\":\"2024-01-02T00:00:00Z\""));
        assert!(json.contains("\"id\":\"p7\""));
        assert_eq!(Checkpoint::from_bytes(&bytes).unwrap(), watermark);
    }

    #[test]
    fn test_watermark_keyset_order() {
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let row = |id: &str, modified| ChangedRow {
            id: id.to_string(),
            modified,
        };

        let at_b = Watermark::new(t2, "b");
        assert!(!at_b.precedes(&row("a", t2)));
        assert!(!at_b.precedes(&row("b", t2)));
        assert!(at_b.precedes(&row("c", t2)));
        assert!(at_b.precedes(&row("a", Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap())));
        assert!(!at_b.precedes(&row("z", t1)));

        assert!(Watermark::epoch().precedes(&row("a", t1)));
        assert!(Watermark::new(t1, "z") < Watermark::new(t2, "a"));
        assert_eq!(Watermark::from(&row("c", t2)), Watermark::new(t2, "c"));
    }

    #[test]
    fn test_cursor_roundtrip() {
        let cursor = Checkpoint::Cursor(EnrichmentCursor {
            entity: EntityKind::Genre,
            pkeys: vec!["g1".to_string(), "g2".to_string()],
            last_processed_id: "f9".to_string(),
            page_size: 2,
        });
        let decoded = Checkpoint::from_bytes(&cursor.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, cursor);
        assert_eq!(decoded.kind(), "cursor");
    }

    #[test]
    fn test_failed_writes_time_is_millis() {
        let entry = FailedWrite {
            time: Utc.timestamp_millis_opt(1_706_540_400_000).unwrap(),
            details: vec![BulkItemError {
                id: "a".to_string(),
                status: 400,
                error_type: "mapper_parsing_exception".to_string(),
                reason: "failed to parse field [imdb_rating]".to_string(),
            }],
        };
        let json = serde_json::to_string(&Checkpoint::FailedWrites(vec![entry])).unwrap();
        assert!(json.contains("\"time\":1706540400000"));
        assert!(json.contains("mapper_parsing_exception"));
    }

    #[test]
    fn test_from_bytes_rejects_garbage() {
        assert!(matches!(
            Checkpoint::from_bytes(b"not json"),
            Err(EtlError::Serialization(_))
        ));
    }
}
