//! Bulk API envelope.
//!
//! Requests are newline-delimited JSON: one action line followed by one
//! source line per document, with a trailing newline. Only the `index`
//! action is produced, so every write is an upsert by `_id`.

use serde::Serialize;
use serde_json::{json, Value};

use etl_types::BulkItemError;

use crate::error::SearchError;

/// One `index` action of a bulk request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkAction {
    /// Target index
    pub index: String,
    /// Document id (`_id`)
    pub id: String,
    /// Document body
    pub source: Value,
}

impl BulkAction {
    /// Build an index action from any serializable document.
    pub fn index<T: Serialize>(
        index: impl Into<String>,
        id: impl Into<String>,
        document: &T,
    ) -> Result<Self, SearchError> {
        Ok(Self {
            index: index.into(),
            id: id.into(),
            source: serde_json::to_value(document)?,
        })
    }
}

/// Encode actions as an NDJSON request body.
pub fn to_ndjson(actions: &[BulkAction]) -> Result<String, SearchError> {
    let mut body = String::new();
    for action in actions {
        let header = json!({ "index": { "_index": action.index, "_id": action.id } });
        body.push_str(&serde_json::to_string(&header)?);
        body.push('\n');
        body.push_str(&serde_json::to_string(&action.source)?);
        body.push('\n');
    }
    Ok(body)
}

/// Outcome of a bulk request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkSummary {
    /// Number of items the server reported on
    pub items: usize,
    /// Items that failed
    pub errors: Vec<BulkItemError>,
}

impl BulkSummary {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Items written successfully.
    pub fn succeeded(&self) -> usize {
        self.items.saturating_sub(self.errors.len())
    }
}

/// Extract per-item failures from a bulk response body.
pub fn parse_bulk_response(body: &Value) -> Result<BulkSummary, SearchError> {
    let items = body
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| SearchError::Decode("bulk response has no `items` array".to_string()))?;

    let mut summary = BulkSummary {
        items: items.len(),
        errors: Vec::new(),
    };

    // Skip the scan when the server says everything went through
    if body.get("errors").and_then(Value::as_bool) == Some(false) {
        return Ok(summary);
    }

    for item in items {
        let Some(result) = item.as_object().and_then(|obj| obj.values().next()) else {
            continue;
        };
        let Some(error) = result.get("error") else {
            continue;
        };
        summary.errors.push(BulkItemError {
            id: result
                .get("_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            status: result
                .get("status")
                .and_then(Value::as_u64)
                .and_then(|s| u16::try_from(s).ok())
                .unwrap_or_default(),
            error_type: error
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            reason: error
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        });
    }

    Ok(summary)
}
