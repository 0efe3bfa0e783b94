//! Index mappings shipped with the binary.

use serde_json::Value;

use crate::error::SearchError;

/// Settings and mappings of the `movies` index.
pub const MOVIES_MAPPING: &str = include_str!("mapping/movies.json");

/// Parsed `movies` index body, ready for index creation.
pub fn movies_mapping() -> Result<Value, SearchError> {
    serde_json::from_str(MOVIES_MAPPING).map_err(SearchError::from)
}
