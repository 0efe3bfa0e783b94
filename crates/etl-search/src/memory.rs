//! In-memory search index for testing.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};

use etl_types::BulkItemError;

use crate::bulk::{BulkAction, BulkSummary};
use crate::error::SearchError;
use crate::index::SearchIndex;

#[derive(Default)]
struct State {
    /// index name -> (mapping, documents by id)
    indices: HashMap<String, (Value, BTreeMap<String, Value>)>,
    /// document id -> (error type, reason) reported instead of storing it
    rejections: HashMap<String, (String, String)>,
    /// Requests still to fail with a transport-like error
    outage: usize,
    bulk_requests: usize,
}

/// Search index held in memory.
///
/// Behaves like a single-node cluster: bulk writes upsert by id and create
/// missing indices. Individual documents can be set up to be rejected, and
/// an outage can be simulated for a number of requests.
#[derive(Default)]
pub struct MemoryIndex {
    state: Mutex<State>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Report the document with `id` as failed on every bulk write.
    pub fn reject_document(&self, id: &str, error_type: &str, reason: &str) {
        self.state()
            .rejections
            .insert(id.to_string(), (error_type.to_string(), reason.to_string()));
    }

    /// Fail the next `requests` calls of any kind.
    pub fn fail_next(&self, requests: usize) {
        self.state().outage = requests;
    }

    /// Documents of `index`, ordered by id.
    pub fn documents(&self, index: &str) -> Vec<Value> {
        self.state()
            .indices
            .get(index)
            .map(|(_, docs)| docs.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Mapping `index` was created with.
    pub fn mapping(&self, index: &str) -> Option<Value> {
        self.state().indices.get(index).map(|(m, _)| m.clone())
    }

    /// Number of bulk requests that reached the index.
    pub fn bulk_requests(&self) -> usize {
        self.state().bulk_requests
    }

    fn check_outage(state: &mut State) -> Result<(), SearchError> {
        if state.outage > 0 {
            state.outage -= 1;
            return Err(SearchError::Status {
                status: 503,
                body: "cluster unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SearchIndex for MemoryIndex {
    async fn exists(&self, index: &str) -> Result<bool, SearchError> {
        let mut state = self.state();
        Self::check_outage(&mut state)?;
        Ok(state.indices.contains_key(index))
    }

    async fn create(&self, index: &str, mapping: &Value) -> Result<(), SearchError> {
        let mut state = self.state();
        Self::check_outage(&mut state)?;
        state
            .indices
            .entry(index.to_string())
            .or_insert_with(|| (mapping.clone(), BTreeMap::new()));
        Ok(())
    }

    async fn bulk(&self, actions: &[BulkAction]) -> Result<BulkSummary, SearchError> {
        let mut state = self.state();
        Self::check_outage(&mut state)?;
        state.bulk_requests += 1;

        let mut summary = BulkSummary {
            items: actions.len(),
            errors: Vec::new(),
        };
        for action in actions {
            if let Some((error_type, reason)) = state.rejections.get(&action.id) {
                summary.errors.push(BulkItemError {
                    id: action.id.clone(),
                    status: 400,
                    error_type: error_type.clone(),
                    reason: reason.clone(),
                });
                continue;
            }
            state
                .indices
                .entry(action.index.clone())
                .or_insert_with(|| (Value::Null, BTreeMap::new()))
                .1
                .insert(action.id.clone(), action.source.clone());
        }
        Ok(summary)
    }

    async fn get(&self, index: &str, id: &str) -> Result<Option<Value>, SearchError> {
        let mut state = self.state();
        Self::check_outage(&mut state)?;
        Ok(state
            .indices
            .get(index)
            .and_then(|(_, docs)| docs.get(id).cloned()))
    }
}
