//! Restore state handed to the engine at each committed snapshot.

use serde::{Deserialize, Serialize};
use sluice_rdbc::types::Value;

use crate::error::{Result, SinkError};
use crate::metrics::CounterSnapshot;

/// Progress of one writer instance as of its last committed transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoreState {
    /// Partition index of the writer that produced the state
    pub writer_id: usize,
    /// Restore-column value of the last committed upstream transaction
    pub progress_marker: Option<Value>,
    /// Counters at commit time
    pub counters: CounterSnapshot,
}

impl RestoreState {
    /// Create a state
    pub fn new(writer_id: usize, progress_marker: Option<Value>, counters: CounterSnapshot) -> Self {
        Self {
            writer_id,
            progress_marker,
            counters,
        }
    }

    /// Serialize for the engine's state backend
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| SinkError::config(format!("failed to encode restore state: {}", e)))
    }

    /// Decode a persisted state
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| SinkError::config(format!("invalid restore state: {}", e)))
    }
}
