use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use troupe_core::TaskId;

/// Serializable image of a run, written to a [`crate::SessionStore`] so an
/// interrupted run can be resumed.
///
/// `state` and `completed` round-trip exactly; `outputs` carries the accepted
/// task outputs as opaque JSON so this crate stays independent of the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub session_id: String,
    pub state: BTreeMap<String, Value>,
    pub completed: BTreeSet<TaskId>,
    #[serde(default)]
    pub outputs: Vec<Value>,
    #[serde(default)]
    pub iterations: u32,
    pub saved_at: DateTime<Utc>,
}

impl RunSnapshot {
    /// Snapshot of `state` and the completed set.
    pub fn new(
        session_id: impl Into<String>,
        state: BTreeMap<String, Value>,
        completed: BTreeSet<TaskId>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            state,
            completed,
            outputs: Vec::new(),
            iterations: 0,
            saved_at: Utc::now(),
        }
    }

    /// Attach serialized outputs.
    pub fn with_outputs(mut self, outputs: Vec<Value>) -> Self {
        self.outputs = outputs;
        self
    }

    /// Record the iteration count.
    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    /// Whether `id` had completed.
    pub fn is_completed(&self, id: &str) -> bool {
        self.completed.contains(id)
    }
}
