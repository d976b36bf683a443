use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use troupe_core::TaskId;

/// Counters tracked per agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub tasks_started: u32,
    pub tasks_completed: u32,
    pub tasks_failed: u32,
    pub attempts: u32,
    pub errors: u32,
    pub duration_ms: u64,
}

/// What an agent is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Idle,
    Working,
    Error,
}

/// Real-time snapshot of one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentState {
    pub agent_id: String,
    /// Tasks currently assigned, in start order.
    pub current_tasks: Vec<TaskId>,
    pub status: WorkerStatus,
    pub metrics: AgentMetrics,
}

impl AgentState {
    fn new(agent_id: &str) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            current_tasks: Vec::new(),
            status: WorkerStatus::Idle,
            metrics: AgentMetrics::default(),
        }
    }
}

/// Tracks state and metrics for every agent taking part in runs.
#[derive(Debug, Default)]
pub struct AgentMonitor {
    states: RwLock<BTreeMap<String, AgentState>>,
}

impl AgentMonitor {
    /// Empty monitor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make an agent visible in snapshots before it does any work.
    pub fn register(&self, agent_id: &str) {
        self.states
            .write()
            .entry(agent_id.to_string())
            .or_insert_with(|| AgentState::new(agent_id));
    }

    /// Mark `task_id` as started on `agent_id`.
    pub fn start_task(&self, agent_id: &str, task_id: &TaskId) {
        let mut states = self.states.write();
        let state = states
            .entry(agent_id.to_string())
            .or_insert_with(|| AgentState::new(agent_id));
        state.current_tasks.push(task_id.clone());
        state.status = WorkerStatus::Working;
        state.metrics.tasks_started += 1;
    }

    /// Count one attempt.
    pub fn record_attempt(&self, agent_id: &str) {
        if let Some(state) = self.states.write().get_mut(agent_id) {
            state.metrics.attempts += 1;
        }
    }

    /// Count an executor error or timeout.
    pub fn record_error(&self, agent_id: &str) {
        if let Some(state) = self.states.write().get_mut(agent_id) {
            state.metrics.errors += 1;
        }
    }

    /// Mark `task_id` as finished.
    pub fn finish_task(&self, agent_id: &str, task_id: &TaskId, success: bool, duration_ms: u64) {
        let mut states = self.states.write();
        if let Some(state) = states.get_mut(agent_id) {
            if let Some(pos) = state.current_tasks.iter().position(|t| t == task_id) {
                state.current_tasks.remove(pos);
            }
            state.metrics.duration_ms += duration_ms;
            if success {
                state.metrics.tasks_completed += 1;
            } else {
                state.metrics.tasks_failed += 1;
            }
            state.status = if !state.current_tasks.is_empty() {
                WorkerStatus::Working
            } else if success {
                WorkerStatus::Idle
            } else {
                WorkerStatus::Error
            };
        }
    }

    /// All agent states, ordered by agent id.
    pub fn snapshot(&self) -> Vec<AgentState> {
        self.states.read().values().cloned().collect()
    }

    /// Current state of one agent.
    pub fn get_state(&self, agent_id: &str) -> Option<AgentState> {
        self.states.read().get(agent_id).cloned()
    }

    /// Counters summed across agents.
    pub fn aggregate_metrics(&self) -> AgentMetrics {
        let states = self.states.read();
        let mut total = AgentMetrics::default();
        for state in states.values() {
            total.tasks_started += state.metrics.tasks_started;
            total.tasks_completed += state.metrics.tasks_completed;
            total.tasks_failed += state.metrics.tasks_failed;
            total.attempts += state.metrics.attempts;
            total.errors += state.metrics.errors;
            total.duration_ms += state.metrics.duration_ms;
        }
        total
    }

    /// All agent states as JSON.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "agents": self.snapshot(),
            "aggregate": self.aggregate_metrics(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_registered_agent_starts_idle() {
        let monitor = AgentMonitor::new();
        monitor.register("writer");
        monitor.register("writer");
        let states = monitor.snapshot();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].status, WorkerStatus::Idle);
        assert!(states[0].current_tasks.is_empty());
    }

    #[test]
    fn test_start_and_finish_task() {
        let monitor = AgentMonitor::new();
        let t1 = TaskId::from("t1");
        let t2 = TaskId::from("t2");

        monitor.start_task("coder", &t1);
        monitor.start_task("coder", &t2);
        monitor.record_attempt("coder");
        monitor.record_attempt("coder");
        let state = monitor.get_state("coder").unwrap();
        assert_eq!(state.status, WorkerStatus::Working);
        assert_eq!(state.current_tasks, vec![t1.clone(), t2.clone()]);

        monitor.finish_task("coder", &t1, true, 40);
        assert_eq!(monitor.get_state("coder").unwrap().status, WorkerStatus::Working);
        monitor.finish_task("coder", &t2, true, 60);

        let state = monitor.get_state("coder").unwrap();
        assert_eq!(state.status, WorkerStatus::Idle);
        assert_eq!(state.metrics.tasks_completed, 2);
        assert_eq!(state.metrics.attempts, 2);
        assert_eq!(state.metrics.duration_ms, 100);
    }

    #[test]
    fn test_failure_marks_error() {
        let monitor = AgentMonitor::new();
        let t = TaskId::from("t");
        monitor.start_task("tester", &t);
        monitor.record_error("tester");
        monitor.finish_task("tester", &t, false, 5);
        let state = monitor.get_state("tester").unwrap();
        assert_eq!(state.status, WorkerStatus::Error);
        assert_eq!(state.metrics.errors, 1);
        assert_eq!(state.metrics.tasks_failed, 1);
    }

    #[test]
    fn test_aggregate_and_json() {
        let monitor = AgentMonitor::new();
        monitor.start_task("a", &TaskId::from("1"));
        monitor.start_task("b", &TaskId::from("2"));
        monitor.record_error("b");

        let total = monitor.aggregate_metrics();
        assert_eq!(total.tasks_started, 2);
        assert_eq!(total.errors, 1);

        let json = monitor.to_json();
        assert_eq!(json["agents"].as_array().unwrap().len(), 2);
        assert_eq!(json["aggregate"]["tasks_started"], 2);
    }
}
