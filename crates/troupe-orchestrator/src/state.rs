use crate::condition::ConditionScope;
use crate::graph::TaskGraph;
use crate::types::{TaskOutput, TaskStatus};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use troupe_core::{TaskId, TroupeError, TroupeResult};
use troupe_session::{RunSnapshot, StateStore};

/// Mutable bookkeeping of one run. Only the engine mutates it.
#[derive(Debug)]
pub struct ProcessState {
    store: Arc<StateStore>,
    completed: BTreeSet<TaskId>,
    /// Running tasks and the agent each was handed to.
    in_flight: BTreeMap<TaskId, String>,
    statuses: BTreeMap<TaskId, TaskStatus>,
    outputs: Vec<TaskOutput>,
    iterations: u32,
    halted: bool,
}

impl ProcessState {
    /// Every task of `graph` starts out pending.
    pub fn new(store: Arc<StateStore>, graph: &TaskGraph) -> Self {
        Self {
            store,
            completed: BTreeSet::new(),
            in_flight: BTreeMap::new(),
            statuses: graph
                .iter()
                .map(|t| (t.id.clone(), TaskStatus::Pending))
                .collect(),
            outputs: Vec::new(),
            iterations: 0,
            halted: false,
        }
    }

    /// Shared key/value state.
    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Tasks with an accepted output.
    pub fn completed(&self) -> &BTreeSet<TaskId> {
        &self.completed
    }

    /// Running tasks and their agents.
    pub fn in_flight(&self) -> &BTreeMap<TaskId, String> {
        &self.in_flight
    }

    /// Tasks that must not be scheduled: running, failed or skipped.
    pub fn settled(&self) -> BTreeSet<TaskId> {
        self.statuses
            .iter()
            .filter(|(_, s)| {
                matches!(
                    s,
                    TaskStatus::Running | TaskStatus::Failed { .. } | TaskStatus::Skipped { .. }
                )
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Skipped tasks.
    pub fn skipped(&self) -> BTreeSet<TaskId> {
        self.statuses
            .iter()
            .filter(|(_, s)| matches!(s, TaskStatus::Skipped { .. }))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Status of one task.
    pub fn status(&self, id: &str) -> Option<&TaskStatus> {
        self.statuses.get(id)
    }

    /// Every task's status.
    pub fn statuses(&self) -> &BTreeMap<TaskId, TaskStatus> {
        &self.statuses
    }

    /// Accepted outputs in completion order.
    pub fn outputs(&self) -> &[TaskOutput] {
        &self.outputs
    }

    /// Most recent accepted output of `id`.
    pub fn latest_output(&self, id: &str) -> Option<&TaskOutput> {
        self.outputs.iter().rev().find(|o| o.task_id.as_str() == id)
    }

    /// Scope for condition evaluation.
    pub fn scope(&self) -> ConditionScope<'_> {
        ConditionScope::new(&self.store, &self.outputs)
    }

    /// Iterations used so far.
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Count one iteration and return the new total.
    pub fn bump_iterations(&mut self) -> u32 {
        self.iterations += 1;
        self.iterations
    }

    /// Whether the run stopped scheduling.
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Stop scheduling new work.
    pub fn halt(&mut self) {
        self.halted = true;
    }

    /// Mark a task running on `agent`.
    pub fn mark_running(&mut self, id: &TaskId, agent: &str) {
        self.statuses.insert(id.clone(), TaskStatus::Running);
        self.in_flight.insert(id.clone(), agent.to_string());
    }

    /// Record an accepted output.
    pub fn mark_completed(&mut self, output: TaskOutput) {
        let id = output.task_id.clone();
        self.in_flight.remove(&id);
        self.statuses.insert(id.clone(), TaskStatus::Completed);
        self.completed.insert(id);
        self.outputs.push(output);
    }

    /// Mark a task failed.
    pub fn mark_failed(&mut self, id: &TaskId, reason: impl Into<String>) {
        self.in_flight.remove(id);
        self.statuses.insert(
            id.clone(),
            TaskStatus::Failed {
                reason: reason.into(),
            },
        );
    }

    /// Mark a task skipped.
    pub fn mark_skipped(&mut self, id: &TaskId, reason: impl Into<String>) {
        self.statuses.insert(
            id.clone(),
            TaskStatus::Skipped {
                reason: reason.into(),
            },
        );
    }

    /// Put tasks back to pending (workflow loops). Outputs and state are kept.
    pub fn reset(&mut self, ids: &[TaskId]) {
        for id in ids {
            self.completed.remove(id);
            self.statuses.insert(id.clone(), TaskStatus::Pending);
        }
    }

    /// Tasks still pending or running, in `graph` declaration order.
    pub fn unfinished(&self, graph: &TaskGraph) -> Vec<TaskId> {
        graph
            .iter()
            .filter(|t| {
                matches!(
                    self.statuses.get(&t.id),
                    Some(TaskStatus::Pending | TaskStatus::Running) | None
                )
            })
            .map(|t| t.id.clone())
            .collect()
    }

    /// Image of the run for persistence.
    pub fn snapshot(&self, session_id: &str) -> TroupeResult<RunSnapshot> {
        let outputs = self
            .outputs
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RunSnapshot::new(session_id, self.store.snapshot(), self.completed.clone())
            .with_outputs(outputs)
            .with_iterations(self.iterations))
    }

    /// Replace state store contents, completed set, outputs and iteration
    /// count with those of `snapshot`.
    pub fn restore(&mut self, snapshot: RunSnapshot, graph: &TaskGraph) -> TroupeResult<()> {
        if let Some(unknown) = snapshot.completed.iter().find(|id| !graph.contains(id.as_str())) {
            return Err(TroupeError::Session(format!(
                "snapshot '{}' references unknown task {unknown}",
                snapshot.session_id
            )));
        }
        let outputs = snapshot
            .outputs
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<TaskOutput>, _>>()?;

        self.store.restore(snapshot.state);
        for id in &snapshot.completed {
            self.statuses.insert(id.clone(), TaskStatus::Completed);
        }
        self.completed = snapshot.completed;
        self.outputs = outputs;
        self.iterations = snapshot.iterations;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::graph::TaskGraphConfig;
    use crate::types::Task;

    fn graph() -> TaskGraph {
        let mut g = TaskGraph::new(TaskGraphConfig::default());
        g.add_task(Task::new("a", "A", "x")).unwrap();
        g.add_task(Task::new("b", "B", "x").depends_on(["a"])).unwrap();
        g.add_task(Task::new("c", "C", "x").depends_on(["b"])).unwrap();
        g.validate().unwrap();
        g
    }

    #[test]
    fn test_lifecycle_and_settled() {
        let g = graph();
        let mut state = ProcessState::new(Arc::new(StateStore::new("r")), &g);
        assert_eq!(state.unfinished(&g).len(), 3);

        let a = TaskId::from("a");
        state.mark_running(&a, "x");
        assert!(state.settled().contains(&a));
        assert_eq!(state.in_flight().get(&a).map(String::as_str), Some("x"));

        state.mark_completed(TaskOutput::completed(a.clone(), "x", "done"));
        assert!(state.completed().contains(&a));
        assert!(state.in_flight().is_empty());
        assert!(!state.settled().contains(&a));

        state.mark_failed(&TaskId::from("b"), "boom");
        state.mark_skipped(&TaskId::from("c"), "dependency b failed");
        assert!(state.unfinished(&g).is_empty());
        assert_eq!(state.skipped().len(), 1);
    }

    #[test]
    fn test_reset_keeps_outputs() {
        let g = graph();
        let mut state = ProcessState::new(Arc::new(StateStore::new("r")), &g);
        let a = TaskId::from("a");
        state.mark_completed(TaskOutput::completed(a.clone(), "x", "v1"));
        state.reset(&[a.clone()]);
        assert_eq!(state.status("a"), Some(&TaskStatus::Pending));
        assert!(!state.completed().contains(&a));
        assert_eq!(state.latest_output("a").unwrap().raw, "v1");
    }

    #[test]
    fn test_snapshot_restore_round_trip() {
        let g = graph();
        let store = Arc::new(StateStore::new("r"));
        store.set("topic", "rust").unwrap();
        store.set("ratio", 0.1 + 0.2).unwrap();
        let mut state = ProcessState::new(store, &g);
        state.mark_completed(TaskOutput::completed(TaskId::from("a"), "x", "alpha"));
        state.bump_iterations();

        let snap = state.snapshot("sess").unwrap();
        let json = serde_json::to_string(&snap).unwrap();
        let snap: RunSnapshot = serde_json::from_str(&json).unwrap();

        let fresh_store = Arc::new(StateStore::new("r2"));
        let mut restored = ProcessState::new(fresh_store.clone(), &g);
        restored.restore(snap, &g).unwrap();

        assert_eq!(fresh_store.snapshot(), state.store().snapshot());
        assert_eq!(restored.completed(), state.completed());
        assert_eq!(restored.outputs(), state.outputs());
        assert_eq!(restored.iterations(), 1);
        assert_eq!(restored.status("a"), Some(&TaskStatus::Completed));
    }

    #[test]
    fn test_restore_rejects_unknown_task() {
        let g = graph();
        let mut state = ProcessState::new(Arc::new(StateStore::new("r")), &g);
        let snap = RunSnapshot::new(
            "sess",
            BTreeMap::new(),
            [TaskId::from("zzz")].into_iter().collect(),
        );
        assert!(matches!(state.restore(snap, &g), Err(TroupeError::Session(_))));
    }
}
