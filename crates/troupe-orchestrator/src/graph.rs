use crate::condition::{Condition, ConditionScope};
use crate::types::Task;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use troupe_core::{GraphError, TaskId, TroupeError, TroupeResult};

/// Retries granted to tasks that do not set `max_retry`.
pub const DEFAULT_MAX_RETRY: u32 = 2;

/// Construction-time options of a [`TaskGraph`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskGraphConfig {
    #[serde(default = "default_max_retry")]
    pub default_max_retry: u32,
    /// Accept dependencies on tasks registered later; `validate()` reports any
    /// that never show up.
    #[serde(default)]
    pub deferred_dependencies: bool,
}

fn default_max_retry() -> u32 {
    DEFAULT_MAX_RETRY
}

impl Default for TaskGraphConfig {
    fn default() -> Self {
        Self {
            default_max_retry: DEFAULT_MAX_RETRY,
            deferred_dependencies: false,
        }
    }
}

/// Workflow loop: when `from` completes and `condition` holds, `to` and
/// everything downstream of it run again.
#[derive(Debug, Clone)]
pub struct BackEdge {
    pub from: TaskId,
    pub to: TaskId,
    pub condition: Condition,
}

/// Directed acyclic graph of tasks, kept in declaration order.
#[derive(Debug, Default)]
pub struct TaskGraph {
    config: TaskGraphConfig,
    tasks: Vec<Task>,
    index: HashMap<TaskId, usize>,
    back_edges: Vec<BackEdge>,
    validated: bool,
}

impl TaskGraph {
    /// Empty graph.
    pub fn new(config: TaskGraphConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// The graph config.
    pub fn config(&self) -> &TaskGraphConfig {
        &self.config
    }

    /// Register a task. Invalidates any earlier `validate()`.
    pub fn add_task(&mut self, mut task: Task) -> Result<(), GraphError> {
        if self.index.contains_key(&task.id) {
            return Err(GraphError::DuplicateTaskId(task.id));
        }
        if !self.config.deferred_dependencies {
            if let Some(dep) = task.depends_on.iter().find(|d| !self.index.contains_key(*d)) {
                return Err(GraphError::UnknownDependency {
                    task: task.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
        if let Some(reference) = task.context_refs.iter().find(|r| !task.depends_on.contains(*r)) {
            return Err(GraphError::InvalidContextRef {
                task: task.id.clone(),
                reference: reference.clone(),
            });
        }

        task.max_retry.get_or_insert(self.config.default_max_retry);
        self.index.insert(task.id.clone(), self.tasks.len());
        self.tasks.push(task);
        self.validated = false;
        Ok(())
    }

    /// Builder-style [`Self::add_task`].
    pub fn with_task(mut self, task: Task) -> Result<Self, GraphError> {
        self.add_task(task)?;
        Ok(self)
    }

    /// Declare a workflow loop. `to` must be `from` itself or one of its
    /// transitive dependencies. Back edges are not part of cycle detection.
    pub fn add_back_edge(
        &mut self,
        from: impl Into<TaskId>,
        to: impl Into<TaskId>,
        condition: Condition,
    ) -> Result<(), GraphError> {
        let from = from.into();
        let to = to.into();
        let valid = self.index.contains_key(&from)
            && self.index.contains_key(&to)
            && (from == to || self.ancestors_of(&from).contains(&to));
        if !valid {
            return Err(GraphError::InvalidBackEdge { from, to });
        }
        self.back_edges.push(BackEdge { from, to, condition });
        Ok(())
    }

    /// Check dependencies and acyclicity. Must succeed before execution.
    pub fn validate(&mut self) -> Result<(), GraphError> {
        for task in &self.tasks {
            if let Some(dep) = task.depends_on.iter().find(|d| !self.index.contains_key(*d)) {
                return Err(GraphError::UnknownDependency {
                    task: task.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }

        // 1 = on the current DFS path, 2 = fully explored.
        let mut visited: HashMap<&TaskId, u8> = HashMap::new();
        let mut path: Vec<&TaskId> = Vec::new();
        for task in &self.tasks {
            if let Some(cycle) = self.dfs_cycle(&task.id, &mut visited, &mut path) {
                return Err(GraphError::CyclicDependency { cycle });
            }
        }

        self.validated = true;
        tracing::debug!(tasks = self.tasks.len(), back_edges = self.back_edges.len(), "Task graph validated");
        Ok(())
    }

    fn dfs_cycle<'a>(
        &'a self,
        id: &'a TaskId,
        visited: &mut HashMap<&'a TaskId, u8>,
        path: &mut Vec<&'a TaskId>,
    ) -> Option<Vec<TaskId>> {
        match visited.get(id) {
            Some(1) => {
                let start = path.iter().position(|p| *p == id).unwrap_or(0);
                let mut cycle: Vec<TaskId> = path[start..].iter().map(|p| (*p).clone()).collect();
                cycle.push(id.clone());
                return Some(cycle);
            }
            Some(_) => return None,
            None => {}
        }
        visited.insert(id, 1);
        path.push(id);
        if let Some(task) = self.get(id.as_ref()) {
            for dep in &task.depends_on {
                if let Some(cycle) = self.dfs_cycle(dep, visited, path) {
                    return Some(cycle);
                }
            }
        }
        path.pop();
        visited.insert(id, 2);
        None
    }

    /// Whether `validate` has succeeded since the last change.
    pub fn is_validated(&self) -> bool {
        self.validated
    }

    /// Validate, failing with a [`TroupeError`] for use in `?` chains.
    pub fn ensure_validated(&self) -> TroupeResult<()> {
        if self.validated {
            Ok(())
        } else {
            Err(TroupeError::Graph(GraphError::NotValidated))
        }
    }

    /// Tasks whose dependencies are all completed and which are neither
    /// completed nor settled, in declaration order.
    pub fn ready_tasks(
        &self,
        completed: &BTreeSet<TaskId>,
        settled: &BTreeSet<TaskId>,
    ) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|t| !completed.contains(&t.id) && !settled.contains(&t.id))
            .filter(|t| t.depends_on.iter().all(|d| completed.contains(d)))
            .collect()
    }

    /// Split ready tasks into those whose condition holds (or have none) and
    /// those whose condition is false.
    pub fn partition_ready(
        &self,
        completed: &BTreeSet<TaskId>,
        settled: &BTreeSet<TaskId>,
        scope: &ConditionScope<'_>,
    ) -> (Vec<&Task>, Vec<&Task>) {
        self.ready_tasks(completed, settled)
            .into_iter()
            .partition(|t| t.condition.as_ref().map_or(true, |c| c.evaluate(scope)))
    }

    /// Unsettled, uncompleted tasks with at least one dependency in `blocked`.
    pub fn blocked_by(
        &self,
        blocked: &BTreeSet<TaskId>,
        completed: &BTreeSet<TaskId>,
        settled: &BTreeSet<TaskId>,
    ) -> Vec<(&Task, &TaskId)> {
        self.tasks
            .iter()
            .filter(|t| !completed.contains(&t.id) && !settled.contains(&t.id))
            .filter_map(|t| t.depends_on.iter().find(|d| blocked.contains(*d)).map(|d| (t, d)))
            .collect()
    }

    /// Transitive dependents of `id`, in declaration order.
    pub fn dependents_of(&self, id: &TaskId) -> Vec<TaskId> {
        let mut reached: HashSet<&TaskId> = HashSet::new();
        reached.insert(id);
        let mut result = Vec::new();
        // Dependencies always precede dependents in declaration order unless
        // deferred; iterate to a fixpoint to cover both.
        loop {
            let mut grew = false;
            for task in &self.tasks {
                if reached.contains(&task.id) {
                    continue;
                }
                if task.depends_on.iter().any(|d| reached.contains(d)) {
                    reached.insert(&task.id);
                    grew = true;
                }
            }
            if !grew {
                break;
            }
        }
        for task in &self.tasks {
            if &task.id != id && reached.contains(&task.id) {
                result.push(task.id.clone());
            }
        }
        result
    }

    /// Transitive dependencies of `id`.
    fn ancestors_of(&self, id: &TaskId) -> HashSet<TaskId> {
        let mut seen = HashSet::new();
        let mut stack: Vec<&TaskId> = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(task) = self.get(current.as_ref()) {
                for dep in &task.depends_on {
                    if seen.insert(dep.clone()) {
                        stack.push(dep);
                    }
                }
            }
        }
        seen
    }

    /// Loop edges, in declaration order.
    pub fn back_edges(&self) -> &[BackEdge] {
        &self.back_edges
    }

    /// Back edges triggered by the completion of `id`, in declaration order.
    pub fn back_edges_from<'a>(&'a self, id: &'a TaskId) -> impl Iterator<Item = &'a BackEdge> + 'a {
        self.back_edges.iter().filter(move |e| &e.from == id)
    }

    /// Task by id.
    pub fn get(&self, id: &str) -> Option<&Task> {
        self.index.get(id).map(|&pos| &self.tasks[pos])
    }

    /// Whether a task with `id` exists.
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Tasks in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    /// Number of tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the graph has no tasks.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn ids(list: &[&str]) -> BTreeSet<TaskId> {
        list.iter().map(|s| TaskId::from(*s)).collect()
    }

    fn names(tasks: &[&Task]) -> Vec<String> {
        tasks.iter().map(|t| t.id.to_string()).collect()
    }

    fn diamond() -> TaskGraph {
        let mut g = TaskGraph::new(TaskGraphConfig::default());
        g.add_task(Task::new("a", "A", "x")).unwrap();
        g.add_task(Task::new("b", "B", "x").depends_on(["a"])).unwrap();
        g.add_task(Task::new("c", "C", "x").depends_on(["a"])).unwrap();
        g.add_task(Task::new("d", "D", "x").depends_on(["b", "c"]).with_context(["c"]))
            .unwrap();
        g
    }

    #[test]
    fn test_empty_graph() {
        let mut g = TaskGraph::new(TaskGraphConfig::default());
        assert!(g.is_empty());
        assert!(g.validate().is_ok());
        assert!(g.ready_tasks(&ids(&[]), &ids(&[])).is_empty());
    }

    #[test]
    fn test_add_task_fills_default_retry() {
        let mut g = TaskGraph::new(TaskGraphConfig {
            default_max_retry: 5,
            deferred_dependencies: false,
        });
        g.add_task(Task::new("a", "A", "x")).unwrap();
        g.add_task(Task::new("b", "B", "x").with_max_retry(0)).unwrap();
        assert_eq!(g.get("a").unwrap().max_retry, Some(5));
        assert_eq!(g.get("b").unwrap().max_retry, Some(0));
    }

    #[test]
    fn test_duplicate_and_unknown_rejected() {
        let mut g = TaskGraph::new(TaskGraphConfig::default());
        g.add_task(Task::new("a", "A", "x")).unwrap();
        assert_eq!(
            g.add_task(Task::new("a", "again", "x")),
            Err(GraphError::DuplicateTaskId(TaskId::from("a")))
        );
        assert!(matches!(
            g.add_task(Task::new("b", "B", "x").depends_on(["zzz"])),
            Err(GraphError::UnknownDependency { .. })
        ));
        assert!(matches!(
            g.add_task(Task::new("c", "C", "x").with_context(["a"])),
            Err(GraphError::InvalidContextRef { .. })
        ));
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn test_ready_tasks_follow_dependencies() {
        let g = diamond();
        assert_eq!(names(&g.ready_tasks(&ids(&[]), &ids(&[]))), vec!["a"]);
        assert_eq!(names(&g.ready_tasks(&ids(&["a"]), &ids(&[]))), vec!["b", "c"]);
        assert_eq!(names(&g.ready_tasks(&ids(&["a"]), &ids(&["b"]))), vec!["c"]);
        assert_eq!(names(&g.ready_tasks(&ids(&["a", "b", "c"]), &ids(&[]))), vec!["d"]);
        assert!(g.ready_tasks(&ids(&["a", "b", "c", "d"]), &ids(&[])).is_empty());
    }

    #[test]
    fn test_cycle_detection_is_deterministic() {
        let mut g = TaskGraph::new(TaskGraphConfig {
            deferred_dependencies: true,
            ..TaskGraphConfig::default()
        });
        g.add_task(Task::new("a", "A", "x").depends_on(["c"])).unwrap();
        g.add_task(Task::new("b", "B", "x").depends_on(["a"])).unwrap();
        g.add_task(Task::new("c", "C", "x").depends_on(["b"])).unwrap();

        let err = g.validate().unwrap_err();
        assert_eq!(
            err,
            GraphError::CyclicDependency {
                cycle: vec!["a".into(), "c".into(), "b".into(), "a".into()]
            }
        );
        assert_eq!(err.to_string(), "dependency cycle detected: a -> c -> b -> a");
        assert!(!g.is_validated());
        // Same input, same report.
        assert_eq!(g.validate().unwrap_err(), err);
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let mut g = TaskGraph::new(TaskGraphConfig {
            deferred_dependencies: true,
            ..TaskGraphConfig::default()
        });
        g.add_task(Task::new("a", "A", "x").depends_on(["a"])).unwrap();
        assert!(matches!(g.validate(), Err(GraphError::CyclicDependency { .. })));
    }

    #[test]
    fn test_deferred_unknown_reported_by_validate() {
        let mut g = TaskGraph::new(TaskGraphConfig {
            deferred_dependencies: true,
            ..TaskGraphConfig::default()
        });
        g.add_task(Task::new("b", "B", "x").depends_on(["a"])).unwrap();
        assert!(matches!(g.validate(), Err(GraphError::UnknownDependency { .. })));
        g.add_task(Task::new("a", "A", "x")).unwrap();
        assert!(g.validate().is_ok());
        assert!(g.is_validated());
        assert!(g.ensure_validated().is_ok());
    }

    #[test]
    fn test_adding_task_invalidates() {
        let mut g = diamond();
        g.validate().unwrap();
        g.add_task(Task::new("e", "E", "x")).unwrap();
        assert!(!g.is_validated());
        assert!(g.ensure_validated().is_err());
    }

    #[test]
    fn test_dependents_of() {
        let g = diamond();
        assert_eq!(
            g.dependents_of(&TaskId::from("a")),
            vec![TaskId::from("b"), TaskId::from("c"), TaskId::from("d")]
        );
        assert_eq!(g.dependents_of(&TaskId::from("c")), vec![TaskId::from("d")]);
        assert!(g.dependents_of(&TaskId::from("d")).is_empty());
    }

    #[test]
    fn test_back_edges() {
        let mut g = diamond();
        assert!(g.add_back_edge("d", "a", Condition::always()).is_ok());
        assert!(g.add_back_edge("b", "b", Condition::always()).is_ok());
        assert_eq!(
            g.add_back_edge("b", "c", Condition::always()),
            Err(GraphError::InvalidBackEdge {
                from: "b".into(),
                to: "c".into()
            })
        );
        assert!(g.add_back_edge("a", "d", Condition::always()).is_err());
        assert!(g.add_back_edge("nope", "a", Condition::always()).is_err());
        assert_eq!(g.back_edges_from(&TaskId::from("d")).count(), 1);
        // Back edges never count as cycles.
        assert!(g.validate().is_ok());
    }

    #[test]
    fn test_partition_and_blocked() {
        use troupe_session::StateStore;
        let mut g = TaskGraph::new(TaskGraphConfig::default());
        g.add_task(Task::new("a", "A", "x")).unwrap();
        g.add_task(Task::new("yes", "Y", "x").depends_on(["a"]).when(Condition::state_equals("go", true)))
            .unwrap();
        g.add_task(Task::new("no", "N", "x").depends_on(["a"]).when(Condition::state_equals("go", false)))
            .unwrap();
        g.add_task(Task::new("after_no", "AN", "x").depends_on(["no"])).unwrap();

        let state = StateStore::new("r");
        state.set("go", true).unwrap();
        let scope = ConditionScope::new(&state, &[]);
        let (run, skip) = g.partition_ready(&ids(&["a"]), &ids(&[]), &scope);
        assert_eq!(names(&run), vec!["yes"]);
        assert_eq!(names(&skip), vec!["no"]);

        let blocked = g.blocked_by(&ids(&["no"]), &ids(&["a"]), &ids(&["no"]));
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].0.id.as_str(), "after_no");
    }
}
