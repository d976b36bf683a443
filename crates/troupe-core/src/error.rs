use crate::TaskId;
use thiserror::Error;

/// A convenience `Result` alias using [`TroupeError`].
pub type TroupeResult<T> = Result<T, TroupeError>;

/// Errors raised while building or validating a task graph.
///
/// These are fatal at construction time and are never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// A task with the same id is already registered.
    #[error("duplicate task id: {0}")]
    DuplicateTaskId(TaskId),

    /// A task depends on an id that is not registered.
    #[error("task {task} depends on unknown task {dependency}")]
    UnknownDependency {
        /// The dependent task.
        task: TaskId,
        /// The missing dependency.
        dependency: TaskId,
    },

    /// A context reference is not one of the task's dependencies.
    #[error("task {task} uses {reference} as context but does not depend on it")]
    InvalidContextRef {
        /// The task declaring the reference.
        task: TaskId,
        /// The offending reference.
        reference: TaskId,
    },

    /// A loop declaration does not point back at the source or one of its ancestors.
    #[error("back edge {from} -> {to} does not target {from} or one of its dependencies")]
    InvalidBackEdge {
        /// Task whose completion triggers the loop.
        from: TaskId,
        /// Task that would be re-enabled.
        to: TaskId,
    },

    /// The dependency relation contains a cycle.
    #[error("dependency cycle detected: {}", format_cycle(.cycle))]
    CyclicDependency {
        /// The tasks forming the cycle, first task repeated at the end.
        cycle: Vec<TaskId>,
    },

    /// Execution was requested before `validate()` succeeded.
    #[error("task graph has not been validated")]
    NotValidated,
}

fn format_cycle(cycle: &[TaskId]) -> String {
    cycle
        .iter()
        .map(TaskId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Top-level error type for the Troupe workspace.
#[derive(Error, Debug)]
pub enum TroupeError {
    /// Task graph construction or validation failed.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// Invalid configuration value.
    #[error("Config error: {0}")]
    Config(String),

    /// A state store operation was applied to an incompatible value.
    #[error("State error: {0}")]
    State(String),

    /// Persisted run state could not be saved or restored.
    #[error("Session error: {0}")]
    Session(String),

    /// The memory store failed.
    #[error("Memory error: {0}")]
    Memory(String),

    /// Agent registration or lookup failed.
    #[error("Agent error: {0}")]
    Agent(String),

    /// The process engine could not be set up.
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
