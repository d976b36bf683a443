use crate::config::ProcessKind;
use crate::types::{AttemptRecord, TaskOutput, TaskStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use troupe_core::TaskId;

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every task completed or was skipped, or the manager declared completion.
    Completed,
    /// Finished without halting, but some tasks failed or never ran.
    Partial,
    /// Halted on a failure.
    Failed,
}

/// Why a task or the run failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FailureKind {
    #[error("guardrail rejected every attempt: {message}")]
    GuardrailExhausted { message: String },
    #[error("executor failed: {message}")]
    Executor { message: String },
    #[error("timed out")]
    Timeout,
    #[error("run timed out")]
    RunTimeout,
    #[error("iteration limit of {limit} exceeded")]
    WorkflowIterationLimitExceeded { limit: u32 },
    #[error("invalid dispatch: {message}")]
    InvalidDispatch { message: String },
    #[error("manager failed: {message}")]
    Manager { message: String },
    #[error("checkpoint failed: {message}")]
    Checkpoint { message: String },
}

/// A failure attributed to a task, or to the run as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub task_id: Option<TaskId>,
    pub error: FailureKind,
}

impl RunFailure {
    /// Failure of one task.
    pub fn task(task_id: TaskId, error: FailureKind) -> Self {
        Self {
            task_id: Some(task_id),
            error,
        }
    }

    /// Failure of the run as a whole.
    pub fn run(error: FailureKind) -> Self {
        Self {
            task_id: None,
            error,
        }
    }
}

/// Everything a caller needs after a run, including partial results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub process: ProcessKind,
    pub status: RunStatus,
    /// Accepted outputs in completion order; loops may repeat a task.
    pub outputs: Vec<TaskOutput>,
    pub final_output: Option<String>,
    /// The failure that halted the run, or the first one under `Continue`.
    pub failure: Option<RunFailure>,
    pub statuses: BTreeMap<TaskId, TaskStatus>,
    /// Skipped tasks, in declaration order.
    pub skipped: Vec<TaskId>,
    /// Tasks left pending or running, in declaration order.
    pub unfinished: Vec<TaskId>,
    pub iterations: u32,
    /// Every attempt, when `audit_attempts` is enabled.
    pub attempts: Vec<AttemptRecord>,
    pub state: BTreeMap<String, Value>,
    pub duration_ms: u64,
}

impl RunReport {
    /// Whether the run completed.
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Latest accepted output of `task_id`.
    pub fn output(&self, task_id: &str) -> Option<&TaskOutput> {
        self.outputs.iter().rev().find(|o| o.task_id.as_str() == task_id)
    }

    /// Final status of a task.
    pub fn status_of(&self, task_id: &str) -> Option<&TaskStatus> {
        self.statuses.get(task_id)
    }

    /// Task ids in the order their accepted outputs were produced.
    pub fn completion_order(&self) -> Vec<&str> {
        self.outputs.iter().map(|o| o.task_id.as_str()).collect()
    }
}
