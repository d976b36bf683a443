use crate::condition::Condition;
use crate::guardrail::Guardrail;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use troupe_core::TaskId;

/// A unit of work delegated to one agent.
///
/// Built with [`Task::new`] and the `with_*` / `depends_on` builders, then
/// registered in a [`crate::TaskGraph`]. The graph is read-only once validated;
/// run-time status lives in [`crate::ProcessState`].
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub description: String,
    pub expected_output: String,
    /// Id of the agent in the run's [`troupe_agent::AgentRegistry`].
    pub agent: String,
    /// Ordered and de-duplicated.
    pub depends_on: Vec<TaskId>,
    /// Dependencies whose outputs are injected into this task's context.
    pub context_refs: Vec<TaskId>,
    pub guardrail: Option<Guardrail>,
    /// `None` until the task is added to a graph, which fills in its default.
    pub max_retry: Option<u32>,
    /// Only consulted by the workflow process.
    pub condition: Option<Condition>,
    pub async_execution: bool,
    /// Overrides the engine's default per-task timeout.
    pub timeout: Option<Duration>,
}

impl Task {
    /// Task run by `agent`, with no dependencies.
    pub fn new(id: impl Into<TaskId>, description: impl Into<String>, agent: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            expected_output: String::new(),
            agent: agent.into(),
            depends_on: Vec::new(),
            context_refs: Vec::new(),
            guardrail: None,
            max_retry: None,
            condition: None,
            async_execution: false,
            timeout: None,
        }
    }

    /// Describe the expected output.
    pub fn expecting(mut self, expected_output: impl Into<String>) -> Self {
        self.expected_output = expected_output.into();
        self
    }

    /// Add dependencies.
    pub fn depends_on<I, T>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TaskId>,
    {
        for id in ids {
            let id = id.into();
            if !self.depends_on.contains(&id) {
                self.depends_on.push(id);
            }
        }
        self
    }

    /// Inject the outputs of these dependencies as context.
    pub fn with_context<I, T>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TaskId>,
    {
        for id in ids {
            let id = id.into();
            if !self.context_refs.contains(&id) {
                self.context_refs.push(id);
            }
        }
        self
    }

    /// Validate outputs with `guardrail`.
    pub fn with_guardrail(mut self, guardrail: Guardrail) -> Self {
        self.guardrail = Some(guardrail);
        self
    }

    /// Override the graph's retry default.
    pub fn with_max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = Some(max_retry);
        self
    }

    /// Run only when `condition` holds (workflow process).
    pub fn when(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Allow this task to run concurrently with other ready async tasks.
    pub fn asynchronous(mut self) -> Self {
        self.async_execution = true;
        self
    }

    /// Override the engine's task timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attempts allowed in total: the first one plus `max_retry` retries.
    pub fn max_attempts(&self) -> u32 {
        self.max_retry
            .unwrap_or(crate::graph::DEFAULT_MAX_RETRY)
            .saturating_add(1)
    }
}

/// Run-time status of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Skipped { reason: String },
    Failed { reason: String },
}

impl TaskStatus {
    /// Completed, skipped or failed.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Skipped { .. } | TaskStatus::Failed { .. }
        )
    }
}

/// Outcome recorded on a [`TaskOutput`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStatus {
    /// Accepted by the guardrail (or no guardrail configured).
    Completed,
    /// The agent produced text but it never passed validation.
    Partial,
    /// No usable text was produced.
    Failed,
}

/// Result of running a task, accepted or not. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutput {
    pub task_id: TaskId,
    pub agent: String,
    pub raw: String,
    pub status: OutputStatus,
    pub error: Option<String>,
    pub attempts: u32,
    pub execution_time_ms: u64,
    pub produced_at: DateTime<Utc>,
}

impl TaskOutput {
    /// Accepted output.
    pub fn completed(task_id: TaskId, agent: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            task_id,
            agent: agent.into(),
            raw: raw.into(),
            status: OutputStatus::Completed,
            error: None,
            attempts: 1,
            execution_time_ms: 0,
            produced_at: Utc::now(),
        }
    }

    /// Whether the output passed its guardrail.
    pub fn is_accepted(&self) -> bool {
        self.status == OutputStatus::Completed
    }
}

/// Verdict of a guardrail on one output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardrailResult {
    pub is_valid: bool,
    /// Corrective feedback when rejected.
    pub message: Option<String>,
}

impl GuardrailResult {
    /// Accept the output.
    pub fn accept() -> Self {
        Self {
            is_valid: true,
            message: None,
        }
    }

    /// Reject the output with feedback for the next attempt.
    pub fn reject(message: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            message: Some(message.into()),
        }
    }
}

/// How one attempt ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum AttemptOutcome {
    Accepted,
    Rejected { feedback: String },
    Error { message: String, retryable: bool },
    TimedOut,
}

/// Audit record of a single attempt, kept when `audit_attempts` is enabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub task_id: TaskId,
    pub agent: String,
    pub attempt: u32,
    pub raw: Option<String>,
    pub outcome: AttemptOutcome,
    pub duration_ms: u64,
}
