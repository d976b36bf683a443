use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use troupe_core::TaskId;

/// Failure of a single executor call.
///
/// `retryable` errors feed the guardrail retry loop; fatal ones fail the task
/// immediately.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct ExecutorError {
    /// Whether another attempt may succeed.
    pub retryable: bool,
    /// Human-readable cause.
    pub message: String,
}

impl ExecutorError {
    /// An error worth retrying.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            message: message.into(),
        }
    }

    /// An error that ends the task's attempts.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            message: message.into(),
        }
    }
}

/// Everything an agent needs to attempt a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    pub task_id: TaskId,
    pub description: String,
    pub expected_output: String,
    /// Id of the agent the request is dispatched to.
    pub agent: String,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Corrective feedback from earlier rejected attempts, oldest first.
    pub feedback: Vec<String>,
}

impl TaskRequest {
    /// Request for the first attempt, without feedback.
    pub fn new(
        task_id: TaskId,
        description: impl Into<String>,
        expected_output: impl Into<String>,
        agent: impl Into<String>,
    ) -> Self {
        Self {
            task_id,
            description: description.into(),
            expected_output: expected_output.into(),
            agent: agent.into(),
            attempt: 1,
            feedback: Vec::new(),
        }
    }

    /// Record a rejection and advance to the next attempt.
    pub fn retry_with(&mut self, feedback: impl Into<String>) {
        self.feedback.push(feedback.into());
        self.attempt += 1;
    }

    /// Render the input an agent sees: description, expected output, context
    /// and any corrective feedback.
    pub fn effective_input(&self, context: &str) -> String {
        let mut input = self.description.trim().to_string();

        if !self.expected_output.trim().is_empty() {
            input.push_str("\n\nExpected output: ");
            input.push_str(self.expected_output.trim());
        }

        if !context.trim().is_empty() {
            input.push_str("\n\nContext:\n");
            input.push_str(context.trim());
        }

        if !self.feedback.is_empty() {
            input.push_str("\n\nPrevious attempts were rejected:");
            for fb in &self.feedback {
                input.push_str("\n- ");
                input.push_str(fb);
            }
        }

        input
    }
}

/// Runs one attempt of a task.
///
/// Implementations wrap the actual model call; the engine handles retries,
/// validation and timeouts around it.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn execute(&self, request: &TaskRequest, context: &str) -> Result<String, ExecutorError>;
}

type ExecFn = dyn Fn(&TaskRequest, &str) -> Result<String, ExecutorError> + Send + Sync;

/// Executor backed by a plain closure. Handy for deterministic agents and tests.
#[derive(Clone)]
pub struct FnExecutor {
    func: Arc<ExecFn>,
}

impl FnExecutor {
    /// Wrap `func`.
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&TaskRequest, &str) -> Result<String, ExecutorError> + Send + Sync + 'static,
    {
        Self {
            func: Arc::new(func),
        }
    }

    /// Executor that always answers with `text`.
    pub fn constant(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(move |_, _| Ok(text.clone()))
    }
}

impl fmt::Debug for FnExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnExecutor").finish_non_exhaustive()
    }
}

#[async_trait]
impl AgentExecutor for FnExecutor {
    async fn execute(&self, request: &TaskRequest, context: &str) -> Result<String, ExecutorError> {
        (self.func)(request, context)
    }
}
