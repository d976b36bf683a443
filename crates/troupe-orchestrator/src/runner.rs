use crate::config::ProcessConfig;
use crate::events::{EventBus, ProcessEvent};
use crate::guardrail::GuardrailValidator;
use crate::monitor::AgentMonitor;
use crate::report::FailureKind;
use crate::types::{AttemptOutcome, AttemptRecord, GuardrailResult, OutputStatus, Task, TaskOutput};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use troupe_agent::{AgentExecutor, ExecutorError, TaskRequest};

/// Result of driving one task through the guardrail retry loop.
#[derive(Debug, Clone)]
pub struct TaskRun {
    /// Accepted output, or the last attempt's output on failure.
    pub output: TaskOutput,
    /// Why the task failed, if it did.
    pub failure: Option<FailureKind>,
    /// One record per attempt, in order.
    pub attempts: Vec<AttemptRecord>,
}

impl TaskRun {
    /// Whether the task produced an accepted output.
    pub fn is_accepted(&self) -> bool {
        self.failure.is_none()
    }
}

/// Executes single tasks: executor call, timeout, guardrail, retry.
pub struct TaskRunner<'a> {
    /// Run the task belongs to.
    pub run_id: &'a str,
    /// Timeouts and backoff.
    pub config: &'a ProcessConfig,
    /// Receives attempt events.
    pub events: &'a EventBus,
    /// Receives attempt metrics.
    pub monitor: &'a AgentMonitor,
}

enum AttemptError {
    Executor(ExecutorError),
    TimedOut(Duration),
}

impl TaskRunner<'_> {
    /// Run `task` on `executor` until an output is accepted, a fatal error
    /// occurs or `max_retry + 1` attempts have been made.
    pub async fn run(
        &self,
        task: &Task,
        agent_id: &str,
        executor: Arc<dyn AgentExecutor>,
        context: &str,
    ) -> TaskRun {
        let max_attempts = task.max_attempts();
        let timeout = task.timeout.or_else(|| self.config.task_timeout());
        let mut request = TaskRequest::new(
            task.id.clone(),
            task.description.clone(),
            task.expected_output.clone(),
            agent_id,
        );
        let mut records = Vec::new();
        let started = Instant::now();

        self.monitor.start_task(agent_id, &task.id);
        self.events.emit(ProcessEvent::TaskStarted {
            run_id: self.run_id.to_string(),
            task_id: task.id.clone(),
            agent: agent_id.to_string(),
            timestamp: Utc::now(),
        });

        loop {
            let attempt = request.attempt;
            let attempt_started = Instant::now();
            self.monitor.record_attempt(agent_id);

            let result = match timeout {
                Some(limit) => {
                    match tokio::time::timeout(limit, executor.execute(&request, context)).await {
                        Ok(result) => result.map_err(AttemptError::Executor),
                        Err(_) => Err(AttemptError::TimedOut(limit)),
                    }
                }
                None => executor
                    .execute(&request, context)
                    .await
                    .map_err(AttemptError::Executor),
            };
            let attempt_ms = attempt_started.elapsed().as_millis() as u64;

            let (feedback, retryable, failure, raw) = match result {
                Ok(raw) => {
                    let output = self.output(task, agent_id, &raw, attempt, started, OutputStatus::Completed, None);
                    let verdict = match &task.guardrail {
                        Some(guardrail) => GuardrailValidator::validate(&output, guardrail).await,
                        None => GuardrailResult::accept(),
                    };

                    if verdict.is_valid {
                        records.push(self.record(task, agent_id, attempt, Some(raw), AttemptOutcome::Accepted, attempt_ms));
                        return self.finish(task, agent_id, output, None, records);
                    }

                    let feedback = verdict
                        .message
                        .unwrap_or_else(|| "output rejected by guardrail".to_string());
                    records.push(self.record(
                        task,
                        agent_id,
                        attempt,
                        Some(raw.clone()),
                        AttemptOutcome::Rejected {
                            feedback: feedback.clone(),
                        },
                        attempt_ms,
                    ));
                    self.events.emit(ProcessEvent::GuardrailRejected {
                        run_id: self.run_id.to_string(),
                        task_id: task.id.clone(),
                        attempt,
                        feedback: feedback.clone(),
                        timestamp: Utc::now(),
                    });
                    let failure = FailureKind::GuardrailExhausted {
                        message: feedback.clone(),
                    };
                    (feedback, true, failure, Some(raw))
                }
                Err(AttemptError::Executor(e)) => {
                    self.monitor.record_error(agent_id);
                    tracing::warn!(task_id = %task.id, attempt, retryable = e.retryable, error = %e.message, "Executor call failed");
                    records.push(self.record(
                        task,
                        agent_id,
                        attempt,
                        None,
                        AttemptOutcome::Error {
                            message: e.message.clone(),
                            retryable: e.retryable,
                        },
                        attempt_ms,
                    ));
                    let failure = FailureKind::Executor {
                        message: e.message.clone(),
                    };
                    (e.message, e.retryable, failure, None)
                }
                Err(AttemptError::TimedOut(limit)) => {
                    self.monitor.record_error(agent_id);
                    tracing::warn!(task_id = %task.id, attempt, timeout_ms = limit.as_millis() as u64, "Executor call timed out");
                    records.push(self.record(task, agent_id, attempt, None, AttemptOutcome::TimedOut, attempt_ms));
                    let feedback = format!("timed out after {}ms", limit.as_millis());
                    (feedback, true, FailureKind::Timeout, None)
                }
            };

            if !retryable || attempt >= max_attempts {
                let status = if raw.is_some() {
                    OutputStatus::Partial
                } else {
                    OutputStatus::Failed
                };
                let output = self.output(
                    task,
                    agent_id,
                    raw.as_deref().unwrap_or_default(),
                    attempt,
                    started,
                    status,
                    Some(failure.to_string()),
                );
                return self.finish(task, agent_id, output, Some(failure), records);
            }

            let delay = compute_backoff(self.config.retry_backoff_ms, self.config.retry_backoff_max_ms, attempt);
            tracing::debug!(task_id = %task.id, attempt, delay_ms = delay, "Retrying task");
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            request.retry_with(feedback);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn output(
        &self,
        task: &Task,
        agent_id: &str,
        raw: &str,
        attempts: u32,
        started: Instant,
        status: OutputStatus,
        error: Option<String>,
    ) -> TaskOutput {
        TaskOutput {
            task_id: task.id.clone(),
            agent: agent_id.to_string(),
            raw: raw.to_string(),
            status,
            error,
            attempts,
            execution_time_ms: started.elapsed().as_millis() as u64,
            produced_at: Utc::now(),
        }
    }

    fn record(
        &self,
        task: &Task,
        agent_id: &str,
        attempt: u32,
        raw: Option<String>,
        outcome: AttemptOutcome,
        duration_ms: u64,
    ) -> AttemptRecord {
        AttemptRecord {
            task_id: task.id.clone(),
            agent: agent_id.to_string(),
            attempt,
            raw,
            outcome,
            duration_ms,
        }
    }

    fn finish(
        &self,
        task: &Task,
        agent_id: &str,
        output: TaskOutput,
        failure: Option<FailureKind>,
        attempts: Vec<AttemptRecord>,
    ) -> TaskRun {
        self.monitor
            .finish_task(agent_id, &task.id, failure.is_none(), output.execution_time_ms);
        TaskRun {
            output,
            failure,
            attempts,
        }
    }
}

/// Exponential backoff before retry number `attempt` (1-based), capped at `max_ms`.
pub fn compute_backoff(base_ms: u64, max_ms: u64, attempt: u32) -> u64 {
    if base_ms == 0 {
        return 0;
    }
    let exp = attempt.saturating_sub(1);
    base_ms
        .saturating_mul(2u64.saturating_pow(exp))
        .min(max_ms)
}
