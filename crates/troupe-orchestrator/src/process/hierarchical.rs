use crate::engine::{ProcessEngine, RunContext};
use crate::report::{FailureKind, RunFailure};
use crate::runner::compute_backoff;
use crate::state::ProcessState;
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};
use troupe_agent::{
    AggregationRequest, CompletedWork, Dispatch, ExecutorError, ManagerAgent, ManagerDecision,
    PlanningRequest, ReadyTask,
};
use troupe_core::TaskId;

enum Round {
    Plan(PlanningRequest),
    Exhausted,
    LimitReached,
}

impl ProcessEngine {
    /// Planning, dispatching and aggregation driven by the manager agent.
    ///
    /// Every dispatched round ends with an aggregation; the latest aggregate
    /// is the run's final output and is shown to the manager when it plans
    /// the next round.
    pub(crate) async fn run_hierarchical(&self, ctx: &RunContext) {
        let Some(manager) = self.manager.clone() else {
            ctx.record_failure(
                RunFailure::run(FailureKind::Manager {
                    message: "no manager agent configured".to_string(),
                }),
                true,
            );
            return;
        };
        let mut aggregate = None;

        loop {
            let round = {
                let mut state = ctx.state.lock();
                if state.is_halted() {
                    return;
                }
                let settled = state.settled();
                let ready: Vec<ReadyTask> = self
                    .graph
                    .ready_tasks(state.completed(), &settled)
                    .into_iter()
                    .map(|t| ReadyTask {
                        task_id: t.id.clone(),
                        description: t.description.clone(),
                        expected_output: t.expected_output.clone(),
                        declared_agent: t.agent.clone(),
                    })
                    .collect();

                if ready.is_empty() {
                    Round::Exhausted
                } else if state.iterations() >= self.config.max_iterations {
                    Round::LimitReached
                } else {
                    let round = state.bump_iterations();
                    Round::Plan(PlanningRequest {
                        round,
                        ready,
                        agents: self.agents.profiles(),
                        completed: completed_work(&state),
                        aggregate: aggregate.clone(),
                    })
                }
            };

            let request = match round {
                Round::Plan(request) => request,
                Round::Exhausted => return,
                Round::LimitReached => {
                    ctx.record_failure(
                        RunFailure::run(FailureKind::WorkflowIterationLimitExceeded {
                            limit: self.config.max_iterations,
                        }),
                        true,
                    );
                    return;
                }
            };

            let planned = self
                .call_manager("plan", request.round, || manager.plan(&request))
                .await;
            let decision = match planned {
                Ok(decision) => decision,
                Err(e) => {
                    warn!(round = request.round, error = %e, "Manager planning failed");
                    ctx.record_failure(RunFailure::run(FailureKind::Manager { message: e.message }), true);
                    return;
                }
            };

            match decision {
                ManagerDecision::Complete { summary } => {
                    info!(round = request.round, "Manager declared the run complete");
                    ctx.mark_manager_completed();
                    let summary = Some(summary);
                    self.aggregate_round(ctx, manager.as_ref(), request.round, summary, &mut aggregate)
                        .await;
                    return;
                }
                ManagerDecision::Dispatch(dispatches) => {
                    if let Err(message) = self.validate_dispatch(&dispatches, &request.ready) {
                        warn!(round = request.round, error = %message, "Rejected manager dispatch");
                        ctx.record_failure(RunFailure::run(FailureKind::InvalidDispatch { message }), true);
                        return;
                    }
                    info!(round = request.round, tasks = dispatches.len(), "Manager dispatched tasks");
                    let batch = dispatches
                        .into_iter()
                        .map(|d| (d.task_id, d.agent_id))
                        .collect();
                    self.execute_batch(ctx, batch).await;
                    if ctx.is_halted() {
                        return;
                    }
                    if !self
                        .aggregate_round(ctx, manager.as_ref(), request.round, None, &mut aggregate)
                        .await
                    {
                        return;
                    }
                }
            }
        }
    }

    /// Aggregate the work so far into `aggregate` and publish it as the final
    /// output. Nothing to aggregate leaves `aggregate` untouched. Returns `false`
    /// when the manager failed and the run halted.
    async fn aggregate_round(
        &self,
        ctx: &RunContext,
        manager: &dyn ManagerAgent,
        round: u32,
        summary: Option<String>,
        aggregate: &mut Option<String>,
    ) -> bool {
        let completed = completed_work(&ctx.state.lock());
        if completed.is_empty() && summary.is_none() {
            return true;
        }
        let request = AggregationRequest {
            round,
            completed,
            summary,
        };
        match self
            .call_manager("aggregate", round, || manager.aggregate(&request))
            .await
        {
            Ok(text) => {
                ctx.set_final_output(text.clone());
                *aggregate = Some(text);
                true
            }
            Err(e) => {
                warn!(round, error = %e, "Manager aggregation failed");
                ctx.record_failure(RunFailure::run(FailureKind::Manager { message: e.message }), true);
                false
            }
        }
    }

    /// Call the manager, retrying retryable errors up to `manager_max_retry`
    /// times with the task backoff.
    async fn call_manager<T, F, Fut>(
        &self,
        step: &str,
        round: u32,
        mut call: F,
    ) -> Result<T, ExecutorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ExecutorError>>,
    {
        let mut retries = 0u32;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.retryable && retries < self.config.manager_max_retry => {
                    retries += 1;
                    let delay_ms = compute_backoff(
                        self.config.retry_backoff_ms,
                        self.config.retry_backoff_max_ms,
                        retries,
                    );
                    warn!(step, round, retry = retries, delay_ms, error = %e, "Retrying manager call");
                    if delay_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Dispatches must be non-empty, unique, limited to the ready set and
    /// addressed to registered agents.
    fn validate_dispatch(&self, dispatches: &[Dispatch], ready: &[ReadyTask]) -> Result<(), String> {
        if dispatches.is_empty() {
            return Err("manager dispatched no tasks".to_string());
        }
        let ready: HashSet<&TaskId> = ready.iter().map(|r| &r.task_id).collect();
        let mut seen = HashSet::new();
        for dispatch in dispatches {
            if !ready.contains(&dispatch.task_id) {
                return Err(format!("task {} is not ready", dispatch.task_id));
            }
            if !self.agents.contains(&dispatch.agent_id) {
                return Err(format!(
                    "agent '{}' is not registered (task {})",
                    dispatch.agent_id, dispatch.task_id
                ));
            }
            if !seen.insert(&dispatch.task_id) {
                return Err(format!("task {} dispatched twice", dispatch.task_id));
            }
        }
        Ok(())
    }
}

fn completed_work(state: &ProcessState) -> Vec<CompletedWork> {
    state
        .outputs()
        .iter()
        .map(|o| CompletedWork {
            task_id: o.task_id.clone(),
            agent: o.agent.clone(),
            output: o.raw.clone(),
        })
        .collect()
}
