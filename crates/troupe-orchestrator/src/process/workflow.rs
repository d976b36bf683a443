use crate::engine::{ProcessEngine, RunContext};
use crate::report::{FailureKind, RunFailure};
use crate::state::ProcessState;
use tracing::{debug, info};
use troupe_core::TaskId;

enum Step {
    Run(Vec<(TaskId, String)>),
    /// Only skips happened; select again.
    Reselect,
    Done,
    LimitReached,
}

impl ProcessEngine {
    /// Conditional branches and loops. Every task execution is one iteration.
    pub(crate) async fn run_workflow(&self, ctx: &RunContext) {
        loop {
            let mut skipped: Vec<(TaskId, String)> = Vec::new();
            let step = {
                let mut state = ctx.state.lock();
                if state.is_halted() {
                    break;
                }
                self.propagate_skips(&mut state, &mut skipped);

                let settled = state.settled();
                let (run, skip) = {
                    let scope = state.scope();
                    let (run, skip) = self.graph.partition_ready(state.completed(), &settled, &scope);
                    let run: Vec<(TaskId, String)> =
                        run.iter().map(|t| (t.id.clone(), t.agent.clone())).collect();
                    let skip: Vec<TaskId> = skip.iter().map(|t| t.id.clone()).collect();
                    (run, skip)
                };
                for id in skip {
                    let reason = "condition not met".to_string();
                    state.mark_skipped(&id, reason.clone());
                    skipped.push((id, reason));
                }

                if run.is_empty() {
                    if skipped.is_empty() {
                        Step::Done
                    } else {
                        Step::Reselect
                    }
                } else {
                    let remaining = self.config.max_iterations.saturating_sub(state.iterations()) as usize;
                    if remaining == 0 {
                        Step::LimitReached
                    } else {
                        let batch: Vec<_> = run.into_iter().take(remaining).collect();
                        for _ in &batch {
                            state.bump_iterations();
                        }
                        Step::Run(batch)
                    }
                }
            };

            for (id, reason) in &skipped {
                self.emit_skipped(ctx, id, reason);
            }

            match step {
                Step::Done => break,
                Step::Reselect => continue,
                Step::LimitReached => {
                    info!(limit = self.config.max_iterations, "Workflow iteration limit reached");
                    ctx.record_failure(
                        RunFailure::run(FailureKind::WorkflowIterationLimitExceeded {
                            limit: self.config.max_iterations,
                        }),
                        true,
                    );
                    break;
                }
                Step::Run(batch) => {
                    let ids: Vec<TaskId> = batch.iter().map(|(id, _)| id.clone()).collect();
                    self.execute_batch(ctx, batch).await;
                    self.follow_back_edges(ctx, &ids);
                }
            }
        }
    }

    /// Skip every unsettled task that depends on a skipped one, to a fixpoint.
    fn propagate_skips(&self, state: &mut ProcessState, skipped: &mut Vec<(TaskId, String)>) {
        loop {
            let blocked: Vec<(TaskId, String)> = {
                let settled = state.settled();
                self.graph
                    .blocked_by(&state.skipped(), state.completed(), &settled)
                    .into_iter()
                    .map(|(task, dep)| (task.id.clone(), format!("dependency {dep} was skipped")))
                    .collect()
            };
            if blocked.is_empty() {
                return;
            }
            for (id, reason) in blocked {
                state.mark_skipped(&id, reason.clone());
                skipped.push((id, reason));
            }
        }
    }

    /// Reset loop targets whose back edge condition holds after `executed`.
    fn follow_back_edges(&self, ctx: &RunContext, executed: &[TaskId]) {
        let mut state = ctx.state.lock();
        if state.is_halted() {
            return;
        }
        for id in executed {
            if !state.completed().contains(id) {
                continue;
            }
            for edge in self.graph.back_edges_from(id) {
                if !edge.condition.evaluate(&state.scope()) {
                    continue;
                }
                let mut targets = vec![edge.to.clone()];
                targets.extend(self.graph.dependents_of(&edge.to));
                debug!(from = %edge.from, to = %edge.to, reset = targets.len(), "Following back edge");
                state.reset(&targets);
            }
        }
    }
}
