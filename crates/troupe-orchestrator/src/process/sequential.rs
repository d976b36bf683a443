use crate::engine::{ProcessEngine, RunContext};
use troupe_core::TaskId;

impl ProcessEngine {
    /// One task at a time in declaration order. When the first ready task is
    /// async, every ready async task runs with it.
    pub(crate) async fn run_sequential(&self, ctx: &RunContext) {
        loop {
            let batch: Vec<(TaskId, String)> = {
                let mut state = ctx.state.lock();
                if state.is_halted() {
                    break;
                }
                let settled = state.settled();
                let ready = self.graph.ready_tasks(state.completed(), &settled);
                let Some(first) = ready.first() else {
                    break;
                };
                let batch: Vec<(TaskId, String)> = if first.async_execution {
                    ready
                        .iter()
                        .filter(|t| t.async_execution)
                        .map(|t| (t.id.clone(), t.agent.clone()))
                        .collect()
                } else {
                    vec![(first.id.clone(), first.agent.clone())]
                };
                for _ in &batch {
                    state.bump_iterations();
                }
                batch
            };

            tracing::debug!(tasks = batch.len(), "Sequential batch selected");
            self.execute_batch(ctx, batch).await;
        }
    }
}
