use crate::config::{FailurePolicy, ProcessConfig, ProcessKind};
use crate::events::{EventBus, EventSink, ProcessEvent};
use crate::graph::TaskGraph;
use crate::monitor::AgentMonitor;
use crate::report::{FailureKind, RunFailure, RunReport, RunStatus};
use crate::runner::{TaskRun, TaskRunner};
use crate::state::ProcessState;
use crate::types::{AttemptRecord, Task, TaskStatus};
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use troupe_agent::{AgentExecutor, AgentRegistry, ManagerAgent};
use troupe_core::{TaskId, TroupeError, TroupeResult};
use troupe_memory::{ContextBlock, MemoryContextBuilder, MemoryTier, QualityMetrics};
use troupe_session::{RunSnapshot, SessionStore, StateStore};

/// Drives a validated [`TaskGraph`] to completion with the configured process.
///
/// One engine owns one [`StateStore`]; concurrent runs of unrelated sessions
/// need separate engines.
pub struct ProcessEngine {
    pub(crate) graph: TaskGraph,
    pub(crate) agents: AgentRegistry,
    pub(crate) state: Arc<StateStore>,
    pub(crate) config: ProcessConfig,
    pub(crate) memory: Option<MemoryContextBuilder>,
    pub(crate) manager: Option<Arc<dyn ManagerAgent>>,
    pub(crate) session_store: Option<Arc<dyn SessionStore>>,
    pub(crate) events: EventBus,
    pub(crate) monitor: AgentMonitor,
}

/// Builder for [`ProcessEngine`].
pub struct ProcessEngineBuilder {
    graph: TaskGraph,
    agents: AgentRegistry,
    state: Arc<StateStore>,
    config: ProcessConfig,
    memory: Option<MemoryContextBuilder>,
    manager: Option<Arc<dyn ManagerAgent>>,
    session_store: Option<Arc<dyn SessionStore>>,
    events: EventBus,
}

impl ProcessEngineBuilder {
    /// Replace the default config.
    pub fn config(mut self, config: ProcessConfig) -> Self {
        self.config = config;
        self
    }

    /// Inject memory context into every task and, with `remember_outputs`,
    /// record accepted outputs in short-term memory.
    pub fn memory(mut self, builder: MemoryContextBuilder) -> Self {
        self.memory = Some(builder);
        self
    }

    /// Manager agent; required for the hierarchical process.
    pub fn manager(mut self, manager: Arc<dyn ManagerAgent>) -> Self {
        self.manager = Some(manager);
        self
    }

    /// Checkpoint after every accepted output (requires `session_id`).
    pub fn session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.session_store = Some(store);
        self
    }

    /// Add an event sink.
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events.add_sink(sink);
        self
    }

    /// Validate the setup and build the engine.
    pub fn build(self) -> TroupeResult<ProcessEngine> {
        self.config.validate()?;
        self.graph.ensure_validated()?;

        match self.config.process {
            ProcessKind::Hierarchical => {
                if self.manager.is_none() {
                    return Err(TroupeError::Orchestrator(
                        "hierarchical process requires a manager agent".to_string(),
                    ));
                }
                if self.agents.is_empty() {
                    return Err(TroupeError::Orchestrator(
                        "hierarchical process requires at least one registered agent".to_string(),
                    ));
                }
            }
            ProcessKind::Sequential | ProcessKind::Workflow => {
                if let Some(task) = self.graph.iter().find(|t| !self.agents.contains(&t.agent)) {
                    return Err(TroupeError::Agent(format!(
                        "task {} refers to unregistered agent '{}'",
                        task.id, task.agent
                    )));
                }
            }
        }

        let monitor = AgentMonitor::new();
        for profile in self.agents.profiles() {
            monitor.register(&profile.id);
        }

        info!(
            process = %self.config.process,
            tasks = self.graph.len(),
            agents = self.agents.len(),
            memory = self.memory.is_some(),
            checkpoints = self.session_store.is_some() && self.config.session_id.is_some(),
            "Process engine ready"
        );

        Ok(ProcessEngine {
            graph: self.graph,
            agents: self.agents,
            state: self.state,
            config: self.config,
            memory: self.memory,
            manager: self.manager,
            session_store: self.session_store,
            events: self.events,
            monitor,
        })
    }
}

/// Mutable bookkeeping of the run in progress.
pub(crate) struct RunContext {
    pub(crate) run_id: String,
    /// Memory partition for this run.
    pub(crate) memory_session: String,
    pub(crate) state: Mutex<ProcessState>,
    attempts: Mutex<Vec<AttemptRecord>>,
    outcome: Mutex<RunOutcome>,
    started: Instant,
}

#[derive(Default)]
struct RunOutcome {
    failure: Option<RunFailure>,
    final_output: Option<String>,
    manager_completed: bool,
}

impl RunContext {
    /// Record a failure. A halting failure stops scheduling and takes
    /// precedence over any earlier non-halting one.
    pub(crate) fn record_failure(&self, failure: RunFailure, halt: bool) {
        let mut state = self.state.lock();
        let mut outcome = self.outcome.lock();
        if halt {
            if !state.is_halted() {
                state.halt();
                outcome.failure = Some(failure);
            }
        } else if outcome.failure.is_none() {
            outcome.failure = Some(failure);
        }
    }

    pub(crate) fn is_halted(&self) -> bool {
        self.state.lock().is_halted()
    }

    pub(crate) fn set_final_output(&self, text: String) {
        self.outcome.lock().final_output = Some(text);
    }

    pub(crate) fn mark_manager_completed(&self) {
        self.outcome.lock().manager_completed = true;
    }
}

struct Job<'g> {
    task: &'g Task,
    agent: String,
    executor: Arc<dyn AgentExecutor>,
    context: String,
}

impl ProcessEngine {
    /// Start building an engine over a validated graph.
    pub fn builder(graph: TaskGraph, agents: AgentRegistry, state: Arc<StateStore>) -> ProcessEngineBuilder {
        ProcessEngineBuilder {
            graph,
            agents,
            state,
            config: ProcessConfig::default(),
            memory: None,
            manager: None,
            session_store: None,
            events: EventBus::default(),
        }
    }

    /// The task graph.
    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    /// The run config.
    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    /// The registered agents.
    pub fn agents(&self) -> &AgentRegistry {
        &self.agents
    }

    /// Shared state of the run; stays inspectable after halts and timeouts.
    pub fn state(&self) -> &Arc<StateStore> {
        &self.state
    }

    /// Per-agent metrics and status.
    pub fn monitor(&self) -> &AgentMonitor {
        &self.monitor
    }

    /// The event bus.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ProcessEvent> {
        self.events.subscribe()
    }

    /// Run the graph from scratch.
    ///
    /// Returns `Err` only for setup problems; task and run failures are
    /// described by the report.
    pub async fn run(&self) -> TroupeResult<RunReport> {
        self.execute(None).await
    }

    /// Continue from the last checkpoint of `session_id`, skipping tasks it
    /// records as completed. Starts fresh when no checkpoint exists.
    pub async fn resume(&self) -> TroupeResult<RunReport> {
        let (Some(store), Some(session_id)) = (&self.session_store, &self.config.session_id) else {
            return Err(TroupeError::Config(
                "resume requires a session store and a session_id".to_string(),
            ));
        };
        match store.load(session_id).await? {
            Some(snapshot) => self.execute(Some(snapshot)).await,
            None => {
                info!(session_id = %session_id, "No checkpoint found, starting fresh");
                self.execute(None).await
            }
        }
    }

    async fn execute(&self, snapshot: Option<RunSnapshot>) -> TroupeResult<RunReport> {
        let mut process_state = ProcessState::new(self.state.clone(), &self.graph);
        if let Some(snapshot) = snapshot {
            info!(
                session_id = %snapshot.session_id,
                completed = snapshot.completed.len(),
                iterations = snapshot.iterations,
                "Resuming run from checkpoint"
            );
            process_state.restore(snapshot, &self.graph)?;
        }

        let run_id = self.state.run_id().to_string();
        let ctx = RunContext {
            memory_session: self.config.session_id.clone().unwrap_or_else(|| run_id.clone()),
            run_id,
            state: Mutex::new(process_state),
            attempts: Mutex::new(Vec::new()),
            outcome: Mutex::new(RunOutcome::default()),
            started: Instant::now(),
        };

        info!(
            run_id = %ctx.run_id,
            process = %self.config.process,
            tasks = self.graph.len(),
            "Process started"
        );

        let drive = self.drive(&ctx);
        let timed_out = match self.config.run_timeout() {
            Some(limit) => tokio::time::timeout(limit, drive).await.is_err(),
            None => {
                drive.await;
                false
            }
        };
        if timed_out {
            self.abort_in_flight(&ctx);
        }

        Ok(self.finish(ctx))
    }

    async fn drive(&self, ctx: &RunContext) {
        match self.config.process {
            ProcessKind::Sequential => self.run_sequential(ctx).await,
            ProcessKind::Hierarchical => self.run_hierarchical(ctx).await,
            ProcessKind::Workflow => self.run_workflow(ctx).await,
        }
    }

    /// Execute `batch` (task id, agent id) with at most `max_concurrency`
    /// tasks in flight, applying each result as it arrives.
    pub(crate) async fn execute_batch(&self, ctx: &RunContext, batch: Vec<(TaskId, String)>) {
        let jobs = self.prepare(ctx, batch);
        if jobs.is_empty() {
            return;
        }

        let runner = TaskRunner {
            run_id: &ctx.run_id,
            config: &self.config,
            events: &self.events,
            monitor: &self.monitor,
        };
        let runner = &runner;
        let results = stream::iter(jobs.into_iter().map(|job| async move {
            let run = runner
                .run(job.task, &job.agent, job.executor.clone(), &job.context)
                .await;
            (job.task, run)
        }))
        .buffered(self.config.max_concurrency);
        let mut results = std::pin::pin!(results);

        while let Some((task, run)) = results.next().await {
            self.apply(ctx, task, run).await;
        }
    }

    /// Mark the batch running and assemble each task's context.
    fn prepare(&self, ctx: &RunContext, batch: Vec<(TaskId, String)>) -> Vec<Job<'_>> {
        let mut staged = Vec::with_capacity(batch.len());
        let mut unroutable = Vec::new();
        {
            let mut state = ctx.state.lock();
            for (id, agent) in batch {
                let Some(task) = self.graph.get(id.as_str()) else {
                    error!(task_id = %id, "Scheduled task is not in the graph");
                    continue;
                };
                let Some(executor) = self.agents.get(&agent) else {
                    let message = format!("agent '{agent}' is not registered");
                    state.mark_failed(&task.id, message.clone());
                    unroutable.push(RunFailure::task(task.id.clone(), FailureKind::InvalidDispatch { message }));
                    continue;
                };
                state.mark_running(&task.id, &agent);
                staged.push((task, agent, executor, render_context_refs(task, &state)));
            }
        }
        for failure in unroutable {
            ctx.record_failure(failure, true);
        }

        staged
            .into_iter()
            .map(|(task, agent, executor, refs)| Job {
                context: self.assemble_context(ctx, task, refs),
                task,
                agent,
                executor,
            })
            .collect()
    }

    /// Task context: referenced outputs, then the memory block.
    fn assemble_context(&self, ctx: &RunContext, task: &Task, refs: String) -> String {
        let mut sections = Vec::new();
        if !refs.is_empty() {
            sections.push(refs);
        }
        if let Some(memory) = &self.memory {
            let block = memory
                .build_default(&task.description, &ctx.memory_session)
                .unwrap_or_else(|e| {
                    warn!(task_id = %task.id, error = %e, "Memory context unavailable");
                    ContextBlock::unavailable()
                });
            sections.push(block.text);
        }
        sections.join("\n\n")
    }

    async fn apply(&self, ctx: &RunContext, task: &Task, run: TaskRun) {
        let TaskRun {
            output,
            failure,
            attempts,
        } = run;
        if self.config.audit_attempts {
            ctx.attempts.lock().extend(attempts);
        }

        match failure {
            None => {
                self.remember(ctx, task, &output.raw, output.attempts);
                self.events.emit(ProcessEvent::TaskCompleted {
                    run_id: ctx.run_id.clone(),
                    task_id: task.id.clone(),
                    agent: output.agent.clone(),
                    attempts: output.attempts,
                    duration_ms: output.execution_time_ms,
                    timestamp: Utc::now(),
                });
                ctx.state.lock().mark_completed(output);
                self.checkpoint(ctx).await;
            }
            Some(kind) => {
                let reason = kind.to_string();
                ctx.state.lock().mark_failed(&task.id, reason.clone());
                self.events.emit(ProcessEvent::TaskFailed {
                    run_id: ctx.run_id.clone(),
                    task_id: task.id.clone(),
                    agent: output.agent.clone(),
                    attempts: output.attempts,
                    reason,
                    duration_ms: output.execution_time_ms,
                    timestamp: Utc::now(),
                });
                let halt = self.config.failure_policy == FailurePolicy::Halt;
                ctx.record_failure(RunFailure::task(task.id.clone(), kind), halt);
            }
        }
    }

    fn remember(&self, ctx: &RunContext, task: &Task, raw: &str, attempts: u32) {
        if !self.config.remember_outputs || raw.trim().is_empty() {
            return;
        }
        let Some(memory) = &self.memory else {
            return;
        };
        let metrics = QualityMetrics::assess(raw, &task.description, &task.expected_output, attempts);
        if let Err(e) = memory
            .store()
            .store(&ctx.memory_session, raw, MemoryTier::ShortTerm, metrics)
        {
            warn!(task_id = %task.id, error = %e, "Failed to remember task output");
        }
    }

    /// Persist a snapshot. A failed save halts the run.
    async fn checkpoint(&self, ctx: &RunContext) {
        let (Some(store), Some(session_id)) = (&self.session_store, &self.config.session_id) else {
            return;
        };
        let snapshot = ctx.state.lock().snapshot(session_id);
        let saved = match snapshot {
            Ok(snapshot) => store.save(&snapshot).await,
            Err(e) => Err(e),
        };
        if let Err(e) = saved {
            error!(session_id = %session_id, error = %e, "Checkpoint failed");
            ctx.record_failure(
                RunFailure::run(FailureKind::Checkpoint {
                    message: e.to_string(),
                }),
                true,
            );
        }
    }

    pub(crate) fn emit_skipped(&self, ctx: &RunContext, task_id: &TaskId, reason: &str) {
        self.events.emit(ProcessEvent::TaskSkipped {
            run_id: ctx.run_id.clone(),
            task_id: task_id.clone(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Fail everything still running after the run deadline.
    fn abort_in_flight(&self, ctx: &RunContext) {
        let reason = FailureKind::RunTimeout.to_string();
        let aborted: Vec<(TaskId, String)> = {
            let mut state = ctx.state.lock();
            let aborted: Vec<_> = state
                .in_flight()
                .iter()
                .map(|(id, agent)| (id.clone(), agent.clone()))
                .collect();
            for (id, _) in &aborted {
                state.mark_failed(id, reason.clone());
            }
            state.halt();
            aborted
        };
        warn!(run_id = %ctx.run_id, in_flight = aborted.len(), "Run timed out");

        for (id, agent) in aborted {
            self.monitor.finish_task(&agent, &id, false, 0);
            self.events.emit(ProcessEvent::TaskFailed {
                run_id: ctx.run_id.clone(),
                task_id: id,
                agent,
                attempts: 0,
                reason: reason.clone(),
                duration_ms: 0,
                timestamp: Utc::now(),
            });
        }
        ctx.outcome.lock().failure = Some(RunFailure::run(FailureKind::RunTimeout));
    }

    fn finish(&self, ctx: RunContext) -> RunReport {
        let duration_ms = ctx.started.elapsed().as_millis() as u64;
        let state = ctx.state.into_inner();
        let outcome = ctx.outcome.into_inner();

        let unfinished = state.unfinished(&self.graph);
        let skipped: Vec<TaskId> = self
            .graph
            .iter()
            .filter(|t| matches!(state.status(t.id.as_str()), Some(TaskStatus::Skipped { .. })))
            .map(|t| t.id.clone())
            .collect();

        let status = match &outcome.failure {
            Some(_) if state.is_halted() => RunStatus::Failed,
            Some(_) => RunStatus::Partial,
            None if !unfinished.is_empty() && !outcome.manager_completed => RunStatus::Partial,
            None => RunStatus::Completed,
        };
        let final_output = outcome
            .final_output
            .or_else(|| state.outputs().last().map(|o| o.raw.clone()));

        self.events.emit(ProcessEvent::ProcessHalted {
            run_id: ctx.run_id.clone(),
            status,
            reason: outcome.failure.as_ref().map(|f| f.error.to_string()),
            duration_ms,
            timestamp: Utc::now(),
        });

        RunReport {
            run_id: ctx.run_id,
            process: self.config.process,
            status,
            outputs: state.outputs().to_vec(),
            final_output,
            failure: outcome.failure,
            statuses: state.statuses().clone(),
            skipped,
            unfinished,
            iterations: state.iterations(),
            attempts: ctx.attempts.into_inner(),
            state: state.store().snapshot(),
            duration_ms,
        }
    }
}

/// Outputs of the task's context refs, each headed by the producing task id.
fn render_context_refs(task: &Task, state: &ProcessState) -> String {
    task.context_refs
        .iter()
        .filter_map(|id| {
            state
                .latest_output(id.as_str())
                .map(|o| format!("## {id}\n{}", o.raw.trim()))
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
