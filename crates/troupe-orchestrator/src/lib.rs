//! Task graph and process engine for the Troupe orchestration framework.
//!
//! A [`TaskGraph`] holds tasks and their dependencies. A [`ProcessEngine`]
//! drives it with one of three topologies: sequential, hierarchical
//! (a manager agent plans each round) or workflow (conditional branches and
//! loops). Every task goes through the guardrail retry loop and may receive
//! context from earlier outputs and from the memory subsystem.
//!
//! # Main types
//!
//! - [`Task`] — A unit of work with dependencies, guardrail and retry budget.
//! - [`TaskGraph`] — Validated DAG of tasks plus workflow back edges.
//! - [`Condition`] — Predicate over state and outputs gating workflow tasks.
//! - [`Guardrail`] / [`GuardrailValidator`] — Output validation, predicate or LLM-judged.
//! - [`ProcessEngine`] — Runs a graph and returns a [`RunReport`].
//! - [`ProcessConfig`] — Process kind, failure policy, limits and timeouts.
//! - [`EventBus`] / [`ProcessEvent`] — Lifecycle events for observers.
//! - [`AgentMonitor`] — Per-agent status and metrics.

/// Workflow conditions.
pub mod condition;
/// Process configuration.
pub mod config;
/// The process engine and its builder.
pub mod engine;
/// Lifecycle events and sinks.
pub mod events;
/// Task graph construction and scheduling queries.
pub mod graph;
/// Output guardrails.
pub mod guardrail;
/// Per-agent monitoring.
pub mod monitor;
mod process;
/// Run reports and failure taxonomy.
pub mod report;
/// Single-task execution with guardrail retries.
pub mod runner;
/// Run-time bookkeeping.
pub mod state;
/// Tasks, outputs and attempt records.
pub mod types;

pub use condition::{Condition, ConditionScope};
pub use config::{FailurePolicy, ProcessConfig, ProcessKind};
pub use engine::{ProcessEngine, ProcessEngineBuilder};
pub use events::{EventBus, EventSink, ProcessEvent};
pub use graph::{BackEdge, TaskGraph, TaskGraphConfig, DEFAULT_MAX_RETRY};
pub use guardrail::{parse_verdict, Guardrail, GuardrailValidator};
pub use monitor::{AgentMetrics, AgentMonitor, AgentState, WorkerStatus};
pub use report::{FailureKind, RunFailure, RunReport, RunStatus};
pub use runner::{compute_backoff, TaskRun, TaskRunner};
pub use state::ProcessState;
pub use types::{
    AttemptOutcome, AttemptRecord, GuardrailResult, OutputStatus, Task, TaskOutput, TaskStatus,
};
