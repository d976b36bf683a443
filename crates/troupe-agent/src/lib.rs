//! Agent-side contracts for the Troupe orchestration engine.
//!
//! The engine never talks to a model directly. It drives agents through the
//! narrow traits defined here and leaves the actual LLM call to the caller.
//!
//! # Main types
//!
//! - [`AgentExecutor`] — Runs one attempt of a task and returns raw text.
//! - [`AgentRegistry`] — Agents known to a run, keyed by id.
//! - [`CompletionClient`] — Plain prompt/response client for LLM-judged guardrails.
//! - [`ManagerAgent`] — Plans dispatches and aggregates results in hierarchical runs.
//! - [`CompletionManager`] — A [`ManagerAgent`] backed by a [`CompletionClient`].

/// Completion client trait and JSON extraction helpers.
pub mod completion;
/// Executor trait, task requests and executor errors.
pub mod executor;
/// Manager agent contract for hierarchical processes.
pub mod manager;
/// Agent registry.
pub mod registry;

pub use completion::{extract_json, CompletionClient};
pub use executor::{AgentExecutor, ExecutorError, FnExecutor, TaskRequest};
pub use manager::{
    AggregationRequest, CompletedWork, CompletionManager, Dispatch, ManagerAgent, ManagerDecision,
    PlanningRequest, ReadyTask,
};
pub use registry::{AgentProfile, AgentRegistry};
