//! Core types and error definitions for the Troupe orchestration engine.
//!
//! This crate provides the foundational types shared across all Troupe crates:
//! the error taxonomy, the task identifier, and tracing initialisation.
//!
//! # Main types
//!
//! - [`TroupeError`] — Unified error enum for all Troupe subsystems.
//! - [`GraphError`] — Build-time task graph errors (never retried).
//! - [`TroupeResult`] — Convenience alias for `Result<T, TroupeError>`.
//! - [`TaskId`] — Stable identifier of a task within a run.

/// Error taxonomy.
pub mod error;
/// Tracing subscriber setup.
pub mod telemetry;

pub use error::{GraphError, TroupeError, TroupeResult};

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Identifier of a task, unique within one run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Creates a task id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for TaskId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for TaskId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
