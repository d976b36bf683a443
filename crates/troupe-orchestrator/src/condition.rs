use crate::types::TaskOutput;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use troupe_session::StateStore;

/// Read-only view handed to conditions: the run's state and accepted outputs.
#[derive(Clone, Copy)]
pub struct ConditionScope<'a> {
    state: &'a StateStore,
    outputs: &'a [TaskOutput],
}

impl<'a> ConditionScope<'a> {
    /// Scope over the run state and accepted outputs.
    pub fn new(state: &'a StateStore, outputs: &'a [TaskOutput]) -> Self {
        Self { state, outputs }
    }

    /// The run state.
    pub fn state(&self) -> &'a StateStore {
        self.state
    }

    /// Accepted outputs in completion order.
    pub fn outputs(&self) -> &'a [TaskOutput] {
        self.outputs
    }

    /// Most recent accepted output of `task`.
    pub fn output(&self, task: &str) -> Option<&'a TaskOutput> {
        self.outputs.iter().rev().find(|o| o.task_id.as_str() == task)
    }
}

type PredicateFn = dyn Fn(&ConditionScope<'_>) -> bool + Send + Sync;

/// Gate on a workflow task or back edge.
#[derive(Clone)]
pub enum Condition {
    /// Arbitrary predicate over the scope.
    Predicate(Arc<PredicateFn>),
    /// State key equals `value`.
    StateEquals { key: String, value: Value },
    /// State key is a number `>= threshold`.
    StateAtLeast { key: String, threshold: f64 },
    /// Latest accepted output of `task` contains `needle`.
    OutputContains { task: String, needle: String },
    Not(Box<Condition>),
}

impl Condition {
    /// Custom predicate over the scope.
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&ConditionScope<'_>) -> bool + Send + Sync + 'static,
    {
        Condition::Predicate(Arc::new(f))
    }

    /// State key equals `value`.
    pub fn state_equals(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::StateEquals {
            key: key.into(),
            value: value.into(),
        }
    }

    /// State key is a number `>= threshold`.
    pub fn state_at_least(key: impl Into<String>, threshold: f64) -> Self {
        Condition::StateAtLeast {
            key: key.into(),
            threshold,
        }
    }

    /// Latest output of `task` contains `needle`.
    pub fn output_contains(task: impl Into<String>, needle: impl Into<String>) -> Self {
        Condition::OutputContains {
            task: task.into(),
            needle: needle.into(),
        }
    }

    /// Holds always.
    pub fn always() -> Self {
        Condition::predicate(|_| true)
    }

    /// Logical negation.
    pub fn negate(self) -> Self {
        Condition::Not(Box::new(self))
    }

    /// Evaluate against the current scope.
    pub fn evaluate(&self, scope: &ConditionScope<'_>) -> bool {
        match self {
            Condition::Predicate(f) => f(scope),
            Condition::StateEquals { key, value } => {
                scope.state().get(key).as_ref() == Some(value)
            }
            Condition::StateAtLeast { key, threshold } => scope
                .state()
                .get(key)
                .and_then(|v| v.as_f64())
                .is_some_and(|n| n >= *threshold),
            Condition::OutputContains { task, needle } => scope
                .output(task)
                .is_some_and(|o| o.raw.contains(needle.as_str())),
            Condition::Not(inner) => !inner.evaluate(scope),
        }
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Predicate(_) => f.write_str("Predicate(<fn>)"),
            Condition::StateEquals { key, value } => f
                .debug_struct("StateEquals")
                .field("key", key)
                .field("value", value)
                .finish(),
            Condition::StateAtLeast { key, threshold } => f
                .debug_struct("StateAtLeast")
                .field("key", key)
                .field("threshold", threshold)
                .finish(),
            Condition::OutputContains { task, needle } => f
                .debug_struct("OutputContains")
                .field("task", task)
                .field("needle", needle)
                .finish(),
            Condition::Not(inner) => f.debug_tuple("Not").field(inner).finish(),
        }
    }
}
