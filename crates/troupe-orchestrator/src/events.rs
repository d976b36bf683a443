use crate::report::RunStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::broadcast;
use troupe_core::TaskId;

/// Lifecycle events emitted while a process runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum ProcessEvent {
    TaskStarted {
        run_id: String,
        task_id: TaskId,
        agent: String,
        timestamp: DateTime<Utc>,
    },
    TaskCompleted {
        run_id: String,
        task_id: TaskId,
        agent: String,
        attempts: u32,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    TaskFailed {
        run_id: String,
        task_id: TaskId,
        agent: String,
        attempts: u32,
        reason: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    TaskSkipped {
        run_id: String,
        task_id: TaskId,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    GuardrailRejected {
        run_id: String,
        task_id: TaskId,
        attempt: u32,
        feedback: String,
        timestamp: DateTime<Utc>,
    },
    ProcessHalted {
        run_id: String,
        status: RunStatus,
        reason: Option<String>,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

impl ProcessEvent {
    /// Task the event is about, if any.
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            ProcessEvent::TaskStarted { task_id, .. }
            | ProcessEvent::TaskCompleted { task_id, .. }
            | ProcessEvent::TaskFailed { task_id, .. }
            | ProcessEvent::TaskSkipped { task_id, .. }
            | ProcessEvent::GuardrailRejected { task_id, .. } => Some(task_id),
            ProcessEvent::ProcessHalted { .. } => None,
        }
    }

    fn log(&self) {
        match self {
            ProcessEvent::TaskStarted { task_id, agent, .. } => {
                tracing::info!(task_id = %task_id, agent = %agent, "Task started");
            }
            ProcessEvent::TaskCompleted {
                task_id,
                agent,
                attempts,
                duration_ms,
                ..
            } => {
                tracing::info!(task_id = %task_id, agent = %agent, attempts, duration_ms, "Task completed");
            }
            ProcessEvent::TaskFailed {
                task_id,
                agent,
                attempts,
                reason,
                duration_ms,
                ..
            } => {
                tracing::error!(task_id = %task_id, agent = %agent, attempts, duration_ms, reason = %reason, "Task failed");
            }
            ProcessEvent::TaskSkipped { task_id, reason, .. } => {
                tracing::info!(task_id = %task_id, reason = %reason, "Task skipped");
            }
            ProcessEvent::GuardrailRejected {
                task_id,
                attempt,
                feedback,
                ..
            } => {
                tracing::warn!(task_id = %task_id, attempt, feedback = %feedback, "Guardrail rejected output");
            }
            ProcessEvent::ProcessHalted {
                run_id,
                status,
                reason,
                duration_ms,
                ..
            } => {
                tracing::info!(run_id = %run_id, ?status, reason = ?reason, duration_ms, "Process halted");
            }
        }
    }
}

/// Synchronous observer of process events.
///
/// Called inline by the engine; implementations should return quickly.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: &ProcessEvent);
}

/// Fans events out to the log, registered sinks and broadcast subscribers.
///
/// Delivery never affects orchestration: panicking sinks are logged and
/// skipped, and a broadcast with no receivers is dropped.
pub struct EventBus {
    sinks: Vec<Arc<dyn EventSink>>,
    sender: broadcast::Sender<ProcessEvent>,
}

impl EventBus {
    /// Bus whose broadcast channel holds `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sinks: Vec::new(),
            sender,
        }
    }

    /// Register a synchronous sink.
    pub fn add_sink(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }

    /// Number of registered sinks.
    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Receive every subsequent event.
    pub fn subscribe(&self) -> broadcast::Receiver<ProcessEvent> {
        self.sender.subscribe()
    }

    /// Deliver to sinks, then broadcast.
    pub fn emit(&self, event: ProcessEvent) {
        event.log();
        for sink in &self.sinks {
            if catch_unwind(AssertUnwindSafe(|| sink.on_event(&event))).is_err() {
                tracing::error!(task_id = ?event.task_id(), "Event sink panicked; event dropped for this sink");
            }
        }
        // No receivers is fine.
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<ProcessEvent>>);

    impl EventSink for Collect {
        fn on_event(&self, event: &ProcessEvent) {
            self.0.lock().push(event.clone());
        }
    }

    struct Explodes;

    impl EventSink for Explodes {
        fn on_event(&self, _event: &ProcessEvent) {
            panic!("sink failure");
        }
    }

    fn skipped(id: &str) -> ProcessEvent {
        ProcessEvent::TaskSkipped {
            run_id: "r".into(),
            task_id: TaskId::from(id),
            reason: "condition not met".into(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_bus_delivers_to_sinks_and_subscribers() {
        let collect = Arc::new(Collect::default());
        let mut bus = EventBus::default();
        bus.add_sink(Arc::new(Explodes));
        bus.add_sink(collect.clone());
        let mut rx = bus.subscribe();

        bus.emit(skipped("a"));
        bus.emit(skipped("b"));

        assert_eq!(collect.0.lock().len(), 2);
        let first = rx.recv().await.unwrap();
        assert_eq!(first.task_id(), Some(&TaskId::from("a")));
        assert_eq!(bus.sink_count(), 2);
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(1);
        bus.emit(skipped("a"));
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let json = serde_json::to_value(skipped("a")).unwrap();
        assert_eq!(json["event"], "task_skipped");
        assert_eq!(json["task_id"], "a");
    }
}
