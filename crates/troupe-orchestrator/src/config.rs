use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use troupe_core::{TroupeError, TroupeResult};

/// Execution topology of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessKind {
    /// One task at a time in declaration order; ready async tasks run as a batch.
    #[default]
    Sequential,
    /// A manager agent plans each round and aggregates the result.
    Hierarchical,
    /// Conditional branches and loops driven by state and outputs.
    Workflow,
}

impl fmt::Display for ProcessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessKind::Sequential => write!(f, "sequential"),
            ProcessKind::Hierarchical => write!(f, "hierarchical"),
            ProcessKind::Workflow => write!(f, "workflow"),
        }
    }
}

/// What a task failure does to the rest of the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Stop scheduling new work.
    #[default]
    Halt,
    /// Keep going with every task that does not depend on the failed one.
    Continue,
}

/// Run-level configuration of a [`crate::ProcessEngine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessConfig {
    #[serde(default)]
    pub process: ProcessKind,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Upper bound on concurrently executing tasks in one batch.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Task executions (workflow) or planning rounds (hierarchical) per run.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default)]
    pub run_timeout_secs: Option<u64>,
    /// Applies to tasks without their own timeout.
    #[serde(default)]
    pub task_timeout_secs: Option<u64>,
    /// Base delay before a retry; 0 retries immediately.
    #[serde(default)]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_retry_backoff_max_ms")]
    pub retry_backoff_max_ms: u64,
    /// Retries of a retryable manager planning or aggregation error, with the
    /// same backoff as task attempts.
    #[serde(default = "default_manager_max_retry")]
    pub manager_max_retry: u32,
    /// Enables checkpointing and `resume()` when a session store is configured.
    /// Also partitions memory; the run id is used when unset.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Record each accepted output in short-term memory.
    #[serde(default)]
    pub remember_outputs: bool,
    /// Keep every attempt, not just accepted outputs, in the run report.
    #[serde(default)]
    pub audit_attempts: bool,
}

fn default_max_concurrency() -> usize {
    4
}

fn default_max_iterations() -> u32 {
    100
}

fn default_retry_backoff_max_ms() -> u64 {
    30_000
}

fn default_manager_max_retry() -> u32 {
    2
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            process: ProcessKind::default(),
            failure_policy: FailurePolicy::default(),
            max_concurrency: default_max_concurrency(),
            max_iterations: default_max_iterations(),
            run_timeout_secs: None,
            task_timeout_secs: None,
            retry_backoff_ms: 0,
            retry_backoff_max_ms: default_retry_backoff_max_ms(),
            manager_max_retry: default_manager_max_retry(),
            session_id: None,
            remember_outputs: false,
            audit_attempts: false,
        }
    }
}

impl ProcessConfig {
    /// Defaults with the given process kind.
    pub fn new(process: ProcessKind) -> Self {
        Self {
            process,
            ..Self::default()
        }
    }

    /// Reject out-of-range values.
    pub fn validate(&self) -> TroupeResult<()> {
        if self.max_concurrency == 0 {
            return Err(TroupeError::Config("max_concurrency must be >= 1".to_string()));
        }
        if self.max_iterations == 0 {
            return Err(TroupeError::Config("max_iterations must be >= 1".to_string()));
        }
        if self.run_timeout_secs == Some(0) {
            return Err(TroupeError::Config("run_timeout_secs must be > 0".to_string()));
        }
        if self.task_timeout_secs == Some(0) {
            return Err(TroupeError::Config("task_timeout_secs must be > 0".to_string()));
        }
        if self.retry_backoff_max_ms < self.retry_backoff_ms {
            return Err(TroupeError::Config(format!(
                "retry_backoff_max_ms ({}) must be >= retry_backoff_ms ({})",
                self.retry_backoff_max_ms, self.retry_backoff_ms
            )));
        }
        if let Some(id) = &self.session_id {
            if id.trim().is_empty() {
                return Err(TroupeError::Config("session_id must not be empty".to_string()));
            }
        }
        Ok(())
    }

    /// Run deadline, if configured.
    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }

    /// Default per-task deadline, if configured.
    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_secs.map(Duration::from_secs)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> TroupeResult<Self> {
        let config: Self = toml::from_str(s)
            .map_err(|e| TroupeError::Config(format!("invalid process config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub async fn load(path: impl AsRef<Path>) -> TroupeResult<Self> {
        let path = path.as_ref();
        let data = tokio::fs::read_to_string(path).await.map_err(|e| {
            TroupeError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&data)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProcessConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.process, ProcessKind::Sequential);
        assert_eq!(config.failure_policy, FailurePolicy::Halt);
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.max_iterations, 100);
        assert_eq!(config.manager_max_retry, 2);
        assert!(config.run_timeout().is_none());
    }

    #[test]
    fn test_from_toml() {
        let config = ProcessConfig::from_toml_str(
            r#"
            process = "workflow"
            failure_policy = "continue"
            max_iterations = 12
            task_timeout_secs = 30
            session_id = "nightly-report"
            "#,
        )
        .unwrap();
        assert_eq!(config.process, ProcessKind::Workflow);
        assert_eq!(config.failure_policy, FailurePolicy::Continue);
        assert_eq!(config.max_iterations, 12);
        assert_eq!(config.task_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.session_id.as_deref(), Some("nightly-report"));
    }

    #[test]
    fn test_invalid_values() {
        assert!(ProcessConfig::from_toml_str("max_concurrency = 0").is_err());
        assert!(ProcessConfig::from_toml_str("max_iterations = 0").is_err());
        assert!(ProcessConfig::from_toml_str("run_timeout_secs = 0").is_err());
        assert!(ProcessConfig::from_toml_str("retry_backoff_ms = 500\nretry_backoff_max_ms = 100").is_err());
        assert!(ProcessConfig::from_toml_str("process = \"parallel\"").is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(ProcessKind::Hierarchical.to_string(), "hierarchical");
    }
}
