use crate::completion::{extract_json, CompletionClient};
use crate::executor::ExecutorError;
use crate::registry::AgentProfile;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use troupe_core::TaskId;

/// A task the manager may dispatch this round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyTask {
    pub task_id: TaskId,
    pub description: String,
    pub expected_output: String,
    /// Agent the task was declared with; the manager may pick another.
    pub declared_agent: String,
}

/// An accepted output, as seen by the manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedWork {
    pub task_id: TaskId,
    pub agent: String,
    pub output: String,
}

/// Input to one planning round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanningRequest {
    /// 1-based planning round.
    pub round: u32,
    pub ready: Vec<ReadyTask>,
    pub agents: Vec<AgentProfile>,
    /// Accepted outputs so far, in completion order.
    pub completed: Vec<CompletedWork>,
    /// The manager's aggregate from the previous round.
    #[serde(default)]
    pub aggregate: Option<String>,
}

/// Input to the aggregation step that closes every round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationRequest {
    /// Planning round being aggregated.
    #[serde(default)]
    pub round: u32,
    /// Accepted outputs so far, in completion order.
    pub completed: Vec<CompletedWork>,
    /// Summary the manager gave when it declared the run complete.
    pub summary: Option<String>,
}

/// Assignment of one ready task to one registered agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dispatch {
    pub task_id: TaskId,
    pub agent_id: String,
}

impl Dispatch {
    /// Assign `task_id` to `agent_id`.
    pub fn new(task_id: impl Into<TaskId>, agent_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            agent_id: agent_id.into(),
        }
    }
}

/// What the manager wants to happen next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagerDecision {
    /// Run these tasks this round.
    Dispatch(Vec<Dispatch>),
    /// No more work is needed.
    Complete { summary: String },
}

/// Coordinator of a hierarchical process.
///
/// Decisions are validated by the engine: a manager may only dispatch tasks
/// from the current ready set to registered agents.
#[async_trait]
pub trait ManagerAgent: Send + Sync {
    /// Decide what happens next from the ready set and the work so far.
    async fn plan(&self, request: &PlanningRequest) -> Result<ManagerDecision, ExecutorError>;

    /// Combine worker outputs at the end of a round. The latest aggregate is
    /// the run's final output.
    ///
    /// Defaults to the outputs in completion order, each headed by its task id.
    async fn aggregate(&self, request: &AggregationRequest) -> Result<String, ExecutorError> {
        Ok(render_completed(&request.completed))
    }
}

fn render_completed(completed: &[CompletedWork]) -> String {
    completed
        .iter()
        .map(|w| format!("## {}\n{}", w.task_id, w.output.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

const PLANNER_SYSTEM: &str = "You are the manager of a team of agents. Decide which ready tasks \
to hand to which agents. Reply with JSON only: {\"dispatch\": [{\"task_id\": \"...\", \
\"agent_id\": \"...\"}]} or {\"complete\": \"<summary>\"} when no more work is needed.";

const AGGREGATOR_SYSTEM: &str = "You are the manager of a team of agents. Combine the results \
of your team into one coherent final answer.";

/// [`ManagerAgent`] that asks a [`CompletionClient`] to plan and aggregate.
pub struct CompletionManager {
    client: Arc<dyn CompletionClient>,
}

impl CompletionManager {
    /// Manager backed by `client`.
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self { client }
    }

    fn parse_decision(response: &str) -> Result<ManagerDecision, ExecutorError> {
        let value = extract_json(response).ok_or_else(|| {
            ExecutorError::fatal(format!("manager reply is not a JSON object: {}", preview(response)))
        })?;

        if let Some(summary) = value.get("complete") {
            let summary = summary.as_str().unwrap_or_default().to_string();
            return Ok(ManagerDecision::Complete { summary });
        }

        let dispatches = value
            .get("dispatch")
            .cloned()
            .ok_or_else(|| ExecutorError::fatal("manager reply has neither 'dispatch' nor 'complete'"))?;
        let dispatches: Vec<Dispatch> = serde_json::from_value(dispatches)
            .map_err(|e| ExecutorError::fatal(format!("invalid dispatch list: {e}")))?;
        Ok(ManagerDecision::Dispatch(dispatches))
    }
}

#[async_trait]
impl ManagerAgent for CompletionManager {
    async fn plan(&self, request: &PlanningRequest) -> Result<ManagerDecision, ExecutorError> {
        let prompt = serde_json::to_string_pretty(request)
            .map_err(|e| ExecutorError::fatal(format!("failed to render planning request: {e}")))?;
        let response = self.client.complete(PLANNER_SYSTEM, &prompt).await?;
        tracing::debug!(round = request.round, "Manager replied");
        Self::parse_decision(&response)
    }

    async fn aggregate(&self, request: &AggregationRequest) -> Result<String, ExecutorError> {
        let mut prompt = render_completed(&request.completed);
        if let Some(summary) = &request.summary {
            prompt.push_str("\n\nManager notes: ");
            prompt.push_str(summary);
        }
        self.client.complete(AGGREGATOR_SYSTEM, &prompt).await
    }
}

fn preview(text: &str) -> String {
    const MAX: usize = 80;
    if text.chars().count() <= MAX {
        text.to_string()
    } else {
        let head: String = text.chars().take(MAX).collect();
        format!("{head}...")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    struct Canned(&'static str);

    #[async_trait]
    impl CompletionClient for Canned {
        async fn complete(&self, _system: &str, _prompt: &str) -> Result<String, ExecutorError> {
            Ok(self.0.to_string())
        }
    }

    fn request() -> PlanningRequest {
        PlanningRequest {
            round: 1,
            ready: vec![ReadyTask {
                task_id: TaskId::from("research"),
                description: "find facts".into(),
                expected_output: "notes".into(),
                declared_agent: "researcher".into(),
            }],
            agents: vec![AgentProfile::new("researcher", "Researcher", "facts")],
            completed: Vec::new(),
            aggregate: None,
        }
    }

    #[tokio::test]
    async fn test_completion_manager_parses_dispatch() {
        let manager = CompletionManager::new(Arc::new(Canned(
            "```json\n{\"dispatch\": [{\"task_id\": \"research\", \"agent_id\": \"researcher\"}]}\n```",
        )));
        let decision = manager.plan(&request()).await.unwrap();
        assert_eq!(
            decision,
            ManagerDecision::Dispatch(vec![Dispatch::new("research", "researcher")])
        );
    }

    #[tokio::test]
    async fn test_completion_manager_parses_complete() {
        let manager = CompletionManager::new(Arc::new(Canned(r#"{"complete": "all done"}"#)));
        let decision = manager.plan(&request()).await.unwrap();
        assert_eq!(
            decision,
            ManagerDecision::Complete {
                summary: "all done".into()
            }
        );
    }

    #[tokio::test]
    async fn test_completion_manager_rejects_garbage() {
        let manager = CompletionManager::new(Arc::new(Canned("I think the researcher should go")));
        let err = manager.plan(&request()).await.unwrap_err();
        assert!(!err.retryable);
        assert!(err.message.contains("not a JSON object"));

        let manager = CompletionManager::new(Arc::new(Canned(r#"{"plan": []}"#)));
        assert!(manager.plan(&request()).await.is_err());
    }

    #[tokio::test]
    async fn test_default_aggregate_heads_outputs() {
        struct Silent;
        #[async_trait]
        impl ManagerAgent for Silent {
            async fn plan(&self, _request: &PlanningRequest) -> Result<ManagerDecision, ExecutorError> {
                Ok(ManagerDecision::Complete {
                    summary: String::new(),
                })
            }
        }

        let text = Silent
            .aggregate(&AggregationRequest {
                round: 1,
                completed: vec![
                    CompletedWork {
                        task_id: TaskId::from("a"),
                        agent: "x".into(),
                        output: "alpha".into(),
                    },
                    CompletedWork {
                        task_id: TaskId::from("b"),
                        agent: "y".into(),
                        output: "beta\n".into(),
                    },
                ],
                summary: None,
            })
            .await
            .unwrap();
        assert_eq!(text, "## a\nalpha\n\n## b\nbeta");
    }
}
