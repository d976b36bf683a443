use crate::executor::AgentExecutor;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use troupe_core::{TroupeError, TroupeResult};

/// Public description of an agent, shown to managers when planning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: String,
    pub role: String,
    pub goal: String,
}

impl AgentProfile {
    /// Profile with the given id, role and goal.
    pub fn new(id: impl Into<String>, role: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
            goal: goal.into(),
        }
    }
}

struct RegisteredAgent {
    profile: AgentProfile,
    executor: Arc<dyn AgentExecutor>,
}

/// Agents available to a run, in registration order.
#[derive(Default)]
pub struct AgentRegistry {
    agents: Vec<RegisteredAgent>,
    index: HashMap<String, usize>,
}

impl AgentRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent. Ids must be unique and non-empty.
    pub fn register(
        &mut self,
        profile: AgentProfile,
        executor: Arc<dyn AgentExecutor>,
    ) -> TroupeResult<()> {
        if profile.id.trim().is_empty() {
            return Err(TroupeError::Agent("agent id must not be empty".to_string()));
        }
        if self.index.contains_key(&profile.id) {
            return Err(TroupeError::Agent(format!(
                "agent '{}' is already registered",
                profile.id
            )));
        }
        tracing::debug!(agent = %profile.id, role = %profile.role, "Agent registered");
        self.index.insert(profile.id.clone(), self.agents.len());
        self.agents.push(RegisteredAgent { profile, executor });
        Ok(())
    }

    /// Builder-style [`Self::register`].
    pub fn with_agent(
        mut self,
        profile: AgentProfile,
        executor: Arc<dyn AgentExecutor>,
    ) -> TroupeResult<Self> {
        self.register(profile, executor)?;
        Ok(self)
    }

    /// Executor registered under `id`.
    pub fn get(&self, id: &str) -> Option<Arc<dyn AgentExecutor>> {
        self.index
            .get(id)
            .map(|&pos| Arc::clone(&self.agents[pos].executor))
    }

    /// Profile registered under `id`.
    pub fn profile(&self, id: &str) -> Option<&AgentProfile> {
        self.index.get(id).map(|&pos| &self.agents[pos].profile)
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Profiles in registration order.
    pub fn profiles(&self) -> Vec<AgentProfile> {
        self.agents.iter().map(|a| a.profile.clone()).collect()
    }

    /// Number of registered agents.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether no agent is registered.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<&str> = self.agents.iter().map(|a| a.profile.id.as_str()).collect();
        f.debug_struct("AgentRegistry").field("agents", &ids).finish()
    }
}
