//! Catalog of agents available to the service, keyed by agent id.

use std::collections::BTreeMap;

use serde::Serialize;

use super::{Agent, AgentKind};
use crate::error::RequestError;

/// A registered agent.
#[derive(Debug, Clone)]
pub struct AgentDefinition {
    pub key: String,
    pub description: String,
    pub agent: Agent,
}

/// Public description of an agent for `/info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentInfo {
    pub key: String,
    pub description: String,
    pub kind: AgentKind,
}

/// Agents by key, plus the default used by agent-less routes.
#[derive(Debug, Clone)]
pub struct AgentCatalog {
    agents: BTreeMap<String, AgentDefinition>,
    default_key: String,
}

impl AgentCatalog {
    /// Create an empty catalog with the given default agent key.
    pub fn new(default_key: impl Into<String>) -> Self {
        Self {
            agents: BTreeMap::new(),
            default_key: default_key.into(),
        }
    }

    /// Catalog holding the built-in agents.
    pub fn with_builtin(default_key: impl Into<String>) -> Self {
        let mut catalog = Self::new(default_key);
        super::builtin::register_all(&mut catalog);
        catalog
    }

    /// Register an agent. A second registration under the same key replaces
    /// the first.
    pub fn register(&mut self, key: impl Into<String>, description: impl Into<String>, agent: Agent) {
        let key = key.into();
        if self.agents.contains_key(&key) {
            tracing::warn!(agent = %key, "Replacing previously registered agent");
        }
        tracing::debug!(agent = %key, kind = %agent.kind(), "Registered agent");
        self.agents.insert(
            key.clone(),
            AgentDefinition {
                key,
                description: description.into(),
                agent,
            },
        );
    }

    /// Look up an agent by key.
    pub fn get(&self, key: &str) -> Result<&AgentDefinition, RequestError> {
        self.agents.get(key).ok_or_else(|| RequestError::UnknownAgent {
            key: key.to_string(),
        })
    }

    /// Key used when a request names no agent.
    pub fn default_key(&self) -> &str {
        &self.default_key
    }

    /// Descriptions of all agents, sorted by key.
    pub fn info(&self) -> Vec<AgentInfo> {
        self.agents
            .values()
            .map(|def| AgentInfo {
                key: def.key.clone(),
                description: def.description.clone(),
                kind: def.agent.kind(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
