use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;
use warden_core::{Agent, WardenError, WardenResult};

/// Read-only view of the agent capability registry.
#[async_trait]
pub trait AgentDirectory: Send + Sync {
    /// The current set of agents, ordered by id.
    async fn snapshot(&self) -> WardenResult<Vec<Agent>>;
}

#[derive(Deserialize)]
struct RegistryFile {
    #[serde(default)]
    agents: Vec<Agent>,
}

fn parse_registry(raw: &str, origin: &str) -> WardenResult<Vec<Agent>> {
    let file: RegistryFile = toml::from_str(raw)
        .map_err(|e| WardenError::Config(format!("invalid agent registry {origin}: {e}")))?;

    let mut seen = HashSet::new();
    for agent in &file.agents {
        if agent.id.trim().is_empty() {
            return Err(WardenError::Config(format!("agent with empty id in {origin}")));
        }
        if !seen.insert(agent.id.as_str()) {
            return Err(WardenError::Config(format!(
                "duplicate agent id '{}' in {origin}",
                agent.id
            )));
        }
    }

    let mut agents = file.agents;
    agents.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(agents)
}

/// An agent registry held in memory.
#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    agents: Vec<Agent>,
}

impl AgentRegistry {
    /// Builds a registry from agents. Later duplicates replace earlier ones.
    pub fn new(agents: impl IntoIterator<Item = Agent>) -> Self {
        let mut registry = Self::default();
        for agent in agents {
            registry.upsert(agent);
        }
        registry
    }

    /// Parses the `[[agents]]` TOML format.
    pub fn from_toml_str(raw: &str) -> WardenResult<Self> {
        Ok(Self {
            agents: parse_registry(raw, "<inline>")?,
        })
    }

    /// Adds or replaces an agent.
    pub fn upsert(&mut self, agent: Agent) {
        match self.agents.binary_search_by(|a| a.id.cmp(&agent.id)) {
            Ok(i) => self.agents[i] = agent,
            Err(i) => self.agents.insert(i, agent),
        }
    }

    /// Looks up an agent.
    pub fn get(&self, id: &str) -> Option<&Agent> {
        self.agents.iter().find(|a| a.id == id)
    }

    /// Number of agents.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

#[async_trait]
impl AgentDirectory for AgentRegistry {
    async fn snapshot(&self) -> WardenResult<Vec<Agent>> {
        Ok(self.agents.clone())
    }
}

/// An agent registry re-read from a TOML file on every snapshot, so edits
/// by the registry owner are picked up without a restart.
#[derive(Debug, Clone)]
pub struct FileAgentRegistry {
    path: PathBuf,
}

impl FileAgentRegistry {
    /// Reads agents from `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The registry file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AgentDirectory for FileAgentRegistry {
    async fn snapshot(&self) -> WardenResult<Vec<Agent>> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            WardenError::Config(format!(
                "cannot read agent registry '{}': {e}",
                self.path.display()
            ))
        })?;
        let agents = parse_registry(&raw, &format!("'{}'", self.path.display()))?;
        debug!(path = %self.path.display(), agents = agents.len(), "agent registry loaded");
        Ok(agents)
    }
}
