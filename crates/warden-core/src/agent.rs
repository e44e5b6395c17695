use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Lifecycle status of a worker agent, as reported by its registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Starting up; may accept work once ready.
    Initializing,
    /// Waiting for work.
    #[default]
    Idle,
    /// Working on something else.
    Busy,
    /// Unhealthy.
    Error,
    /// Stopped.
    Shutdown,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Initializing => write!(f, "initializing"),
            AgentStatus::Idle => write!(f, "idle"),
            AgentStatus::Busy => write!(f, "busy"),
            AgentStatus::Error => write!(f, "error"),
            AgentStatus::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// A worker agent known to the capability registry.
///
/// Agents are owned by an external registry; the core only reads them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    /// Unique agent identifier.
    pub id: String,
    /// Capability tags the agent accepts.
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    /// Executable used to invoke the agent, if it is process-backed.
    #[serde(default)]
    pub invocation_path: Option<PathBuf>,
    /// Current status.
    #[serde(default)]
    pub status: AgentStatus,
}

impl Agent {
    /// Creates an idle agent with the given capabilities.
    pub fn new<I, S>(id: impl Into<String>, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            invocation_path: None,
            status: AgentStatus::Idle,
        }
    }

    /// Sets the invocation path.
    pub fn with_invocation_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.invocation_path = Some(path.into());
        self
    }

    /// Sets the status.
    pub fn with_status(mut self, status: AgentStatus) -> Self {
        self.status = status;
        self
    }

    /// Agents in `error` or `shutdown` never receive work.
    pub fn is_available(&self) -> bool {
        !matches!(self.status, AgentStatus::Error | AgentStatus::Shutdown)
    }

    /// Number of tags shared with `required`.
    pub fn overlap(&self, required: &BTreeSet<String>) -> usize {
        self.capabilities.intersection(required).count()
    }
}
