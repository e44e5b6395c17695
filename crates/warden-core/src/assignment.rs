use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How deeply an assigned task is executed, derived from its complexity score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Plain execution by the primary agent.
    Shallow,
    /// Deep-reasoning execution by the primary agent.
    DeepReasoning,
    /// Deep-reasoning execution plus an isolated sub-agent.
    Isolated,
}

impl ExecutionMode {
    /// Maps a complexity score onto a mode: `score <= shallow_max` is shallow,
    /// `score <= deep_max` is deep reasoning, anything above is isolated.
    pub fn for_score(score: f64, shallow_max: f64, deep_max: f64) -> Self {
        if score <= shallow_max {
            ExecutionMode::Shallow
        } else if score <= deep_max {
            ExecutionMode::DeepReasoning
        } else {
            ExecutionMode::Isolated
        }
    }

    /// Whether this mode requests an isolated sub-agent.
    pub fn wants_isolation(self) -> bool {
        self == ExecutionMode::Isolated
    }

    /// Stable string form used by the durable store.
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionMode::Shallow => "shallow",
            ExecutionMode::DeepReasoning => "deep_reasoning",
            ExecutionMode::Isolated => "isolated",
        }
    }

    /// Parses the durable-store form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "shallow" => Some(ExecutionMode::Shallow),
            "deep_reasoning" => Some(ExecutionMode::DeepReasoning),
            "isolated" => Some(ExecutionMode::Isolated),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The binding of a task to the agent responsible for it.
///
/// At most one active assignment exists per task id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    /// Assigned task.
    pub task_id: String,
    /// Primary agent.
    pub agent_id: String,
    /// Isolated sub-agent, when one was spawned successfully.
    pub sub_agent_id: Option<Uuid>,
    /// Execution depth chosen for the task.
    pub mode: ExecutionMode,
    /// Complexity score the mode was derived from.
    pub complexity: f64,
    /// When the assignment was made.
    pub assigned_at: DateTime<Utc>,
}

impl Assignment {
    /// Creates an assignment without a sub-agent.
    pub fn new(
        task_id: impl Into<String>,
        agent_id: impl Into<String>,
        mode: ExecutionMode,
        complexity: f64,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            agent_id: agent_id.into(),
            sub_agent_id: None,
            mode,
            complexity,
            assigned_at: Utc::now(),
        }
    }

    /// Attaches the spawned sub-agent.
    pub fn with_sub_agent(mut self, sub_agent_id: Uuid) -> Self {
        self.sub_agent_id = Some(sub_agent_id);
        self
    }

    /// Whether the task runs with an isolated sub-agent.
    pub fn is_isolated(&self) -> bool {
        self.sub_agent_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_boundaries() {
        assert_eq!(ExecutionMode::for_score(4.5, 10.0, 15.0), ExecutionMode::Shallow);
        assert_eq!(ExecutionMode::for_score(10.0, 10.0, 15.0), ExecutionMode::Shallow);
        assert_eq!(
            ExecutionMode::for_score(10.01, 10.0, 15.0),
            ExecutionMode::DeepReasoning
        );
        assert_eq!(
            ExecutionMode::for_score(15.0, 10.0, 15.0),
            ExecutionMode::DeepReasoning
        );
        assert_eq!(ExecutionMode::for_score(16.0, 10.0, 15.0), ExecutionMode::Isolated);
    }

    #[test]
    fn test_mode_store_form() {
        for mode in [
            ExecutionMode::Shallow,
            ExecutionMode::DeepReasoning,
            ExecutionMode::Isolated,
        ] {
            assert_eq!(ExecutionMode::parse(mode.as_str()), Some(mode));
        }
        assert_eq!(ExecutionMode::parse("deep"), None);
    }

    #[test]
    fn test_assignment_isolation_flag() {
        let a = Assignment::new("t-1", "agent-a", ExecutionMode::Isolated, 16.0);
        assert!(!a.is_isolated());
        let a = a.with_sub_agent(Uuid::new_v4());
        assert!(a.is_isolated());
    }
}
