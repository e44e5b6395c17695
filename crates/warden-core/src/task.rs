use crate::error::{WardenError, WardenResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Scheduling priority of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Background work.
    Low,
    /// Regular work.
    #[default]
    Normal,
    /// Should be picked before normal work.
    High,
    /// Blocking other work.
    Critical,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Normal => write!(f, "normal"),
            Priority::High => write!(f, "high"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}

/// A unit of work routed to a worker agent.
///
/// Tasks are created by the caller and are immutable afterwards; progress is
/// tracked by assignments and accountability records, never on the task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier.
    pub id: String,
    /// Free-form task kind (e.g. `feature`, `bugfix`, `review`).
    #[serde(rename = "type")]
    pub task_type: String,
    /// Human-readable description; its length feeds the complexity score.
    pub description: String,
    /// Scheduling priority.
    #[serde(default)]
    pub priority: Priority,
    /// Capability tags an agent should hold to accept the task.
    #[serde(default, rename = "capabilities")]
    pub capabilities_required: BTreeSet<String>,
    /// Ids of tasks this one depends on, in declaration order.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Optional absolute deadline.
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
}

impl Task {
    /// Creates a task, rejecting an empty id.
    pub fn new(
        id: impl Into<String>,
        task_type: impl Into<String>,
        description: impl Into<String>,
    ) -> WardenResult<Self> {
        let task = Self {
            id: id.into(),
            task_type: task_type.into(),
            description: description.into(),
            priority: Priority::default(),
            capabilities_required: BTreeSet::new(),
            dependencies: Vec::new(),
            deadline: None,
        };
        task.validate()?;
        Ok(task)
    }

    /// Checks the invariants a deserialized task must also satisfy.
    pub fn validate(&self) -> WardenResult<()> {
        if self.id.trim().is_empty() {
            return Err(WardenError::Config("task id must not be empty".into()));
        }
        if self.dependencies.iter().any(|d| d == &self.id) {
            return Err(WardenError::Config(format!(
                "task '{}' depends on itself",
                self.id
            )));
        }
        Ok(())
    }

    /// Sets the required capability tags.
    pub fn with_capabilities<I, S>(mut self, caps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities_required = caps.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the ordered dependency list.
    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets an absolute deadline.
    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }
}
