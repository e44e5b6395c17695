use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use warden_core::ExecutionMode;

/// Lifecycle of a row in the `tasks` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Bound to an agent, not yet sent.
    Assigned,
    /// Sent to the agent.
    Dispatched,
    /// Done.
    Completed,
    /// The agent failed it.
    Failed,
    /// Moved away from the recorded agent.
    Reassigned,
}

impl TaskState {
    /// Stable string form stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Assigned => "assigned",
            TaskState::Dispatched => "dispatched",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Reassigned => "reassigned",
        }
    }

    /// Parses the stored form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "assigned" => Some(TaskState::Assigned),
            "dispatched" => Some(TaskState::Dispatched),
            "completed" => Some(TaskState::Completed),
            "failed" => Some(TaskState::Failed),
            "reassigned" => Some(TaskState::Reassigned),
            _ => None,
        }
    }

    /// Whether the row counts as an active assignment.
    pub fn is_active(self) -> bool {
        matches!(self, TaskState::Assigned | TaskState::Dispatched)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row of the `tasks` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRow {
    /// Task id.
    pub id: String,
    /// Agent currently responsible.
    pub agent: String,
    /// Row state.
    pub status: TaskState,
    /// Confidence reported for the work, 0.0..=1.0.
    pub confidence: Option<f64>,
    /// Isolated sub-agent handle, if any.
    pub sub_agent: Option<String>,
    /// Execution mode chosen at assignment.
    pub mode: Option<ExecutionMode>,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
}

impl TaskRow {
    /// A freshly assigned row.
    pub fn assigned(id: impl Into<String>, agent: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            agent: agent.into(),
            status: TaskState::Assigned,
            confidence: None,
            sub_agent: None,
            mode: None,
            updated_at: Utc::now(),
        }
    }
}

/// A row of the `performance` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRow {
    /// Agent that did the work.
    pub agent: String,
    /// Task worked on.
    pub task_id: String,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Whether the attempt succeeded.
    pub success: bool,
    /// When the row was written.
    pub recorded_at: DateTime<Utc>,
}

impl PerformanceRow {
    /// Creates a row stamped now.
    pub fn new(
        agent: impl Into<String>,
        task_id: impl Into<String>,
        duration_ms: u64,
        success: bool,
    ) -> Self {
        Self {
            agent: agent.into(),
            task_id: task_id.into(),
            duration_ms,
            success,
            recorded_at: Utc::now(),
        }
    }
}

/// Aggregate snapshot captured with every checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetrics {
    /// Mean confidence over active assignments that reported one (0.0 if none).
    pub mean_confidence: f64,
    /// Rows in `assigned` or `dispatched`.
    pub active_assignments: usize,
    /// Rows in `completed`.
    pub completed_tasks: usize,
    /// Rows in `failed`.
    pub failed_tasks: usize,
    /// Share of successful performance rows, if any were recorded.
    pub success_rate: Option<f64>,
}

impl CheckpointMetrics {
    /// Computes the aggregate from table contents. Pure.
    pub fn from_rows(tasks: &[TaskRow], performance: &[PerformanceRow]) -> Self {
        let active: Vec<&TaskRow> = tasks.iter().filter(|t| t.status.is_active()).collect();
        let confidences: Vec<f64> = active.iter().filter_map(|t| t.confidence).collect();
        let mean_confidence = if confidences.is_empty() {
            0.0
        } else {
            confidences.iter().sum::<f64>() / confidences.len() as f64
        };

        let success_rate = if performance.is_empty() {
            None
        } else {
            let ok = performance.iter().filter(|p| p.success).count();
            Some(ok as f64 / performance.len() as f64)
        };

        Self {
            mean_confidence,
            active_assignments: active.len(),
            completed_tasks: tasks
                .iter()
                .filter(|t| t.status == TaskState::Completed)
                .count(),
            failed_tasks: tasks.iter().filter(|t| t.status == TaskState::Failed).count(),
            success_rate,
        }
    }
}

/// A named metrics snapshot anchored to a version-control tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Checkpoint id (the name it was created with).
    pub id: String,
    /// Version-control tag it is anchored to.
    pub tag: String,
    /// Metrics at creation time.
    pub metrics: CheckpointMetrics,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
}
