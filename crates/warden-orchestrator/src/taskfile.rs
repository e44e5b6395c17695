use crate::evidence::EvidenceRequirement;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use warden_core::{Priority, Task, WardenError, WardenResult};

/// A batch of tasks read from a TOML file with `[[tasks]]` entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskFile {
    /// Entries in file order.
    #[serde(default)]
    pub tasks: Vec<TaskEntry>,
}

/// One `[[tasks]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEntry {
    /// Task id.
    pub id: String,
    /// Task kind.
    #[serde(rename = "type")]
    pub task_type: String,
    /// Description.
    pub description: String,
    /// Priority, `normal` when absent.
    #[serde(default)]
    pub priority: Priority,
    /// Required capabilities.
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    /// Task ids this one depends on.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Hours until the accountability deadline.
    #[serde(default = "default_deadline_hours")]
    pub deadline_hours: f64,
    /// Evidence needed for completion.
    #[serde(default)]
    pub evidence: Vec<EvidenceRequirement>,
}

/// Longest accepted deadline window, ten years.
pub const MAX_DEADLINE_HOURS: f64 = 24.0 * 365.0 * 10.0;

fn default_deadline_hours() -> f64 {
    24.0
}

impl TaskEntry {
    /// The deadline window as a chrono duration, rounded to the second.
    ///
    /// Fails for windows that are not finite, not positive, or longer than
    /// [`MAX_DEADLINE_HOURS`].
    pub fn deadline_window(&self) -> WardenResult<chrono::Duration> {
        let hours = self.deadline_hours;
        if !hours.is_finite() || hours <= 0.0 || hours > MAX_DEADLINE_HOURS {
            return Err(WardenError::Config(format!(
                "task '{}' has deadline_hours {hours}, expected a value in (0, {MAX_DEADLINE_HOURS}]",
                self.id
            )));
        }
        chrono::Duration::try_seconds((hours * 3600.0).round() as i64).ok_or_else(|| {
            WardenError::Config(format!("task '{}' deadline window out of range", self.id))
        })
    }

    /// Builds the task record with a deadline `deadline_hours` from now.
    pub fn to_task(&self) -> WardenResult<Task> {
        let deadline = chrono::Utc::now()
            .checked_add_signed(self.deadline_window()?)
            .ok_or_else(|| {
                WardenError::Config(format!("task '{}' deadline out of range", self.id))
            })?;
        Ok(Task::new(&self.id, &self.task_type, &self.description)?
            .with_capabilities(self.capabilities.iter().cloned())
            .with_dependencies(self.dependencies.iter().cloned())
            .with_priority(self.priority)
            .with_deadline(deadline))
    }
}

impl TaskFile {
    /// Parses task file text.
    ///
    /// Duplicate ids and deadlines outside `(0, MAX_DEADLINE_HOURS]` are
    /// config errors.
    pub fn from_toml_str(raw: &str) -> WardenResult<Self> {
        let file: TaskFile =
            toml::from_str(raw).map_err(|e| WardenError::Config(format!("invalid task file: {e}")))?;

        let mut seen = HashSet::new();
        for entry in &file.tasks {
            if !seen.insert(entry.id.as_str()) {
                return Err(WardenError::Config(format!(
                    "duplicate task id '{}' in task file",
                    entry.id
                )));
            }
            entry.deadline_window()?;
        }
        Ok(file)
    }

    /// Reads and parses a task file.
    pub async fn load(path: impl AsRef<Path>) -> WardenResult<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            WardenError::Config(format!("failed to read task file '{}': {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Task records for every entry.
    pub fn to_tasks(&self) -> WardenResult<Vec<Task>> {
        self.tasks.iter().map(TaskEntry::to_task).collect()
    }

    /// Looks up an entry by task id.
    pub fn entry(&self, id: &str) -> Option<&TaskEntry> {
        self.tasks.iter().find(|e| e.id == id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [[tasks]]
        id = "api-auth"
        type = "feature"
        description = "Add token authentication to the API"
        priority = "high"
        capabilities = ["rust", "api"]
        deadline_hours = 8

        [[tasks.evidence]]
        type = "commit"
        validator = "commit_hash"

        [[tasks.evidence]]
        type = "notes"
        required = false

        [[tasks]]
        id = "docs"
        type = "docs"
        description = "Document the auth flow"
        dependencies = ["api-auth"]
    "#;

    #[test]
    fn test_parse_and_convert() {
        let file = TaskFile::from_toml_str(SAMPLE).unwrap();
        assert_eq!(file.tasks.len(), 2);

        let auth = file.entry("api-auth").unwrap();
        assert_eq!(auth.priority, Priority::High);
        assert_eq!(auth.deadline_window().unwrap(), chrono::Duration::hours(8));
        assert_eq!(auth.evidence.len(), 2);
        assert!(!auth.evidence[1].required);

        let docs = file.entry("docs").unwrap();
        assert_eq!(docs.deadline_hours, 24.0);

        let tasks = file.to_tasks().unwrap();
        assert_eq!(tasks[0].capabilities_required.len(), 2);
        assert_eq!(tasks[1].dependencies, vec!["api-auth"]);
        assert!(tasks[0].deadline.is_some());
    }

    #[test]
    fn test_rejects_duplicates_and_bad_deadlines() {
        let dup = r#"
            [[tasks]]
            id = "a"
            type = "f"
            description = "x"
            [[tasks]]
            id = "a"
            type = "f"
            description = "y"
        "#;
        assert!(matches!(TaskFile::from_toml_str(dup), Err(WardenError::Config(_))));

        let zero = r#"
            [[tasks]]
            id = "a"
            type = "f"
            description = "x"
            deadline_hours = 0
        "#;
        assert!(TaskFile::from_toml_str(zero).is_err());
    }

    #[test]
    fn test_rejects_unbounded_deadlines() {
        for hours in ["1e12", "inf", "nan", "87601"] {
            let raw = format!(
                "[[tasks]]\nid = \"a\"\ntype = \"f\"\ndescription = \"x\"\ndeadline_hours = {hours}\n"
            );
            assert!(
                matches!(TaskFile::from_toml_str(&raw), Err(WardenError::Config(_))),
                "deadline_hours = {hours} should be rejected"
            );
        }

        let entry = TaskEntry {
            id: "a".into(),
            task_type: "f".into(),
            description: "x".into(),
            priority: Priority::Normal,
            capabilities: BTreeSet::new(),
            dependencies: Vec::new(),
            deadline_hours: 1e12,
            evidence: Vec::new(),
        };
        assert!(matches!(entry.to_task(), Err(WardenError::Config(_))));

        let longest = TaskEntry {
            deadline_hours: MAX_DEADLINE_HOURS,
            ..entry
        };
        assert!(longest.to_task().unwrap().deadline.is_some());
    }

    #[test]
    fn test_empty_id_fails_conversion() {
        let file = TaskFile::from_toml_str(
            r#"
            [[tasks]]
            id = ""
            type = "f"
            description = "x"
            "#,
        )
        .unwrap();
        assert!(file.to_tasks().is_err());
    }
}
