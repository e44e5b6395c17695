use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::process::Child;
use tracing::{info, warn};
use uuid::Uuid;
use warden_core::{Task, WardenError, WardenResult};

/// A running isolated sub-agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubAgentHandle {
    /// Handle id, recorded on the assignment.
    pub id: Uuid,
    /// Task the sub-agent works on.
    pub task_id: String,
    /// OS process id, for process-backed sub-agents.
    pub pid: Option<u32>,
    /// Start time.
    pub started_at: DateTime<Utc>,
}

impl SubAgentHandle {
    fn new(task_id: &str, pid: Option<u32>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id: task_id.to_string(),
            pid,
            started_at: Utc::now(),
        }
    }
}

/// Starts and stops isolated execution contexts for high-complexity tasks.
///
/// Spawning may be slow; callers must not hold locks on assignment state
/// while awaiting it.
#[async_trait]
pub trait SubAgentSpawner: Send + Sync {
    /// Starts a fresh context for `task`.
    async fn spawn(&self, task: &Task) -> WardenResult<SubAgentHandle>;
    /// Stops a context. Unknown handles are an error.
    async fn terminate(&self, handle: &SubAgentHandle) -> WardenResult<()>;
}

/// Spawns each sub-agent as a child process.
///
/// The process receives the task through `WARDEN_TASK_ID`,
/// `WARDEN_TASK_TYPE` and `WARDEN_TASK_DESCRIPTION`, and is killed on
/// terminate or when the spawner is dropped.
pub struct ProcessSpawner {
    program: PathBuf,
    args: Vec<String>,
    children: Mutex<HashMap<Uuid, Child>>,
}

impl ProcessSpawner {
    /// Spawns `program` for every isolated task.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            children: Mutex::new(HashMap::new()),
        }
    }

    /// Fixed arguments for every sub-agent.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Number of sub-agents not yet terminated.
    pub fn active(&self) -> usize {
        self.children.lock().len()
    }
}

#[async_trait]
impl SubAgentSpawner for ProcessSpawner {
    async fn spawn(&self, task: &Task) -> WardenResult<SubAgentHandle> {
        let child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .env("WARDEN_TASK_ID", &task.id)
            .env("WARDEN_TASK_TYPE", &task.task_type)
            .env("WARDEN_TASK_DESCRIPTION", &task.description)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                WardenError::Isolation(format!(
                    "failed to start '{}' for task '{}': {e}",
                    self.program.display(),
                    task.id
                ))
            })?;

        let handle = SubAgentHandle::new(&task.id, child.id());
        info!(task_id = %task.id, sub_agent = %handle.id, pid = ?handle.pid, "sub-agent process started");
        self.children.lock().insert(handle.id, child);
        Ok(handle)
    }

    async fn terminate(&self, handle: &SubAgentHandle) -> WardenResult<()> {
        let child = self.children.lock().remove(&handle.id);
        let mut child = child.ok_or_else(|| {
            WardenError::Isolation(format!("unknown sub-agent {}", handle.id))
        })?;
        if let Err(e) = child.kill().await {
            warn!(sub_agent = %handle.id, error = %e, "sub-agent already exited");
        }
        info!(task_id = %handle.task_id, sub_agent = %handle.id, "sub-agent terminated");
        Ok(())
    }
}

/// Simulated spawner for tests and dry runs.
#[derive(Default)]
pub struct InMemorySpawner {
    active: Mutex<HashMap<Uuid, String>>,
    fail: AtomicBool,
    spawned: AtomicUsize,
}

impl InMemorySpawner {
    /// A spawner that always succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// A spawner whose every spawn fails.
    pub fn failing() -> Self {
        let spawner = Self::default();
        spawner.set_failing(true);
        spawner
    }

    /// Toggles forced spawn failure.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Total successful spawns.
    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    /// Task ids of live sub-agents, sorted.
    pub fn active_tasks(&self) -> Vec<String> {
        let mut tasks: Vec<String> = self.active.lock().values().cloned().collect();
        tasks.sort();
        tasks
    }
}

#[async_trait]
impl SubAgentSpawner for InMemorySpawner {
    async fn spawn(&self, task: &Task) -> WardenResult<SubAgentHandle> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(WardenError::Isolation(format!(
                "simulated spawn failure for task '{}'",
                task.id
            )));
        }
        let handle = SubAgentHandle::new(&task.id, None);
        self.active.lock().insert(handle.id, task.id.clone());
        self.spawned.fetch_add(1, Ordering::SeqCst);
        Ok(handle)
    }

    async fn terminate(&self, handle: &SubAgentHandle) -> WardenResult<()> {
        match self.active.lock().remove(&handle.id) {
            Some(_) => Ok(()),
            None => Err(WardenError::Isolation(format!("unknown sub-agent {}", handle.id))),
        }
    }
}

/// Spawner used when no sub-agent program is configured. Every spawn
/// fails, so isolated tasks run degraded on their primary agent.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledSpawner;

#[async_trait]
impl SubAgentSpawner for DisabledSpawner {
    async fn spawn(&self, task: &Task) -> WardenResult<SubAgentHandle> {
        Err(WardenError::Isolation(format!(
            "no sub-agent program configured for task '{}'",
            task.id
        )))
    }

    async fn terminate(&self, handle: &SubAgentHandle) -> WardenResult<()> {
        Err(WardenError::Isolation(format!("unknown sub-agent {}", handle.id)))
    }
}
