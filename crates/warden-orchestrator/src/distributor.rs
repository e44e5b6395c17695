use crate::accountability::{CompletionHook, Reassigner};
use crate::registry::AgentDirectory;
use crate::reviewer::{AdvisoryReviewer, PlannedPlacement};
use crate::spawner::{SubAgentHandle, SubAgentSpawner};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use warden_agent::{AgentInvoker, InvocationOutput, InvocationRequest};
use warden_core::{
    Agent, Assignment, ExecutionMode, Observer, OrchestrationEvent, Task, WardenError,
    WardenResult,
};
use warden_store::{DurableStore, PerformanceRow, TaskRow, TaskState};

/// `len(description) / 100 + count(dependencies)`.
pub fn complexity_score(task: &Task) -> f64 {
    task.description.chars().count() as f64 / 100.0 + task.dependencies.len() as f64
}

/// The available agent with the largest capability overlap; ties go to the
/// lowest id.
///
/// Agents in `error` or `shutdown` are never chosen. A task that requires
/// capabilities needs an overlap of at least one.
pub fn best_agent<'a>(task: &Task, agents: &'a [Agent]) -> Option<&'a Agent> {
    let needs_match = !task.capabilities_required.is_empty();
    agents
        .iter()
        .filter(|a| a.is_available())
        .map(|a| (a.overlap(&task.capabilities_required), a))
        .filter(|(overlap, _)| !needs_match || *overlap > 0)
        .fold(None, |best: Option<(usize, &Agent)>, (overlap, agent)| match best {
            Some((best_overlap, current))
                if best_overlap > overlap
                    || (best_overlap == overlap && current.id <= agent.id) =>
            {
                Some((best_overlap, current))
            }
            _ => Some((overlap, agent)),
        })
        .map(|(_, agent)| agent)
}

/// Thresholds and timeouts of the distributor.
#[derive(Debug, Clone, PartialEq)]
pub struct DistributorSettings {
    /// Highest score executed shallow.
    pub shallow_max: f64,
    /// Highest score executed without an isolated sub-agent.
    pub deep_max: f64,
    /// Bound on the advisory review.
    pub review_timeout: Duration,
}

impl Default for DistributorSettings {
    fn default() -> Self {
        Self {
            shallow_max: 10.0,
            deep_max: 15.0,
            review_timeout: Duration::from_secs(30),
        }
    }
}

/// Result of one `distribute` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DistributionReport {
    /// Assignments made, keyed by task id.
    pub assignments: HashMap<String, Assignment>,
    /// Tasks that could not be placed, with the reason.
    pub unassigned: Vec<(String, String)>,
    /// Tasks that wanted isolation but run on the primary agent only.
    pub degraded: Vec<String>,
    /// Advisory reviewer note, when one was obtained.
    pub review_note: Option<String>,
}

struct ActiveTask {
    task: Task,
    agent: Agent,
    assignment: Assignment,
    sub_agent: Option<SubAgentHandle>,
}

/// Routes tasks to capability-matched agents.
///
/// Placement is computed from a registry snapshot, optionally reviewed, then
/// committed task by task: sub-agent spawning and store writes happen
/// without holding the assignment lock, and a failure affects only its own
/// task. Callers must serialize operations on the same task id.
pub struct TaskDistributor {
    store: Arc<dyn DurableStore>,
    invoker: Arc<dyn AgentInvoker>,
    spawner: Arc<dyn SubAgentSpawner>,
    reviewer: Option<Arc<dyn AdvisoryReviewer>>,
    observer: Option<Arc<dyn Observer>>,
    settings: DistributorSettings,
    active: RwLock<HashMap<String, ActiveTask>>,
}

impl TaskDistributor {
    /// Creates a distributor. `invoker` should be breaker-guarded.
    pub fn new(
        store: Arc<dyn DurableStore>,
        invoker: Arc<dyn AgentInvoker>,
        spawner: Arc<dyn SubAgentSpawner>,
    ) -> Self {
        Self {
            store,
            invoker,
            spawner,
            reviewer: None,
            observer: None,
            settings: DistributorSettings::default(),
            active: RwLock::new(HashMap::new()),
        }
    }

    /// Replaces thresholds and timeouts.
    pub fn with_settings(mut self, settings: DistributorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Consults `reviewer` before committing a distribution.
    pub fn with_reviewer(mut self, reviewer: Arc<dyn AdvisoryReviewer>) -> Self {
        self.reviewer = Some(reviewer);
        self
    }

    /// Reports assignments and isolation outcomes to `observer`.
    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// The execution mode for `score` under the current thresholds.
    pub fn mode_for(&self, score: f64) -> ExecutionMode {
        ExecutionMode::for_score(score, self.settings.shallow_max, self.settings.deep_max)
    }

    /// The active assignment of `task_id`.
    pub fn assignment(&self, task_id: &str) -> Option<Assignment> {
        self.active.read().get(task_id).map(|a| a.assignment.clone())
    }

    /// Every active assignment, ordered by task id.
    pub fn assignments(&self) -> Vec<Assignment> {
        let mut all: Vec<Assignment> = self
            .active
            .read()
            .values()
            .map(|a| a.assignment.clone())
            .collect();
        all.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        all
    }

    /// Assigns every task to its best agent.
    ///
    /// An unreadable registry fails the whole call with a config error.
    /// Everything else (no capable agent, duplicate, store failure) only
    /// leaves the affected task unassigned.
    pub async fn distribute(
        &self,
        tasks: &[Task],
        directory: &dyn AgentDirectory,
    ) -> WardenResult<DistributionReport> {
        let agents = directory.snapshot().await?;
        let mut report = DistributionReport::default();

        let mut plan: Vec<PlannedPlacement<'_>> = Vec::new();
        for task in tasks {
            if let Err(e) = task.validate() {
                self.unassigned(&mut report, &task.id, e.to_string());
                continue;
            }
            if self.active.read().contains_key(&task.id)
                || plan.iter().any(|p| p.task.id == task.id)
            {
                self.unassigned(&mut report, &task.id, "already assigned".to_string());
                continue;
            }
            match best_agent(task, &agents) {
                Some(agent) => plan.push(PlannedPlacement {
                    task,
                    agent,
                    complexity: complexity_score(task),
                }),
                None => {
                    let reason = format!(
                        "no available agent with capabilities {:?}",
                        task.capabilities_required
                    );
                    self.unassigned(&mut report, &task.id, reason);
                }
            }
        }

        report.review_note = self.review(&plan).await;

        for placement in &plan {
            match self.commit(placement, &mut report).await {
                Ok(assignment) => {
                    report
                        .assignments
                        .insert(assignment.task_id.clone(), assignment);
                }
                Err(e) => self.unassigned(&mut report, &placement.task.id, e.to_string()),
            }
        }

        info!(
            assigned = report.assignments.len(),
            unassigned = report.unassigned.len(),
            degraded = report.degraded.len(),
            "distribution finished"
        );
        Ok(report)
    }

    async fn review(&self, plan: &[PlannedPlacement<'_>]) -> Option<String> {
        let reviewer = self.reviewer.as_ref()?;
        if plan.is_empty() {
            return None;
        }
        match tokio::time::timeout(self.settings.review_timeout, reviewer.review(plan)).await {
            Ok(Ok(note)) => Some(note),
            Ok(Err(e)) => {
                warn!(error = %e, "advisory review unavailable");
                None
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.settings.review_timeout.as_secs(),
                    "advisory review timed out"
                );
                None
            }
        }
    }

    async fn commit(
        &self,
        placement: &PlannedPlacement<'_>,
        report: &mut DistributionReport,
    ) -> WardenResult<Assignment> {
        let task = placement.task;
        let agent = placement.agent;
        let mut mode = self.mode_for(placement.complexity);
        let mut assignment = Assignment::new(&task.id, &agent.id, mode, placement.complexity);

        let mut sub_agent = None;
        if mode.wants_isolation() {
            match self.spawner.spawn(task).await {
                Ok(handle) => {
                    assignment = assignment.with_sub_agent(handle.id);
                    self.emit(OrchestrationEvent::SubAgentSpawned {
                        task_id: task.id.clone(),
                        sub_agent_id: handle.id,
                    });
                    sub_agent = Some(handle);
                }
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "isolation unavailable, using primary agent");
                    mode = ExecutionMode::DeepReasoning;
                    assignment.mode = mode;
                    report.degraded.push(task.id.clone());
                    self.emit(OrchestrationEvent::IsolationDegraded {
                        task_id: task.id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let mut row = TaskRow::assigned(&task.id, &agent.id);
        row.mode = Some(mode);
        row.sub_agent = sub_agent.as_ref().map(|h| h.id.to_string());
        if let Err(e) = self.store.upsert_task(&row).await {
            if let Some(handle) = &sub_agent {
                self.terminate(handle).await;
            }
            return Err(e);
        }

        let inserted = {
            let mut active = self.active.write();
            if active.contains_key(&task.id) {
                false
            } else {
                active.insert(
                    task.id.clone(),
                    ActiveTask {
                        task: task.clone(),
                        agent: agent.clone(),
                        assignment: assignment.clone(),
                        sub_agent: sub_agent.clone(),
                    },
                );
                true
            }
        };
        if !inserted {
            if let Some(handle) = &sub_agent {
                self.terminate(handle).await;
            }
            return Err(WardenError::Distribution("already assigned".into()));
        }

        self.emit(OrchestrationEvent::TaskAssigned {
            task_id: task.id.clone(),
            agent_id: agent.id.clone(),
            mode,
        });
        Ok(assignment)
    }

    /// Sends the task to its agent through the invoker, using the agent id
    /// as breaker target, and records the attempt.
    ///
    /// An open circuit is returned as is and leaves no record; the caller
    /// should retry later.
    pub async fn dispatch(
        &self,
        task_id: &str,
        timeout: Duration,
    ) -> WardenResult<InvocationOutput> {
        let (request, agent_id) = {
            let active = self.active.read();
            let entry = active.get(task_id).ok_or_else(|| {
                WardenError::Distribution(format!("task '{task_id}' has no active assignment"))
            })?;
            let mut request = InvocationRequest::new(
                &entry.agent.id,
                dispatch_prompt(&entry.task, &entry.assignment),
                timeout,
            );
            if let Some(path) = &entry.agent.invocation_path {
                request = request.with_program(path);
            }
            (request, entry.agent.id.clone())
        };

        let started = Instant::now();
        let result = self.invoker.invoke(&request).await;
        let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        if matches!(&result, Err(e) if e.is_retry_later()) {
            debug!(task_id = %task_id, agent = %agent_id, "dispatch deferred, circuit open");
            return result;
        }

        let success = matches!(&result, Ok(out) if out.is_success());
        self.store
            .record_performance(&PerformanceRow::new(&agent_id, task_id, elapsed, success))
            .await?;
        let state = if success {
            TaskState::Dispatched
        } else {
            TaskState::Failed
        };
        self.store.update_task_status(task_id, state).await?;
        info!(task_id = %task_id, agent = %agent_id, duration_ms = elapsed, success, "task dispatched");
        result
    }

    /// Moves `task_id` to the best agent other than `exclude_agent`.
    ///
    /// Mode, complexity and sub-agent carry over. The abandoned agent gets a
    /// failed performance row.
    pub async fn reassign(
        &self,
        task_id: &str,
        exclude_agent: &str,
        directory: &dyn AgentDirectory,
    ) -> WardenResult<Assignment> {
        let (task, previous) = {
            let active = self.active.read();
            let entry = active.get(task_id).ok_or_else(|| {
                WardenError::Distribution(format!("task '{task_id}' has no active assignment"))
            })?;
            (entry.task.clone(), entry.assignment.clone())
        };

        let agents: Vec<Agent> = directory
            .snapshot()
            .await?
            .into_iter()
            .filter(|a| a.id != exclude_agent)
            .collect();
        let agent = best_agent(&task, &agents).cloned().ok_or_else(|| {
            WardenError::Distribution(format!("no alternative agent for task '{task_id}'"))
        })?;

        let held_ms = (Utc::now() - previous.assigned_at)
            .num_milliseconds()
            .max(0);
        self.store
            .record_performance(&PerformanceRow::new(
                &previous.agent_id,
                task_id,
                u64::try_from(held_ms).unwrap_or(0),
                false,
            ))
            .await?;
        self.store
            .update_task_status(task_id, TaskState::Reassigned)
            .await?;

        let mut assignment = Assignment::new(task_id, &agent.id, previous.mode, previous.complexity);
        assignment.sub_agent_id = previous.sub_agent_id;
        let mut row = TaskRow::assigned(task_id, &agent.id);
        row.mode = Some(previous.mode);
        row.sub_agent = previous.sub_agent_id.map(|id| id.to_string());
        self.store.upsert_task(&row).await?;

        if let Some(entry) = self.active.write().get_mut(task_id) {
            entry.agent = agent.clone();
            entry.assignment = assignment.clone();
        }

        info!(task_id = %task_id, from = %previous.agent_id, to = %agent.id, "task reassigned");
        self.emit(OrchestrationEvent::TaskAssigned {
            task_id: task_id.to_string(),
            agent_id: agent.id.clone(),
            mode: assignment.mode,
        });
        Ok(assignment)
    }

    /// Marks `task_id` completed, drops its active assignment and stops its
    /// sub-agent.
    pub async fn release(&self, task_id: &str) -> WardenResult<()> {
        let entry = self.active.write().remove(task_id).ok_or_else(|| {
            WardenError::Distribution(format!("task '{task_id}' has no active assignment"))
        })?;
        if let Some(handle) = &entry.sub_agent {
            self.terminate(handle).await;
        }
        self.store
            .update_task_status(task_id, TaskState::Completed)
            .await?;
        info!(task_id = %task_id, agent = %entry.agent.id, "task released");
        Ok(())
    }

    /// Terminates every outstanding sub-agent. Assignments stay active.
    pub async fn shutdown(&self) -> usize {
        let handles: Vec<SubAgentHandle> = self
            .active
            .write()
            .values_mut()
            .filter_map(|entry| entry.sub_agent.take())
            .collect();
        for handle in &handles {
            self.terminate(handle).await;
        }
        handles.len()
    }

    async fn terminate(&self, handle: &SubAgentHandle) {
        if let Err(e) = self.spawner.terminate(handle).await {
            warn!(task_id = %handle.task_id, sub_agent = %handle.id, error = %e, "sub-agent termination failed");
        }
    }

    fn unassigned(&self, report: &mut DistributionReport, task_id: &str, reason: String) {
        self.emit(OrchestrationEvent::TaskUnassigned {
            task_id: task_id.to_string(),
            reason: reason.clone(),
        });
        report.unassigned.push((task_id.to_string(), reason));
    }

    fn emit(&self, event: OrchestrationEvent) {
        if let Some(observer) = &self.observer {
            observer.on_event(&event);
        }
    }
}

/// Prompt sent to an agent on dispatch.
pub fn dispatch_prompt(task: &Task, assignment: &Assignment) -> String {
    let depth = match assignment.mode {
        ExecutionMode::Shallow => "Work directly and keep the change small.",
        ExecutionMode::DeepReasoning => "Plan carefully before changing anything.",
        ExecutionMode::Isolated => {
            "Plan carefully; an isolated sub-agent is available for side work."
        }
    };
    let mut prompt = format!(
        "Task {} ({}, priority {}): {}\n{depth}",
        task.id, task.task_type, task.priority, task.description
    );
    if !task.dependencies.is_empty() {
        prompt.push_str(&format!("\nDepends on: {}", task.dependencies.join(", ")));
    }
    prompt
}

/// [`Reassigner`] and [`CompletionHook`] that delegate to a
/// [`TaskDistributor`] using a fixed agent directory.
pub struct DistributorReassigner {
    distributor: Arc<TaskDistributor>,
    directory: Arc<dyn AgentDirectory>,
}

impl DistributorReassigner {
    /// Reassigns through `distributor`, choosing agents from `directory`.
    pub fn new(distributor: Arc<TaskDistributor>, directory: Arc<dyn AgentDirectory>) -> Self {
        Self {
            distributor,
            directory,
        }
    }
}

#[async_trait]
impl Reassigner for DistributorReassigner {
    async fn reassign(&self, task_id: &str, from_agent: &str) -> WardenResult<String> {
        let assignment = self
            .distributor
            .reassign(task_id, from_agent, self.directory.as_ref())
            .await?;
        Ok(assignment.agent_id)
    }
}

#[async_trait]
impl CompletionHook for DistributorReassigner {
    async fn on_completed(&self, task_id: &str, _agent_id: &str) -> WardenResult<()> {
        self.distributor.release(task_id).await
    }
}
