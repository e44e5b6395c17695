use crate::config::AccountabilityConfig;
use crate::evidence::{EvidenceRequirement, EvidenceSubmission, ValidatorSet};
use crate::notify::Notifier;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};
use warden_core::{EscalationLevel, Observer, OrchestrationEvent, WardenError, WardenResult};

/// Status of an accountability record. `Completed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    /// Waiting for evidence.
    Assigned,
    /// Every required evidence type was submitted.
    Completed,
}

/// Corrective actions enforcement can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnforcementKind {
    /// Warning notification to the responsible agent.
    Warning,
    /// Escalation to the coordinator.
    Escalation,
    /// Move of the task to a different agent.
    Reassignment,
}

impl EnforcementKind {
    /// Lowercase name used in events and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            EnforcementKind::Warning => "warning",
            EnforcementKind::Escalation => "escalation",
            EnforcementKind::Reassignment => "reassignment",
        }
    }
}

/// Deadline-bound accountability for one task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountabilityRecord {
    /// Task id.
    pub task_id: String,
    /// Responsible agent.
    pub agent_id: String,
    /// Task description, repeated in notifications.
    pub description: String,
    /// Start of the current deadline window.
    pub assigned_time: DateTime<Utc>,
    /// End of the current deadline window. Always after `assigned_time`.
    pub deadline: DateTime<Utc>,
    /// Evidence needed for completion.
    pub evidence_requirements: Vec<EvidenceRequirement>,
    /// Append-only evidence log.
    pub evidence_submitted: Vec<EvidenceSubmission>,
    /// Record status.
    pub status: RecordStatus,
    /// Highest escalation reached since assignment or the last reset.
    pub escalation_level: EscalationLevel,
    /// Times the task was moved to another agent.
    pub reassign_count: u32,
    /// Enforcement actions taken since assignment or the last reset.
    pub actions_taken: BTreeSet<EnforcementKind>,
}

impl AccountabilityRecord {
    /// Distinct required evidence types.
    pub fn required_types(&self) -> BTreeSet<&str> {
        self.evidence_requirements
            .iter()
            .filter(|r| r.required)
            .map(|r| r.evidence_type.as_str())
            .collect()
    }

    /// Required types with at least one accepted submission.
    pub fn satisfied_types(&self) -> BTreeSet<&str> {
        let required = self.required_types();
        self.evidence_submitted
            .iter()
            .filter(|s| s.accepted)
            .map(|s| s.evidence_type.as_str())
            .filter(|t| required.contains(t))
            .collect()
    }

    /// `100 * satisfied / required`; 100 when nothing is required.
    pub fn progress_percentage(&self) -> f64 {
        let required = self.required_types().len();
        if required == 0 {
            return 100.0;
        }
        100.0 * self.satisfied_types().len() as f64 / required as f64
    }

    /// Whether the record is past its deadline and not completed.
    pub fn is_overdue(&self) -> bool {
        self.is_overdue_at(Utc::now())
    }

    /// [`is_overdue`](Self::is_overdue) evaluated at `now`.
    pub fn is_overdue_at(&self, now: DateTime<Utc>) -> bool {
        now > self.deadline && self.status != RecordStatus::Completed
    }

    /// Share of the deadline window elapsed at `now`; above 1.0 once overdue.
    pub fn elapsed_fraction(&self, now: DateTime<Utc>) -> f64 {
        let window = (self.deadline - self.assigned_time).num_milliseconds();
        if window <= 0 {
            return f64::INFINITY;
        }
        (now - self.assigned_time).num_milliseconds() as f64 / window as f64
    }

    fn window(&self) -> Duration {
        self.deadline - self.assigned_time
    }
}

/// What a single evidence submission changed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SubmissionOutcome {
    /// Whether the payload passed its validator.
    pub accepted: bool,
    /// Progress after the submission.
    pub progress: f64,
    /// Whether the record is completed.
    pub completed: bool,
}

/// Task ids of non-completed records, bucketed by escalation level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AccountabilityReport {
    /// Less than half of the window used.
    pub on_track: Vec<String>,
    /// 50% to 80% used.
    pub warning: Vec<String>,
    /// 80% to 100% used.
    pub critical: Vec<String>,
    /// Overdue.
    pub emergency: Vec<String>,
}

impl AccountabilityReport {
    /// Records classified.
    pub fn total(&self) -> usize {
        self.on_track.len() + self.warning.len() + self.critical.len() + self.emergency.len()
    }

    fn bucket(&mut self, level: EscalationLevel) -> &mut Vec<String> {
        match level {
            EscalationLevel::OnTrack => &mut self.on_track,
            EscalationLevel::Warning => &mut self.warning,
            EscalationLevel::Critical => &mut self.critical,
            EscalationLevel::Emergency => &mut self.emergency,
        }
    }
}

/// Counts of the actions one enforcement pass took.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EnforcementReport {
    /// Warnings delivered.
    pub warnings: usize,
    /// Escalations delivered.
    pub escalations: usize,
    /// Tasks moved to another agent.
    pub reassignments: usize,
    /// Actions that failed (notification or reassignment).
    pub failures: usize,
}

/// Moves a task away from an agent. Implemented by the distributor.
#[async_trait]
pub trait Reassigner: Send + Sync {
    /// Reassigns `task_id` to an agent other than `from_agent` and returns
    /// the new agent id.
    async fn reassign(&self, task_id: &str, from_agent: &str) -> WardenResult<String>;
}

/// Told when a record completes. Implemented by the distributor, which
/// releases the assignment.
#[async_trait]
pub trait CompletionHook: Send + Sync {
    /// Called once, after `task_id` held by `agent_id` reached `completed`.
    async fn on_completed(&self, task_id: &str, agent_id: &str) -> WardenResult<()>;
}

/// Thresholds of the enforcement policy.
#[derive(Debug, Clone, PartialEq)]
pub struct EnforcementPolicy {
    /// Elapsed fraction beyond which emergencies are reassigned.
    pub reassign_after_fraction: f64,
    /// Reassignments allowed per record.
    pub max_reassignments: u32,
    /// Recipient of escalations.
    pub coordinator_id: String,
}

impl Default for EnforcementPolicy {
    fn default() -> Self {
        Self::from(&AccountabilityConfig::default())
    }
}

impl From<&AccountabilityConfig> for EnforcementPolicy {
    fn from(config: &AccountabilityConfig) -> Self {
        Self {
            reassign_after_fraction: config.reassign_after_fraction,
            max_reassignments: config.max_reassignments,
            coordinator_id: config.coordinator_id.clone(),
        }
    }
}

impl EnforcementPolicy {
    /// The next action for `record` at elapsed fraction `fraction`, if any.
    pub fn next_action(
        &self,
        record: &AccountabilityRecord,
        fraction: f64,
    ) -> Option<EnforcementKind> {
        let fresh = |kind: EnforcementKind| (!record.actions_taken.contains(&kind)).then_some(kind);
        match record.escalation_level {
            EscalationLevel::Critical => fresh(EnforcementKind::Warning),
            EscalationLevel::Emergency if fraction < self.reassign_after_fraction => {
                fresh(EnforcementKind::Escalation)
            }
            EscalationLevel::Emergency => {
                if record.reassign_count < self.max_reassignments {
                    fresh(EnforcementKind::Reassignment).or_else(|| fresh(EnforcementKind::Escalation))
                } else {
                    fresh(EnforcementKind::Escalation)
                }
            }
            _ => None,
        }
    }
}

/// An action reserved on a record, carried outside its lock.
#[derive(Debug, Clone)]
struct PlannedAction {
    kind: EnforcementKind,
    task_id: String,
    agent_id: String,
    description: String,
    deadline: DateTime<Utc>,
    fraction: f64,
}

/// Tracks deadline-bound accountability for distributed tasks.
///
/// Each record sits behind its own lock, so evidence submission never waits
/// on a sweep for longer than one record update. No lock is held across
/// notification or reassignment calls.
pub struct AccountabilityTracker {
    records: RwLock<HashMap<String, Arc<Mutex<AccountabilityRecord>>>>,
    validators: ValidatorSet,
    notifier: Arc<dyn Notifier>,
    reassigner: Option<Arc<dyn Reassigner>>,
    completion: Option<Arc<dyn CompletionHook>>,
    policy: EnforcementPolicy,
    observer: Option<Arc<dyn Observer>>,
}

impl AccountabilityTracker {
    /// Creates a tracker sending notifications through `notifier`.
    pub fn new(validators: ValidatorSet, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            validators,
            notifier,
            reassigner: None,
            completion: None,
            policy: EnforcementPolicy::default(),
            observer: None,
        }
    }

    /// Enables reassignment through `reassigner`.
    pub fn with_reassigner(mut self, reassigner: Arc<dyn Reassigner>) -> Self {
        self.reassigner = Some(reassigner);
        self
    }

    /// Reports completed records to `hook`.
    pub fn with_completion_hook(mut self, hook: Arc<dyn CompletionHook>) -> Self {
        self.completion = Some(hook);
        self
    }

    /// Replaces the enforcement policy.
    pub fn with_policy(mut self, policy: EnforcementPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Reports escalations and enforcement actions to `observer`.
    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Validators applied to evidence submissions.
    pub fn validators(&self) -> &ValidatorSet {
        &self.validators
    }

    /// Opens a record with `status = assigned` and deadline
    /// `now + deadline_duration`.
    pub fn assign(
        &self,
        task_id: &str,
        agent_id: &str,
        description: &str,
        deadline_duration: Duration,
        evidence_requirements: Vec<EvidenceRequirement>,
    ) -> WardenResult<AccountabilityRecord> {
        self.assign_at(
            task_id,
            agent_id,
            description,
            deadline_duration,
            evidence_requirements,
            Utc::now(),
        )
    }

    /// [`assign`](Self::assign) with an explicit assignment time.
    pub fn assign_at(
        &self,
        task_id: &str,
        agent_id: &str,
        description: &str,
        deadline_duration: Duration,
        evidence_requirements: Vec<EvidenceRequirement>,
        assigned_time: DateTime<Utc>,
    ) -> WardenResult<AccountabilityRecord> {
        if deadline_duration <= Duration::zero() {
            return Err(WardenError::Accountability(format!(
                "deadline for task '{task_id}' must be in the future"
            )));
        }
        let deadline = assigned_time
            .checked_add_signed(deadline_duration)
            .ok_or_else(|| {
                WardenError::Accountability(format!(
                    "deadline for task '{task_id}' is out of range"
                ))
            })?;
        self.validators.check_requirements(&evidence_requirements)?;

        let record = AccountabilityRecord {
            task_id: task_id.to_string(),
            agent_id: agent_id.to_string(),
            description: description.to_string(),
            assigned_time,
            deadline,
            evidence_requirements,
            evidence_submitted: Vec::new(),
            status: RecordStatus::Assigned,
            escalation_level: EscalationLevel::OnTrack,
            reassign_count: 0,
            actions_taken: BTreeSet::new(),
        };

        let mut records = self.records.write();
        if let Some(existing) = records.get(task_id) {
            if existing.lock().status == RecordStatus::Assigned {
                return Err(WardenError::Accountability(format!(
                    "task '{task_id}' is already tracked"
                )));
            }
        }
        records.insert(task_id.to_string(), Arc::new(Mutex::new(record.clone())));
        info!(task_id = %task_id, agent = %agent_id, deadline = %record.deadline, "accountability assigned");
        Ok(record)
    }

    fn record(&self, task_id: &str) -> WardenResult<Arc<Mutex<AccountabilityRecord>>> {
        self.records
            .read()
            .get(task_id)
            .cloned()
            .ok_or_else(|| WardenError::Accountability(format!("unknown task '{task_id}'")))
    }

    fn snapshot(&self) -> Vec<(String, Arc<Mutex<AccountabilityRecord>>)> {
        let mut all: Vec<_> = self
            .records
            .read()
            .iter()
            .map(|(id, r)| (id.clone(), Arc::clone(r)))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Appends evidence and completes the record once every required type
    /// has an accepted submission.
    ///
    /// The completion hook runs after the record lock is released; its
    /// failure is logged and does not fail the submission.
    pub async fn submit_evidence(
        &self,
        task_id: &str,
        evidence_type: &str,
        payload: &str,
    ) -> WardenResult<SubmissionOutcome> {
        self.submit_evidence_at(task_id, evidence_type, payload, Utc::now())
            .await
    }

    /// [`submit_evidence`](Self::submit_evidence) at an explicit time.
    pub async fn submit_evidence_at(
        &self,
        task_id: &str,
        evidence_type: &str,
        payload: &str,
        now: DateTime<Utc>,
    ) -> WardenResult<SubmissionOutcome> {
        let (outcome, completed_by) = self.append_evidence(task_id, evidence_type, payload, now)?;

        if let (Some(agent_id), Some(hook)) = (completed_by, &self.completion) {
            if let Err(e) = hook.on_completed(task_id, &agent_id).await {
                warn!(task_id = %task_id, agent = %agent_id, error = %e, "completion hook failed");
            }
        }
        Ok(outcome)
    }

    /// Appends under the record lock. Returns the agent id when this
    /// submission completed the record.
    fn append_evidence(
        &self,
        task_id: &str,
        evidence_type: &str,
        payload: &str,
        now: DateTime<Utc>,
    ) -> WardenResult<(SubmissionOutcome, Option<String>)> {
        let record = self.record(task_id)?;
        let mut r = record.lock();
        let accepted = self
            .validators
            .accepts(&r.evidence_requirements, evidence_type, payload);
        r.evidence_submitted.push(EvidenceSubmission {
            evidence_type: evidence_type.to_string(),
            payload: payload.to_string(),
            time: now,
            accepted,
        });

        let progress = r.progress_percentage();
        let has_accepted = r.evidence_submitted.iter().any(|s| s.accepted);
        let mut completed_by = None;
        if r.status == RecordStatus::Assigned && progress >= 100.0 && has_accepted {
            r.status = RecordStatus::Completed;
            r.escalation_level = EscalationLevel::OnTrack;
            completed_by = Some(r.agent_id.clone());
            info!(task_id = %task_id, agent = %r.agent_id, "task completed with evidence");
        } else if !accepted {
            warn!(task_id = %task_id, evidence_type = %evidence_type, "evidence rejected by validator");
        }

        let outcome = SubmissionOutcome {
            accepted,
            progress,
            completed: r.status == RecordStatus::Completed,
        };
        Ok((outcome, completed_by))
    }

    /// A copy of the record for `task_id`.
    pub fn get(&self, task_id: &str) -> Option<AccountabilityRecord> {
        self.records.read().get(task_id).map(|r| r.lock().clone())
    }

    /// Copies of every record, ordered by task id.
    pub fn records(&self) -> Vec<AccountabilityRecord> {
        self.snapshot()
            .into_iter()
            .map(|(_, r)| r.lock().clone())
            .collect()
    }

    /// Progress of `task_id`.
    pub fn progress_percentage(&self, task_id: &str) -> WardenResult<f64> {
        Ok(self.record(task_id)?.lock().progress_percentage())
    }

    /// Whether `task_id` is overdue.
    pub fn is_overdue(&self, task_id: &str) -> WardenResult<bool> {
        self.is_overdue_at(task_id, Utc::now())
    }

    /// [`is_overdue`](Self::is_overdue) at `now`.
    pub fn is_overdue_at(&self, task_id: &str, now: DateTime<Utc>) -> WardenResult<bool> {
        Ok(self.record(task_id)?.lock().is_overdue_at(now))
    }

    /// Classifies every non-completed record, raising (never lowering) its
    /// escalation level.
    pub fn check_accountability(&self) -> AccountabilityReport {
        self.check_accountability_at(Utc::now())
    }

    /// [`check_accountability`](Self::check_accountability) at `now`.
    pub fn check_accountability_at(&self, now: DateTime<Utc>) -> AccountabilityReport {
        let mut report = AccountabilityReport::default();
        for (task_id, record) in self.snapshot() {
            if let Some(level) = self.raise_level(&task_id, &record, now) {
                report.bucket(level).push(task_id);
            }
        }
        report
    }

    fn raise_level(
        &self,
        task_id: &str,
        record: &Mutex<AccountabilityRecord>,
        now: DateTime<Utc>,
    ) -> Option<EscalationLevel> {
        let (level, raised) = {
            let mut r = record.lock();
            if r.status == RecordStatus::Completed {
                return None;
            }
            let computed = EscalationLevel::from_elapsed_fraction(r.elapsed_fraction(now));
            let previous = r.escalation_level;
            if computed > previous {
                r.escalation_level = computed;
                (computed, Some(previous))
            } else {
                (previous, None)
            }
        };
        if let Some(from) = raised {
            self.emit(OrchestrationEvent::EscalationChanged {
                task_id: task_id.to_string(),
                from,
                to: level,
            });
        }
        Some(level)
    }

    /// Explicitly clears the escalation level and the actions taken.
    pub fn reset_escalation(&self, task_id: &str) -> WardenResult<()> {
        let record = self.record(task_id)?;
        let mut r = record.lock();
        r.escalation_level = EscalationLevel::OnTrack;
        r.actions_taken.clear();
        debug!(task_id = %task_id, "escalation reset");
        Ok(())
    }

    /// Takes corrective action on critical and emergency records.
    pub async fn enforce_accountability(&self) -> EnforcementReport {
        self.enforce_accountability_at(Utc::now()).await
    }

    /// [`enforce_accountability`](Self::enforce_accountability) at `now`.
    ///
    /// A failing action is counted and logged; it never stops the pass.
    pub async fn enforce_accountability_at(&self, now: DateTime<Utc>) -> EnforcementReport {
        let mut report = EnforcementReport::default();

        for (task_id, record) in self.snapshot() {
            if self.raise_level(&task_id, &record, now).is_none() {
                continue;
            }

            let planned = {
                let mut r = record.lock();
                let fraction = r.elapsed_fraction(now);
                let action = if r.escalation_level.needs_enforcement() {
                    self.policy.next_action(&r, fraction)
                } else {
                    None
                };
                if let Some(kind) = action {
                    r.actions_taken.insert(kind);
                }
                action.map(|kind| PlannedAction {
                    kind,
                    task_id: task_id.clone(),
                    agent_id: r.agent_id.clone(),
                    description: r.description.clone(),
                    deadline: r.deadline,
                    fraction,
                })
            };
            let Some(action) = planned else {
                continue;
            };

            match action.kind {
                EnforcementKind::Warning => {
                    let message = format!(
                        "Task '{}' ({}) has used {:.0}% of its time; deadline {}.",
                        action.task_id,
                        action.description,
                        action.fraction * 100.0,
                        action.deadline
                    );
                    self.notify(&mut report, &action, &action.agent_id, &message)
                        .await;
                }
                EnforcementKind::Escalation => {
                    self.escalate(&mut report, &action).await;
                }
                EnforcementKind::Reassignment => {
                    self.reassign(&mut report, &record, &action, now).await;
                }
            }
        }

        if report != EnforcementReport::default() {
            info!(
                warnings = report.warnings,
                escalations = report.escalations,
                reassignments = report.reassignments,
                failures = report.failures,
                "enforcement pass"
            );
        }
        report
    }

    async fn reassign(
        &self,
        report: &mut EnforcementReport,
        record: &Mutex<AccountabilityRecord>,
        action: &PlannedAction,
        now: DateTime<Utc>,
    ) {
        if record.lock().status == RecordStatus::Completed {
            debug!(task_id = %action.task_id, "completed before reassignment");
            return;
        }
        let reassigned = match &self.reassigner {
            Some(reassigner) => reassigner.reassign(&action.task_id, &action.agent_id).await,
            None => Err(WardenError::Accountability("no reassigner configured".into())),
        };

        match reassigned {
            Ok(new_agent) => {
                if !self.apply_reassignment(record, &action.agent_id, &new_agent, now) {
                    debug!(task_id = %action.task_id, agent = %new_agent, "record moved on, reassignment not applied");
                    return;
                }
                report.reassignments += 1;
                self.emit_action(action);
                let message = format!(
                    "Task '{}' ({}) was reassigned to you from '{}'.",
                    action.task_id, action.description, action.agent_id
                );
                if let Err(e) = self.notifier.send(&new_agent, &message).await {
                    warn!(task_id = %action.task_id, agent = %new_agent, error = %e, "reassignment notice not delivered");
                }
            }
            Err(_) if record.lock().status == RecordStatus::Completed => {
                debug!(task_id = %action.task_id, "completed during reassignment");
            }
            Err(e) => {
                warn!(task_id = %action.task_id, agent = %action.agent_id, error = %e, "reassignment failed, escalating");
                report.failures += 1;
                if record.lock().actions_taken.insert(EnforcementKind::Escalation) {
                    let escalation = PlannedAction {
                        kind: EnforcementKind::Escalation,
                        ..action.clone()
                    };
                    self.escalate(report, &escalation).await;
                }
            }
        }
    }

    async fn escalate(&self, report: &mut EnforcementReport, action: &PlannedAction) {
        let message = format!(
            "Task '{}' ({}) held by '{}' missed its deadline {}.",
            action.task_id, action.description, action.agent_id, action.deadline
        );
        let coordinator = self.policy.coordinator_id.clone();
        self.notify(report, action, &coordinator, &message).await;
    }

    async fn notify(
        &self,
        report: &mut EnforcementReport,
        action: &PlannedAction,
        recipient: &str,
        message: &str,
    ) {
        match self.notifier.send(recipient, message).await {
            Ok(()) => {
                match action.kind {
                    EnforcementKind::Warning => report.warnings += 1,
                    EnforcementKind::Escalation => report.escalations += 1,
                    EnforcementKind::Reassignment => report.reassignments += 1,
                }
                self.emit_action(action);
            }
            Err(e) => {
                report.failures += 1;
                warn!(
                    task_id = %action.task_id,
                    recipient = %recipient,
                    action = action.kind.as_str(),
                    error = %e,
                    "notification failed"
                );
            }
        }
    }

    fn apply_reassignment(
        &self,
        record: &Mutex<AccountabilityRecord>,
        old_agent: &str,
        new_agent: &str,
        now: DateTime<Utc>,
    ) -> bool {
        let mut r = record.lock();
        if r.agent_id != old_agent || r.status == RecordStatus::Completed {
            return false;
        }
        let window = r.window();
        r.agent_id = new_agent.to_string();
        r.assigned_time = now;
        r.deadline = now.checked_add_signed(window).unwrap_or(DateTime::<Utc>::MAX_UTC);
        r.escalation_level = EscalationLevel::OnTrack;
        r.actions_taken.clear();
        r.reassign_count += 1;
        info!(task_id = %r.task_id, from = %old_agent, to = %new_agent, deadline = %r.deadline, "task reassigned");
        true
    }

    fn emit_action(&self, action: &PlannedAction) {
        self.emit(OrchestrationEvent::EnforcementAction {
            task_id: action.task_id.clone(),
            agent_id: action.agent_id.clone(),
            action: action.kind.as_str().to_string(),
        });
    }

    fn emit(&self, event: OrchestrationEvent) {
        if let Some(observer) = &self.observer {
            observer.on_event(&event);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::notify::ChannelNotifier;
    use std::sync::atomic::{AtomicBool, Ordering};
    use warden_core::CollectingObserver;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn tracker() -> AccountabilityTracker {
        let (notifier, _rx) = ChannelNotifier::channel(64);
        AccountabilityTracker::new(ValidatorSet::with_builtins().unwrap(), Arc::new(notifier))
    }

    fn commit_and_test() -> Vec<EvidenceRequirement> {
        vec![
            EvidenceRequirement::required("commit", "commit hash").with_validator("commit_hash"),
            EvidenceRequirement::required("test", "passing test run"),
        ]
    }

    struct FixedReassigner {
        to: &'static str,
        fail: AtomicBool,
    }

    #[async_trait]
    impl Reassigner for FixedReassigner {
        async fn reassign(&self, task_id: &str, from_agent: &str) -> WardenResult<String> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(WardenError::Distribution(format!(
                    "no agent besides {from_agent} for {task_id}"
                )));
            }
            Ok(self.to.to_string())
        }
    }

    /// Hands out a fresh agent id on every call.
    #[derive(Default)]
    struct RotatingReassigner {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl Reassigner for RotatingReassigner {
        async fn reassign(&self, _: &str, _: &str) -> WardenResult<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("relief-{n}"))
        }
    }

    /// Remembers who held each task when it completed.
    #[derive(Default)]
    struct CompletionLog {
        completed: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl CompletionHook for CompletionLog {
        async fn on_completed(&self, task_id: &str, agent_id: &str) -> WardenResult<()> {
            self.completed
                .lock()
                .push((task_id.to_string(), agent_id.to_string()));
            if self.fail {
                return Err(WardenError::Distribution(format!("'{task_id}' not active")));
            }
            Ok(())
        }
    }

    struct DownNotifier;

    #[async_trait]
    impl Notifier for DownNotifier {
        async fn send(&self, _: &str, _: &str) -> WardenResult<()> {
            Err(WardenError::Transport("mail relay down".into()))
        }
    }

    #[tokio::test]
    async fn test_commit_then_test_completes() {
        let tracker = tracker();
        let record = tracker
            .assign("t1", "backend-dev", "OAuth callback", Duration::hours(2), commit_and_test())
            .unwrap();
        assert_eq!(record.status, RecordStatus::Assigned);
        assert!(record.deadline > record.assigned_time);

        let out = tracker.submit_evidence("t1", "commit", "a1b2c3d4").await.unwrap();
        assert!(out.accepted);
        assert_eq!(out.progress, 50.0);
        assert!(!out.completed);
        assert_eq!(tracker.get("t1").unwrap().status, RecordStatus::Assigned);

        let out = tracker.submit_evidence("t1", "test", "42 passed").await.unwrap();
        assert_eq!(out.progress, 100.0);
        assert!(out.completed);
        assert_eq!(tracker.get("t1").unwrap().status, RecordStatus::Completed);
    }

    #[tokio::test]
    async fn test_duplicates_and_rejections_do_not_inflate_progress() {
        let tracker = tracker();
        tracker
            .assign("t1", "a", "x", Duration::hours(1), commit_and_test())
            .unwrap();

        let mut last = 0.0;
        for (kind, payload) in [
            ("commit", "not-a-hash"),
            ("commit", "deadbeef"),
            ("commit", "cafebabe"),
            ("notes", "extra"),
            ("test", "ok"),
        ] {
            let out = tracker.submit_evidence("t1", kind, payload).await.unwrap();
            assert!(out.progress >= last);
            last = out.progress;
            if payload == "not-a-hash" {
                assert!(!out.accepted);
                assert_eq!(out.progress, 0.0);
            }
        }
        assert_eq!(last, 100.0);

        let record = tracker.get("t1").unwrap();
        assert_eq!(record.evidence_submitted.len(), 5);
        assert_eq!(record.progress_percentage(), 100.0);
    }

    #[tokio::test]
    async fn test_assign_errors() {
        let tracker = tracker();
        let bad = vec![EvidenceRequirement::required("commit", "").with_validator("gpg")];
        assert!(matches!(
            tracker.assign("t1", "a", "x", Duration::hours(1), bad),
            Err(WardenError::Config(_))
        ));
        assert!(matches!(
            tracker.assign("t1", "a", "x", Duration::zero(), vec![]),
            Err(WardenError::Accountability(_))
        ));
        assert!(matches!(
            tracker.assign("t1", "a", "x", Duration::MAX, vec![]),
            Err(WardenError::Accountability(_))
        ));
        tracker.assign("t1", "a", "x", Duration::hours(1), vec![]).unwrap();
        assert!(tracker.assign("t1", "b", "x", Duration::hours(1), vec![]).is_err());
        assert!(matches!(
            tracker.submit_evidence("ghost", "commit", "abc").await,
            Err(WardenError::Accountability(_))
        ));
    }

    #[test]
    fn test_past_deadline_is_overdue_emergency() {
        let tracker = tracker();
        let start = t0();
        tracker
            .assign_at("t1", "a", "x", Duration::hours(1), commit_and_test(), start)
            .unwrap();
        let now = start + Duration::hours(2);

        assert!(tracker.is_overdue_at("t1", now).unwrap());
        let report = tracker.check_accountability_at(now);
        assert_eq!(report.emergency, vec!["t1"]);
        assert_eq!(report.total(), 1);
    }

    #[test]
    fn test_buckets_by_elapsed_fraction() {
        let tracker = tracker();
        let start = t0();
        for (id, hours_ago) in [("a", 1), ("b", 6), ("c", 9), ("d", 11)] {
            tracker
                .assign_at(id, "x", "", Duration::hours(10), vec![], start - Duration::hours(hours_ago))
                .unwrap();
        }
        let report = tracker.check_accountability_at(start);
        assert_eq!(report.on_track, vec!["a"]);
        assert_eq!(report.warning, vec!["b"]);
        assert_eq!(report.critical, vec!["c"]);
        assert_eq!(report.emergency, vec!["d"]);
    }

    #[test]
    fn test_escalation_never_regresses_until_reset() {
        let observer = Arc::new(CollectingObserver::new());
        let tracker = tracker().with_observer(observer.clone());
        let start = t0();
        tracker
            .assign_at("t1", "a", "x", Duration::hours(10), commit_and_test(), start)
            .unwrap();

        tracker.check_accountability_at(start + Duration::hours(9));
        assert_eq!(tracker.get("t1").unwrap().escalation_level, EscalationLevel::Critical);

        let report = tracker.check_accountability_at(start + Duration::hours(1));
        assert_eq!(report.critical, vec!["t1"]);
        assert_eq!(tracker.get("t1").unwrap().escalation_level, EscalationLevel::Critical);
        assert_eq!(observer.len(), 1);

        tracker.reset_escalation("t1").unwrap();
        assert_eq!(tracker.get("t1").unwrap().escalation_level, EscalationLevel::OnTrack);
    }

    #[tokio::test]
    async fn test_completion_clears_escalation_and_leaves_report() {
        let tracker = tracker();
        let start = t0();
        tracker
            .assign_at("t1", "a", "x", Duration::hours(1), commit_and_test(), start)
            .unwrap();
        tracker.check_accountability_at(start + Duration::hours(3));
        tracker.submit_evidence("t1", "commit", "abcdef1").await.unwrap();
        tracker.submit_evidence("t1", "test", "ok").await.unwrap();

        let record = tracker.get("t1").unwrap();
        assert_eq!(record.escalation_level, EscalationLevel::OnTrack);
        assert!(!record.is_overdue_at(start + Duration::hours(3)));
        assert_eq!(tracker.check_accountability_at(start + Duration::hours(3)).total(), 0);
    }

    #[tokio::test]
    async fn test_enforcement_ladder() {
        let (notifier, mut rx) = ChannelNotifier::channel(64);
        let reassigner = Arc::new(FixedReassigner {
            to: "backup-dev",
            fail: AtomicBool::new(false),
        });
        let tracker = AccountabilityTracker::new(ValidatorSet::with_builtins().unwrap(), Arc::new(notifier))
            .with_reassigner(reassigner);
        let start = t0();
        tracker
            .assign_at("t1", "backend-dev", "OAuth", Duration::hours(10), vec![], start)
            .unwrap();

        // 90%: warning to the agent, once.
        let r = tracker.enforce_accountability_at(start + Duration::hours(9)).await;
        assert_eq!(r.warnings, 1);
        assert_eq!(rx.recv().await.unwrap().recipient, "backend-dev");
        let r = tracker.enforce_accountability_at(start + Duration::hours(9)).await;
        assert_eq!(r, EnforcementReport::default());

        // 120%: escalation to the coordinator.
        let r = tracker.enforce_accountability_at(start + Duration::hours(12)).await;
        assert_eq!(r.escalations, 1);
        assert_eq!(rx.recv().await.unwrap().recipient, "coordinator");

        // 160%: reassignment with a fresh deadline window.
        let now = start + Duration::hours(16);
        let r = tracker.enforce_accountability_at(now).await;
        assert_eq!(r.reassignments, 1);
        let record = tracker.get("t1").unwrap();
        assert_eq!(record.agent_id, "backup-dev");
        assert_eq!(record.assigned_time, now);
        assert_eq!(record.deadline, now + Duration::hours(10));
        assert_eq!(record.escalation_level, EscalationLevel::OnTrack);
        assert_eq!(record.reassign_count, 1);
        assert_eq!(rx.recv().await.unwrap().recipient, "backup-dev");

        // Overdue again past the limit: escalation only.
        let r = tracker
            .enforce_accountability_at(now + Duration::hours(20))
            .await;
        assert_eq!(r.reassignments, 0);
        assert_eq!(r.escalations, 1);
    }

    #[tokio::test]
    async fn test_failures_are_isolated_per_record() {
        let reassigner = Arc::new(FixedReassigner {
            to: "unused",
            fail: AtomicBool::new(true),
        });
        let tracker = AccountabilityTracker::new(ValidatorSet::new(), Arc::new(DownNotifier))
            .with_reassigner(reassigner);
        let start = t0();
        tracker
            .assign_at("a", "x", "", Duration::hours(1), vec![], start - Duration::hours(2))
            .unwrap();
        tracker
            .assign_at("b", "y", "", Duration::hours(10), vec![], start - Duration::hours(9))
            .unwrap();

        let r = tracker.enforce_accountability_at(start).await;
        // "a": reassignment fails, escalation notification fails. "b": warning fails.
        assert_eq!(r.failures, 3);
        assert_eq!(r.warnings + r.escalations + r.reassignments, 0);
        assert!(tracker
            .get("a")
            .unwrap()
            .actions_taken
            .contains(&EnforcementKind::Escalation));
    }

    #[tokio::test]
    async fn test_completion_hook_runs_once() {
        let log = Arc::new(CompletionLog {
            fail: true,
            ..CompletionLog::default()
        });
        let tracker = tracker().with_completion_hook(log.clone());
        tracker
            .assign("t1", "backend-dev", "x", Duration::hours(1), commit_and_test())
            .unwrap();

        tracker.submit_evidence("t1", "commit", "abc1234").await.unwrap();
        assert!(log.completed.lock().is_empty());

        // A failing hook does not fail the submission.
        let out = tracker.submit_evidence("t1", "test", "ok").await.unwrap();
        assert!(out.completed);
        tracker.submit_evidence("t1", "test", "rerun ok").await.unwrap();

        let completed = log.completed.lock().clone();
        assert_eq!(completed, vec![("t1".to_string(), "backend-dev".to_string())]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_evidence_during_enforcement_sweeps() {
        const TASKS: usize = 40;
        let log = Arc::new(CompletionLog::default());
        let tracker = Arc::new(
            AccountabilityTracker::new(
                ValidatorSet::with_builtins().unwrap(),
                Arc::new(crate::notify::LogNotifier),
            )
            .with_reassigner(Arc::new(RotatingReassigner::default()))
            .with_completion_hook(log.clone())
            .with_policy(EnforcementPolicy {
                max_reassignments: u32::MAX,
                ..EnforcementPolicy::default()
            }),
        );
        let start = t0();
        for i in 0..TASKS {
            tracker
                .assign_at(
                    &format!("t{i:02}"),
                    "origin",
                    "",
                    Duration::hours(10),
                    commit_and_test(),
                    start - Duration::hours(20),
                )
                .unwrap();
        }

        let sweeps = {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move {
                for pass in 0..50i64 {
                    let now = start + Duration::hours(30 * pass);
                    tracker.check_accountability_at(now);
                    tracker.enforce_accountability_at(now).await;
                    tokio::task::yield_now().await;
                }
            })
        };
        let submitters: Vec<_> = (0..4)
            .map(|worker| {
                let tracker = Arc::clone(&tracker);
                tokio::spawn(async move {
                    for i in (worker..TASKS).step_by(4) {
                        let id = format!("t{i:02}");
                        tracker.submit_evidence(&id, "commit", "abc1234").await.unwrap();
                        tokio::task::yield_now().await;
                        tracker.submit_evidence(&id, "test", "ok").await.unwrap();
                    }
                })
            })
            .collect();

        for submitter in submitters {
            submitter.await.unwrap();
        }
        sweeps.await.unwrap();
        // One more pass once everything is done: completed records are left alone.
        let last = tracker
            .enforce_accountability_at(start + Duration::hours(10_000))
            .await;
        assert_eq!(last, EnforcementReport::default());

        let completed: HashMap<String, String> = log.completed.lock().iter().cloned().collect();
        assert_eq!(log.completed.lock().len(), TASKS);
        for record in tracker.records() {
            assert_eq!(record.status, RecordStatus::Completed, "{}", record.task_id);
            assert_eq!(record.evidence_submitted.len(), 2, "{}", record.task_id);
            assert_eq!(record.progress_percentage(), 100.0);
            // Still held by whoever completed it.
            assert_eq!(completed[&record.task_id], record.agent_id);
        }
    }
}
