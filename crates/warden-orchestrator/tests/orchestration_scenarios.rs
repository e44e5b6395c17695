#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use warden_agent::{AgentInvoker, InvocationOutput, InvocationRequest};
use warden_core::{
    Agent, CollectingObserver, EscalationLevel, ExecutionMode, OrchestrationEvent, WardenError,
    WardenResult,
};
use warden_orchestrator::*;
use warden_store::{DurableStore, MemoryVersionControl, SqliteStore, TaskState};

/// Answers every prompt, or fails every call when `down` is set.
struct ScriptedInvoker {
    down: bool,
    calls: AtomicUsize,
}

impl ScriptedInvoker {
    fn up() -> Self {
        Self {
            down: false,
            calls: AtomicUsize::new(0),
        }
    }

    fn down() -> Self {
        Self {
            down: true,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl AgentInvoker for ScriptedInvoker {
    async fn invoke(&self, request: &InvocationRequest) -> WardenResult<InvocationOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down {
            return Err(WardenError::Transport(format!("{} unreachable", request.target)));
        }
        Ok(InvocationOutput::success(format!("done by {}", request.target)))
    }
}

struct Harness {
    ctx: OrchestratorContext,
    store: Arc<SqliteStore>,
    spawner: Arc<InMemorySpawner>,
    observer: Arc<CollectingObserver>,
    invoker: Arc<ScriptedInvoker>,
}

fn harness(config: WardenConfig, invoker: ScriptedInvoker) -> Harness {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let spawner = Arc::new(InMemorySpawner::new());
    let observer = Arc::new(CollectingObserver::new());
    let invoker = Arc::new(invoker);
    let registry = AgentRegistry::new([
        Agent::new("a-dev", ["rust", "api"]),
        Agent::new("b-dev", ["rust"]),
        Agent::new("writer", ["docs"]),
    ]);
    let collaborators = Collaborators {
        store: store.clone(),
        vcs: Arc::new(MemoryVersionControl::new("c0")),
        directory: Arc::new(registry),
        invoker: invoker.clone(),
        spawner: spawner.clone(),
        notifier: Arc::new(LogNotifier),
        observer: observer.clone(),
    };
    Harness {
        ctx: OrchestratorContext::init_with(config, collaborators).unwrap(),
        store,
        spawner,
        observer,
        invoker,
    }
}

fn task_file(entries: &[(&str, usize, usize, &str)]) -> TaskFile {
    let mut raw = String::new();
    for (id, desc_len, deps, caps) in entries {
        let deps: Vec<String> = (0..*deps).map(|i| format!("\"dep-{i}\"")).collect();
        raw.push_str(&format!(
            "[[tasks]]\nid = \"{id}\"\ntype = \"feature\"\ndescription = \"{}\"\n\
             capabilities = [{caps}]\ndependencies = [{}]\ndeadline_hours = 2\n\n",
            "x".repeat(*desc_len),
            deps.join(", ")
        ));
    }
    TaskFile::from_toml_str(&raw).unwrap()
}

// ---------------------------------------------------------------------------
// 1. Complexity drives execution depth and isolation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn shallow_and_isolated_tasks_are_persisted() {
    let h = harness(WardenConfig::default(), ScriptedInvoker::up());
    let file = task_file(&[
        ("small", 250, 2, "\"rust\""),
        ("huge", 1600, 0, "\"rust\", \"api\""),
    ]);

    let report = h.ctx.distribute_file(&file).await.unwrap();

    let small = &report.assignments["small"];
    assert_eq!(small.complexity, 4.5);
    assert_eq!(small.mode, ExecutionMode::Shallow);
    assert!(small.sub_agent_id.is_none());

    let huge = &report.assignments["huge"];
    assert_eq!(huge.complexity, 16.0);
    assert_eq!(huge.mode, ExecutionMode::Isolated);
    assert_eq!(huge.agent_id, "a-dev");
    assert!(huge.sub_agent_id.is_some());
    assert_eq!(h.spawner.active_tasks(), vec!["huge"]);

    let rows = h.store.list_tasks().await.unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.status == TaskState::Assigned));

    let spawned = h
        .observer
        .events()
        .into_iter()
        .filter(|e| matches!(e, OrchestrationEvent::SubAgentSpawned { .. }))
        .count();
    assert_eq!(spawned, 1);
}

#[tokio::test]
async fn spawn_failure_keeps_primary_assignment() {
    let h = harness(WardenConfig::default(), ScriptedInvoker::up());
    h.spawner.set_failing(true);
    let file = task_file(&[("huge", 1600, 0, "\"rust\""), ("small", 10, 0, "\"docs\"")]);

    let report = h.ctx.distribute_file(&file).await.unwrap();

    assert_eq!(report.assignments.len(), 2);
    assert_eq!(report.degraded, vec!["huge"]);
    assert_eq!(report.assignments["huge"].mode, ExecutionMode::DeepReasoning);
    assert_eq!(report.assignments["small"].agent_id, "writer");
    assert!(h.ctx.tracker().get("huge").is_some());
}

#[tokio::test]
async fn missing_registry_file_fails_distribution() {
    let dir = tempfile::tempdir().unwrap();
    let collaborators = Collaborators {
        store: Arc::new(SqliteStore::open_in_memory().unwrap()),
        vcs: Arc::new(MemoryVersionControl::new("c0")),
        directory: Arc::new(FileAgentRegistry::new(dir.path().join("agents.toml"))),
        invoker: Arc::new(ScriptedInvoker::up()),
        spawner: Arc::new(InMemorySpawner::new()),
        notifier: Arc::new(LogNotifier),
        observer: Arc::new(CollectingObserver::new()),
    };
    let ctx = OrchestratorContext::init_with(WardenConfig::default(), collaborators).unwrap();

    let result = ctx.distribute_file(&task_file(&[("t1", 10, 0, "")])).await;
    assert!(matches!(result, Err(WardenError::Config(_))));
}

// ---------------------------------------------------------------------------
// 2. Evidence-driven completion
// ---------------------------------------------------------------------------

#[tokio::test]
async fn commit_then_test_completes_record() {
    let h = harness(WardenConfig::default(), ScriptedInvoker::up());
    let tracker = h.ctx.tracker();
    tracker
        .assign(
            "feat-1",
            "a-dev",
            "ship the feature",
            ChronoDuration::hours(2),
            vec![
                EvidenceRequirement::required("commit", "merged change"),
                EvidenceRequirement::required("test", "passing run"),
            ],
        )
        .unwrap();

    let first = tracker
        .submit_evidence("feat-1", "commit", "abc1234")
        .await
        .unwrap();
    assert_eq!(first.progress, 50.0);
    assert!(!first.completed);
    assert_eq!(tracker.get("feat-1").unwrap().status, RecordStatus::Assigned);

    let second = tracker
        .submit_evidence("feat-1", "test", "42 passed")
        .await
        .unwrap();
    assert_eq!(second.progress, 100.0);
    assert!(second.completed);
    assert_eq!(tracker.get("feat-1").unwrap().status, RecordStatus::Completed);
}

#[tokio::test]
async fn completed_evidence_releases_the_assignment() {
    let h = harness(WardenConfig::default(), ScriptedInvoker::up());
    let file = TaskFile::from_toml_str(&format!(
        r#"
        [[tasks]]
        id = "huge"
        type = "analysis"
        description = "{}"
        capabilities = ["rust"]

        [[tasks.evidence]]
        type = "commit"
        validator = "commit_hash"

        [[tasks.evidence]]
        type = "test"
        "#,
        "x".repeat(1600)
    ))
    .unwrap();
    let report = h.ctx.distribute_file(&file).await.unwrap();
    assert_eq!(report.assignments["huge"].mode, ExecutionMode::Isolated);
    assert_eq!(h.spawner.active_tasks(), vec!["huge"]);

    let tracker = h.ctx.tracker();
    tracker.submit_evidence("huge", "commit", "abc1234").await.unwrap();
    assert_eq!(
        h.store.get_task("huge").await.unwrap().unwrap().status,
        TaskState::Assigned
    );

    let out = tracker.submit_evidence("huge", "test", "all green").await.unwrap();
    assert!(out.completed);
    assert_eq!(
        h.store.get_task("huge").await.unwrap().unwrap().status,
        TaskState::Completed
    );
    assert!(h.spawner.active_tasks().is_empty());
    assert!(h.ctx.distributor().assignment("huge").is_none());

    let metrics = h.ctx.checkpoints().collect_metrics().await.unwrap();
    assert_eq!(metrics.active_assignments, 0);
    assert_eq!(metrics.completed_tasks, 1);
}

// ---------------------------------------------------------------------------
// 3. Overdue work escalates and is reassigned through the distributor
// ---------------------------------------------------------------------------

#[tokio::test]
async fn past_deadline_is_overdue_and_emergency() {
    let h = harness(WardenConfig::default(), ScriptedInvoker::up());
    let tracker = h.ctx.tracker();
    tracker
        .assign_at(
            "late",
            "a-dev",
            "late work",
            ChronoDuration::hours(1),
            Vec::new(),
            Utc::now() - ChronoDuration::hours(3),
        )
        .unwrap();

    assert!(tracker.is_overdue("late").unwrap());
    let report = tracker.check_accountability();
    assert_eq!(report.emergency, vec!["late"]);
    assert_eq!(
        tracker.get("late").unwrap().escalation_level,
        EscalationLevel::Emergency
    );
}

#[tokio::test]
async fn enforcement_reassigns_to_another_agent() {
    let h = harness(WardenConfig::default(), ScriptedInvoker::up());
    let file = task_file(&[("api", 300, 0, "\"rust\", \"api\"")]);
    h.ctx.distribute_file(&file).await.unwrap();
    assert_eq!(h.ctx.tracker().get("api").unwrap().agent_id, "a-dev");

    let later = Utc::now() + ChronoDuration::hours(4);
    let enforced = h.ctx.tracker().enforce_accountability_at(later).await;
    assert_eq!(enforced.reassignments, 1);
    assert_eq!(enforced.failures, 0);

    assert_eq!(h.ctx.distributor().assignment("api").unwrap().agent_id, "b-dev");
    assert_eq!(h.ctx.tracker().get("api").unwrap().agent_id, "b-dev");
    assert_eq!(h.store.get_task("api").await.unwrap().unwrap().agent, "b-dev");
    assert_eq!(
        h.store.agent_success_rate("a-dev").await.unwrap(),
        Some(0.0)
    );

    // the reassigned record got a fresh window
    let report = h.ctx.tracker().check_accountability_at(later);
    assert_eq!(report.on_track, vec!["api"]);
}

// ---------------------------------------------------------------------------
// 4. Dispatch goes through the per-agent breaker
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failing_agent_trips_its_breaker() {
    let mut config = WardenConfig::default();
    config.breaker.failure_threshold = 2;
    let h = harness(config, ScriptedInvoker::down());
    let file = task_file(&[("t1", 10, 0, "\"api\"")]);
    h.ctx.distribute_file(&file).await.unwrap();

    let timeout = Duration::from_secs(5);
    for _ in 0..2 {
        let err = h.ctx.distributor().dispatch("t1", timeout).await.unwrap_err();
        assert!(err.is_transport());
    }
    assert_eq!(h.store.get_task("t1").await.unwrap().unwrap().status, TaskState::Failed);

    let err = h.ctx.distributor().dispatch("t1", timeout).await.unwrap_err();
    assert!(err.is_retry_later());
    assert_eq!(h.invoker.calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.store.performance_for("a-dev").await.unwrap().len(), 2);

    // other agents keep their own closed breaker
    assert!(h.ctx.breakers().existing("b-dev").is_none());
}

#[tokio::test]
async fn successful_dispatch_then_release() {
    let h = harness(WardenConfig::default(), ScriptedInvoker::up());
    h.ctx
        .distribute_file(&task_file(&[("t1", 10, 0, "\"docs\"")]))
        .await
        .unwrap();

    let out = h
        .ctx
        .distributor()
        .dispatch("t1", Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(out.output, "done by writer");
    assert_eq!(
        h.store.get_task("t1").await.unwrap().unwrap().status,
        TaskState::Dispatched
    );

    h.ctx.distributor().release("t1").await.unwrap();
    assert_eq!(
        h.store.get_task("t1").await.unwrap().unwrap().status,
        TaskState::Completed
    );
}

// ---------------------------------------------------------------------------
// 5. Checkpoints see the assignments
// ---------------------------------------------------------------------------

#[tokio::test]
async fn checkpoint_counts_active_assignments() {
    let h = harness(WardenConfig::default(), ScriptedInvoker::up());
    h.ctx
        .distribute_file(&task_file(&[("a", 10, 0, "\"rust\""), ("b", 10, 0, "\"docs\"")]))
        .await
        .unwrap();
    h.store.set_task_confidence("a", 0.8).await.unwrap();
    h.store.set_task_confidence("b", 0.6).await.unwrap();

    let cp = h.ctx.checkpoints().checkpoint("after-distribution").await.unwrap();
    assert_eq!(cp.metrics.active_assignments, 2);
    assert!((cp.metrics.mean_confidence - 0.7).abs() < 1e-9);

    let tag = h.ctx.checkpoints().rollback("after-distribution").await.unwrap();
    assert_eq!(tag, "after-distribution");
}
