use crate::accountability::{AccountabilityTracker, EnforcementPolicy};
use crate::config::WardenConfig;
use crate::distributor::{DistributionReport, DistributorReassigner, DistributorSettings, TaskDistributor};
use crate::evidence::ValidatorSet;
use crate::notify::{LogNotifier, Notifier};
use crate::registry::{AgentDirectory, FileAgentRegistry};
use crate::reviewer::InvokerReviewer;
use crate::spawner::{DisabledSpawner, ProcessSpawner, SubAgentSpawner};
use crate::sweeper::Sweeper;
use crate::taskfile::TaskFile;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, warn};
use warden_agent::{AgentInvoker, BreakerRegistry, GuardedInvoker, ProcessInvoker};
use warden_core::{Observer, TracingObserver, WardenResult};
use warden_store::{CheckpointStore, DurableStore, GitRepository, SqliteStore, VersionControl};

/// External collaborators of the orchestration core.
///
/// [`Collaborators::from_config`] builds the production set; tests and
/// embedding hosts supply their own.
pub struct Collaborators {
    /// Durable store.
    pub store: Arc<dyn DurableStore>,
    /// Version control of the working tree.
    pub vcs: Arc<dyn VersionControl>,
    /// Agent capability registry.
    pub directory: Arc<dyn AgentDirectory>,
    /// Raw agent invoker; the context wraps it in circuit breakers.
    pub invoker: Arc<dyn AgentInvoker>,
    /// Isolated sub-agent capability.
    pub spawner: Arc<dyn SubAgentSpawner>,
    /// Delivery of warnings and escalations.
    pub notifier: Arc<dyn Notifier>,
    /// Receiver of orchestration events.
    pub observer: Arc<dyn Observer>,
}

impl Collaborators {
    /// SQLite store, git repository, file registry, process invoker and
    /// spawner, log notifier and tracing observer.
    pub fn from_config(config: &WardenConfig) -> WardenResult<Self> {
        let store = SqliteStore::open(&config.store.path)?;
        let vcs = GitRepository::open(&config.repository.path)?;

        let mut invoker = ProcessInvoker::new().with_args(config.invoker.args.iter().cloned());
        if let Some(program) = &config.invoker.default_program {
            invoker = invoker.with_default_program(program);
        }

        let spawner: Arc<dyn SubAgentSpawner> = match &config.invoker.sub_agent_program {
            Some(program) => Arc::new(ProcessSpawner::new(program)),
            None => Arc::new(DisabledSpawner),
        };

        Ok(Self {
            store: Arc::new(store),
            vcs: Arc::new(vcs),
            directory: Arc::new(FileAgentRegistry::new(&config.registry.path)),
            invoker: Arc::new(invoker),
            spawner,
            notifier: Arc::new(LogNotifier),
            observer: Arc::new(TracingObserver),
        })
    }
}

/// Owns every orchestration component. Built once at startup and passed
/// explicitly to whoever needs it.
pub struct OrchestratorContext {
    config: WardenConfig,
    store: Arc<dyn DurableStore>,
    directory: Arc<dyn AgentDirectory>,
    breakers: Arc<BreakerRegistry>,
    invoker: Arc<dyn AgentInvoker>,
    distributor: Arc<TaskDistributor>,
    tracker: Arc<AccountabilityTracker>,
    checkpoints: Arc<CheckpointStore>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl OrchestratorContext {
    /// Validates `config` and wires the production collaborators.
    pub fn init(config: WardenConfig) -> WardenResult<Self> {
        config.validate()?;
        let collaborators = Collaborators::from_config(&config)?;
        Self::init_with(config, collaborators)
    }

    /// Validates `config` and wires the given collaborators.
    pub fn init_with(config: WardenConfig, collaborators: Collaborators) -> WardenResult<Self> {
        config.validate()?;
        let Collaborators {
            store,
            vcs,
            directory,
            invoker,
            spawner,
            notifier,
            observer,
        } = collaborators;

        let breakers = Arc::new(
            BreakerRegistry::new(config.breaker.to_breaker_config()).with_observer(observer.clone()),
        );
        let invoker: Arc<dyn AgentInvoker> =
            Arc::new(GuardedInvoker::new(invoker, breakers.clone()));

        let mut distributor = TaskDistributor::new(store.clone(), invoker.clone(), spawner)
            .with_settings(DistributorSettings {
                shallow_max: config.distribution.shallow_max,
                deep_max: config.distribution.deep_max,
                review_timeout: config.review_timeout(),
            })
            .with_observer(observer.clone());
        if config.distribution.review_enabled {
            distributor = distributor.with_reviewer(Arc::new(InvokerReviewer::new(
                invoker.clone(),
                config.review_timeout(),
            )));
        }
        let distributor = Arc::new(distributor);

        let feedback = Arc::new(DistributorReassigner::new(
            distributor.clone(),
            directory.clone(),
        ));
        let tracker = AccountabilityTracker::new(ValidatorSet::with_builtins()?, notifier)
            .with_policy(EnforcementPolicy::from(&config.accountability))
            .with_reassigner(feedback.clone())
            .with_completion_hook(feedback)
            .with_observer(observer.clone());

        let checkpoints = CheckpointStore::new(store.clone(), vcs)
            .with_last_good_tag(config.repository.last_good_tag.clone())
            .with_observer(observer);

        info!(
            store = %config.store.path.display(),
            registry = %config.registry.path.display(),
            review = config.distribution.review_enabled,
            "orchestrator context initialized"
        );

        Ok(Self {
            config,
            store,
            directory,
            breakers,
            invoker,
            distributor,
            tracker: Arc::new(tracker),
            checkpoints: Arc::new(checkpoints),
            sweeper: Mutex::new(None),
        })
    }

    /// Effective configuration.
    pub fn config(&self) -> &WardenConfig {
        &self.config
    }

    /// Durable store.
    pub fn store(&self) -> &Arc<dyn DurableStore> {
        &self.store
    }

    /// Agent capability registry.
    pub fn directory(&self) -> &Arc<dyn AgentDirectory> {
        &self.directory
    }

    /// Per-target circuit breakers.
    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    /// Breaker-guarded invoker.
    pub fn invoker(&self) -> &Arc<dyn AgentInvoker> {
        &self.invoker
    }

    /// Task distributor.
    pub fn distributor(&self) -> &Arc<TaskDistributor> {
        &self.distributor
    }

    /// Accountability tracker.
    pub fn tracker(&self) -> &Arc<AccountabilityTracker> {
        &self.tracker
    }

    /// Checkpoint store.
    pub fn checkpoints(&self) -> &Arc<CheckpointStore> {
        &self.checkpoints
    }

    /// Distributes every task of `file` and opens an accountability record
    /// for each assignment.
    ///
    /// Evidence requirements are checked before anything is assigned, so an
    /// unknown validator fails the call without side effects.
    pub async fn distribute_file(&self, file: &TaskFile) -> WardenResult<DistributionReport> {
        for entry in &file.tasks {
            self.tracker.validators().check_requirements(&entry.evidence)?;
        }
        let tasks = file.to_tasks()?;
        let report = self
            .distributor
            .distribute(&tasks, self.directory.as_ref())
            .await?;

        let mut ids: Vec<&String> = report.assignments.keys().collect();
        ids.sort();
        for task_id in ids {
            let (Some(entry), Some(assignment)) =
                (file.entry(task_id), report.assignments.get(task_id))
            else {
                continue;
            };
            let opened = entry.deadline_window().and_then(|window| {
                self.tracker.assign(
                    task_id,
                    &assignment.agent_id,
                    &entry.description,
                    window,
                    entry.evidence.clone(),
                )
            });
            if let Err(e) = opened {
                warn!(task_id = %task_id, error = %e, "accountability record not opened");
            }
        }
        Ok(report)
    }

    /// Starts the periodic sweeper with the configured interval. Does
    /// nothing if it already runs.
    pub fn start_sweeper(&self) {
        let mut slot = self.sweeper.lock();
        if slot.is_none() {
            *slot = Some(Sweeper::start(
                self.tracker.clone(),
                self.config.sweep_interval(),
            ));
        }
    }

    /// Whether the sweeper runs.
    pub fn sweeper_running(&self) -> bool {
        self.sweeper.lock().is_some()
    }

    /// Stops the sweeper and terminates outstanding sub-agents.
    pub async fn shutdown(&self) {
        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            let passes = sweeper.stop().await;
            info!(passes, "sweeper stopped");
        }
        let terminated = self.distributor.shutdown().await;
        info!(sub_agents = terminated, "orchestrator shut down");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::registry::AgentRegistry;
    use crate::spawner::InMemorySpawner;
    use async_trait::async_trait;
    use warden_agent::{InvocationOutput, InvocationRequest};
    use warden_core::{Agent, CollectingObserver, WardenError};
    use warden_store::MemoryVersionControl;

    struct Ack;

    #[async_trait]
    impl AgentInvoker for Ack {
        async fn invoke(&self, request: &InvocationRequest) -> WardenResult<InvocationOutput> {
            Ok(InvocationOutput::success(format!("ok {}", request.target)))
        }
    }

    fn context(spawner: Arc<InMemorySpawner>) -> OrchestratorContext {
        let collaborators = Collaborators {
            store: Arc::new(SqliteStore::open_in_memory().unwrap()),
            vcs: Arc::new(MemoryVersionControl::new("c0")),
            directory: Arc::new(AgentRegistry::new([Agent::new("dev", ["rust"])])),
            invoker: Arc::new(Ack),
            spawner,
            notifier: Arc::new(LogNotifier),
            observer: Arc::new(CollectingObserver::new()),
        };
        OrchestratorContext::init_with(WardenConfig::default(), collaborators).unwrap()
    }

    #[tokio::test]
    async fn test_distribute_file_opens_records() {
        let ctx = context(Arc::new(InMemorySpawner::new()));
        let file = TaskFile::from_toml_str(
            r#"
            [[tasks]]
            id = "t1"
            type = "feature"
            description = "small change"
            capabilities = ["rust"]
            [[tasks.evidence]]
            type = "commit"
            validator = "commit_hash"
            "#,
        )
        .unwrap();

        let report = ctx.distribute_file(&file).await.unwrap();
        assert_eq!(report.assignments["t1"].agent_id, "dev");
        let record = ctx.tracker().get("t1").unwrap();
        assert_eq!(record.agent_id, "dev");
        assert_eq!(record.evidence_requirements.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_validator_rejects_whole_file() {
        let ctx = context(Arc::new(InMemorySpawner::new()));
        let file = TaskFile::from_toml_str(
            r#"
            [[tasks]]
            id = "t1"
            type = "feature"
            description = "x"
            [[tasks.evidence]]
            type = "commit"
            validator = "sha3"
            "#,
        )
        .unwrap();

        assert!(matches!(
            ctx.distribute_file(&file).await,
            Err(WardenError::Config(_))
        ));
        assert!(ctx.distributor().assignments().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = WardenConfig::default();
        config.breaker.failure_threshold = 0;
        let collaborators = Collaborators {
            store: Arc::new(SqliteStore::open_in_memory().unwrap()),
            vcs: Arc::new(MemoryVersionControl::new("c0")),
            directory: Arc::new(AgentRegistry::default()),
            invoker: Arc::new(Ack),
            spawner: Arc::new(InMemorySpawner::new()),
            notifier: Arc::new(LogNotifier),
            observer: Arc::new(TracingObserver),
        };
        assert!(OrchestratorContext::init_with(config, collaborators).is_err());
    }

    #[tokio::test]
    async fn test_shutdown_stops_sweeper_and_sub_agents() {
        let spawner = Arc::new(InMemorySpawner::new());
        let ctx = context(spawner.clone());
        let big = warden_core::Task::new("big", "analysis", "x".repeat(1600)).unwrap();
        ctx.distributor()
            .distribute(&[big], ctx.directory().as_ref())
            .await
            .unwrap();
        assert_eq!(spawner.active_tasks(), vec!["big"]);

        ctx.start_sweeper();
        ctx.start_sweeper();
        assert!(ctx.sweeper_running());

        ctx.shutdown().await;
        assert!(!ctx.sweeper_running());
        assert!(spawner.active_tasks().is_empty());
    }
}
