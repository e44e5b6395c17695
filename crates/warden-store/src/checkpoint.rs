use crate::model::{Checkpoint, CheckpointMetrics};
use crate::store::DurableStore;
use crate::vcs::VersionControl;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use warden_core::{Observer, OrchestrationEvent, WardenError, WardenResult};

/// Default alias moved to the newest good checkpoint.
pub const DEFAULT_LAST_GOOD_TAG: &str = "last-good";

/// Persists metrics snapshots anchored to version-control tags and restores
/// the working tree from them.
///
/// `checkpoint` and `rollback` run under one exclusive working-tree lock.
///
/// If any step of `checkpoint` fails, the store rolls back to the
/// last-good alias before returning the original error.
pub struct CheckpointStore {
    store: Arc<dyn DurableStore>,
    vcs: Arc<dyn VersionControl>,
    last_good_tag: String,
    tree_lock: Mutex<()>,
    observer: Option<Arc<dyn Observer>>,
}

impl CheckpointStore {
    /// Creates a checkpoint store over the given collaborators.
    pub fn new(store: Arc<dyn DurableStore>, vcs: Arc<dyn VersionControl>) -> Self {
        Self {
            store,
            vcs,
            last_good_tag: DEFAULT_LAST_GOOD_TAG.to_string(),
            tree_lock: Mutex::new(()),
            observer: None,
        }
    }

    /// Uses `tag` as the last-good alias.
    pub fn with_last_good_tag(mut self, tag: impl Into<String>) -> Self {
        self.last_good_tag = tag.into();
        self
    }

    /// Reports checkpoints and rollbacks to `observer`.
    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// The last-good alias name.
    pub fn last_good_tag(&self) -> &str {
        &self.last_good_tag
    }

    /// Aggregates the current task and performance tables. Read-only.
    pub async fn collect_metrics(&self) -> WardenResult<CheckpointMetrics> {
        let tasks = self.store.list_tasks().await?;
        let performance = self.store.list_performance().await?;
        Ok(CheckpointMetrics::from_rows(&tasks, &performance))
    }

    /// Captures metrics, tags HEAD as `name` and persists the checkpoint.
    pub async fn checkpoint(&self, name: &str) -> WardenResult<Checkpoint> {
        if name.trim().is_empty() {
            return Err(WardenError::Config("checkpoint name must not be empty".into()));
        }
        if name == self.last_good_tag {
            return Err(WardenError::Config(format!(
                "'{name}' is reserved for the last-good alias"
            )));
        }

        let _tree = self.tree_lock.lock().await;
        match self.checkpoint_locked(name).await {
            Ok(checkpoint) => {
                self.emit(OrchestrationEvent::CheckpointCreated {
                    id: checkpoint.id.clone(),
                    tag: checkpoint.tag.clone(),
                    timestamp: checkpoint.timestamp,
                });
                Ok(checkpoint)
            }
            Err(e) => {
                warn!(checkpoint = %name, error = %e, "checkpoint failed, rolling back to last good");
                let last_good = self.last_good_tag.clone();
                if let Err(rb) = self.rollback_locked(&last_good).await {
                    error!(
                        checkpoint = %name,
                        error = %rb,
                        "compensating rollback failed"
                    );
                }
                Err(e)
            }
        }
    }

    async fn checkpoint_locked(&self, name: &str) -> WardenResult<Checkpoint> {
        if self.store.get_checkpoint(name).await?.is_some() {
            return Err(WardenError::Store(format!("checkpoint '{name}' already exists")));
        }

        let metrics = self.collect_metrics().await?;
        let message = format!(
            "warden checkpoint {name}: confidence {:.3}, {} active",
            metrics.mean_confidence, metrics.active_assignments
        );
        let handle = self.vcs.tag(name, &message)?;

        let checkpoint = Checkpoint {
            id: name.to_string(),
            tag: handle.name.clone(),
            metrics,
            timestamp: Utc::now(),
        };
        if let Err(e) = self.store.insert_checkpoint(&checkpoint).await {
            if let Err(del) = self.vcs.delete_tag(&handle.name) {
                warn!(tag = %handle.name, error = %del, "failed to remove orphaned tag");
            }
            return Err(e);
        }

        if let Err(e) = self.vcs.force_tag(&self.last_good_tag, &handle.name) {
            warn!(tag = %self.last_good_tag, error = %e, "failed to move last-good alias");
        }

        info!(
            checkpoint = %checkpoint.id,
            commit = %handle.target,
            confidence = checkpoint.metrics.mean_confidence,
            "checkpoint persisted"
        );
        Ok(checkpoint)
    }

    /// Restores the working tree to the tag of checkpoint `id`, or to tag
    /// `id` itself when no checkpoint has that id.
    pub async fn rollback(&self, id: &str) -> WardenResult<String> {
        let _tree = self.tree_lock.lock().await;
        self.rollback_locked(id).await
    }

    async fn rollback_locked(&self, id: &str) -> WardenResult<String> {
        let tag = match self.store.get_checkpoint(id).await? {
            Some(checkpoint) => checkpoint.tag,
            None if self.vcs.tag_exists(id)? => id.to_string(),
            None => return Err(WardenError::Rollback(format!("no checkpoint or tag '{id}'"))),
        };

        self.vcs
            .checkout(&tag)
            .map_err(|e| WardenError::Rollback(format!("checkout of '{tag}' failed: {e}")))?;

        self.emit(OrchestrationEvent::RollbackPerformed {
            target: id.to_string(),
            tag: tag.clone(),
        });
        Ok(tag)
    }

    /// All checkpoints, oldest first.
    pub async fn list(&self) -> WardenResult<Vec<Checkpoint>> {
        self.store.list_checkpoints().await
    }

    /// The newest checkpoint, if any.
    pub async fn latest(&self) -> WardenResult<Option<Checkpoint>> {
        Ok(self.store.list_checkpoints().await?.pop())
    }

    fn emit(&self, event: OrchestrationEvent) {
        if let Some(observer) = &self.observer {
            observer.on_event(&event);
        }
    }
}
