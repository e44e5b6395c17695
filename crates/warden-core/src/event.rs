use crate::assignment::ExecutionMode;
use crate::status::{CircuitState, EscalationLevel};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

/// Something observable that happened inside the orchestration core.
///
/// Components return structured results to their callers and additionally
/// report these events to an injected [`Observer`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrchestrationEvent {
    /// A task was bound to an agent.
    TaskAssigned {
        /// Task id.
        task_id: String,
        /// Primary agent id.
        agent_id: String,
        /// Chosen execution depth.
        mode: ExecutionMode,
    },
    /// A task could not be placed; the rest of the batch continued.
    TaskUnassigned {
        /// Task id.
        task_id: String,
        /// Why placement failed.
        reason: String,
    },
    /// An isolated sub-agent was started for a task.
    SubAgentSpawned {
        /// Task id.
        task_id: String,
        /// Handle id of the sub-agent.
        sub_agent_id: Uuid,
    },
    /// Sub-agent spawning failed and the task fell back to its primary agent.
    IsolationDegraded {
        /// Task id.
        task_id: String,
        /// Spawn failure.
        error: String,
    },
    /// A circuit breaker changed state.
    BreakerTransition {
        /// Invocation target.
        target: String,
        /// Previous state.
        from: CircuitState,
        /// New state.
        to: CircuitState,
    },
    /// An accountability record moved to a higher escalation level.
    EscalationChanged {
        /// Task id.
        task_id: String,
        /// Previous level.
        from: EscalationLevel,
        /// New level.
        to: EscalationLevel,
    },
    /// Enforcement acted on a record.
    EnforcementAction {
        /// Task id.
        task_id: String,
        /// Agent the record was held by when the action fired.
        agent_id: String,
        /// Action name (`warning`, `escalation`, `reassignment`).
        action: String,
    },
    /// A checkpoint was persisted.
    CheckpointCreated {
        /// Checkpoint id.
        id: String,
        /// Version-control tag.
        tag: String,
        /// Creation time.
        timestamp: DateTime<Utc>,
    },
    /// The working tree was restored to a marker.
    RollbackPerformed {
        /// Checkpoint id or tag requested.
        target: String,
        /// Tag that was checked out.
        tag: String,
    },
}

/// Receives [`OrchestrationEvent`]s. Must not block.
pub trait Observer: Send + Sync {
    /// Called once per event, from whichever task produced it.
    fn on_event(&self, event: &OrchestrationEvent);
}

/// Default observer: emits each event as a structured `tracing` record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn on_event(&self, event: &OrchestrationEvent) {
        match event {
            OrchestrationEvent::TaskAssigned {
                task_id,
                agent_id,
                mode,
            } => tracing::info!(task_id = %task_id, agent = %agent_id, mode = %mode, "task assigned"),
            OrchestrationEvent::TaskUnassigned { task_id, reason } => {
                tracing::warn!(task_id = %task_id, reason = %reason, "task left unassigned");
            }
            OrchestrationEvent::SubAgentSpawned {
                task_id,
                sub_agent_id,
            } => tracing::info!(task_id = %task_id, sub_agent = %sub_agent_id, "sub-agent spawned"),
            OrchestrationEvent::IsolationDegraded { task_id, error } => {
                tracing::warn!(task_id = %task_id, error = %error, "isolation degraded to primary agent");
            }
            OrchestrationEvent::BreakerTransition { target, from, to } => {
                tracing::info!(target_name = %target, from = %from, to = %to, "breaker transition");
            }
            OrchestrationEvent::EscalationChanged { task_id, from, to } => {
                tracing::warn!(task_id = %task_id, from = %from, to = %to, "escalation raised");
            }
            OrchestrationEvent::EnforcementAction {
                task_id,
                agent_id,
                action,
            } => tracing::warn!(task_id = %task_id, agent = %agent_id, action = %action, "enforcement"),
            OrchestrationEvent::CheckpointCreated { id, tag, .. } => {
                tracing::info!(checkpoint = %id, tag = %tag, "checkpoint created");
            }
            OrchestrationEvent::RollbackPerformed { target, tag } => {
                tracing::warn!(target_name = %target, tag = %tag, "rollback performed");
            }
        }
    }
}

/// Buffers events in memory so hosts can inspect them after the fact.
#[derive(Debug, Default)]
pub struct CollectingObserver {
    events: Mutex<Vec<OrchestrationEvent>>,
}

impl CollectingObserver {
    /// Creates an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies out everything collected so far.
    pub fn events(&self) -> Vec<OrchestrationEvent> {
        self.events.lock().clone()
    }

    /// Drains the buffer.
    pub fn take(&self) -> Vec<OrchestrationEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Number of buffered events.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Whether nothing has been collected.
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl Observer for CollectingObserver {
    fn on_event(&self, event: &OrchestrationEvent) {
        self.events.lock().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collecting_observer_buffers_and_drains() {
        let observer = CollectingObserver::new();
        observer.on_event(&OrchestrationEvent::TaskUnassigned {
            task_id: "t-1".into(),
            reason: "no capable agent".into(),
        });
        assert_eq!(observer.len(), 1);
        let drained = observer.take();
        assert_eq!(drained.len(), 1);
        assert!(observer.is_empty());
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let event = OrchestrationEvent::BreakerTransition {
            target: "agent-a".into(),
            from: CircuitState::Closed,
            to: CircuitState::Open,
        };
        let json = serde_json::to_value(&event).unwrap_or_default();
        assert_eq!(json["event"], "breaker_transition");
        assert_eq!(json["to"], "OPEN");
    }
}
