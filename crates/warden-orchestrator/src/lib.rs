//! Task distribution and accountability enforcement for Warden.
//!
//! This crate routes tasks to capability-matched agents, tracks deadline and
//! evidence accountability for every assignment, and wires all Warden
//! components into one explicit [`OrchestratorContext`].
//!
//! # Main types
//!
//! - [`TaskDistributor`] — Capability matching, execution modes and sub-agent isolation.
//! - [`AccountabilityTracker`] — Evidence, escalation levels and enforcement.
//! - [`OrchestratorContext`] — Owns every component; built once at startup.
//! - [`Sweeper`] — Periodic accountability check and enforcement loop.
//! - [`WardenConfig`] — TOML configuration with defaults.

/// Accountability records, escalation and enforcement.
pub mod accountability;
/// TOML configuration.
pub mod config;
/// Orchestrator context and collaborator wiring.
pub mod context;
/// Task distribution.
pub mod distributor;
/// Evidence requirements and validators.
pub mod evidence;
/// Enforcement notifications.
pub mod notify;
/// Agent capability registry.
pub mod registry;
/// Advisory review of distribution plans.
pub mod reviewer;
/// Isolated sub-agent spawning.
pub mod spawner;
/// Periodic accountability sweeper.
pub mod sweeper;
/// Task batch files.
pub mod taskfile;

pub use accountability::{
    AccountabilityRecord, AccountabilityReport, AccountabilityTracker, CompletionHook,
    EnforcementKind, EnforcementPolicy, EnforcementReport, Reassigner, RecordStatus,
    SubmissionOutcome,
};
pub use config::{
    AccountabilityConfig, BreakerSection, DistributionConfig, InvokerConfig, RegistryConfig,
    RepositoryConfig, StoreConfig, WardenConfig,
};
pub use context::{Collaborators, OrchestratorContext};
pub use distributor::{
    best_agent, complexity_score, DistributionReport, DistributorReassigner,
    DistributorSettings, TaskDistributor,
};
pub use evidence::{EvidenceRequirement, EvidenceSubmission, EvidenceValidator, ValidatorSet};
pub use notify::{ChannelNotifier, LogNotifier, Notification, Notifier};
pub use registry::{AgentDirectory, AgentRegistry, FileAgentRegistry};
pub use reviewer::{AdvisoryReviewer, InvokerReviewer, PlannedPlacement, REVIEW_TARGET};
pub use spawner::{
    DisabledSpawner, InMemorySpawner, ProcessSpawner, SubAgentHandle, SubAgentSpawner,
};
pub use sweeper::Sweeper;
pub use taskfile::{TaskEntry, TaskFile};
