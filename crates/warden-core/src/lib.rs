//! Core records and error definitions for the Warden orchestration core.
//!
//! This crate provides the types shared across all Warden crates: the error
//! taxonomy, task and agent records, assignments, status enums, and the
//! orchestration event stream.
//!
//! # Main types
//!
//! - [`WardenError`] — Unified error enum for all Warden subsystems.
//! - [`WardenResult`] — Convenience alias for `Result<T, WardenError>`.
//! - [`Task`] — A unit of work, validated at construction.
//! - [`Agent`] — A worker agent as described by the capability registry.
//! - [`Assignment`] — The binding of a task to its agent and execution mode.
//! - [`CircuitState`] / [`EscalationLevel`] — Shared status enums.
//! - [`Observer`] — Injectable sink for [`OrchestrationEvent`]s.

/// Agent records.
pub mod agent;
/// Assignments and execution modes.
pub mod assignment;
/// Error taxonomy.
pub mod error;
/// Orchestration events and observers.
pub mod event;
/// Breaker and escalation status enums.
pub mod status;
/// Task records.
pub mod task;

pub use agent::{Agent, AgentStatus};
pub use assignment::{Assignment, ExecutionMode};
pub use error::{WardenError, WardenResult};
pub use event::{CollectingObserver, Observer, OrchestrationEvent, TracingObserver};
pub use status::{CircuitState, EscalationLevel};
pub use task::{Priority, Task};
