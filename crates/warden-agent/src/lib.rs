//! Agent invocation and failure isolation for Warden.
//!
//! # Main types
//!
//! - [`AgentInvoker`] — The external agent-invocation collaborator.
//! - [`ProcessInvoker`] — Runs process-backed agents in headless mode.
//! - [`CircuitBreaker`] — CLOSED / OPEN / HALF_OPEN gating for one target.
//! - [`BreakerRegistry`] — One lazily created breaker per invocation target.
//! - [`GuardedInvoker`] — An invoker whose calls pass through the breakers.

/// Per-target circuit breaker.
pub mod breaker;
/// Breaker-guarded invoker.
pub mod guarded;
/// Agent invocation collaborator and the process-backed implementation.
pub mod invoker;
/// Registry of breakers keyed by target.
pub mod registry;

pub use breaker::{BreakerConfig, BreakerStats, CircuitBreaker};
pub use guarded::GuardedInvoker;
pub use invoker::{AgentInvoker, InvocationOutput, InvocationRequest, InvocationStatus, ProcessInvoker};
pub use registry::BreakerRegistry;
