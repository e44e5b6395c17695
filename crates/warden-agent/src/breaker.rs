use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use warden_core::{CircuitState, Observer, OrchestrationEvent, WardenError, WardenResult};

/// Thresholds for one circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures in CLOSED that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays OPEN before a trial call is allowed.
    pub recovery_timeout: Duration,
}

impl BreakerConfig {
    /// Creates a config; a zero threshold is raised to one.
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(60))
    }
}

/// Point-in-time counters of a breaker, for observability only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerStats {
    /// Invocation target the breaker guards.
    pub target: String,
    /// Current state.
    pub state: CircuitState,
    /// Failures counted towards the threshold.
    pub failure_count: u32,
    /// Calls that were let through.
    pub total_calls: u64,
    /// Calls that succeeded.
    pub successful_calls: u64,
    /// Calls that failed.
    pub failed_calls: u64,
    /// Calls rejected while open.
    pub rejected_calls: u64,
}

struct Inner {
    state: CircuitState,
    /// Bumped on every state change; outcomes of calls admitted under an
    /// older generation do not move the state machine.
    generation: u64,
    failure_count: u32,
    last_transition: Instant,
    trial_in_flight: bool,
    total_calls: u64,
    successful_calls: u64,
    failed_calls: u64,
    rejected_calls: u64,
}

impl Inner {
    fn transition(&mut self, to: CircuitState) -> Option<(CircuitState, CircuitState)> {
        let from = self.state;
        self.state = to;
        self.last_transition = Instant::now();
        if from != to {
            self.generation += 1;
        }
        (from != to).then_some((from, to))
    }

    /// Moves OPEN to HALF_OPEN once the recovery window has elapsed.
    fn poll_recovery(&mut self, timeout: Duration) -> Option<(CircuitState, CircuitState)> {
        if self.state == CircuitState::Open && self.last_transition.elapsed() >= timeout {
            self.trial_in_flight = false;
            return self.transition(CircuitState::HalfOpen);
        }
        None
    }
}

/// Generation and trial-slot ownership of one admitted call.
#[derive(Debug, Clone, Copy)]
struct Admission {
    generation: u64,
    trial: bool,
}

/// Per-target failure isolation around calls to an unreliable collaborator.
///
/// CLOSED counts consecutive failures and opens at `failure_threshold`.
/// OPEN rejects every call with [`WardenError::CircuitOpen`] until
/// `recovery_timeout` has elapsed since the last transition, then moves to
/// HALF_OPEN. HALF_OPEN admits exactly one trial call: success closes the
/// circuit and clears the failure count, failure reopens it.
///
/// All state changes happen under one mutex per breaker, so concurrent
/// callers against the same target cannot lose a transition. The wrapped
/// operation itself runs outside the lock. A call that finishes after the
/// state it was admitted under has changed only updates the counters.
pub struct CircuitBreaker {
    target: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
    observer: Option<Arc<dyn Observer>>,
}

impl CircuitBreaker {
    /// Creates a CLOSED breaker for `target`.
    pub fn new(target: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            target: target.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                generation: 0,
                failure_count: 0,
                last_transition: Instant::now(),
                trial_in_flight: false,
                total_calls: 0,
                successful_calls: 0,
                failed_calls: 0,
                rejected_calls: 0,
            }),
            observer: None,
        }
    }

    /// Reports state transitions to `observer`.
    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// The guarded target.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// The configured thresholds.
    pub fn config(&self) -> BreakerConfig {
        self.config
    }

    /// Current state without evaluating the recovery window.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Whether a call would currently be admitted.
    ///
    /// Moves OPEN to HALF_OPEN when the recovery window has elapsed. Does not
    /// reserve the HALF_OPEN trial slot; [`execute`](Self::execute) does.
    pub fn can_execute(&self) -> bool {
        let (allowed, transition) = {
            let mut inner = self.inner.lock();
            let transition = inner.poll_recovery(self.config.recovery_timeout);
            let allowed = match inner.state {
                CircuitState::Closed => true,
                CircuitState::Open => false,
                CircuitState::HalfOpen => !inner.trial_in_flight,
            };
            (allowed, transition)
        };
        self.emit(transition);
        allowed
    }

    /// Runs `op` under the breaker's gating and records its outcome.
    ///
    /// Returns [`WardenError::CircuitOpen`] without calling `op` when the
    /// circuit is open or a HALF_OPEN trial is already in flight. Any error
    /// returned by `op` counts as a failure and is passed back unchanged.
    pub async fn execute<T, F, Fut>(&self, op: F) -> WardenResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = WardenResult<T>>,
    {
        let mut guard = self.admit()?;
        let result = op().await;
        guard.finished = true;
        match &result {
            Ok(_) => self.settle(Some(guard.admission), true),
            Err(e) => {
                debug!(target_name = %self.target, error = %e, "breaker: call failed");
                self.settle(Some(guard.admission), false);
            }
        }
        result
    }

    /// Records a successful call made outside [`execute`](Self::execute).
    pub fn record_success(&self) {
        self.settle(None, true);
    }

    /// Records a failed call made outside [`execute`](Self::execute).
    pub fn record_failure(&self) {
        self.settle(None, false);
    }

    /// Applies one call outcome. `admission` is `None` for outcomes recorded
    /// directly, which always count against the current state.
    fn settle(&self, admission: Option<Admission>, success: bool) {
        let transition = {
            let mut inner = self.inner.lock();
            if success {
                inner.successful_calls += 1;
            } else {
                inner.failed_calls += 1;
            }

            let current = admission.map_or(true, |a| a.generation == inner.generation);
            let holds_trial = admission.map_or(true, |a| a.trial);
            if !current {
                debug!(target_name = %self.target, success, "breaker: stale outcome ignored");
                None
            } else {
                match (inner.state, success) {
                    (CircuitState::HalfOpen, _) if !holds_trial => None,
                    (CircuitState::HalfOpen, true) => {
                        inner.trial_in_flight = false;
                        inner.failure_count = 0;
                        inner.transition(CircuitState::Closed)
                    }
                    (CircuitState::HalfOpen, false) => {
                        inner.trial_in_flight = false;
                        inner.failure_count = inner.failure_count.saturating_add(1);
                        inner.transition(CircuitState::Open)
                    }
                    (CircuitState::Closed, true) => {
                        inner.failure_count = 0;
                        None
                    }
                    (CircuitState::Closed, false) => {
                        inner.failure_count = inner.failure_count.saturating_add(1);
                        if inner.failure_count >= self.config.failure_threshold {
                            inner.transition(CircuitState::Open)
                        } else {
                            None
                        }
                    }
                    // The open window stands until recovery.
                    (CircuitState::Open, _) => None,
                }
            }
        };
        if let Some((_, CircuitState::Open)) = transition {
            warn!(
                target_name = %self.target,
                threshold = self.config.failure_threshold,
                "breaker: circuit opened"
            );
        }
        self.emit(transition);
    }

    /// Forces the breaker back to CLOSED with a cleared failure count.
    pub fn reset(&self) {
        let transition = {
            let mut inner = self.inner.lock();
            inner.failure_count = 0;
            inner.trial_in_flight = false;
            inner.transition(CircuitState::Closed)
        };
        self.emit(transition);
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> BreakerStats {
        let inner = self.inner.lock();
        BreakerStats {
            target: self.target.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            total_calls: inner.total_calls,
            successful_calls: inner.successful_calls,
            failed_calls: inner.failed_calls,
            rejected_calls: inner.rejected_calls,
        }
    }

    fn admit(&self) -> WardenResult<CallGuard<'_>> {
        let (admitted, transition) = {
            let mut inner = self.inner.lock();
            let transition = inner.poll_recovery(self.config.recovery_timeout);
            let trial = match inner.state {
                CircuitState::Closed => Some(false),
                CircuitState::HalfOpen if !inner.trial_in_flight => {
                    inner.trial_in_flight = true;
                    Some(true)
                }
                CircuitState::HalfOpen | CircuitState::Open => None,
            };
            let admitted = trial.map(|trial| Admission {
                generation: inner.generation,
                trial,
            });
            if admitted.is_some() {
                inner.total_calls += 1;
            } else {
                inner.rejected_calls += 1;
            }
            (admitted, transition)
        };
        self.emit(transition);

        if let Some(admission) = admitted {
            Ok(CallGuard {
                breaker: self,
                admission,
                finished: false,
            })
        } else {
            Err(WardenError::CircuitOpen {
                target: self.target.clone(),
            })
        }
    }

    fn emit(&self, transition: Option<(CircuitState, CircuitState)>) {
        if let (Some((from, to)), Some(observer)) = (transition, &self.observer) {
            observer.on_event(&OrchestrationEvent::BreakerTransition {
                target: self.target.clone(),
                from,
                to,
            });
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("target", &self.target)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

/// Counts an admitted call as failed if its future is dropped before
/// finishing, so an abandoned HALF_OPEN trial cannot wedge the breaker.
struct CallGuard<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    finished: bool,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.breaker.settle(Some(self.admission), false);
        }
    }
}
