use crate::invoker::{AgentInvoker, InvocationOutput, InvocationRequest};
use crate::registry::BreakerRegistry;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use warden_core::WardenResult;

/// An [`AgentInvoker`] that routes every call through the circuit breaker of
/// its target.
///
/// Transport failures are counted by the breaker and returned to the caller;
/// once a target's circuit opens, calls to it fail fast with
/// [`warden_core::WardenError::CircuitOpen`] without touching the inner
/// invoker. There is no retry loop here.
pub struct GuardedInvoker {
    inner: Arc<dyn AgentInvoker>,
    breakers: Arc<BreakerRegistry>,
}

impl GuardedInvoker {
    /// Wraps `inner` with the breakers in `breakers`.
    pub fn new(inner: Arc<dyn AgentInvoker>, breakers: Arc<BreakerRegistry>) -> Self {
        Self { inner, breakers }
    }

    /// The breaker registry shared with this invoker.
    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }
}

#[async_trait]
impl AgentInvoker for GuardedInvoker {
    async fn invoke(&self, request: &InvocationRequest) -> WardenResult<InvocationOutput> {
        let breaker = self.breakers.get(&request.target);
        debug!(target_name = %request.target, state = %breaker.state(), "guarded invoke");
        breaker.execute(|| self.inner.invoke(request)).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::breaker::BreakerConfig;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use warden_core::{CircuitState, WardenError};

    /// Fails every call and counts how often it was reached.
    struct DownInvoker {
        calls: AtomicU32,
    }

    #[async_trait]
    impl AgentInvoker for DownInvoker {
        async fn invoke(&self, request: &InvocationRequest) -> WardenResult<InvocationOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(WardenError::Transport(format!("{} unreachable", request.target)))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_shields_inner_invoker() {
        let inner = Arc::new(DownInvoker {
            calls: AtomicU32::new(0),
        });
        let breakers = Arc::new(BreakerRegistry::new(BreakerConfig::new(
            2,
            Duration::from_secs(30),
        )));
        let invoker = GuardedInvoker::new(inner.clone(), Arc::clone(&breakers));
        let req = InvocationRequest::new("agent-a", "ping", Duration::from_secs(1));

        for _ in 0..5 {
            let _ = invoker.invoke(&req).await;
        }

        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(breakers.get("agent-a").state(), CircuitState::Open);
        let err = invoker.invoke(&req).await.unwrap_err();
        assert!(err.is_retry_later());
    }

    #[tokio::test(start_paused = true)]
    async fn test_agent_error_output_is_not_a_transport_failure() {
        struct Grumpy;

        #[async_trait]
        impl AgentInvoker for Grumpy {
            async fn invoke(&self, _: &InvocationRequest) -> WardenResult<InvocationOutput> {
                Ok(InvocationOutput::agent_error("cannot comply"))
            }
        }

        let breakers = Arc::new(BreakerRegistry::new(BreakerConfig::new(
            1,
            Duration::from_secs(30),
        )));
        let invoker = GuardedInvoker::new(Arc::new(Grumpy), Arc::clone(&breakers));
        let req = InvocationRequest::new("agent-b", "ping", Duration::from_secs(1));
        let out = invoker.invoke(&req).await.unwrap();
        assert!(!out.is_success());
        assert_eq!(breakers.get("agent-b").state(), CircuitState::Closed);
    }
}
