use crate::breaker::{BreakerConfig, BreakerStats, CircuitBreaker};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use warden_core::Observer;

/// Owns one independent [`CircuitBreaker`] per invocation target.
///
/// Breakers are created lazily on first use and live until the registry is
/// dropped; state is never shared between targets.
pub struct BreakerRegistry {
    config: BreakerConfig,
    overrides: HashMap<String, BreakerConfig>,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    observer: Option<Arc<dyn Observer>>,
}

impl BreakerRegistry {
    /// Creates an empty registry applying `config` to every new breaker.
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            overrides: HashMap::new(),
            breakers: RwLock::new(HashMap::new()),
            observer: None,
        }
    }

    /// Reports transitions of every breaker to `observer`.
    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Uses `config` instead of the default for `target`.
    pub fn with_override(mut self, target: impl Into<String>, config: BreakerConfig) -> Self {
        self.overrides.insert(target.into(), config);
        self
    }

    /// Returns the breaker for `target`, creating it if needed.
    pub fn get(&self, target: &str) -> Arc<CircuitBreaker> {
        if let Some(b) = self.breakers.read().get(target) {
            return Arc::clone(b);
        }
        let mut breakers = self.breakers.write();
        let breaker = breakers.entry(target.to_string()).or_insert_with(|| {
            let config = self.overrides.get(target).copied().unwrap_or(self.config);
            let mut breaker = CircuitBreaker::new(target, config);
            if let Some(observer) = &self.observer {
                breaker = breaker.with_observer(Arc::clone(observer));
            }
            Arc::new(breaker)
        });
        Arc::clone(breaker)
    }

    /// Returns the breaker for `target` only if it was already created.
    pub fn existing(&self, target: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().get(target).cloned()
    }

    /// Resets the breaker for `target`. Returns `false` if none exists.
    pub fn reset(&self, target: &str) -> bool {
        match self.existing(target) {
            Some(b) => {
                b.reset();
                true
            }
            None => false,
        }
    }

    /// Counters of every breaker, ordered by target.
    pub fn stats(&self) -> Vec<BreakerStats> {
        let mut stats: Vec<BreakerStats> = self.breakers.read().values().map(|b| b.stats()).collect();
        stats.sort_by(|a, b| a.target.cmp(&b.target));
        stats
    }

    /// Number of breakers created so far.
    pub fn len(&self) -> usize {
        self.breakers.read().len()
    }

    /// Whether no breaker has been created yet.
    pub fn is_empty(&self) -> bool {
        self.breakers.read().is_empty()
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}
