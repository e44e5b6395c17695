use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use warden_agent::BreakerConfig;
use warden_core::{WardenError, WardenResult};

/// Top-level configuration, loaded from `warden.toml`.
///
/// Every section and field is optional; missing values take the defaults
/// below.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WardenConfig {
    /// Durable store location.
    #[serde(default)]
    pub store: StoreConfig,
    /// Version-controlled working tree.
    #[serde(default)]
    pub repository: RepositoryConfig,
    /// Agent capability registry file.
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Process-backed agent invocation.
    #[serde(default)]
    pub invoker: InvokerConfig,
    /// Circuit breaker policy applied to every target.
    #[serde(default)]
    pub breaker: BreakerSection,
    /// Distribution thresholds and timeouts.
    #[serde(default)]
    pub distribution: DistributionConfig,
    /// Accountability sweep and enforcement policy.
    #[serde(default)]
    pub accountability: AccountabilityConfig,
}

/// `[store]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

/// `[repository]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Path inside the git repository to checkpoint.
    #[serde(default = "default_repository_path")]
    pub path: PathBuf,
    /// Alias moved to the newest good checkpoint.
    #[serde(default = "default_last_good_tag")]
    pub last_good_tag: String,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            path: default_repository_path(),
            last_good_tag: default_last_good_tag(),
        }
    }
}

/// `[registry]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// TOML file listing `[[agents]]`.
    #[serde(default = "default_registry_path")]
    pub path: PathBuf,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: default_registry_path(),
        }
    }
}

/// `[invoker]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvokerConfig {
    /// Program used for agents without an `invocation_path`.
    #[serde(default)]
    pub default_program: Option<PathBuf>,
    /// Fixed arguments placed before the prompt.
    #[serde(default)]
    pub args: Vec<String>,
    /// Program started for isolated sub-agents.
    #[serde(default)]
    pub sub_agent_program: Option<PathBuf>,
}

/// `[breaker]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerSection {
    /// Consecutive failures that open the circuit.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Seconds an open circuit waits before a trial call.
    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,
}

impl Default for BreakerSection {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
        }
    }
}

impl BreakerSection {
    /// The breaker policy this section describes.
    pub fn to_breaker_config(&self) -> BreakerConfig {
        BreakerConfig::new(
            self.failure_threshold,
            Duration::from_secs(self.recovery_timeout_secs),
        )
    }
}

/// `[distribution]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionConfig {
    /// Highest complexity score executed in shallow mode.
    #[serde(default = "default_shallow_max")]
    pub shallow_max: f64,
    /// Highest complexity score executed without an isolated sub-agent.
    #[serde(default = "default_deep_max")]
    pub deep_max: f64,
    /// Upper bound on a dispatch call.
    #[serde(default = "default_invocation_timeout_secs")]
    pub invocation_timeout_secs: u64,
    /// Upper bound on the advisory review.
    #[serde(default = "default_review_timeout_secs")]
    pub review_timeout_secs: u64,
    /// Whether the advisory reviewer is consulted.
    #[serde(default)]
    pub review_enabled: bool,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            shallow_max: default_shallow_max(),
            deep_max: default_deep_max(),
            invocation_timeout_secs: default_invocation_timeout_secs(),
            review_timeout_secs: default_review_timeout_secs(),
            review_enabled: false,
        }
    }
}

/// `[accountability]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountabilityConfig {
    /// Seconds between sweeps.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Elapsed fraction of the deadline window after which an emergency
    /// record is reassigned instead of escalated.
    #[serde(default = "default_reassign_after_fraction")]
    pub reassign_after_fraction: f64,
    /// Reassignments allowed per record.
    #[serde(default = "default_max_reassignments")]
    pub max_reassignments: u32,
    /// Recipient of escalations.
    #[serde(default = "default_coordinator_id")]
    pub coordinator_id: String,
}

impl Default for AccountabilityConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
            reassign_after_fraction: default_reassign_after_fraction(),
            max_reassignments: default_max_reassignments(),
            coordinator_id: default_coordinator_id(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("./data/warden.db")
}
fn default_repository_path() -> PathBuf {
    PathBuf::from(".")
}
fn default_last_good_tag() -> String {
    "last-good".to_string()
}
fn default_registry_path() -> PathBuf {
    PathBuf::from("agents.toml")
}
fn default_failure_threshold() -> u32 {
    5
}
fn default_recovery_timeout_secs() -> u64 {
    60
}
fn default_shallow_max() -> f64 {
    10.0
}
fn default_deep_max() -> f64 {
    15.0
}
fn default_invocation_timeout_secs() -> u64 {
    300
}
fn default_review_timeout_secs() -> u64 {
    30
}
fn default_sweep_interval_secs() -> u64 {
    300
}
fn default_reassign_after_fraction() -> f64 {
    1.5
}
fn default_max_reassignments() -> u32 {
    1
}
fn default_coordinator_id() -> String {
    "coordinator".to_string()
}

impl WardenConfig {
    /// Parses and validates TOML text.
    pub fn from_toml_str(raw: &str) -> WardenResult<Self> {
        let config: WardenConfig =
            toml::from_str(raw).map_err(|e| WardenError::Config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a config file.
    pub async fn load(path: impl AsRef<Path>) -> WardenResult<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            WardenError::Config(format!("failed to read config '{}': {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Rejects settings the components cannot honor.
    pub fn validate(&self) -> WardenResult<()> {
        if self.breaker.failure_threshold == 0 {
            return Err(WardenError::Config(
                "breaker.failure_threshold must be at least 1".into(),
            ));
        }
        if self.distribution.deep_max < self.distribution.shallow_max {
            return Err(WardenError::Config(format!(
                "distribution.deep_max ({}) is below shallow_max ({})",
                self.distribution.deep_max, self.distribution.shallow_max
            )));
        }
        if self.accountability.reassign_after_fraction <= 1.0 {
            return Err(WardenError::Config(
                "accountability.reassign_after_fraction must exceed 1.0".into(),
            ));
        }
        if self.accountability.sweep_interval_secs == 0 {
            return Err(WardenError::Config(
                "accountability.sweep_interval_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Dispatch timeout.
    pub fn invocation_timeout(&self) -> Duration {
        Duration::from_secs(self.distribution.invocation_timeout_secs)
    }

    /// Advisory review timeout.
    pub fn review_timeout(&self) -> Duration {
        Duration::from_secs(self.distribution.review_timeout_secs)
    }

    /// Sweep period.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.accountability.sweep_interval_secs)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = WardenConfig::from_toml_str("").unwrap();
        assert_eq!(config, WardenConfig::default());
        assert_eq!(config.store.path, PathBuf::from("./data/warden.db"));
        assert_eq!(config.repository.last_good_tag, "last-good");
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.distribution.shallow_max, 10.0);
        assert_eq!(config.accountability.coordinator_id, "coordinator");
        assert_eq!(config.sweep_interval(), Duration::from_secs(300));
    }

    #[test]
    fn test_partial_sections() {
        let config = WardenConfig::from_toml_str(
            r#"
            [breaker]
            failure_threshold = 3

            [distribution]
            review_enabled = true
            "#,
        )
        .unwrap();
        assert_eq!(config.breaker.failure_threshold, 3);
        assert_eq!(config.breaker.recovery_timeout_secs, 60);
        assert!(config.distribution.review_enabled);
        assert_eq!(config.distribution.deep_max, 15.0);

        let breaker = config.breaker.to_breaker_config();
        assert_eq!(breaker.failure_threshold, 3);
        assert_eq!(breaker.recovery_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_validation_failures() {
        for raw in [
            "[breaker]\nfailure_threshold = 0",
            "[distribution]\nshallow_max = 20.0",
            "[accountability]\nreassign_after_fraction = 1.0",
            "[accountability]\nsweep_interval_secs = 0",
            "store = 5",
        ] {
            let err = WardenConfig::from_toml_str(raw).unwrap_err();
            assert!(matches!(err, WardenError::Config(_)), "{raw}");
        }
    }

    #[tokio::test]
    async fn test_load_missing_file_is_config_error() {
        let err = WardenConfig::load("/nonexistent/warden.toml").await.unwrap_err();
        assert!(matches!(err, WardenError::Config(_)));
    }
}
