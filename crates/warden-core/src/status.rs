use serde::{Deserialize, Serialize};

/// State of a circuit breaker guarding one invocation target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls pass through; failures are counted.
    Closed,
    /// Calls are rejected until the recovery timeout elapses.
    Open,
    /// A single trial call is allowed.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Ordered severity of a task's deadline risk.
///
/// `OnTrack < Warning < Critical < Emergency`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EscalationLevel {
    /// Less than half of the deadline window used.
    #[default]
    OnTrack,
    /// Between 50% and 80% of the window used.
    Warning,
    /// Between 80% and 100% of the window used.
    Critical,
    /// Past the deadline.
    Emergency,
}

impl EscalationLevel {
    /// Classifies the fraction of the deadline window that has elapsed.
    pub fn from_elapsed_fraction(fraction: f64) -> Self {
        if fraction > 1.0 {
            EscalationLevel::Emergency
        } else if fraction >= 0.8 {
            EscalationLevel::Critical
        } else if fraction >= 0.5 {
            EscalationLevel::Warning
        } else {
            EscalationLevel::OnTrack
        }
    }

    /// Whether enforcement should act on this level.
    pub fn needs_enforcement(self) -> bool {
        self >= EscalationLevel::Critical
    }
}

impl std::fmt::Display for EscalationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EscalationLevel::OnTrack => write!(f, "on_track"),
            EscalationLevel::Warning => write!(f, "warning"),
            EscalationLevel::Critical => write!(f, "critical"),
            EscalationLevel::Emergency => write!(f, "emergency"),
        }
    }
}
