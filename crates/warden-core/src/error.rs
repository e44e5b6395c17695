use thiserror::Error;

/// A convenience `Result` alias using [`WardenError`].
pub type WardenResult<T> = Result<T, WardenError>;

/// Top-level error type for the Warden orchestration core.
///
/// Accountability violations (overdue, critical, emergency) are not errors;
/// they are tracked as record state and surfaced through reports.
#[derive(Error, Debug)]
pub enum WardenError {
    /// Malformed or unreadable capability registry, evidence validator, or
    /// configuration file. Fatal to the call that triggered it.
    #[error("Config error: {0}")]
    Config(String),

    /// An external agent invocation failed (spawn failure, non-zero exit,
    /// timeout, unreadable output).
    #[error("Transport error: {0}")]
    Transport(String),

    /// The breaker guarding `target` is open and its recovery window has not
    /// elapsed. Callers should retry later.
    #[error("Circuit open for target '{target}'")]
    CircuitOpen {
        /// Invocation target whose breaker rejected the call.
        target: String,
    },

    /// An isolated sub-agent could not be spawned or terminated.
    #[error("Isolation error: {0}")]
    Isolation(String),

    /// The requested checkpoint or version-control marker does not exist,
    /// or restoring it failed.
    #[error("Rollback error: {0}")]
    Rollback(String),

    /// The durable store rejected a read or write.
    #[error("Store error: {0}")]
    Store(String),

    /// The version-control collaborator failed.
    #[error("Version control error: {0}")]
    VersionControl(String),

    /// Unknown task or invalid accountability operation.
    #[error("Accountability error: {0}")]
    Accountability(String),

    /// A task could not be placed (no capable agent, duplicate assignment).
    #[error("Distribution error: {0}")]
    Distribution(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WardenError {
    /// Whether the caller should treat this error as "retry later" rather
    /// than as a system fault.
    pub fn is_retry_later(&self) -> bool {
        matches!(self, WardenError::CircuitOpen { .. })
    }

    /// Whether this error is a transport-level failure that a circuit
    /// breaker should count.
    pub fn is_transport(&self) -> bool {
        matches!(self, WardenError::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circuit_open_is_retry_later() {
        let err = WardenError::CircuitOpen {
            target: "backend-dev".into(),
        };
        assert!(err.is_retry_later());
        assert_eq!(err.to_string(), "Circuit open for target 'backend-dev'");
    }

    #[test]
    fn other_errors_are_not_retry_later() {
        assert!(!WardenError::Transport("exit 1".into()).is_retry_later());
        assert!(!WardenError::Rollback("missing tag".into()).is_retry_later());
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "agents.toml");
        let err: WardenError = io.into();
        assert!(err.to_string().starts_with("IO error"));
    }
}
