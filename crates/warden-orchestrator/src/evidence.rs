use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use warden_core::{WardenError, WardenResult};

/// A named condition whose submission is needed for task completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRequirement {
    /// Evidence type, e.g. `commit` or `test`.
    #[serde(rename = "type")]
    pub evidence_type: String,
    /// What the evidence should show.
    #[serde(default)]
    pub description: String,
    /// Whether completion waits for this type.
    #[serde(default = "default_required")]
    pub required: bool,
    /// Name of the validator applied to submissions of this type.
    #[serde(default)]
    pub validator: Option<String>,
}

fn default_required() -> bool {
    true
}

impl EvidenceRequirement {
    /// A required evidence type without validator.
    pub fn required(evidence_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            evidence_type: evidence_type.into(),
            description: description.into(),
            required: true,
            validator: None,
        }
    }

    /// An optional evidence type.
    pub fn optional(evidence_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(evidence_type, description)
        }
    }

    /// Validates submissions with the validator named `name`.
    pub fn with_validator(mut self, name: impl Into<String>) -> Self {
        self.validator = Some(name.into());
        self
    }
}

/// One entry of a record's append-only evidence log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceSubmission {
    /// Evidence type.
    #[serde(rename = "type")]
    pub evidence_type: String,
    /// Submitted payload.
    pub payload: String,
    /// Submission time.
    pub time: DateTime<Utc>,
    /// Whether the payload passed its validator.
    pub accepted: bool,
}

/// Checks an evidence payload.
pub trait EvidenceValidator: Send + Sync {
    /// Validator name referenced by requirements.
    fn name(&self) -> &str;
    /// Whether `payload` is acceptable.
    fn validate(&self, payload: &str) -> bool;
}

struct NonEmpty;

impl EvidenceValidator for NonEmpty {
    fn name(&self) -> &str {
        "non_empty"
    }

    fn validate(&self, payload: &str) -> bool {
        !payload.trim().is_empty()
    }
}

struct PatternValidator {
    name: &'static str,
    pattern: Regex,
}

impl EvidenceValidator for PatternValidator {
    fn name(&self) -> &str {
        self.name
    }

    fn validate(&self, payload: &str) -> bool {
        self.pattern.is_match(payload.trim())
    }
}

struct JsonValidator;

impl EvidenceValidator for JsonValidator {
    fn name(&self) -> &str {
        "json"
    }

    fn validate(&self, payload: &str) -> bool {
        serde_json::from_str::<serde_json::Value>(payload).is_ok()
    }
}

/// Named evidence validators.
#[derive(Clone, Default)]
pub struct ValidatorSet {
    validators: HashMap<String, Arc<dyn EvidenceValidator>>,
}

impl ValidatorSet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in validators: `non_empty`, `commit_hash`, `url`, `json`.
    pub fn with_builtins() -> WardenResult<Self> {
        let mut set = Self::new();
        set.register(Arc::new(NonEmpty));
        set.register(Arc::new(PatternValidator {
            name: "commit_hash",
            pattern: compile(r"^[0-9a-fA-F]{7,40}$")?,
        }));
        set.register(Arc::new(PatternValidator {
            name: "url",
            pattern: compile(r"^https?://[^\s/$.?#][^\s]*$")?,
        }));
        set.register(Arc::new(JsonValidator));
        Ok(set)
    }

    /// Adds or replaces a validator under its own name.
    pub fn register(&mut self, validator: Arc<dyn EvidenceValidator>) {
        self.validators.insert(validator.name().to_string(), validator);
    }

    /// Looks up a validator.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn EvidenceValidator>> {
        self.validators.get(name)
    }

    /// Fails with a config error if any requirement names an unknown
    /// validator.
    pub fn check_requirements(&self, requirements: &[EvidenceRequirement]) -> WardenResult<()> {
        for req in requirements {
            if let Some(name) = &req.validator {
                if !self.validators.contains_key(name) {
                    return Err(WardenError::Config(format!(
                        "unknown evidence validator '{name}' for type '{}'",
                        req.evidence_type
                    )));
                }
            }
        }
        Ok(())
    }

    /// Validates `payload` against the validator of the first requirement
    /// of type `evidence_type`. Types without validator always pass.
    pub fn accepts(
        &self,
        requirements: &[EvidenceRequirement],
        evidence_type: &str,
        payload: &str,
    ) -> bool {
        requirements
            .iter()
            .find(|r| r.evidence_type == evidence_type)
            .and_then(|r| r.validator.as_deref())
            .and_then(|name| self.validators.get(name))
            .map_or(true, |v| v.validate(payload))
    }
}

fn compile(pattern: &str) -> WardenResult<Regex> {
    Regex::new(pattern).map_err(|e| WardenError::Config(format!("bad validator pattern: {e}")))
}
