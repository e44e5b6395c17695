use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use warden_core::{WardenError, WardenResult};

/// A single call to an external agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationRequest {
    /// Invocation target; selects the circuit breaker (usually the agent id).
    pub target: String,
    /// Prompt handed to the agent.
    pub prompt: String,
    /// Upper bound on the call.
    pub timeout: Duration,
    /// Executable to run for process-backed agents.
    #[serde(default)]
    pub program: Option<PathBuf>,
}

impl InvocationRequest {
    /// Creates a request with no explicit program.
    pub fn new(target: impl Into<String>, prompt: impl Into<String>, timeout: Duration) -> Self {
        Self {
            target: target.into(),
            prompt: prompt.into(),
            timeout,
            program: None,
        }
    }

    /// Sets the program to execute.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = Some(program.into());
        self
    }
}

/// Outcome reported by the agent once the transport succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    /// The agent completed the request.
    Success,
    /// The agent ran but reported an error in its output.
    AgentError,
}

/// What an agent returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationOutput {
    /// Agent-level outcome.
    pub status: InvocationStatus,
    /// Agent output text.
    pub output: String,
}

impl InvocationOutput {
    /// Successful output.
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            status: InvocationStatus::Success,
            output: output.into(),
        }
    }

    /// Output flagged as an agent-level error.
    pub fn agent_error(output: impl Into<String>) -> Self {
        Self {
            status: InvocationStatus::AgentError,
            output: output.into(),
        }
    }

    /// Whether the agent reported success.
    pub fn is_success(&self) -> bool {
        self.status == InvocationStatus::Success
    }
}

/// The external, unreliable agent-invocation collaborator.
///
/// Implementations return [`WardenError::Transport`] when the call itself
/// fails (spawn failure, timeout, non-zero exit). Agent-level failures with a
/// readable answer are reported as [`InvocationStatus::AgentError`].
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    /// Sends `request.prompt` to the agent and waits at most `request.timeout`.
    async fn invoke(&self, request: &InvocationRequest) -> WardenResult<InvocationOutput>;
}

/// Runs a process-backed agent in headless mode.
///
/// The command line is `<program> <args...> [<prompt_flag>] <prompt>`. When
/// the last JSON line of stdout carries a `result` field, that field is the
/// output and `is_error: true` marks an agent-level error; otherwise the
/// trimmed stdout is the output.
#[derive(Debug, Clone)]
pub struct ProcessInvoker {
    default_program: Option<PathBuf>,
    args: Vec<String>,
    prompt_flag: Option<String>,
}

impl ProcessInvoker {
    /// Creates an invoker passing the prompt after `-p`.
    pub fn new() -> Self {
        Self {
            default_program: None,
            args: Vec::new(),
            prompt_flag: Some("-p".to_string()),
        }
    }

    /// Program used when a request does not name one.
    pub fn with_default_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.default_program = Some(program.into());
        self
    }

    /// Fixed arguments placed before the prompt.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Flag preceding the prompt; `None` passes the prompt bare.
    pub fn with_prompt_flag(mut self, flag: Option<&str>) -> Self {
        self.prompt_flag = flag.map(str::to_string);
        self
    }
}

impl Default for ProcessInvoker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentInvoker for ProcessInvoker {
    async fn invoke(&self, request: &InvocationRequest) -> WardenResult<InvocationOutput> {
        let program = request
            .program
            .as_ref()
            .or(self.default_program.as_ref())
            .ok_or_else(|| {
                WardenError::Transport(format!(
                    "no invocation path configured for target '{}'",
                    request.target
                ))
            })?;

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(&self.args);
        if let Some(flag) = &self.prompt_flag {
            cmd.arg(flag);
        }
        cmd.arg(&request.prompt);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::info!(
            target_name = %request.target,
            program = %program.display(),
            prompt_len = request.prompt.len(),
            "invoking agent process"
        );

        let output = tokio::time::timeout(request.timeout, cmd.output())
            .await
            .map_err(|_| {
                WardenError::Transport(format!(
                    "agent '{}' timed out after {}s",
                    request.target,
                    request.timeout.as_secs_f64()
                ))
            })?
            .map_err(|e| {
                WardenError::Transport(format!(
                    "failed to run '{}' for agent '{}': {e}",
                    program.display(),
                    request.target
                ))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WardenError::Transport(format!(
                "agent '{}' exited with {}: {}",
                request.target,
                output.status.code().unwrap_or(-1),
                stderr.chars().take(500).collect::<String>()
            )));
        }

        Ok(parse_output(&stdout))
    }
}

fn parse_output(stdout: &str) -> InvocationOutput {
    let structured = stdout
        .lines()
        .rev()
        .find_map(|line| serde_json::from_str::<serde_json::Value>(line.trim()).ok())
        .filter(|v| v.get("result").is_some());

    match structured {
        Some(json) => {
            let text = json["result"].as_str().unwrap_or_default().to_string();
            if json["is_error"].as_bool().unwrap_or(false) {
                InvocationOutput::agent_error(text)
            } else {
                InvocationOutput::success(text)
            }
        }
        None => InvocationOutput::success(stdout.trim()),
    }
}
