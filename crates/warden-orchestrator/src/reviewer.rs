use async_trait::async_trait;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use warden_agent::{AgentInvoker, InvocationRequest};
use warden_core::{Agent, Task, WardenError, WardenResult};

/// Invocation target of the advisory reviewer.
pub const REVIEW_TARGET: &str = "advisory-review";

/// A task and the agent the distributor intends to give it to.
#[derive(Debug, Clone)]
pub struct PlannedPlacement<'a> {
    /// The task.
    pub task: &'a Task,
    /// The chosen agent.
    pub agent: &'a Agent,
    /// Its complexity score.
    pub complexity: f64,
}

/// Optional second opinion consulted before a distribution is finalized.
///
/// The answer is advisory only; it never changes the placement and its
/// failure never prevents assignment.
#[async_trait]
pub trait AdvisoryReviewer: Send + Sync {
    /// Reviews the planned placements and returns a free-form note.
    async fn review(&self, plan: &[PlannedPlacement<'_>]) -> WardenResult<String>;
}

/// Sends the plan as a prompt through an (usually breaker-guarded) invoker.
pub struct InvokerReviewer {
    invoker: Arc<dyn AgentInvoker>,
    timeout: Duration,
}

impl InvokerReviewer {
    /// Reviews through `invoker`, bounding each call by `timeout`.
    pub fn new(invoker: Arc<dyn AgentInvoker>, timeout: Duration) -> Self {
        Self { invoker, timeout }
    }
}

/// Renders the plan as a review prompt.
pub fn review_prompt(plan: &[PlannedPlacement<'_>]) -> String {
    let mut prompt = String::from(
        "Review this task distribution. Point out capability mismatches or overloaded agents.\n\n",
    );
    for p in plan {
        let caps: Vec<&str> = p.task.capabilities_required.iter().map(String::as_str).collect();
        let _ = writeln!(
            prompt,
            "- {} [{}] -> {} (complexity {:.1}, needs: {})",
            p.task.id,
            p.task.priority,
            p.agent.id,
            p.complexity,
            if caps.is_empty() { "-".to_string() } else { caps.join(", ") }
        );
    }
    prompt
}

#[async_trait]
impl AdvisoryReviewer for InvokerReviewer {
    async fn review(&self, plan: &[PlannedPlacement<'_>]) -> WardenResult<String> {
        let request = InvocationRequest::new(REVIEW_TARGET, review_prompt(plan), self.timeout);
        let output = self.invoker.invoke(&request).await?;
        if output.is_success() {
            Ok(output.output)
        } else {
            Err(WardenError::Transport(format!("reviewer declined: {}", output.output)))
        }
    }
}
