//! Agent runtime and project registry ports.
//!
//! The executor treats agent execution as an external capability: it hands
//! the runtime a resolved task string and a session handle, and gets back
//! text output. What "running an agent" means (an HTTP call, a subprocess,
//! an in-process model) is entirely the implementation's business.

use thiserror::Error;
use weft_types::thread::StepStatus;

use crate::workflow::session::SessionHandle;

/// Errors from agent resolution or execution.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("agent execution failed: {0}")]
    Execution(String),
}

/// What an agent run produced.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    /// Text output of the run.
    pub output: String,
    /// Whether the run itself reported success or failure.
    pub status: StepStatus,
}

impl AgentOutcome {
    pub fn completed(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            status: StepStatus::Completed,
        }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            status: StepStatus::Failed,
        }
    }
}

/// Executes one agent task inside an isolated session.
///
/// Implementations should honor `session.cancelled()` where they can; the
/// executor also races the run against cancellation, so a runtime that
/// ignores it only wastes work, never corrupts state.
pub trait AgentRuntime: Send + Sync {
    fn run(
        &self,
        agent: &str,
        task: &str,
        session: &SessionHandle,
    ) -> impl Future<Output = Result<AgentOutcome, RuntimeError>> + Send;
}

/// Resolves an agent reference within an optional project scope to the
/// concrete identity the runtime understands.
pub trait ProjectRegistry: Send + Sync {
    fn resolve(
        &self,
        project_id: Option<&str>,
        agent_ref: &str,
    ) -> impl Future<Output = Result<String, RuntimeError>> + Send;
}
