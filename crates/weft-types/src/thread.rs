//! Thread execution state types.
//!
//! A `Thread` is one execution instance of a workflow definition. Its
//! mutable state is owned exclusively by the executor (single writer per
//! thread); reads always go through cloned snapshots.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

/// Overall status of a workflow thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Aborted,
}

impl ThreadStatus {
    /// Whether this status ends the thread's lifecycle.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Aborted)
    }
}

/// Outcome status of an individual step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    Failed,
}

impl StepStatus {
    /// Lowercase wire form, used for template `{step.status}` interpolation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

// ---------------------------------------------------------------------------
// Step results
// ---------------------------------------------------------------------------

/// Recorded result of one step execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    /// Text output returned by the agent runtime.
    pub output: String,
    /// Whether the step completed or failed.
    pub status: StepStatus,
}

// ---------------------------------------------------------------------------
// Thread
// ---------------------------------------------------------------------------

/// One execution instance of a workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    /// Opaque thread id (caller-supplied or generated UUIDv7).
    pub thread_id: String,
    /// Current status.
    pub status: ThreadStatus,
    /// Session ids keyed by step id. A session binds exactly one
    /// `(thread_id, step_id)` pair and is never shared.
    pub session_ids: HashMap<String, String>,
    /// Step ids in completion order.
    pub completed_steps: Vec<String>,
    /// Results keyed by step id. Blocked steps never appear here.
    pub results: HashMap<String, StepResult>,
    /// Steps never dispatched because a transitive dependency failed.
    pub blocked_steps: Vec<String>,
    /// Optional project scope used to resolve agent references.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Reason supplied with the most recent pause, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause_reason: Option<String>,
    /// When the thread was created.
    pub created_at: DateTime<Utc>,
    /// When the thread state last changed.
    pub updated_at: DateTime<Utc>,
}

impl Thread {
    /// Create a fresh pending thread.
    pub fn new(thread_id: String, project_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            thread_id,
            status: ThreadStatus::Pending,
            session_ids: HashMap::new(),
            completed_steps: Vec::new(),
            results: HashMap::new(),
            blocked_steps: Vec::new(),
            project_id,
            pause_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether a step has already reached a result.
    pub fn is_step_done(&self, step_id: &str) -> bool {
        self.completed_steps.iter().any(|s| s == step_id)
    }

    /// Summarize step counts against a total step count.
    pub fn summary(&self, total_steps: usize) -> ThreadSummary {
        let failed = self
            .results
            .values()
            .filter(|r| r.status == StepStatus::Failed)
            .count();
        ThreadSummary {
            total: total_steps,
            completed: self.results.len() - failed,
            failed,
            blocked: self.blocked_steps.len(),
        }
    }
}

/// Step counts reported alongside a synchronous invocation result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub blocked: usize,
}

// ---------------------------------------------------------------------------
// Invocation outcomes
// ---------------------------------------------------------------------------

/// Result of a synchronous invocation, returned once the thread reaches a
/// terminal (or paused) status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeOutcome {
    pub thread_id: String,
    pub session_ids: HashMap<String, String>,
    pub results: HashMap<String, StepResult>,
    pub status: ThreadStatus,
    pub summary: ThreadSummary,
}
