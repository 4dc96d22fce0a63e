//! Thread event stream types.
//!
//! `ThreadEvent` is the unified event type broadcast during thread
//! execution. All variants are Clone + Send + Sync for use with tokio
//! broadcast channels. Events for different threads are never mixed on the
//! same topic.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::thread::{StepStatus, ThreadStatus};

/// Events emitted on a thread's topic during execution.
///
/// The first event any subscriber receives is a synthetic `recovery` event
/// summarizing current state, so a late or reconnecting subscriber can
/// catch up without replaying history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ThreadEvent {
    /// Synthetic first event for a new subscriber.
    Recovery {
        thread_id: String,
        session_ids: HashMap<String, String>,
        completed_steps: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// A step has been dispatched.
    StepStart {
        thread_id: String,
        step_id: String,
        session_id: String,
        timestamp: DateTime<Utc>,
    },

    /// Incremental text from an in-flight step.
    Token {
        thread_id: String,
        step_id: String,
        text: String,
        timestamp: DateTime<Utc>,
    },

    /// A step has finished (successfully or not).
    StepComplete {
        thread_id: String,
        step_id: String,
        status: StepStatus,
        timestamp: DateTime<Utc>,
    },

    /// The thread reached a terminal status.
    WorkflowComplete {
        thread_id: String,
        status: ThreadStatus,
        timestamp: DateTime<Utc>,
    },

    /// A thread-level error (agent failure, store failure).
    Error {
        thread_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step_id: Option<String>,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl ThreadEvent {
    /// The thread this event belongs to.
    pub fn thread_id(&self) -> &str {
        match self {
            Self::Recovery { thread_id, .. }
            | Self::StepStart { thread_id, .. }
            | Self::Token { thread_id, .. }
            | Self::StepComplete { thread_id, .. }
            | Self::WorkflowComplete { thread_id, .. }
            | Self::Error { thread_id, .. } => thread_id,
        }
    }
}
