//! Step execution sessions.
//!
//! A session binds exactly one `(thread_id, step_id)` pair for one
//! dispatch. It carries a fresh UUIDv7 id and a cancellation token that is
//! a child of the thread's token, so aborting the thread cancels every
//! live session without the sessions knowing about each other.

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Handle for one isolated step execution.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    /// Session id, unique per dispatch (a re-run of the same step gets a
    /// new session).
    pub session_id: String,
    /// Thread this session belongs to.
    pub thread_id: String,
    /// Step this session executes.
    pub step_id: String,
    cancel: CancellationToken,
}

impl SessionHandle {
    /// Open a session under the given thread cancellation token.
    pub fn open(thread_id: &str, step_id: &str, thread_cancel: &CancellationToken) -> Self {
        Self {
            session_id: Uuid::now_v7().to_string(),
            thread_id: thread_id.to_string(),
            step_id: step_id.to_string(),
            cancel: thread_cancel.child_token(),
        }
    }

    /// Resolves when the session (or its thread) is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
