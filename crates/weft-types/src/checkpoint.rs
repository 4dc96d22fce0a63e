//! Checkpoint snapshot types.
//!
//! A checkpoint is an immutable snapshot of a thread's progress, appended
//! after every state-changing event. The per-thread sequence is strictly
//! increasing and append-only; a checkpoint is never mutated once written.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::thread::{StepResult, Thread, ThreadStatus};

/// Immutable snapshot of a thread's state at one point in its execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// UUIDv7 checkpoint id (time-sortable).
    pub checkpoint_id: Uuid,
    /// Thread this checkpoint belongs to.
    pub thread_id: String,
    /// Position in the thread's append-only sequence (1-based, strictly
    /// increasing).
    pub seq: u64,
    /// Thread status at snapshot time.
    pub status: ThreadStatus,
    /// Session ids keyed by step id at snapshot time.
    pub session_ids: HashMap<String, String>,
    /// Step ids in completion order at snapshot time.
    pub completed_steps: Vec<String>,
    /// Step results at snapshot time.
    pub results: HashMap<String, StepResult>,
    /// When the snapshot was taken.
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Snapshot a thread at the given sequence number.
    pub fn snapshot(thread: &Thread, seq: u64) -> Self {
        Self {
            checkpoint_id: Uuid::now_v7(),
            thread_id: thread.thread_id.clone(),
            seq,
            status: thread.status,
            session_ids: thread.session_ids.clone(),
            completed_steps: thread.completed_steps.clone(),
            results: thread.results.clone(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::StepStatus;

    #[test]
    fn snapshot_copies_thread_state() {
        let mut thread = Thread::new("t1".to_string(), None);
        thread.status = ThreadStatus::Running;
        thread
            .session_ids
            .insert("a".to_string(), "s-1".to_string());
        thread.completed_steps.push("a".to_string());
        thread.results.insert(
            "a".to_string(),
            StepResult {
                output: "4".to_string(),
                status: StepStatus::Completed,
            },
        );

        let cp = Checkpoint::snapshot(&thread, 3);
        assert_eq!(cp.thread_id, "t1");
        assert_eq!(cp.seq, 3);
        assert_eq!(cp.status, ThreadStatus::Running);
        assert_eq!(cp.completed_steps, vec!["a"]);
        assert_eq!(cp.session_ids.get("a").unwrap(), "s-1");
    }

    #[test]
    fn checkpoint_ids_are_time_sortable() {
        let thread = Thread::new("t1".to_string(), None);
        let a = Checkpoint::snapshot(&thread, 1);
        let b = Checkpoint::snapshot(&thread, 2);
        // UUIDv7 sorts by creation time.
        assert!(a.checkpoint_id < b.checkpoint_id);
    }
}
