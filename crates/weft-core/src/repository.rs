//! Checkpoint store port.
//!
//! The executor appends a checkpoint after every state-changing event and
//! reads them back for resume and crash recovery. Backends live in
//! weft-infra (in-memory for tests/ephemeral runs, SQLite for durability).

use uuid::Uuid;
use weft_types::checkpoint::Checkpoint;
use weft_types::error::StoreError;

/// Append-only persistence for thread checkpoints.
///
/// Implementations must preserve append order per thread: `load_history`
/// returns checkpoints in ascending `seq`, and `load_latest` returns the
/// one with the highest `seq`. Checkpoints are never updated or deleted
/// individually.
pub trait CheckpointStore: Send + Sync {
    /// Append a checkpoint to its thread's sequence.
    fn save(&self, checkpoint: &Checkpoint)
    -> impl Future<Output = Result<(), StoreError>> + Send;

    /// The most recent checkpoint for a thread, if any exist.
    fn load_latest(
        &self,
        thread_id: &str,
    ) -> impl Future<Output = Result<Option<Checkpoint>, StoreError>> + Send;

    /// Full checkpoint history for a thread in ascending sequence order.
    fn load_history(
        &self,
        thread_id: &str,
    ) -> impl Future<Output = Result<Vec<Checkpoint>, StoreError>> + Send;

    /// A specific checkpoint by id, scoped to a thread.
    fn load_at(
        &self,
        thread_id: &str,
        checkpoint_id: Uuid,
    ) -> impl Future<Output = Result<Option<Checkpoint>, StoreError>> + Send;
}
