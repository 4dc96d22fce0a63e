//! In-memory checkpoint store.
//!
//! Ephemeral backend for tests and throwaway runs. Same append-only
//! semantics as the SQLite store, including rejection of a duplicate
//! `(thread_id, seq)` pair, but nothing survives the process.

use std::collections::HashMap;

use tokio::sync::RwLock;
use uuid::Uuid;
use weft_core::repository::CheckpointStore;
use weft_types::checkpoint::Checkpoint;
use weft_types::error::StoreError;

#[derive(Default)]
pub struct MemoryCheckpointStore {
    threads: RwLock<HashMap<String, Vec<Checkpoint>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        let mut threads = self.threads.write().await;
        let history = threads.entry(checkpoint.thread_id.clone()).or_default();
        if history.iter().any(|c| c.seq == checkpoint.seq) {
            return Err(StoreError::Query(format!(
                "duplicate checkpoint seq {} for thread {}",
                checkpoint.seq, checkpoint.thread_id
            )));
        }
        history.push(checkpoint.clone());
        history.sort_by_key(|c| c.seq);
        Ok(())
    }

    async fn load_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>, StoreError> {
        let threads = self.threads.read().await;
        Ok(threads
            .get(thread_id)
            .and_then(|history| history.last().cloned()))
    }

    async fn load_history(&self, thread_id: &str) -> Result<Vec<Checkpoint>, StoreError> {
        let threads = self.threads.read().await;
        Ok(threads.get(thread_id).cloned().unwrap_or_default())
    }

    async fn load_at(
        &self,
        thread_id: &str,
        checkpoint_id: Uuid,
    ) -> Result<Option<Checkpoint>, StoreError> {
        let threads = self.threads.read().await;
        Ok(threads.get(thread_id).and_then(|history| {
            history
                .iter()
                .find(|c| c.checkpoint_id == checkpoint_id)
                .cloned()
        }))
    }
}
