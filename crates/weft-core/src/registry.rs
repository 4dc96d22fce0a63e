//! Live thread registry.
//!
//! Holds the authoritative in-memory state of every resident thread.
//! Reads return cloned snapshots; mutation goes through [`ThreadRegistry::update`]
//! so each entry is modified under its map shard lock. The executor is the
//! single writer for a thread's execution state; the only out-of-band
//! mutation is `pause`, which flips a running thread to paused.

use chrono::Utc;
use dashmap::DashMap;
use thiserror::Error;
use weft_types::thread::{Thread, ThreadStatus};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("thread not found: {0}")]
    NotFound(String),

    #[error("invalid thread state: {0}")]
    State(String),
}

/// In-memory registry of resident threads, keyed by thread id.
#[derive(Default)]
pub struct ThreadRegistry {
    threads: DashMap<String, Thread>,
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a thread is currently resident.
    pub fn contains(&self, thread_id: &str) -> bool {
        self.threads.contains_key(thread_id)
    }

    /// Snapshot of a resident thread.
    pub fn get(&self, thread_id: &str) -> Result<Thread, RegistryError> {
        self.threads
            .get(thread_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| RegistryError::NotFound(thread_id.to_string()))
    }

    /// Register a new thread. Fails if the id is already resident.
    pub fn insert(&self, thread: Thread) -> Result<(), RegistryError> {
        match self.threads.entry(thread.thread_id.clone()) {
            dashmap::Entry::Occupied(entry) => Err(RegistryError::State(format!(
                "thread already exists: {}",
                entry.key()
            ))),
            dashmap::Entry::Vacant(entry) => {
                entry.insert(thread);
                Ok(())
            }
        }
    }

    /// Replace a thread's state wholesale (used on resume, where state is
    /// rebuilt from a checkpoint).
    pub fn put(&self, thread: Thread) {
        self.threads.insert(thread.thread_id.clone(), thread);
    }

    /// Mutate a thread under its entry lock and return the updated snapshot.
    ///
    /// Bumps `updated_at` after the closure runs.
    pub fn update<F>(&self, thread_id: &str, mutate: F) -> Result<Thread, RegistryError>
    where
        F: FnOnce(&mut Thread),
    {
        let mut entry = self
            .threads
            .get_mut(thread_id)
            .ok_or_else(|| RegistryError::NotFound(thread_id.to_string()))?;
        mutate(&mut entry);
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    /// Pause a running thread.
    ///
    /// Only the running -> paused transition is legal; anything else is a
    /// state error. In-flight steps are not interrupted, the executor just
    /// stops dispatching new ones.
    pub fn pause(&self, thread_id: &str, reason: Option<String>) -> Result<Thread, RegistryError> {
        let mut entry = self
            .threads
            .get_mut(thread_id)
            .ok_or_else(|| RegistryError::NotFound(thread_id.to_string()))?;
        if entry.status != ThreadStatus::Running {
            return Err(RegistryError::State(format!(
                "thread {} is not running",
                thread_id
            )));
        }
        entry.status = ThreadStatus::Paused;
        entry.pause_reason = reason;
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    /// Remove a terminal thread from the registry.
    ///
    /// Non-terminal threads cannot be evicted; their state is only
    /// reconstructible from checkpoints once the run loop has finished.
    pub fn evict(&self, thread_id: &str) -> Result<Thread, RegistryError> {
        let entry = self
            .threads
            .get(thread_id)
            .ok_or_else(|| RegistryError::NotFound(thread_id.to_string()))?;
        if !entry.status.is_terminal() {
            return Err(RegistryError::State(format!(
                "thread {} has not finished",
                thread_id
            )));
        }
        drop(entry);
        self.threads
            .remove(thread_id)
            .map(|(_, thread)| thread)
            .ok_or_else(|| RegistryError::NotFound(thread_id.to_string()))
    }

    /// Ids of all resident threads.
    pub fn thread_ids(&self) -> Vec<String> {
        self.threads.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
