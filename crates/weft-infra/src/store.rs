//! Checkpoint backend selection.
//!
//! The executor is generic over one store type, so runtime selection
//! between the durable and ephemeral backends happens through this enum
//! rather than trait objects (the store trait is not object safe).

use uuid::Uuid;
use weft_core::repository::CheckpointStore;
use weft_types::checkpoint::Checkpoint;
use weft_types::config::{StorageBackend, WeftConfig};
use weft_types::error::StoreError;

use crate::memory::MemoryCheckpointStore;
use crate::sqlite::{DatabasePool, SqliteCheckpointStore};

pub enum CheckpointBackend {
    Memory(MemoryCheckpointStore),
    Sqlite(SqliteCheckpointStore),
}

impl CheckpointBackend {
    /// Build the backend named by the configuration.
    pub async fn from_config(config: &WeftConfig) -> Result<Self, StoreError> {
        match config.storage.backend {
            StorageBackend::Memory => Ok(Self::Memory(MemoryCheckpointStore::new())),
            StorageBackend::Sqlite => {
                let url = config
                    .storage
                    .database_url
                    .clone()
                    .unwrap_or_else(crate::sqlite::pool::default_database_url);
                let pool = DatabasePool::new(&url)
                    .await
                    .map_err(|e| StoreError::Query(format!("failed to open {url}: {e}")))?;
                Ok(Self::Sqlite(SqliteCheckpointStore::new(pool)))
            }
        }
    }
}

impl CheckpointStore for CheckpointBackend {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        match self {
            Self::Memory(store) => store.save(checkpoint).await,
            Self::Sqlite(store) => store.save(checkpoint).await,
        }
    }

    async fn load_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>, StoreError> {
        match self {
            Self::Memory(store) => store.load_latest(thread_id).await,
            Self::Sqlite(store) => store.load_latest(thread_id).await,
        }
    }

    async fn load_history(&self, thread_id: &str) -> Result<Vec<Checkpoint>, StoreError> {
        match self {
            Self::Memory(store) => store.load_history(thread_id).await,
            Self::Sqlite(store) => store.load_history(thread_id).await,
        }
    }

    async fn load_at(
        &self,
        thread_id: &str,
        checkpoint_id: Uuid,
    ) -> Result<Option<Checkpoint>, StoreError> {
        match self {
            Self::Memory(store) => store.load_at(thread_id, checkpoint_id).await,
            Self::Sqlite(store) => store.load_at(thread_id, checkpoint_id).await,
        }
    }
}
