//! SQLite checkpoint store.
//!
//! Implements `CheckpointStore` from `weft-core` using sqlx with split
//! read/write pools. Map-valued fields (session ids, results) are stored
//! as JSON blobs; the `(thread_id, seq)` unique constraint backs the
//! append-only, strictly-increasing sequence invariant at the storage
//! layer too.

use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;
use weft_types::checkpoint::Checkpoint;
use weft_types::error::StoreError;
use weft_types::thread::ThreadStatus;

use weft_core::repository::CheckpointStore;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `CheckpointStore`.
pub struct SqliteCheckpointStore {
    pool: DatabasePool,
}

impl SqliteCheckpointStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row type
// ---------------------------------------------------------------------------

struct CheckpointRow {
    checkpoint_id: String,
    thread_id: String,
    seq: i64,
    status: String,
    session_ids: String,
    completed_steps: String,
    results: String,
    created_at: String,
}

impl CheckpointRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            checkpoint_id: row.try_get("checkpoint_id")?,
            thread_id: row.try_get("thread_id")?,
            seq: row.try_get("seq")?,
            status: row.try_get("status")?,
            session_ids: row.try_get("session_ids")?,
            completed_steps: row.try_get("completed_steps")?,
            results: row.try_get("results")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_checkpoint(self) -> Result<Checkpoint, StoreError> {
        let checkpoint_id = Uuid::parse_str(&self.checkpoint_id)
            .map_err(|e| StoreError::Serialization(format!("invalid checkpoint id: {e}")))?;
        let status: ThreadStatus =
            serde_json::from_value(serde_json::Value::String(self.status.clone())).map_err(
                |_| StoreError::Serialization(format!("invalid thread status: {}", self.status)),
            )?;
        let session_ids = serde_json::from_str(&self.session_ids)
            .map_err(|e| StoreError::Serialization(format!("invalid session_ids JSON: {e}")))?;
        let completed_steps = serde_json::from_str(&self.completed_steps)
            .map_err(|e| StoreError::Serialization(format!("invalid completed_steps JSON: {e}")))?;
        let results = serde_json::from_str(&self.results)
            .map_err(|e| StoreError::Serialization(format!("invalid results JSON: {e}")))?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| StoreError::Serialization(format!("invalid created_at: {e}")))?
            .with_timezone(&Utc);

        Ok(Checkpoint {
            checkpoint_id,
            thread_id: self.thread_id,
            seq: self.seq as u64,
            status,
            session_ids,
            completed_steps,
            results,
            created_at,
        })
    }
}

fn status_str(status: ThreadStatus) -> Result<String, StoreError> {
    match serde_json::to_value(status) {
        Ok(serde_json::Value::String(s)) => Ok(s),
        _ => Err(StoreError::Serialization(format!(
            "unserializable status: {status:?}"
        ))),
    }
}

fn query_err(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Connection
        }
        other => StoreError::Query(other.to_string()),
    }
}

fn json_err(err: serde_json::Error) -> StoreError {
    StoreError::Serialization(err.to_string())
}

// ---------------------------------------------------------------------------
// CheckpointStore impl
// ---------------------------------------------------------------------------

impl CheckpointStore for SqliteCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO checkpoints
                (checkpoint_id, thread_id, seq, status, session_ids, completed_steps, results, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(checkpoint.checkpoint_id.to_string())
        .bind(&checkpoint.thread_id)
        .bind(checkpoint.seq as i64)
        .bind(status_str(checkpoint.status)?)
        .bind(serde_json::to_string(&checkpoint.session_ids).map_err(json_err)?)
        .bind(serde_json::to_string(&checkpoint.completed_steps).map_err(json_err)?)
        .bind(serde_json::to_string(&checkpoint.results).map_err(json_err)?)
        .bind(checkpoint.created_at.to_rfc3339())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn load_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM checkpoints WHERE thread_id = ? ORDER BY seq DESC LIMIT 1",
        )
        .bind(thread_id)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_err)?;

        row.map(|r| {
            CheckpointRow::from_row(&r)
                .map_err(query_err)
                .and_then(CheckpointRow::into_checkpoint)
        })
        .transpose()
    }

    async fn load_history(&self, thread_id: &str) -> Result<Vec<Checkpoint>, StoreError> {
        let rows = sqlx::query("SELECT * FROM checkpoints WHERE thread_id = ? ORDER BY seq ASC")
            .bind(thread_id)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;

        rows.iter()
            .map(|r| {
                CheckpointRow::from_row(r)
                    .map_err(query_err)
                    .and_then(CheckpointRow::into_checkpoint)
            })
            .collect()
    }

    async fn load_at(
        &self,
        thread_id: &str,
        checkpoint_id: Uuid,
    ) -> Result<Option<Checkpoint>, StoreError> {
        let row = sqlx::query("SELECT * FROM checkpoints WHERE thread_id = ? AND checkpoint_id = ?")
            .bind(thread_id)
            .bind(checkpoint_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        row.map(|r| {
            CheckpointRow::from_row(&r)
                .map_err(query_err)
                .and_then(CheckpointRow::into_checkpoint)
        })
        .transpose()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use weft_types::thread::{StepResult, StepStatus, Thread};

    async fn store() -> (SqliteCheckpointStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());
        let pool = DatabasePool::new(&url).await.unwrap();
        (SqliteCheckpointStore::new(pool), dir)
    }

    fn checkpoint(thread_id: &str, seq: u64) -> Checkpoint {
        let mut thread = Thread::new(thread_id.to_string(), None);
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
        Checkpoint::snapshot(&thread, seq)
    }

    #[tokio::test]
    async fn save_and_load_latest_round_trips() {
        let (store, _dir) = store().await;
        let cp = checkpoint("t1", 1);
        store.save(&cp).await.unwrap();

        let loaded = store.load_latest("t1").await.unwrap().unwrap();
        assert_eq!(loaded.checkpoint_id, cp.checkpoint_id);
        assert_eq!(loaded.seq, 1);
        assert_eq!(loaded.status, ThreadStatus::Running);
        assert_eq!(loaded.completed_steps, vec!["a"]);
        assert_eq!(loaded.results["a"].output, "4");
        assert_eq!(loaded.session_ids["a"], "s-1");
    }

    #[tokio::test]
    async fn load_latest_picks_highest_seq() {
        let (store, _dir) = store().await;
        for seq in 1..=3 {
            store.save(&checkpoint("t1", seq)).await.unwrap();
        }
        let latest = store.load_latest("t1").await.unwrap().unwrap();
        assert_eq!(latest.seq, 3);
    }

    #[tokio::test]
    async fn history_is_ordered_and_scoped_to_thread() {
        let (store, _dir) = store().await;
        store.save(&checkpoint("t1", 2)).await.unwrap();
        store.save(&checkpoint("t1", 1)).await.unwrap();
        store.save(&checkpoint("other", 1)).await.unwrap();

        let history = store.load_history("t1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].seq, 1);
        assert_eq!(history[1].seq, 2);
        assert!(history.iter().all(|c| c.thread_id == "t1"));
    }

    #[tokio::test]
    async fn load_at_finds_specific_checkpoint() {
        let (store, _dir) = store().await;
        let cp = checkpoint("t1", 1);
        store.save(&cp).await.unwrap();
        store.save(&checkpoint("t1", 2)).await.unwrap();

        let loaded = store.load_at("t1", cp.checkpoint_id).await.unwrap().unwrap();
        assert_eq!(loaded.seq, 1);
        // Wrong thread scope finds nothing.
        assert!(store.load_at("other", cp.checkpoint_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_seq_is_rejected() {
        let (store, _dir) = store().await;
        store.save(&checkpoint("t1", 1)).await.unwrap();
        let err = store.save(&checkpoint("t1", 1)).await.unwrap_err();
        assert!(matches!(err, StoreError::Query(_)));
    }

    #[tokio::test]
    async fn missing_thread_loads_nothing() {
        let (store, _dir) = store().await;
        assert!(store.load_latest("nope").await.unwrap().is_none());
        assert!(store.load_history("nope").await.unwrap().is_empty());
    }
}
