//! Thread invocation and inspection handlers for the REST API.
//!
//! Endpoints for running workflows synchronously or in the background,
//! reading live thread state (with checkpoint fallback for threads no
//! longer resident), and the pause/resume/abort control operations.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use axum::Json;
use axum::extract::{Path, State};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use weft_core::repository::CheckpointStore;
use weft_types::checkpoint::Checkpoint;
use weft_types::thread::{InvokeOutcome, StepResult, Thread, ThreadStatus};
use weft_types::workflow::WorkflowInput;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request and view types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct InvokeRequest {
    /// Single step object or step array.
    pub steps: WorkflowInput,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub thread_id: Option<String>,
    /// For synchronous invocation: give up waiting after this long. The
    /// thread keeps executing.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ResumeRequest {
    /// The workflow definition to resume with.
    pub steps: WorkflowInput,
    /// Checkpoint to roll back to; latest when omitted.
    #[serde(default)]
    pub checkpoint_id: Option<Uuid>,
    #[serde(default)]
    pub project_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PauseRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Thread state as reported by the API.
///
/// `resident` distinguishes live registry state from state reconstructed
/// out of the latest checkpoint after the thread left memory.
#[derive(Debug, Serialize)]
pub struct ThreadStateView {
    pub thread_id: String,
    pub status: ThreadStatus,
    pub session_ids: HashMap<String, String>,
    pub completed_steps: Vec<String>,
    pub results: HashMap<String, StepResult>,
    pub blocked_steps: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pause_reason: Option<String>,
    pub resident: bool,
    pub updated_at: DateTime<Utc>,
}

impl ThreadStateView {
    pub fn from_thread(thread: &Thread) -> Self {
        Self {
            thread_id: thread.thread_id.clone(),
            status: thread.status,
            session_ids: thread.session_ids.clone(),
            completed_steps: thread.completed_steps.clone(),
            results: thread.results.clone(),
            blocked_steps: thread.blocked_steps.clone(),
            pause_reason: thread.pause_reason.clone(),
            resident: true,
            updated_at: thread.updated_at,
        }
    }

    pub fn from_checkpoint(checkpoint: Checkpoint) -> Self {
        Self {
            thread_id: checkpoint.thread_id,
            status: checkpoint.status,
            session_ids: checkpoint.session_ids,
            completed_steps: checkpoint.completed_steps,
            results: checkpoint.results,
            blocked_steps: Vec::new(),
            pause_reason: None,
            resident: false,
            updated_at: checkpoint.created_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Invocation handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/threads - Run a workflow and wait for it to settle.
pub async fn invoke(
    State(state): State<AppState>,
    Json(body): Json<InvokeRequest>,
) -> Result<ApiResponse<InvokeOutcome>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let outcome = state
        .executor
        .invoke(
            body.steps,
            body.project_id,
            body.thread_id,
            body.timeout_ms.map(Duration::from_millis),
        )
        .await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let self_link = format!("/api/v1/threads/{}", outcome.thread_id);
    Ok(ApiResponse::success(outcome, request_id, elapsed).with_link("self", &self_link))
}

/// POST /api/v1/threads/async - Start a workflow and return its thread id.
pub async fn invoke_async(
    State(state): State<AppState>,
    Json(body): Json<InvokeRequest>,
) -> Result<ApiResponse<serde_json::Value>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let thread_id = state
        .executor
        .invoke_async(body.steps, body.project_id, body.thread_id)?;

    let elapsed = start.elapsed().as_millis() as u64;
    let data = serde_json::json!({ "thread_id": thread_id, "status": "started" });
    Ok(ApiResponse::success(data, request_id, elapsed)
        .with_link("self", &format!("/api/v1/threads/{thread_id}"))
        .with_link("events", &format!("/ws/threads/{thread_id}")))
}

// ---------------------------------------------------------------------------
// State and history handlers
// ---------------------------------------------------------------------------

/// GET /api/v1/threads/:id - Live thread state, falling back to the latest
/// checkpoint once the thread is no longer resident.
pub async fn get_state(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<ApiResponse<ThreadStateView>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let view = match state.registry.get(&thread_id) {
        Ok(thread) => ThreadStateView::from_thread(&thread),
        Err(_) => {
            let checkpoint = state
                .store
                .load_latest(&thread_id)
                .await
                .map_err(|e| AppError::Internal(e.to_string()))?
                .ok_or_else(|| AppError::NotFound(format!("Thread '{thread_id}' not found")))?;
            ThreadStateView::from_checkpoint(checkpoint)
        }
    };

    let elapsed = start.elapsed().as_millis() as u64;
    let self_link = format!("/api/v1/threads/{thread_id}");
    let history_link = format!("/api/v1/threads/{thread_id}/history");
    Ok(ApiResponse::success(view, request_id, elapsed)
        .with_link("self", &self_link)
        .with_link("history", &history_link))
}

/// GET /api/v1/threads/:id/history - Full checkpoint history.
pub async fn get_history(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<ApiResponse<Vec<Checkpoint>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let history = state
        .store
        .load_history(&thread_id)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;
    if history.is_empty() && !state.registry.contains(&thread_id) {
        return Err(AppError::NotFound(format!("Thread '{thread_id}' not found")));
    }

    let elapsed = start.elapsed().as_millis() as u64;
    let self_link = format!("/api/v1/threads/{thread_id}/history");
    Ok(ApiResponse::success(history, request_id, elapsed).with_link("self", &self_link))
}

/// GET /api/v1/threads/:id/checkpoints/:checkpoint_id - One checkpoint.
pub async fn get_checkpoint(
    State(state): State<AppState>,
    Path((thread_id, checkpoint_id)): Path<(String, Uuid)>,
) -> Result<ApiResponse<Checkpoint>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let checkpoint = state
        .store
        .load_at(&thread_id, checkpoint_id)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
        .ok_or_else(|| AppError::NotFound(format!("Checkpoint '{checkpoint_id}' not found")))?;

    let elapsed = start.elapsed().as_millis() as u64;
    Ok(ApiResponse::success(checkpoint, request_id, elapsed))
}

// ---------------------------------------------------------------------------
// Control handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/threads/:id/resume - Resume from a checkpoint.
pub async fn resume(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    Json(body): Json<ResumeRequest>,
) -> Result<ApiResponse<ThreadStateView>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let thread = state
        .executor
        .resume(&thread_id, body.steps, body.checkpoint_id, body.project_id)
        .await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let self_link = format!("/api/v1/threads/{thread_id}");
    Ok(
        ApiResponse::success(ThreadStateView::from_thread(&thread), request_id, elapsed)
            .with_link("self", &self_link)
            .with_link("events", &format!("/ws/threads/{thread_id}")),
    )
}

/// POST /api/v1/threads/:id/pause - Pause a running thread.
pub async fn pause(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    body: Option<Json<PauseRequest>>,
) -> Result<ApiResponse<ThreadStateView>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let reason = body.and_then(|Json(b)| b.reason);
    let thread = state.executor.pause(&thread_id, reason)?;

    let elapsed = start.elapsed().as_millis() as u64;
    Ok(ApiResponse::success(
        ThreadStateView::from_thread(&thread),
        request_id,
        elapsed,
    ))
}

/// POST /api/v1/threads/:id/abort - Abort a thread.
pub async fn abort(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<ApiResponse<serde_json::Value>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    state.executor.abort(&thread_id).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let data = serde_json::json!({ "thread_id": thread_id, "status": "aborting" });
    Ok(ApiResponse::success(data, request_id, elapsed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_types::thread::StepStatus;

    #[test]
    fn view_from_checkpoint_is_marked_non_resident() {
        let mut thread = Thread::new("t1".to_string(), None);
        thread.status = ThreadStatus::Completed;
        thread.completed_steps.push("a".to_string());
        thread.results.insert(
            "a".to_string(),
            StepResult {
                output: "4".to_string(),
                status: StepStatus::Completed,
            },
        );
        let checkpoint = Checkpoint::snapshot(&thread, 3);

        let view = ThreadStateView::from_checkpoint(checkpoint);
        assert!(!view.resident);
        assert_eq!(view.status, ThreadStatus::Completed);
        assert_eq!(view.completed_steps, vec!["a"]);

        let live = ThreadStateView::from_thread(&thread);
        assert!(live.resident);
    }
}
