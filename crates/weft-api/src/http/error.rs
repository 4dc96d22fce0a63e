//! Application error type mapping to HTTP status codes and envelope format.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use weft_core::registry::RegistryError;
use weft_core::workflow::ExecutorError;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Executor and registry errors.
    Executor(ExecutorError),
    /// Resource lookup failure outside the executor.
    NotFound(String),
    /// Request shape errors caught before reaching the executor.
    Validation(String),
    /// Generic internal error.
    Internal(String),
}

impl From<ExecutorError> for AppError {
    fn from(e: ExecutorError) -> Self {
        AppError::Executor(e)
    }
}

impl From<RegistryError> for AppError {
    fn from(e: RegistryError) -> Self {
        AppError::Executor(ExecutorError::Registry(e))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Executor(ExecutorError::Validation(e)) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", e.to_string())
            }
            AppError::Executor(ExecutorError::Registry(RegistryError::NotFound(id))) => (
                StatusCode::NOT_FOUND,
                "THREAD_NOT_FOUND",
                format!("Thread '{id}' not found"),
            ),
            AppError::Executor(ExecutorError::Registry(RegistryError::State(msg))) => {
                (StatusCode::CONFLICT, "INVALID_STATE", msg.clone())
            }
            AppError::Executor(ExecutorError::ThreadExists(id)) => (
                StatusCode::CONFLICT,
                "THREAD_EXISTS",
                format!("Thread '{id}' already exists"),
            ),
            AppError::Executor(ExecutorError::CheckpointNotFound(id)) => (
                StatusCode::NOT_FOUND,
                "CHECKPOINT_NOT_FOUND",
                format!("Checkpoint '{id}' not found"),
            ),
            AppError::Executor(ExecutorError::NoCheckpoints(id)) => (
                StatusCode::NOT_FOUND,
                "CHECKPOINT_NOT_FOUND",
                format!("No checkpoints recorded for thread '{id}'"),
            ),
            AppError::Executor(ExecutorError::WaitTimeout(id)) => (
                StatusCode::REQUEST_TIMEOUT,
                "WAIT_TIMEOUT",
                format!("Thread '{id}' is still executing; poll its state or subscribe"),
            ),
            AppError::Executor(ExecutorError::Store(e)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR", e.to_string())
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg.clone())
            }
        };

        let body = json!({
            "data": null,
            "meta": {
                "request_id": "",
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "response_time_ms": 0
            },
            "errors": [{
                "code": code,
                "message": message,
            }]
        });

        (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}
