//! HTTP router assembly.

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the application router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/threads", post(handlers::thread::invoke))
        .route("/threads/async", post(handlers::thread::invoke_async))
        .route("/threads/{thread_id}", get(handlers::thread::get_state))
        .route(
            "/threads/{thread_id}/history",
            get(handlers::thread::get_history),
        )
        .route(
            "/threads/{thread_id}/checkpoints/{checkpoint_id}",
            get(handlers::thread::get_checkpoint),
        )
        .route("/threads/{thread_id}/resume", post(handlers::thread::resume))
        .route("/threads/{thread_id}/pause", post(handlers::thread::pause))
        .route("/threads/{thread_id}/abort", post(handlers::thread::abort));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/ws/threads/{thread_id}", get(handlers::stream::ws_handler))
        .route("/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - Liveness probe.
async fn health_check() -> &'static str {
    "ok"
}
