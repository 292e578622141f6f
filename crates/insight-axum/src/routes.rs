//! Route definitions and router construction.

use axum::Router;
use axum::routing::{delete, get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Build all API routes without the `/api` prefix (for nesting).
fn api_routes() -> Router<AppState> {
    Router::new()
        // Tasks
        .route("/tasks", post(handlers::tasks::submit))
        .route("/tasks/{id}", get(handlers::tasks::snapshot))
        .route("/tasks/{id}/events", get(handlers::tasks::events))
        .route("/tasks/{id}/cancel", post(handlers::tasks::cancel))
        .route("/queue/stats", get(handlers::tasks::queue_stats))
        .route("/queue/tasks", get(handlers::tasks::queue_tasks))
        // Artifacts
        .route("/artifacts", get(handlers::artifacts::list))
        .route(
            "/artifacts/{hash}",
            get(handlers::artifacts::get_latest).delete(handlers::artifacts::delete),
        )
        .route(
            "/artifacts/{hash}/versions/{version}",
            get(handlers::artifacts::get_version),
        )
        .route("/artifacts/{hash}/markdown", get(handlers::artifacts::markdown))
        .route("/artifacts/{hash}/visual", get(handlers::artifacts::visual))
        .route("/artifacts/{hash}/pdf", get(handlers::artifacts::pdf))
        // Trash
        .route("/trash", get(handlers::artifacts::list_trash))
        .route("/trash/{entry}/restore", post(handlers::artifacts::restore))
        .route("/trash/{entry}", delete(handlers::artifacts::purge))
        // Lookup & admin
        .route("/lookup", get(handlers::artifacts::lookup))
        .route("/admin/refresh-index", post(handlers::artifacts::refresh_index))
        // TTS
        .route("/tts", post(handlers::tts::request))
        .route("/tts/queue", get(handlers::tts::queue))
        .route("/tts/{hash}/status", get(handlers::tts::status))
        .route("/tts/{hash}/stream", get(handlers::tts::stream))
}

/// The full application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .nest("/api", api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
