//! HTTP surface: routing plus the per-endpoint handler modules.

pub mod admin;
pub mod agents;
pub mod files;
pub mod mcp;
pub mod stream;
pub mod tools;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, patch, post, put};
use axum::Router;

use crate::auth;
use crate::state::AppState;

/// Build a standardized JSON error response: `{ "error": "<message>" }`.
pub fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        // ── Agents ────────────────────────────────────────────────
        .route("/agents/", get(agents::list))
        .route("/agents/:id/stream", post(stream::stream_turn))
        .route("/agents/:id/stop", post(stream::stop_turn))
        .route("/agents/:id/backend", patch(agents::patch_backend))
        .route("/agents/:id/hooks", patch(agents::patch_hooks))
        .route("/agents/:id", delete(agents::delete_instance))
        .route("/agents/threads/:thread_id/trace", get(agents::thread_trace))
        // ── File transfer ─────────────────────────────────────────
        .route("/agents/files/download", get(files::download))
        .route("/agents/files/upload", put(files::upload))
        // ── Tool admin ────────────────────────────────────────────
        .route("/tools/", get(tools::list))
        // ── MCP federation endpoint ───────────────────────────────
        .route(
            "/mcp",
            post(mcp::rpc).get(mcp::notifications_sse).delete(mcp::terminate),
        )
        // ── Role/user admin ───────────────────────────────────────
        .route(
            "/admin/roles/:name",
            put(admin::put_role).delete(admin::delete_role),
        )
        .route("/admin/users/:username", put(admin::put_user))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth::authenticate,
        ))
        .with_state(state)
}
