//! Workspace file transfer, bounded to the backend workdir.

use axum::extract::{Extension, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use wick_backend::Backend;

use crate::auth::Identity;
use crate::state::AppState;

use super::api_error;

/// Resolve the target instance's backend, building it on demand. Falls
/// back to the first registered agent when none is named.
fn resolve_backend(
    state: &AppState,
    user: &str,
    agent_id: Option<&str>,
) -> Result<std::sync::Arc<dyn wick_backend::Backend>, (StatusCode, String)> {
    let agent_id = match agent_id {
        Some(id) => id.to_string(),
        None => state
            .registry
            .template_ids()
            .into_iter()
            .next()
            .ok_or((StatusCode::NOT_FOUND, "no agents configured".to_string()))?,
    };

    let instance = state
        .registry
        .get_or_clone(&agent_id, user)
        .map_err(|e| (StatusCode::NOT_FOUND, e.to_string()))?;
    let agent = state
        .registry
        .ensure_agent(
            &instance,
            &state.static_tools,
            state.federation.clone(),
            state.traces.clone(),
        )
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    agent.backend().ok_or((
        StatusCode::BAD_REQUEST,
        format!("agent '{agent_id}' has no workspace backend"),
    ))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /agents/files/download?path=…
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub path: String,
    #[serde(default)]
    pub agent_id: Option<String>,
}

pub async fn download(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<DownloadQuery>,
) -> impl IntoResponse {
    let backend = match resolve_backend(&state, &identity.user, query.agent_id.as_deref()) {
        Ok(backend) => backend,
        Err((status, msg)) => return api_error(status, msg),
    };

    let mut results = backend.download_files(&[query.path.clone()]).await;
    let result = results.remove(0);
    match result.content {
        Some(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/octet-stream")],
            bytes,
        )
            .into_response(),
        None => api_error(
            StatusCode::NOT_FOUND,
            result.error.unwrap_or_else(|| "file not found".into()),
        ),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PUT /agents/files/upload
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    pub path: String,
    pub content: String,
    #[serde(default)]
    pub agent_id: Option<String>,
}

pub async fn upload(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(body): Json<UploadRequest>,
) -> impl IntoResponse {
    let backend = match resolve_backend(&state, &identity.user, body.agent_id.as_deref()) {
        Ok(backend) => backend,
        Err((status, msg)) => return api_error(status, msg),
    };

    let mut results = backend
        .upload_files(&[(body.path.clone(), body.content.into_bytes())])
        .await;
    let result = results.remove(0);
    if result.ok {
        Json(serde_json::json!({ "path": result.path, "ok": true })).into_response()
    } else {
        api_error(
            StatusCode::BAD_REQUEST,
            result.error.unwrap_or_else(|| "upload failed".into()),
        )
    }
}
