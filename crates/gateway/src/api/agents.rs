//! Agent admin endpoints: listing, backend/hook patches, instance
//! deletion, and the per-thread trace query.

use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use wick_backend::Backend;
use wick_domain::config::{BackendCfg, BackendKind, HookOverrides};

use crate::auth::Identity;
use crate::state::AppState;

use super::api_error;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /agents/
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> impl IntoResponse {
    Json(state.registry.list_agents(&identity.user))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PATCH /agents/{id}/backend
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct BackendPatch {
    pub mode: String,
    #[serde(default)]
    pub sandbox_url: Option<String>,
}

pub async fn patch_backend(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Extension(identity): Extension<Identity>,
    Json(body): Json<BackendPatch>,
) -> impl IntoResponse {
    let kind = match body.mode.as_str() {
        "state" => BackendKind::State,
        "local" => BackendKind::Local,
        "docker" => BackendKind::Docker,
        other => {
            return api_error(
                StatusCode::BAD_REQUEST,
                format!("unknown backend mode '{other}'"),
            )
        }
    };

    let result = state
        .registry
        .update_instance_config(&agent_id, &identity.user, |config| {
            let backend = config.backend.get_or_insert_with(BackendCfg::default);
            backend.kind = kind;
            if body.sandbox_url.is_some() {
                backend.docker_host = body.sandbox_url.clone();
            }
        });

    match result {
        Ok(instance) => Json(serde_json::json!({
            "agent_id": agent_id,
            "backend_type": body.mode,
            "sandbox_url": instance.config_snapshot().backend.and_then(|b| b.docker_host),
        }))
        .into_response(),
        Err(e) => api_error(StatusCode::NOT_FOUND, e.to_string()),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PATCH /agents/{id}/hooks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize, Default)]
pub struct HooksPatch {
    #[serde(default)]
    pub add: Vec<String>,
    #[serde(default)]
    pub remove: Vec<String>,
    #[serde(default)]
    pub config: std::collections::HashMap<String, serde_json::Value>,
}

pub async fn patch_hooks(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Extension(identity): Extension<Identity>,
    Json(body): Json<HooksPatch>,
) -> impl IntoResponse {
    let overrides = HookOverrides {
        add: body.add,
        remove: body.remove,
        config: body.config,
    };
    match state
        .registry
        .update_hook_overrides(&agent_id, &identity.user, overrides)
    {
        Ok(hooks) => Json(serde_json::json!({ "agent_id": agent_id, "hooks": hooks })).into_response(),
        Err(e) => api_error(StatusCode::NOT_FOUND, e.to_string()),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DELETE /agents/{id}
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn delete_instance(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Extension(identity): Extension<Identity>,
) -> impl IntoResponse {
    match state.registry.delete_instance(&agent_id, &identity.user) {
        Some(instance) => {
            if let Some(backend) = instance.backend() {
                tokio::spawn(async move { backend.shutdown().await });
            }
            StatusCode::NO_CONTENT.into_response()
        }
        None => api_error(
            StatusCode::NOT_FOUND,
            format!("no instance of '{agent_id}' for this user"),
        ),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /agents/threads/{thread_id}/trace
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn thread_trace(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> impl IntoResponse {
    Json(serde_json::json!({
        "thread_id": thread_id,
        "spans": state.traces.query(&thread_id),
    }))
}
