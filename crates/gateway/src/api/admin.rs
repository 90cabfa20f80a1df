//! Role and user CRUD. Changes apply live and are written back to the
//! YAML config, preserving unmanaged fields.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use wick_domain::config::UserConfig;

use crate::state::AppState;

use super::api_error;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PUT /admin/roles/{name}
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct RolePut {
    pub tools: Vec<String>,
}

pub async fn put_role(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<RolePut>,
) -> impl IntoResponse {
    let snapshot = {
        let mut roles = state.roles.write();
        roles.set_role(&name, body.tools.clone());
        roles.to_config()
    };
    if let Err(e) = state.config_store.save_roles(&snapshot) {
        return api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }
    Json(serde_json::json!({ "role": name, "tools": body.tools })).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DELETE /admin/roles/{name}
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn delete_role(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let removed_snapshot = {
        let mut roles = state.roles.write();
        let removed = roles.remove_role(&name);
        removed.then(|| roles.to_config())
    };
    match removed_snapshot {
        Some(snapshot) => {
            if let Err(e) = state.config_store.save_roles(&snapshot) {
                return api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
            }
            StatusCode::NO_CONTENT.into_response()
        }
        None => api_error(StatusCode::NOT_FOUND, format!("unknown role '{name}'")),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PUT /admin/users/{username}
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct UserPut {
    pub password_hash: String,
    pub role: String,
}

pub async fn put_user(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Json(body): Json<UserPut>,
) -> impl IntoResponse {
    let snapshot = {
        let mut users = state.users.write();
        match users.iter_mut().find(|u| u.username == username) {
            Some(user) => {
                user.password_hash = body.password_hash.clone();
                user.role = body.role.clone();
            }
            None => users.push(UserConfig {
                username: username.clone(),
                password_hash: body.password_hash.clone(),
                role: body.role.clone(),
            }),
        }
        users.clone()
    };
    if let Err(e) = state.config_store.save_users(&snapshot) {
        return api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }
    Json(serde_json::json!({ "username": username, "role": body.role })).into_response()
}
