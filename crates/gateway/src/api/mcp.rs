//! The `/mcp` endpoint: a JSON-RPC 2.0 server federating the downstream
//! tool set, with per-session SSE for server-initiated notifications.

use std::collections::HashMap;

use axum::extract::{Extension, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use wick_mcp::{
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, INTERNAL_ERROR, INVALID_PARAMS,
    METHOD_NOT_FOUND, PARSE_ERROR, PROTOCOL_VERSION,
};

use crate::auth::Identity;
use crate::state::AppState;

const SESSION_HEADER: &str = "Mcp-Session-Id";

/// Notification channel capacity per session; overflow drops.
const SESSION_BUFFER: usize = 16;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session map
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Sessions created by `initialize`. The SSE channel attaches on GET.
#[derive(Default)]
pub struct McpSessionMap {
    sessions: Mutex<HashMap<String, Option<mpsc::Sender<JsonRpcNotification>>>>,
}

impl McpSessionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.sessions.lock().insert(id.clone(), None);
        id
    }

    pub fn exists(&self, session_id: &str) -> bool {
        self.sessions.lock().contains_key(session_id)
    }

    /// Attach an SSE channel to an existing session.
    pub fn attach(&self, session_id: &str) -> Option<mpsc::Receiver<JsonRpcNotification>> {
        let mut sessions = self.sessions.lock();
        let slot = sessions.get_mut(session_id)?;
        let (tx, rx) = mpsc::channel(SESSION_BUFFER);
        *slot = Some(tx);
        Some(rx)
    }

    pub fn remove(&self, session_id: &str) -> bool {
        self.sessions.lock().remove(session_id).is_some()
    }

    /// Push `notifications/tools/list_changed` to every attached session.
    /// Never blocks; full channels drop the notification.
    pub fn broadcast_list_changed(&self) {
        let notification = JsonRpcNotification::new("notifications/tools/list_changed");
        let sessions = self.sessions.lock();
        for tx in sessions.values().flatten() {
            let _ = tx.try_send(notification.clone());
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Outcome of one POSTed message.
enum Reply {
    /// A JSON-RPC response, with the session header on `initialize`.
    Response(Box<JsonRpcResponse>, Option<String>),
    /// Notifications are accepted without a body.
    Accepted,
}

async fn dispatch(state: &AppState, role: &str, req: JsonRpcRequest) -> Reply {
    if req.is_notification() {
        // Currently only `notifications/initialized` arrives here; any
        // notification is acknowledged without processing.
        tracing::debug!(method = %req.method, "MCP notification received");
        return Reply::Accepted;
    }
    let id = req.id.clone().unwrap_or(Value::Null);

    match req.method.as_str() {
        "initialize" => {
            let session_id = state.mcp_sessions.create();
            let result = serde_json::json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": { "listChanged": true } },
                "serverInfo": {
                    "name": "wick-gateway",
                    "version": env!("CARGO_PKG_VERSION"),
                },
            });
            Reply::Response(
                Box::new(JsonRpcResponse::success(id, result)),
                Some(session_id),
            )
        }

        "tools/list" => {
            let tools = state.roles.read().filter(role, state.federation.tools());
            let tools: Vec<Value> = tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "name": t.name,
                        "description": t.description,
                        "inputSchema": t.input_schema,
                    })
                })
                .collect();
            Reply::Response(
                Box::new(JsonRpcResponse::success(
                    id,
                    serde_json::json!({ "tools": tools }),
                )),
                None,
            )
        }

        "tools/call" => {
            let params = req.params.unwrap_or(Value::Null);
            let Some(name) = params.get("name").and_then(Value::as_str) else {
                return Reply::Response(
                    Box::new(JsonRpcResponse::failure(
                        id,
                        INVALID_PARAMS,
                        "tools/call requires a tool name",
                    )),
                    None,
                );
            };
            let arguments = params
                .get("arguments")
                .cloned()
                .unwrap_or_else(|| Value::Object(Default::default()));

            if !state.roles.read().allowed(role, name) {
                return Reply::Response(
                    Box::new(JsonRpcResponse::failure(
                        id,
                        INTERNAL_ERROR,
                        format!("access denied: role '{role}' may not call '{name}'"),
                    )),
                    None,
                );
            }
            if state.federation.owner_of(name).is_none() {
                return Reply::Response(
                    Box::new(JsonRpcResponse::failure(
                        id,
                        INVALID_PARAMS,
                        format!("unknown tool '{name}'"),
                    )),
                    None,
                );
            }

            match state.federation.call_tool(name, arguments).await {
                Ok(result) => {
                    let value = serde_json::to_value(&result).unwrap_or(Value::Null);
                    Reply::Response(Box::new(JsonRpcResponse::success(id, value)), None)
                }
                Err(e) => Reply::Response(
                    Box::new(JsonRpcResponse::failure(
                        id,
                        INTERNAL_ERROR,
                        format!("downstream call failed: {e}"),
                    )),
                    None,
                ),
            }
        }

        "ping" => Reply::Response(
            Box::new(JsonRpcResponse::success(id, serde_json::json!({}))),
            None,
        ),

        other => Reply::Response(
            Box::new(JsonRpcResponse::failure(
                id,
                METHOD_NOT_FOUND,
                format!("unknown method '{other}'"),
            )),
            None,
        ),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /mcp
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn rpc(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    body: String,
) -> impl IntoResponse {
    let req: JsonRpcRequest = match serde_json::from_str(&body) {
        Ok(req) => req,
        Err(e) => {
            return Json(JsonRpcResponse::failure(
                Value::Null,
                PARSE_ERROR,
                format!("parse error: {e}"),
            ))
            .into_response();
        }
    };

    tracing::debug!(method = %req.method, role = %identity.role, "MCP request");

    match dispatch(&state, &identity.role, req).await {
        Reply::Accepted => StatusCode::ACCEPTED.into_response(),
        Reply::Response(response, session) => {
            let mut headers = HeaderMap::new();
            if let Some(session_id) = session {
                if let Ok(value) = session_id.parse() {
                    headers.insert(SESSION_HEADER, value);
                }
            }
            (headers, Json(*response)).into_response()
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /mcp (notification stream)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn notifications_sse(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let wants_stream = headers
        .get("accept")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("text/event-stream"));
    if !wants_stream {
        return super::api_error(
            StatusCode::NOT_ACCEPTABLE,
            "GET /mcp requires Accept: text/event-stream",
        );
    }

    let Some(session_id) = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
    else {
        return super::api_error(StatusCode::BAD_REQUEST, "missing Mcp-Session-Id header");
    };

    let Some(mut rx) = state.mcp_sessions.attach(&session_id) else {
        return super::api_error(StatusCode::NOT_FOUND, "unknown session");
    };

    let stream = async_stream::stream! {
        while let Some(notification) = rx.recv().await {
            let data = serde_json::to_string(&notification).unwrap_or_default();
            yield Ok::<_, std::convert::Infallible>(
                Event::default().event("message").data(data),
            );
        }
    };

    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DELETE /mcp
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn terminate(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let Some(session_id) = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()) else {
        return super::api_error(StatusCode::BAD_REQUEST, "missing Mcp-Session-Id header");
    };
    if state.mcp_sessions.remove(session_id) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        super::api_error(StatusCode::NOT_FOUND, "unknown session")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
