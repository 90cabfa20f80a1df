//! The streaming turn endpoint.
//!
//! `POST /agents/{id}/stream` runs one agent turn and streams every engine
//! event over SSE. Exactly one terminal `done` or `error` event closes the
//! stream; comment lines are keep-alives.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures_core::Stream;
use serde::Deserialize;

use wick_domain::message::Message;
use wick_domain::stream::StreamEvent;
use wick_engine::EventSink;

use crate::auth::Identity;
use crate::state::AppState;

use super::api_error;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request shape
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct TurnRequest {
    pub messages: Vec<IncomingMessage>,
    #[serde(default)]
    pub thread_id: Option<String>,
    /// Record spans for this turn (queryable via the trace endpoint).
    #[serde(default)]
    pub trace: bool,
}

#[derive(Debug, Deserialize)]
pub struct IncomingMessage {
    pub role: String,
    pub content: String,
}

/// Validate the request messages: roles limited to `{user, system}`,
/// non-empty content, and the final message must be the user turn.
fn validate_request(messages: &[IncomingMessage]) -> Result<(), String> {
    if messages.is_empty() {
        return Err("messages must not be empty".into());
    }
    for (i, msg) in messages.iter().enumerate() {
        match msg.role.as_str() {
            "user" | "system" => {}
            other => return Err(format!("message {i}: role '{other}' is not allowed")),
        }
        if msg.content.is_empty() {
            return Err(format!("message {i}: empty content"));
        }
    }
    if messages.last().map(|m| m.role.as_str()) != Some("user") {
        return Err("the final message must have role 'user'".into());
    }
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /agents/{id}/stream
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn stream_turn(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Extension(identity): Extension<Identity>,
    Json(body): Json<TurnRequest>,
) -> impl IntoResponse {
    // ── User-input validation: 4xx, never an error event. ─────────
    if let Err(e) = validate_request(&body.messages) {
        return api_error(StatusCode::BAD_REQUEST, e);
    }

    let instance = match state.registry.get_or_clone(&agent_id, &identity.user) {
        Ok(instance) => instance,
        Err(e) => return api_error(StatusCode::NOT_FOUND, e.to_string()),
    };
    let agent = match state.registry.ensure_agent(
        &instance,
        &state.static_tools,
        state.federation.clone(),
        state.traces.clone(),
    ) {
        Ok(agent) => agent,
        Err(e) => {
            return api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("cannot build agent: {e}"),
            )
        }
    };

    let thread_id = body
        .thread_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    // Concurrent turns on one thread are rejected, not queued.
    let permit = match state.turn_locks.try_acquire(&thread_id) {
        Ok(permit) => permit,
        Err(busy) => return api_error(StatusCode::CONFLICT, busy.to_string()),
    };

    let thread_state = state.threads.load_or_create(&thread_id);

    // A fresh thread starts from the agent's system prompt.
    let system_prompt = agent.config().system_prompt.clone();
    if thread_state.message_count() == 0 && !system_prompt.is_empty() {
        thread_state.push_message(Message::system(system_prompt));
    }

    // Leading system/user messages are context; the final one is the turn.
    let (turn, context) = body.messages.split_last().expect("validated non-empty");
    for msg in context {
        let message = match msg.role.as_str() {
            "system" => Message::system(&msg.content),
            _ => Message::user(&msg.content),
        };
        thread_state.push_message(message);
    }
    let user_message = Message::user(&turn.content);

    let cancel = state.cancel_map.register(&thread_id);
    let (events, rx) = EventSink::new();

    // The turn runs in its own task; the SSE writer below is the single
    // consumer. A dropped client does not abort the turn.
    {
        let state = state.clone();
        let thread_id = thread_id.clone();
        let user = identity.user.clone();
        let trace = body.trace;
        tokio::spawn(async move {
            agent
                .run_turn(
                    &state.threads,
                    thread_state,
                    user_message,
                    &user,
                    cancel,
                    events,
                    trace,
                )
                .await;
            state.cancel_map.remove(&thread_id);
            drop(permit);
        });
    }

    Sse::new(event_stream(rx))
        .keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(15))
                .text("keep-alive"),
        )
        .into_response()
}

fn event_stream(
    mut rx: tokio::sync::broadcast::Receiver<StreamEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let terminal = event.is_terminal();
                    let data = serde_json::to_string(&event).unwrap_or_default();
                    yield Ok(Event::default().event(event.event_name()).data(data));
                    if terminal {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(dropped = n, "slow SSE consumer dropped events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /agents/{id}/stop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct StopRequest {
    pub thread_id: String,
}

pub async fn stop_turn(
    State(state): State<AppState>,
    Path(_agent_id): Path<String>,
    Json(body): Json<StopRequest>,
) -> impl IntoResponse {
    let stopped = state.cancel_map.cancel(&body.thread_id);
    Json(serde_json::json!({ "stopped": stopped }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: &str, content: &str) -> IncomingMessage {
        IncomingMessage {
            role: role.into(),
            content: content.into(),
        }
    }

    #[test]
    fn valid_request_passes() {
        assert!(validate_request(&[msg("system", "be brief"), msg("user", "hi")]).is_ok());
        assert!(validate_request(&[msg("user", "hi")]).is_ok());
    }

    #[test]
    fn assistant_role_rejected() {
        let err = validate_request(&[msg("assistant", "hi")]).unwrap_err();
        assert!(err.contains("assistant"));
    }

    #[test]
    fn empty_content_rejected() {
        assert!(validate_request(&[msg("user", "")]).is_err());
    }

    #[test]
    fn empty_list_rejected() {
        assert!(validate_request(&[]).is_err());
    }

    #[test]
    fn last_message_must_be_user() {
        let err = validate_request(&[msg("user", "hi"), msg("system", "late")]).unwrap_err();
        assert!(err.contains("final message"));
    }
}
