//! Downstream MCP client — speaks MCP over HTTP to one upstream server.
//!
//! Each call POSTs a JSON-RPC request. The server answers with plain JSON
//! or with `text/event-stream`, in which case the first `data:` line carries
//! the JSON-RPC response. A captured `Mcp-Session-Id` header is echoed on
//! every subsequent call; `close` sends HTTP DELETE with it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;

use wick_domain::{Error, Result};

use crate::protocol::{
    initialize_params, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, McpToolDef,
    ToolCallResult, ToolsListResult,
};

const SESSION_HEADER: &str = "Mcp-Session-Id";
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Health snapshot, refreshed on every operation.
#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub connected: bool,
    pub tool_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub last_check: DateTime<Utc>,
}

pub struct DownstreamClient {
    name: String,
    url: String,
    http: reqwest::Client,
    next_id: AtomicU64,
    session: Mutex<Option<String>>,
    connected: AtomicBool,
    tools: RwLock<Vec<McpToolDef>>,
    health: Mutex<Health>,
}

impl DownstreamClient {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            name: name.into(),
            url: url.into(),
            http,
            next_id: AtomicU64::new(1),
            session: Mutex::new(None),
            connected: AtomicBool::new(false),
            tools: RwLock::new(Vec::new()),
            health: Mutex::new(Health {
                connected: false,
                tool_count: 0,
                last_error: None,
                last_check: Utc::now(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.tools.write().clear();
        self.record(false, Some("disconnected".into()));
    }

    /// Tools discovered on the last successful `tools/list`.
    pub fn tools(&self) -> Vec<McpToolDef> {
        self.tools.read().clone()
    }

    pub fn health(&self) -> Health {
        self.health.lock().clone()
    }

    fn record(&self, ok: bool, error: Option<String>) {
        let mut health = self.health.lock();
        health.connected = self.connected.load(Ordering::SeqCst);
        health.tool_count = self.tools.read().len();
        if ok {
            health.last_error = None;
        } else if error.is_some() {
            health.last_error = error;
        }
        health.last_check = Utc::now();
    }

    // ── Transport ─────────────────────────────────────────────────

    async fn post(&self, body: &impl Serialize) -> Result<reqwest::Response> {
        let mut builder = self
            .http
            .post(&self.url)
            .header("Accept", "application/json, text/event-stream")
            .json(body);
        if let Some(session) = self.session.lock().clone() {
            builder = builder.header(SESSION_HEADER, session);
        }
        let resp = builder
            .send()
            .await
            .map_err(|e| Error::Http(format!("downstream '{}': {e}", self.name)))?;

        // Capture the session id whenever the server offers one.
        if let Some(session) = resp
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session.lock() = Some(session.to_string());
        }

        Ok(resp)
    }

    /// Send one request and parse its response, handling both plain-JSON
    /// and event-stream response bodies.
    async fn request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRpcRequest::new(id, method, params);

        let resp = self.post(&req).await.inspect_err(|e| {
            self.record(false, Some(e.to_string()));
        })?;

        let status = resp.status();
        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = resp
            .text()
            .await
            .map_err(|e| Error::Http(format!("downstream '{}': {e}", self.name)))?;

        if !status.is_success() {
            let err = Error::Http(format!(
                "downstream '{}' returned {status}: {}",
                self.name,
                body.chars().take(200).collect::<String>()
            ));
            self.record(false, Some(err.to_string()));
            return Err(err);
        }

        let payload = if content_type.starts_with("text/event-stream") {
            first_sse_data(&body).ok_or_else(|| {
                Error::Http(format!("downstream '{}': empty event stream", self.name))
            })?
        } else {
            body
        };

        let parsed: JsonRpcResponse = serde_json::from_str(payload.trim()).map_err(|e| {
            let err = Error::Http(format!("downstream '{}': bad response: {e}", self.name));
            self.record(false, Some(err.to_string()));
            err
        })?;

        self.record(true, None);
        Ok(parsed)
    }

    async fn notify(&self, method: &str) -> Result<()> {
        let notif = JsonRpcNotification::new(method);
        let resp = self.post(&notif).await?;
        if !resp.status().is_success() {
            return Err(Error::Http(format!(
                "downstream '{}' rejected notification {method}: {}",
                self.name,
                resp.status()
            )));
        }
        Ok(())
    }

    // ── Protocol operations ───────────────────────────────────────

    /// `disconnected → initialized`: send `initialize`, capture the session
    /// header, then `notifications/initialized`.
    pub async fn connect(&self) -> Result<()> {
        let params = serde_json::to_value(initialize_params())?;
        let resp = self.request("initialize", Some(params)).await?;
        if let Err(e) = resp.into_result() {
            let err = Error::Http(format!("downstream '{}': initialize failed: {e}", self.name));
            self.record(false, Some(err.to_string()));
            return Err(err);
        }

        self.notify("notifications/initialized").await?;
        self.connected.store(true, Ordering::SeqCst);
        self.record(true, None);
        tracing::info!(downstream = %self.name, "MCP downstream initialized");
        Ok(())
    }

    /// Refresh the tool list. Requires a prior `connect`.
    pub async fn list_tools(&self) -> Result<Vec<McpToolDef>> {
        let resp = self.request("tools/list", None).await?;
        let value = resp
            .into_result()
            .map_err(|e| Error::Http(format!("downstream '{}': tools/list failed: {e}", self.name)))?;
        let result: ToolsListResult = serde_json::from_value(value)?;
        *self.tools.write() = result.tools.clone();
        self.record(true, None);
        Ok(result.tools)
    }

    pub async fn call_tool(&self, tool_name: &str, arguments: Value) -> Result<ToolCallResult> {
        let params = serde_json::json!({ "name": tool_name, "arguments": arguments });
        let resp = self.request("tools/call", Some(params)).await?;
        let value = resp.into_result().map_err(|e| {
            Error::Http(format!("downstream '{}': tools/call failed: {e}", self.name))
        })?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn ping(&self) -> Result<()> {
        let resp = self.request("ping", None).await?;
        resp.into_result()
            .map_err(|e| Error::Http(format!("downstream '{}': ping failed: {e}", self.name)))?;
        Ok(())
    }

    /// Terminate the session with HTTP DELETE.
    pub async fn close(&self) {
        let session = self.session.lock().take();
        if let Some(session) = session {
            let _ = self
                .http
                .delete(&self.url)
                .header(SESSION_HEADER, session)
                .send()
                .await;
        }
        self.connected.store(false, Ordering::SeqCst);
        self.tools.write().clear();
        self.record(false, None);
    }
}

/// The first `data:` payload of an SSE body.
fn first_sse_data(body: &str) -> Option<String> {
    body.lines()
        .map(str::trim_start)
        .find_map(|line| line.strip_prefix("data:"))
        .map(|data| data.trim().to_string())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sse_data_extracts_payload() {
        let body = "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n\n";
        let data = first_sse_data(body).unwrap();
        assert!(data.starts_with("{\"jsonrpc\""));
    }

    #[test]
    fn first_sse_data_skips_comments() {
        let body = ": keep-alive\ndata: payload\n\n";
        assert_eq!(first_sse_data(body).unwrap(), "payload");
    }

    #[test]
    fn first_sse_data_empty_body() {
        assert!(first_sse_data("").is_none());
    }

    #[test]
    fn new_client_starts_disconnected() {
        let client = DownstreamClient::new("files", "http://localhost:9100/mcp");
        assert!(!client.is_connected());
        assert!(client.tools().is_empty());
        let health = client.health();
        assert!(!health.connected);
        assert_eq!(health.tool_count, 0);
    }

    #[test]
    fn mark_disconnected_drops_tools() {
        let client = DownstreamClient::new("files", "http://localhost:9100/mcp");
        client.tools.write().push(McpToolDef {
            name: "t1".into(),
            description: String::new(),
            input_schema: serde_json::json!({}),
        });
        client.connected.store(true, Ordering::SeqCst);

        client.mark_disconnected();
        assert!(!client.is_connected());
        assert!(client.tools().is_empty());
    }

    #[tokio::test]
    async fn request_against_live_stub_server() {
        use axum::routing::post;

        // Minimal downstream stub: answers tools/list over plain JSON and
        // stamps a session header.
        let app = axum::Router::new().route(
            "/mcp",
            post(|body: axum::Json<Value>| async move {
                let id = body.0.get("id").cloned().unwrap_or(Value::Null);
                let result = serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": { "tools": [{ "name": "echo" }] }
                });
                ([("Mcp-Session-Id", "sess-42")], axum::Json(result))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = DownstreamClient::new("stub", format!("http://{addr}/mcp"));
        let tools = client.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");
        // Session header captured for subsequent calls.
        assert_eq!(client.session.lock().as_deref(), Some("sess-42"));
        assert_eq!(client.health().tool_count, 1);
    }
}
