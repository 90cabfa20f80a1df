//! End-to-end tests against the real router: agent listing, the MCP
//! federation endpoint with role filtering, and a full streamed turn
//! against a stubbed chat-completions upstream.

use serde_json::{json, Value};

use wick_gateway::api;
use wick_gateway::bootstrap;
use wick_gateway::config_store::ConfigStore;
use wick_gateway::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Stub MCP downstream serving a fixed tool list over plain JSON.
async fn spawn_downstream(tools: Vec<&'static str>) -> String {
    let app = axum::Router::new().route(
        "/mcp",
        axum::routing::post(move |body: axum::Json<Value>| {
            let tools = tools.clone();
            async move {
                let Some(id) = body.0.get("id").cloned() else {
                    return axum::Json(json!({}));
                };
                let result = match body.0["method"].as_str().unwrap_or("") {
                    "initialize" => json!({ "capabilities": {} }),
                    "tools/list" => json!({
                        "tools": tools
                            .iter()
                            .map(|t| json!({ "name": t, "description": format!("tool {t}") }))
                            .collect::<Vec<_>>()
                    }),
                    "tools/call" => json!({
                        "content": [{ "type": "text", "text": "downstream result" }]
                    }),
                    _ => json!({}),
                };
                axum::Json(json!({ "jsonrpc": "2.0", "id": id, "result": result }))
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/mcp")
}

/// Stub chat-completions upstream: streams "Hi" then stop.
async fn spawn_llm_stub() -> String {
    let app = axum::Router::new().route(
        "/chat/completions",
        axum::routing::post(|| async {
            let body = concat!(
                "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
                "data: [DONE]\n\n",
            );
            ([("content-type", "text/event-stream")], body)
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Boot a gateway with the given YAML and return its base URL.
async fn spawn_gateway(yaml: String) -> (String, AppState, tempfile::TempDir) {
    // These tests run in dev mode (no bearer token).
    std::env::remove_var("WICK_API_TOKEN");
    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join("wick.yaml");
    std::fs::write(&path, yaml).unwrap();

    let (config, store) = ConfigStore::load(&path).unwrap();
    let state = bootstrap::build_state(config, store).await;
    let app = api::router(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), state, tmp)
}

fn base_yaml() -> String {
    r#"
listen: 127.0.0.1:0
roles:
  admin:
    tools: ["*"]
  analyst:
    tools: ["t2"]
agents:
  - name: chat
    model: stub-model
    system_prompt: "Answer briefly."
"#
    .to_string()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Basics
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn healthz_and_agent_listing() {
    let (base, _state, _tmp) = spawn_gateway(base_yaml()).await;
    let client = reqwest::Client::new();

    let health: Value = client
        .get(format!("{base}/healthz"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let agents: Value = client
        .get(format!("{base}/agents/"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(agents[0]["agent_id"], "chat");
    assert_eq!(agents[0]["backend_type"], "state");
    let hooks: Vec<&str> = agents[0]["hooks"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    assert_eq!(hooks, vec!["tracing", "todolist", "summarization"]);
}

#[tokio::test]
async fn hook_patch_changes_listing() {
    let (base, _state, _tmp) = spawn_gateway(base_yaml()).await;
    let client = reqwest::Client::new();

    let patched: Value = client
        .patch(format!("{base}/agents/chat/hooks"))
        .header("x-wick-user", "alice")
        .json(&json!({ "remove": ["summarization"] }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let hooks = patched["hooks"].as_array().unwrap();
    assert!(!hooks.iter().any(|h| h == "summarization"));

    // The same user now sees the instance view; others keep defaults.
    let agents: Value = client
        .get(format!("{base}/agents/"))
        .header("x-wick-user", "alice")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(agents[0]["hooks"].as_array().unwrap().len(), 2);

    let agents: Value = client
        .get(format!("{base}/agents/"))
        .header("x-wick-user", "bob")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(agents[0]["hooks"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn tools_listing_is_role_filtered() {
    let (base, _state, _tmp) = spawn_gateway(base_yaml()).await;
    let client = reqwest::Client::new();

    let tools: Value = client
        .get(format!("{base}/tools/"))
        .header("x-wick-role", "admin")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let names: Vec<&str> = tools
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"calculate"));
    assert!(names.contains(&"internet_search"));

    // Unknown role sees nothing.
    let tools: Value = client
        .get(format!("{base}/tools/"))
        .header("x-wick-role", "nobody")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(tools.as_array().unwrap().is_empty());
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MCP federation endpoint
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn mcp_federation_with_shadowing_and_role_filter() {
    // A offers t1; B offers t1 (shadowing A) and t2.
    let url_a = spawn_downstream(vec!["t1"]).await;
    let url_b = spawn_downstream(vec!["t1", "t2"]).await;

    let yaml = format!(
        r#"
listen: 127.0.0.1:0
roles:
  admin:
    tools: ["*"]
  analyst:
    tools: ["t2"]
downstream:
  - name: a
    url: {url_a}
  - name: b
    url: {url_b}
agents:
  - name: chat
    model: stub-model
"#
    );
    let (base, state, _tmp) = spawn_gateway(yaml).await;
    let client = reqwest::Client::new();

    // Both t1 and t2 resolve to the later downstream.
    assert_eq!(state.federation.owner_of("t1").as_deref(), Some("b"));
    assert_eq!(state.federation.owner_of("t2").as_deref(), Some("b"));

    // initialize issues a session.
    let resp = client
        .post(format!("{base}/mcp"))
        .header("x-wick-role", "admin")
        .json(&json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {} }))
        .send()
        .await
        .unwrap();
    let session = resp
        .headers()
        .get("Mcp-Session-Id")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["result"]["protocolVersion"], "2025-03-26");

    // Full aggregate for the admin role: exactly two entries.
    let body: Value = client
        .post(format!("{base}/mcp"))
        .header("x-wick-role", "admin")
        .json(&json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["result"]["tools"].as_array().unwrap().len(), 2);

    // The analyst role sees only t2.
    let body: Value = client
        .post(format!("{base}/mcp"))
        .header("x-wick-role", "analyst")
        .json(&json!({ "jsonrpc": "2.0", "id": 3, "method": "tools/list" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let tools = body["result"]["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0]["name"], "t2");

    // Calling t1 as analyst: access denied (-32603).
    let body: Value = client
        .post(format!("{base}/mcp"))
        .header("x-wick-role", "analyst")
        .json(&json!({
            "jsonrpc": "2.0", "id": 4, "method": "tools/call",
            "params": { "name": "t1", "arguments": {} }
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["error"]["code"], -32603);

    // Calling t2 as analyst proxies to the downstream.
    let body: Value = client
        .post(format!("{base}/mcp"))
        .header("x-wick-role", "analyst")
        .json(&json!({
            "jsonrpc": "2.0", "id": 5, "method": "tools/call",
            "params": { "name": "t2", "arguments": {} }
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["result"]["content"][0]["text"], "downstream result");

    // Unknown method and parse errors use the JSON-RPC codes.
    let body: Value = client
        .post(format!("{base}/mcp"))
        .json(&json!({ "jsonrpc": "2.0", "id": 6, "method": "bogus/method" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["error"]["code"], -32601);

    let body: Value = client
        .post(format!("{base}/mcp"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["error"]["code"], -32700);

    // Session teardown.
    let resp = client
        .delete(format!("{base}/mcp"))
        .header("Mcp-Session-Id", &session)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);
    let resp = client
        .delete(format!("{base}/mcp"))
        .header("Mcp-Session-Id", &session)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streamed turn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn streamed_turn_ends_with_done() {
    let llm = spawn_llm_stub().await;
    std::env::set_var("WICK_LLM_BASE_URL", &llm);

    let (base, state, _tmp) = spawn_gateway(base_yaml()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/agents/chat/stream"))
        .header("x-wick-user", "alice")
        .json(&json!({
            "messages": [{ "role": "user", "content": "Say hi" }],
            "thread_id": "turn-e2e"
        }))
        .send()
        .await
        .unwrap();
    assert!(resp
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let body = resp.text().await.unwrap();
    assert!(body.contains("event: on_chain_start"));
    assert!(body.contains("event: on_chat_model_start"));
    assert!(body.contains("event: on_chat_model_stream"));
    assert!(body.contains("\"content\":\"Hi\""));
    assert!(body.contains("event: on_chain_end"));
    assert!(body.contains("event: done"));
    assert!(!body.contains("event: error"));

    // Thread state holds system + user + assistant.
    let thread = state.threads.get("turn-e2e").unwrap();
    let msgs = thread.messages_snapshot();
    assert_eq!(msgs.len(), 3);
    assert_eq!(msgs[2].content, "Hi");
}

#[tokio::test]
async fn bad_turn_requests_rejected_with_4xx() {
    let (base, _state, _tmp) = spawn_gateway(base_yaml()).await;
    let client = reqwest::Client::new();

    // Unknown agent.
    let resp = client
        .post(format!("{base}/agents/ghost/stream"))
        .json(&json!({ "messages": [{ "role": "user", "content": "hi" }] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    // Disallowed role in messages.
    let resp = client
        .post(format!("{base}/agents/chat/stream"))
        .json(&json!({ "messages": [{ "role": "assistant", "content": "hi" }] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}
