//! OpenAI-compatible adapter.
//!
//! Works with OpenAI, Ollama, vLLM, LM Studio, and any other endpoint
//! that follows the chat-completions contract.

use serde_json::Value;

use wick_domain::message::{Message, Role, ToolCall};
use wick_domain::stream::BoxStream;
use wick_domain::tool::ToolDefinition;
use wick_domain::{Error, Result};

use crate::client::{CallCtx, ChatRequest, ChatResponse, Delta, LlmClient, ToolCallDelta};
use crate::sse::drain_data_lines;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenAiCompatClient {
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiCompatClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: Option<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
            client: reqwest::Client::new(),
        }
    }

    fn authed_post(&self) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }
        builder
    }

    fn build_body(&self, req: &ChatRequest, stream: bool) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(msg_to_wire).collect();
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": stream,
        });
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(tool_to_wire).collect();
            body["tools"] = Value::Array(tools);
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(max) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire serialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn msg_to_wire(msg: &Message) -> Value {
    match msg.role {
        Role::Tool => serde_json::json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id,
            "content": msg.content,
        }),
        Role::Assistant if !msg.tool_calls.is_empty() => {
            let calls: Vec<Value> = msg
                .tool_calls
                .iter()
                .map(|tc| {
                    serde_json::json!({
                        "id": tc.id,
                        "type": "function",
                        "function": {
                            "name": tc.name,
                            "arguments": if tc.raw_args.is_empty() {
                                tc.args.to_string()
                            } else {
                                tc.raw_args.clone()
                            },
                        }
                    })
                })
                .collect();
            let mut obj = serde_json::json!({
                "role": "assistant",
                "tool_calls": calls,
            });
            if !msg.content.is_empty() {
                obj["content"] = Value::String(msg.content.clone());
            }
            obj
        }
        role => serde_json::json!({
            "role": role.to_string(),
            "content": msg.content,
        }),
    }
}

fn tool_to_wire(def: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": def.name,
            "description": def.description,
            "parameters": def.parameters,
        }
    })
}

/// Map an HTTP failure status to the error taxonomy: 429 is rate limiting,
/// everything else (including 5xx) is a transient HTTP error.
fn status_error(status: reqwest::StatusCode, body: &str) -> Error {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        Error::RateLimited(body.chars().take(300).collect())
    } else {
        Error::Http(format!("{status}: {}", body.chars().take(300).collect::<String>()))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_complete(body: &Value) -> ChatResponse {
    let choice = &body["choices"][0];
    let message = &choice["message"];

    let tool_calls = message["tool_calls"]
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .filter_map(|tc| {
                    let name = tc["function"]["name"].as_str()?.to_string();
                    let raw_args = tc["function"]["arguments"].as_str().unwrap_or("").to_string();
                    let args = serde_json::from_str(&raw_args)
                        .unwrap_or(Value::Object(Default::default()));
                    Some(ToolCall {
                        id: tc["id"].as_str().unwrap_or_default().to_string(),
                        name,
                        args,
                        raw_args,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    ChatResponse {
        content: message["content"].as_str().unwrap_or("").to_string(),
        tool_calls,
        finish_reason: choice["finish_reason"].as_str().map(String::from),
    }
}

/// Parse one streamed `data:` payload into deltas. `[DONE]` is the
/// stream-end sentinel.
fn parse_stream_data(data: &str) -> Vec<Result<Delta>> {
    if data == "[DONE]" {
        return vec![Ok(Delta::done(None))];
    }

    let value: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            return vec![Err(Error::Provider {
                provider: "openai-compat".into(),
                message: format!("bad stream payload: {e}"),
            })]
        }
    };

    let choice = &value["choices"][0];
    let delta = &choice["delta"];
    let mut out = Vec::new();

    if let Some(text) = delta["content"].as_str() {
        if !text.is_empty() {
            out.push(Ok(Delta::content(text)));
        }
    }

    if let Some(calls) = delta["tool_calls"].as_array() {
        for tc in calls {
            out.push(Ok(Delta {
                tool_call: Some(ToolCallDelta {
                    index: tc["index"].as_u64().unwrap_or(0) as usize,
                    id: tc["id"].as_str().map(String::from),
                    name: tc["function"]["name"].as_str().map(String::from),
                    args_fragment: tc["function"]["arguments"].as_str().unwrap_or("").to_string(),
                }),
                ..Default::default()
            }));
        }
    }

    if let Some(reason) = choice["finish_reason"].as_str() {
        out.push(Ok(Delta::done(Some(reason.to_string()))));
    }

    out
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LlmClient impl
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmClient for OpenAiCompatClient {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn call(&self, ctx: &CallCtx, req: ChatRequest) -> Result<ChatResponse> {
        if ctx.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let body = self.build_body(&req, false);
        let resp = self
            .authed_post()
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(status_error(status, &text));
        }

        let json: Value = resp.json().await.map_err(|e| Error::Http(e.to_string()))?;
        Ok(parse_complete(&json))
    }

    async fn stream(
        &self,
        ctx: &CallCtx,
        req: ChatRequest,
    ) -> Result<BoxStream<'static, Result<Delta>>> {
        if ctx.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let body = self.build_body(&req, true);
        let resp = self
            .authed_post()
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(status_error(status, &text));
        }

        let cancel = ctx.cancel.clone();
        let stream = async_stream::stream! {
            let mut response = resp;
            let mut buffer = String::new();
            let mut done_emitted = false;

            loop {
                // Cancellation is checked between reads: the inflight read
                // completes, the next one never starts.
                if cancel.is_cancelled() {
                    break;
                }
                match response.chunk().await {
                    Ok(Some(bytes)) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));
                        for data in drain_data_lines(&mut buffer) {
                            for delta in parse_stream_data(&data) {
                                if matches!(&delta, Ok(d) if d.done) {
                                    done_emitted = true;
                                }
                                yield delta;
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(Error::Http(e.to_string()));
                        break;
                    }
                }
            }

            if !done_emitted {
                yield Ok(Delta::done(Some("stop".into())));
            }
        };

        Ok(Box::pin(stream))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_message_serializes_with_call_id() {
        let msg = Message::tool("c1", "calculate", "4");
        let wire = msg_to_wire(&msg);
        assert_eq!(wire["role"], "tool");
        assert_eq!(wire["tool_call_id"], "c1");
        assert_eq!(wire["content"], "4");
    }

    #[test]
    fn assistant_tool_calls_serialize_function_block() {
        let msg = Message::assistant_with_tools(
            "",
            vec![ToolCall {
                id: "c1".into(),
                name: "grep".into(),
                args: serde_json::json!({ "pattern": "fn" }),
                raw_args: r#"{"pattern":"fn"}"#.into(),
            }],
        );
        let wire = msg_to_wire(&msg);
        assert_eq!(wire["tool_calls"][0]["function"]["name"], "grep");
        assert_eq!(wire["tool_calls"][0]["function"]["arguments"], r#"{"pattern":"fn"}"#);
        assert!(wire.get("content").is_none());
    }

    #[test]
    fn parse_complete_with_tool_calls() {
        let body = serde_json::json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "c1",
                        "type": "function",
                        "function": { "name": "calculate", "arguments": "{\"expr\":\"2+2\"}" }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        });
        let resp = parse_complete(&body);
        assert_eq!(resp.content, "");
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].args["expr"], "2+2");
        assert_eq!(resp.finish_reason.as_deref(), Some("tool_calls"));
    }

    #[test]
    fn parse_stream_content_delta() {
        let deltas = parse_stream_data(r#"{"choices":[{"delta":{"content":"Hi"}}]}"#);
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].as_ref().unwrap().content.as_deref(), Some("Hi"));
    }

    #[test]
    fn parse_stream_done_sentinel() {
        let deltas = parse_stream_data("[DONE]");
        assert!(deltas[0].as_ref().unwrap().done);
    }

    #[test]
    fn parse_stream_finish_reason_marks_done() {
        let deltas =
            parse_stream_data(r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#);
        let last = deltas.last().unwrap().as_ref().unwrap();
        assert!(last.done);
        assert_eq!(last.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn rate_limit_distinguishable() {
        let err = status_error(reqwest::StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(matches!(err, Error::RateLimited(_)));
        let err = status_error(reqwest::StatusCode::BAD_GATEWAY, "upstream");
        assert!(err.is_transient());
    }
}
