//! The client trait and its request/response/delta types.

use wick_domain::cancel::CancelToken;
use wick_domain::message::{Message, ToolCall};
use wick_domain::stream::BoxStream;
use wick_domain::tool::ToolDefinition;
use wick_domain::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Response
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Call context: carries the turn's cancel token. Streams check it between
/// reads; an inflight read is allowed to complete.
#[derive(Clone, Default)]
pub struct CallCtx {
    pub cancel: CancelToken,
}

impl CallCtx {
    pub fn new(cancel: CancelToken) -> Self {
        Self { cancel }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming deltas
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An incremental fragment of a streamed tool call, keyed by `index`
/// within the assistant turn.
#[derive(Debug, Clone, Default)]
pub struct ToolCallDelta {
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    pub args_fragment: String,
}

/// One increment of a streaming response. A well-formed stream ends with
/// exactly one delta where `done == true`.
#[derive(Debug, Clone, Default)]
pub struct Delta {
    pub content: Option<String>,
    pub tool_call: Option<ToolCallDelta>,
    pub done: bool,
    pub finish_reason: Option<String>,
}

impl Delta {
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn done(finish_reason: Option<String>) -> Self {
        Self {
            done: true,
            finish_reason,
            ..Default::default()
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The provider-agnostic LLM capability.
///
/// No retry policy lives at this layer: transient errors (network, 5xx)
/// are returned unchanged, rate limits as `Error::RateLimited`. Callers
/// issue at most one concurrent call per context.
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    /// The model identifier, used in `on_chat_model_start` event names.
    fn model_id(&self) -> &str;

    /// Blocking complete-reply call.
    async fn call(&self, ctx: &CallCtx, req: ChatRequest) -> Result<ChatResponse>;

    /// Incremental streaming call. The returned stream emits at least one
    /// delta with `done == true` and stops within one read of cancellation.
    async fn stream(&self, ctx: &CallCtx, req: ChatRequest)
        -> Result<BoxStream<'static, Result<Delta>>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stream accumulation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Assembles streamed deltas into a [`ChatResponse`].
///
/// Tool calls arrive as index-keyed fragments; ids and names land on the
/// first fragment and argument JSON accumulates across the rest. Fragments
/// whose arguments never parse fall back to an empty object.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    content: String,
    calls: Vec<PartialCall>,
    finish_reason: Option<String>,
}

#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    args: String,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, delta: &Delta) {
        if let Some(text) = &delta.content {
            self.content.push_str(text);
        }
        if let Some(tc) = &delta.tool_call {
            while self.calls.len() <= tc.index {
                self.calls.push(PartialCall::default());
            }
            let slot = &mut self.calls[tc.index];
            if let Some(id) = &tc.id {
                slot.id = id.clone();
            }
            if let Some(name) = &tc.name {
                slot.name = name.clone();
            }
            slot.args.push_str(&tc.args_fragment);
        }
        if delta.done {
            self.finish_reason = delta.finish_reason.clone();
        }
    }

    pub fn finish(self) -> ChatResponse {
        let tool_calls = self
            .calls
            .into_iter()
            .filter(|c| !c.name.is_empty())
            .map(|c| {
                let args = if c.args.trim().is_empty() {
                    serde_json::Value::Object(Default::default())
                } else {
                    serde_json::from_str(&c.args).unwrap_or_else(|e| {
                        tracing::warn!(
                            tool = %c.name,
                            error = %e,
                            "tool call arguments are not valid JSON; defaulting to empty object"
                        );
                        serde_json::Value::Object(Default::default())
                    })
                };
                ToolCall {
                    id: if c.id.is_empty() {
                        uuid::Uuid::new_v4().to_string()
                    } else {
                        c.id
                    },
                    name: c.name,
                    args,
                    raw_args: c.args,
                }
            })
            .collect();

        ChatResponse {
            content: self.content,
            tool_calls,
            finish_reason: self.finish_reason,
        }
    }
}
