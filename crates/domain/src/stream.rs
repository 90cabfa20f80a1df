//! Events streamed to the client during an agent turn.
//!
//! Every internal step of the engine loop is surfaced as a [`StreamEvent`]:
//! model starts, content deltas, tool activity, and exactly one terminal
//! `done` or `error` per turn. The SSE writer maps `event_name()` to the
//! SSE `event:` field and serializes the variant body as `data:`.

use serde::Serialize;
use serde_json::Value;
use std::pin::Pin;

/// A boxed async stream, used for LLM streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamEvent {
    /// The agent loop has started.
    OnChainStart {
        name: String,
        run_id: String,
        thread_id: String,
    },

    /// A model call is starting. `name` is the model identifier.
    OnChatModelStart {
        name: String,
        run_id: String,
        thread_id: String,
    },

    /// Incremental model output: `data = {"chunk": {"content": …}}`.
    OnChatModelStream {
        run_id: String,
        thread_id: String,
        data: Value,
    },

    /// The model call finished: `data = {"output": …}`.
    OnChatModelEnd {
        run_id: String,
        thread_id: String,
        data: Value,
    },

    /// A tool execution is starting: `data = {"input": args}`.
    OnToolStart {
        name: String,
        run_id: String,
        thread_id: String,
        data: Value,
    },

    /// A tool execution finished: `data = {"output": …}`.
    OnToolEnd {
        name: String,
        run_id: String,
        thread_id: String,
        data: Value,
    },

    /// The agent loop produced its final reply.
    OnChainEnd {
        name: String,
        run_id: String,
        thread_id: String,
    },

    /// Terminal success event — exactly one per turn (exclusive with `error`).
    Done {
        thread_id: String,
        total_duration_ms: u64,
    },

    /// Terminal failure event.
    Error { error: String },
}

impl StreamEvent {
    /// The SSE `event:` field for this variant.
    pub fn event_name(&self) -> &'static str {
        match self {
            StreamEvent::OnChainStart { .. } => "on_chain_start",
            StreamEvent::OnChatModelStart { .. } => "on_chat_model_start",
            StreamEvent::OnChatModelStream { .. } => "on_chat_model_stream",
            StreamEvent::OnChatModelEnd { .. } => "on_chat_model_end",
            StreamEvent::OnToolStart { .. } => "on_tool_start",
            StreamEvent::OnToolEnd { .. } => "on_tool_end",
            StreamEvent::OnChainEnd { .. } => "on_chain_end",
            StreamEvent::Done { .. } => "done",
            StreamEvent::Error { .. } => "error",
        }
    }

    /// True for the terminal `done` / `error` variants.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done { .. } | StreamEvent::Error { .. })
    }
}
