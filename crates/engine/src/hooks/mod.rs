//! Middleware hooks around the agent loop.
//!
//! Hooks compose in an onion: the engine holds an ordered list, and for the
//! wrap phases each hook receives a `next` continuation covering the rest of
//! the chain (registration order = outermost first). The innermost layer
//! performs the real model call / tool execution.

mod filesystem;
mod memory;
mod skills;
mod summarize;
mod todolist;
mod tracing_hook;

pub use filesystem::FilesystemHook;
pub use memory::MemoryHook;
pub use skills::SkillsHook;
pub use summarize::SummarizationHook;
pub use todolist::TodolistHook;
pub use tracing_hook::TracingHook;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use wick_backend::Backend;
use wick_domain::cancel::CancelToken;
use wick_domain::config::{AgentConfig, HookOverrides};
use wick_domain::message::{Message, ToolCall, ToolResult};
use wick_domain::Result;
use wick_llm::{CallCtx, ChatRequest, ChatResponse, LlmClient, StreamAccumulator};
use wick_mcp::ToolAggregator;

use crate::events::EventSink;
use crate::state::AgentState;
use crate::tool::{run_tool, Tool, ToolContext};
use crate::trace::TraceRecorder;

use futures_util::StreamExt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Phases & context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    BeforeAgent,
    ModifyRequest,
    WrapModelCall,
    WrapToolCall,
}

/// Everything a hook may need during one turn.
pub struct HookContext {
    pub thread_id: String,
    pub user: String,
    pub cancel: CancelToken,
    pub events: EventSink,
    pub llm: Arc<dyn LlmClient>,
    pub backend: Option<Arc<dyn Backend>>,
    pub state: Arc<AgentState>,
    pub context_window: usize,
    /// Present when the turn requested tracing.
    pub trace: Option<Arc<TraceRecorder>>,
    /// Per-hook settings from `builtin_config` and hook overrides.
    pub hook_config: HashMap<String, Value>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Hook trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
pub trait Hook: Send + Sync {
    fn name(&self) -> &'static str;

    fn phases(&self) -> &'static [HookPhase];

    /// Invoked once before the loop, in registration order. Errors abort
    /// the run.
    async fn before_agent(&self, _ctx: &HookContext) -> Result<()> {
        Ok(())
    }

    /// Invoked once per iteration immediately before the model call.
    /// Returns the possibly-modified message list.
    async fn modify_request(&self, _ctx: &HookContext, msgs: Vec<Message>) -> Result<Vec<Message>> {
        Ok(msgs)
    }

    /// Onion wrap around the model call.
    async fn wrap_model_call(
        &self,
        _ctx: &HookContext,
        req: ChatRequest,
        next: ModelNext<'_>,
    ) -> Result<ChatResponse> {
        next.run(req).await
    }

    /// Onion wrap around each tool execution.
    async fn wrap_tool_call(
        &self,
        _ctx: &HookContext,
        call: ToolCall,
        next: ToolNext<'_>,
    ) -> Result<ToolResult> {
        next.run(call).await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Model-call chain
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

type BoxedFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The innermost model layer: streams the LLM, emits `on_chat_model_stream`
/// per delta, and accumulates the full response.
pub(crate) struct InnerModel {
    pub llm: Arc<dyn LlmClient>,
    pub events: EventSink,
    pub cancel: CancelToken,
    pub run_id: String,
    pub thread_id: String,
}

impl InnerModel {
    async fn invoke(&self, req: ChatRequest) -> Result<ChatResponse> {
        let call_ctx = CallCtx::new(self.cancel.clone());
        let mut stream = self.llm.stream(&call_ctx, req).await?;
        let mut acc = StreamAccumulator::new();

        while let Some(delta) = stream.next().await {
            // A cancelled turn stops consuming; the partial accumulation is
            // still returned so the engine can close out the turn.
            if self.cancel.is_cancelled() {
                break;
            }
            let delta = delta?;
            if let Some(text) = &delta.content {
                self.events.emit(wick_domain::stream::StreamEvent::OnChatModelStream {
                    run_id: self.run_id.clone(),
                    thread_id: self.thread_id.clone(),
                    data: serde_json::json!({ "chunk": { "content": text } }),
                });
            }
            let done = delta.done;
            acc.push(&delta);
            if done {
                break;
            }
        }

        Ok(acc.finish())
    }
}

/// Continuation over the remaining `wrap_model_call` hooks.
pub struct ModelNext<'a> {
    ctx: &'a HookContext,
    hooks: &'a [Arc<dyn Hook>],
    index: usize,
    inner: &'a InnerModel,
}

impl<'a> ModelNext<'a> {
    pub(crate) fn root(
        ctx: &'a HookContext,
        hooks: &'a [Arc<dyn Hook>],
        inner: &'a InnerModel,
    ) -> Self {
        Self {
            ctx,
            hooks,
            index: 0,
            inner,
        }
    }

    /// Invoke the rest of the chain (or the model itself).
    pub fn run(self, req: ChatRequest) -> BoxedFuture<'a, Result<ChatResponse>> {
        Box::pin(async move {
            match self.hooks.get(self.index) {
                Some(hook) => {
                    let next = ModelNext {
                        ctx: self.ctx,
                        hooks: self.hooks,
                        index: self.index + 1,
                        inner: self.inner,
                    };
                    hook.wrap_model_call(self.ctx, req, next).await
                }
                None => self.inner.invoke(req).await,
            }
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool-call chain
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The innermost tool layer: resolves the tool (runtime → static →
/// federation) and executes it. Execution failures stay in-band as error
/// results; only hook failures surface as `Err`.
pub(crate) struct InnerTool {
    pub state: Arc<AgentState>,
    pub static_tools: Vec<Arc<dyn Tool>>,
    pub federation: Option<Arc<ToolAggregator>>,
    pub tool_ctx: ToolContext,
}

impl InnerTool {
    async fn invoke(&self, call: ToolCall) -> Result<ToolResult> {
        let resolved = self.state.runtime_tool(&call.name).or_else(|| {
            self.static_tools
                .iter()
                .find(|t| t.name() == call.name)
                .cloned()
        });

        if let Some(tool) = resolved {
            let outcome = run_tool(tool.as_ref(), &self.tool_ctx, call.args).await;
            return Ok(ToolResult {
                tool_call_id: call.id,
                name: call.name,
                output: outcome.output,
                is_error: outcome.is_error,
            });
        }

        if let Some(federation) = &self.federation {
            if federation.owner_of(&call.name).is_some() {
                return Ok(match federation.call_tool(&call.name, call.args).await {
                    Ok(result) => ToolResult {
                        tool_call_id: call.id,
                        name: call.name,
                        output: result.text(),
                        is_error: result.is_error,
                    },
                    Err(e) => ToolResult {
                        tool_call_id: call.id,
                        name: call.name,
                        output: format!("Error: {e}"),
                        is_error: true,
                    },
                });
            }
        }

        Ok(ToolResult {
            tool_call_id: call.id,
            output: format!("Error: unknown tool '{}'", call.name),
            name: call.name,
            is_error: true,
        })
    }
}

/// Continuation over the remaining `wrap_tool_call` hooks.
pub struct ToolNext<'a> {
    ctx: &'a HookContext,
    hooks: &'a [Arc<dyn Hook>],
    index: usize,
    inner: &'a InnerTool,
}

impl<'a> ToolNext<'a> {
    pub(crate) fn root(
        ctx: &'a HookContext,
        hooks: &'a [Arc<dyn Hook>],
        inner: &'a InnerTool,
    ) -> Self {
        Self {
            ctx,
            hooks,
            index: 0,
            inner,
        }
    }

    pub fn run(self, call: ToolCall) -> BoxedFuture<'a, Result<ToolResult>> {
        Box::pin(async move {
            match self.hooks.get(self.index) {
                Some(hook) => {
                    let next = ToolNext {
                        ctx: self.ctx,
                        hooks: self.hooks,
                        index: self.index + 1,
                        inner: self.inner,
                    };
                    hook.wrap_tool_call(self.ctx, call, next).await
                }
                None => self.inner.invoke(call).await,
            }
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Hook factory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Build the hook list for an agent: the config's default set, minus
/// override-removed names, plus override-added ones.
pub fn build_hooks(config: &AgentConfig, overrides: Option<&HookOverrides>) -> Vec<Arc<dyn Hook>> {
    let mut names = config.default_hook_names();
    if let Some(ov) = overrides {
        names.retain(|n| !ov.remove.contains(n));
        for add in &ov.add {
            if !names.contains(add) {
                names.push(add.clone());
            }
        }
    }

    names
        .iter()
        .filter_map(|name| instantiate_hook(name, config))
        .collect()
}

fn instantiate_hook(name: &str, config: &AgentConfig) -> Option<Arc<dyn Hook>> {
    match name {
        "tracing" => Some(Arc::new(TracingHook)),
        "todolist" => Some(Arc::new(TodolistHook)),
        "filesystem" => Some(Arc::new(FilesystemHook)),
        "skills" => {
            let paths = config.skills.as_ref()?.paths.clone();
            Some(Arc::new(SkillsHook::new(paths)))
        }
        "memory" => {
            let paths = config.memory.as_ref()?.paths.clone();
            Some(Arc::new(MemoryHook::new(paths)))
        }
        "summarization" => Some(Arc::new(SummarizationHook)),
        other => {
            tracing::warn!(hook = other, "unknown hook name, skipping");
            None
        }
    }
}

/// The hooks participating in one phase, preserving registration order.
pub fn hooks_for_phase(hooks: &[Arc<dyn Hook>], phase: HookPhase) -> Vec<Arc<dyn Hook>> {
    hooks
        .iter()
        .filter(|h| h.phases().contains(&phase))
        .cloned()
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Test support
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::collections::VecDeque;

    use parking_lot::Mutex;
    use wick_domain::message::ToolCall as DomainToolCall;
    use wick_domain::stream::BoxStream;
    use wick_llm::{CallCtx, Delta, ToolCallDelta};

    /// A scripted LLM client: pops one canned response per call, streaming
    /// its content in two chunks.
    #[derive(Default)]
    pub struct StubLlm {
        responses: Mutex<VecDeque<ChatResponse>>,
        pub calls: Mutex<Vec<ChatRequest>>,
    }

    impl StubLlm {
        pub fn scripted(responses: Vec<ChatResponse>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        pub fn reply(content: &str) -> ChatResponse {
            ChatResponse {
                content: content.to_string(),
                tool_calls: Vec::new(),
                finish_reason: Some("stop".into()),
            }
        }

        pub fn tool_reply(calls: Vec<DomainToolCall>) -> ChatResponse {
            ChatResponse {
                content: String::new(),
                tool_calls: calls,
                finish_reason: Some("tool_calls".into()),
            }
        }

        fn next_response(&self) -> ChatResponse {
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Self::reply("(script exhausted)"))
        }
    }

    #[async_trait::async_trait]
    impl LlmClient for StubLlm {
        fn model_id(&self) -> &str {
            "stub-model"
        }

        async fn call(&self, _ctx: &CallCtx, req: ChatRequest) -> Result<ChatResponse> {
            self.calls.lock().push(req);
            Ok(self.next_response())
        }

        async fn stream(
            &self,
            _ctx: &CallCtx,
            req: ChatRequest,
        ) -> Result<BoxStream<'static, Result<Delta>>> {
            self.calls.lock().push(req);
            let resp = self.next_response();

            let mut deltas: Vec<Result<Delta>> = Vec::new();
            if !resp.content.is_empty() {
                deltas.push(Ok(Delta::content(resp.content.clone())));
            }
            for (index, tc) in resp.tool_calls.iter().enumerate() {
                deltas.push(Ok(Delta {
                    tool_call: Some(ToolCallDelta {
                        index,
                        id: Some(tc.id.clone()),
                        name: Some(tc.name.clone()),
                        args_fragment: tc.args.to_string(),
                    }),
                    ..Default::default()
                }));
            }
            deltas.push(Ok(Delta::done(resp.finish_reason.clone())));

            Ok(Box::pin(futures_util::stream::iter(deltas)))
        }
    }

    /// A hook context over a fresh state and the default stub client.
    pub fn hook_context(backend: Option<Arc<dyn Backend>>) -> HookContext {
        let (events, _rx) = EventSink::new();
        HookContext {
            thread_id: "t-test".into(),
            user: "tester".into(),
            cancel: CancelToken::new(),
            events,
            llm: StubLlm::scripted(Vec::new()),
            backend,
            state: AgentState::new("t-test"),
            context_window: 128_000,
            trace: None,
            hook_config: HashMap::new(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
