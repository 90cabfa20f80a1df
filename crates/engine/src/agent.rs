//! The agent loop: alternate model calls and tool executions until the
//! model answers without tool calls, streaming every step as events.

use std::sync::Arc;
use std::time::Instant;

use serde_json::json;

use wick_backend::Backend;
use wick_domain::cancel::CancelToken;
use wick_domain::config::AgentConfig;
use wick_domain::message::{validate_messages, Message, ToolResult};
use wick_domain::stream::StreamEvent;
use wick_domain::tool::ToolDefinition;
use wick_llm::{ChatRequest, LlmClient};
use wick_mcp::ToolAggregator;

use crate::events::EventSink;
use crate::hooks::{
    hooks_for_phase, Hook, HookContext, HookPhase, InnerModel, InnerTool, ModelNext, ToolNext,
};
use crate::state::AgentState;
use crate::thread_store::ThreadStore;
use crate::tool::{definition_of, Tool, ToolContext, ToolRegistry};
use crate::trace::TraceRecorder;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Large-result eviction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tools whose output is never evicted (their own caps keep them small).
pub const EVICT_EXCLUDED: &[&str] = &["ls", "glob", "grep", "read_file", "edit_file", "write_file"];

/// Outputs above this many chars are replaced by head + tail excerpts.
pub const EVICT_THRESHOLD: usize = 80_000;

const EVICT_KEEP: usize = 2000;

fn char_floor(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Replace an oversized tool output with its first and last 2000 chars.
pub fn evict_large_output(tool_name: &str, output: String) -> String {
    if EVICT_EXCLUDED.contains(&tool_name) || output.len() <= EVICT_THRESHOLD {
        return output;
    }
    let head_end = char_floor(&output, EVICT_KEEP);
    let tail_start = char_floor(&output, output.len() - EVICT_KEEP);
    let elided = output.len() - head_end - (output.len() - tail_start);
    format!(
        "{}…[truncated {elided} chars]…{}",
        &output[..head_end],
        &output[tail_start..]
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A built engine: the snapshot of everything one instance needs to run
/// turns. Rebuilt when hook overrides or config change.
pub struct Agent {
    config: AgentConfig,
    llm: Arc<dyn LlmClient>,
    backend: Option<Arc<dyn Backend>>,
    hooks: Vec<Arc<dyn Hook>>,
    static_tools: Vec<Arc<dyn Tool>>,
    federation: Option<Arc<ToolAggregator>>,
    trace: Arc<TraceRecorder>,
}

impl Agent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: AgentConfig,
        llm: Arc<dyn LlmClient>,
        backend: Option<Arc<dyn Backend>>,
        hooks: Vec<Arc<dyn Hook>>,
        static_registry: &ToolRegistry,
        federation: Option<Arc<ToolAggregator>>,
        trace: Arc<TraceRecorder>,
    ) -> Self {
        // An empty grant list means every static tool.
        let static_tools = if config.tools.is_empty() {
            static_registry.list()
        } else {
            config
                .tools
                .iter()
                .filter_map(|name| {
                    let tool = static_registry.get(name);
                    if tool.is_none() {
                        tracing::warn!(agent = %config.name, tool = %name, "granted tool not in static registry");
                    }
                    tool
                })
                .collect()
        };

        Self {
            config,
            llm,
            backend,
            hooks,
            static_tools,
            federation,
            trace,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn hook_names(&self) -> Vec<String> {
        self.hooks.iter().map(|h| h.name().to_string()).collect()
    }

    pub fn backend(&self) -> Option<Arc<dyn Backend>> {
        self.backend.clone()
    }

    /// Tool definitions for the current iteration: runtime tools first,
    /// then static, then the MCP federation — earlier sources shadow later
    /// ones, matching lookup order.
    fn compose_tool_definitions(&self, state: &AgentState) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = Vec::new();
        let mut seen: Vec<String> = Vec::new();

        for tool in state.runtime_tools() {
            seen.push(tool.name().to_string());
            defs.push(definition_of(tool.as_ref()));
        }
        for tool in &self.static_tools {
            if seen.iter().any(|n| n == tool.name()) {
                continue;
            }
            seen.push(tool.name().to_string());
            defs.push(definition_of(tool.as_ref()));
        }
        if let Some(federation) = &self.federation {
            for tool in federation.tools() {
                if seen.iter().any(|n| *n == tool.name) {
                    continue;
                }
                seen.push(tool.name.clone());
                defs.push(ToolDefinition {
                    name: tool.name,
                    description: tool.description,
                    parameters: tool.input_schema,
                });
            }
        }
        defs
    }

    // ── The loop ──────────────────────────────────────────────────

    /// Run one turn. All outcomes are signalled through `events`: exactly
    /// one terminal `done` or `error` is emitted.
    #[allow(clippy::too_many_arguments)]
    pub async fn run_turn(
        &self,
        threads: &ThreadStore,
        state: Arc<AgentState>,
        user_message: Message,
        user: &str,
        cancel: CancelToken,
        events: EventSink,
        trace_enabled: bool,
    ) {
        let start = Instant::now();
        let thread_id = state.thread_id.clone();

        let done = |events: &EventSink| {
            events.emit(StreamEvent::Done {
                thread_id: thread_id.clone(),
                total_duration_ms: start.elapsed().as_millis() as u64,
            });
        };

        // 1. Append the user message and validate the thread.
        state.push_message(user_message);
        if let Err(e) = validate_messages(&state.messages_snapshot()) {
            events.emit(StreamEvent::Error { error: e.to_string() });
            return;
        }

        // The runtime registry is rebuilt by the before_agent hooks.
        state.clear_runtime_tools();

        let ctx = HookContext {
            thread_id: thread_id.clone(),
            user: user.to_string(),
            cancel: cancel.clone(),
            events: events.clone(),
            llm: self.llm.clone(),
            backend: self.backend.clone(),
            state: state.clone(),
            context_window: self.config.context_window,
            trace: trace_enabled.then(|| self.trace.clone()),
            hook_config: self.config.builtin_config.clone(),
        };

        // 2. before_agent hooks, in registration order. Errors abort.
        for hook in hooks_for_phase(&self.hooks, HookPhase::BeforeAgent) {
            if let Err(e) = hook.before_agent(&ctx).await {
                tracing::error!(hook = hook.name(), error = %e, "before_agent hook failed");
                events.emit(StreamEvent::Error {
                    error: format!("hook {}: {e}", hook.name()),
                });
                return;
            }
        }

        // 3. Chain start.
        let chain_run_id = uuid::Uuid::new_v4().to_string();
        events.emit(StreamEvent::OnChainStart {
            name: "agent".into(),
            run_id: chain_run_id.clone(),
            thread_id: thread_id.clone(),
        });

        let modify_hooks = hooks_for_phase(&self.hooks, HookPhase::ModifyRequest);
        let wrap_model_hooks = hooks_for_phase(&self.hooks, HookPhase::WrapModelCall);
        let wrap_tool_hooks = hooks_for_phase(&self.hooks, HookPhase::WrapToolCall);

        let inner_tool = InnerTool {
            state: state.clone(),
            static_tools: self.static_tools.clone(),
            federation: self.federation.clone(),
            tool_ctx: ToolContext {
                thread_id: thread_id.clone(),
                user: user.to_string(),
                cancel: cancel.clone(),
                backend: self.backend.clone(),
            },
        };

        // 4. Iteration loop.
        for iteration in 0..self.config.max_iterations {
            if cancel.is_cancelled() {
                done(&events);
                return;
            }

            tracing::debug!(%thread_id, iteration, "loop iteration");

            // a. Compose the tool surface.
            let tools = self.compose_tool_definitions(&state);

            // b. ModifyRequest chain.
            let mut msgs = state.messages_snapshot();
            for hook in &modify_hooks {
                msgs = match hook.modify_request(&ctx, msgs).await {
                    Ok(m) => m,
                    Err(e) => {
                        events.emit(StreamEvent::Error {
                            error: format!("hook {}: {e}", hook.name()),
                        });
                        return;
                    }
                };
            }

            // c. Model start.
            let run_id = uuid::Uuid::new_v4().to_string();
            events.emit(StreamEvent::OnChatModelStart {
                name: self.llm.model_id().to_string(),
                run_id: run_id.clone(),
                thread_id: thread_id.clone(),
            });

            // d. WrapModelCall chain; the innermost layer streams deltas.
            let inner_model = InnerModel {
                llm: self.llm.clone(),
                events: events.clone(),
                cancel: cancel.clone(),
                run_id: run_id.clone(),
                thread_id: thread_id.clone(),
            };
            let req = ChatRequest {
                messages: msgs,
                tools,
                max_tokens: None,
                temperature: None,
            };
            let response = match ModelNext::root(&ctx, &wrap_model_hooks, &inner_model)
                .run(req)
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    // Provider errors terminate the turn; no automatic retry.
                    events.emit(StreamEvent::Error { error: e.to_string() });
                    return;
                }
            };

            // e. Model end.
            events.emit(StreamEvent::OnChatModelEnd {
                run_id: run_id.clone(),
                thread_id: thread_id.clone(),
                data: json!({
                    "output": {
                        "content": response.content.clone(),
                        "tool_calls": response.tool_calls.clone(),
                    }
                }),
            });

            // A stream cut short by cancellation still carries partial
            // content worth keeping.
            if cancel.is_cancelled() {
                if !response.content.is_empty() || !response.tool_calls.is_empty() {
                    state.push_message(Message::assistant_with_tools(
                        response.content,
                        response.tool_calls,
                    ));
                }
                threads.touch(&thread_id);
                done(&events);
                return;
            }

            if response.content.is_empty() && response.tool_calls.is_empty() {
                events.emit(StreamEvent::Error {
                    error: "model returned an empty response".into(),
                });
                return;
            }

            // f. Append the assistant message.
            state.push_message(Message::assistant_with_tools(
                response.content,
                response.tool_calls.clone(),
            ));

            // g. No tool calls: this is the visible reply.
            if response.tool_calls.is_empty() {
                events.emit(StreamEvent::OnChainEnd {
                    name: "agent".into(),
                    run_id: chain_run_id.clone(),
                    thread_id: thread_id.clone(),
                });
                threads.touch(&thread_id);
                done(&events);
                return;
            }

            // h. Tool calls, sequentially, in issued order.
            let mut stopped = false;
            for call in response.tool_calls {
                if cancel.is_cancelled() {
                    stopped = true;
                    break;
                }

                let tool_run_id = uuid::Uuid::new_v4().to_string();
                events.emit(StreamEvent::OnToolStart {
                    name: call.name.clone(),
                    run_id: tool_run_id.clone(),
                    thread_id: thread_id.clone(),
                    data: json!({ "input": call.args.clone() }),
                });

                let result = ToolNext::root(&ctx, &wrap_tool_hooks, &inner_tool)
                    .run(call.clone())
                    .await;
                let mut result = match result {
                    Ok(r) => r,
                    Err(e) => ToolResult {
                        tool_call_id: call.id.clone(),
                        name: call.name.clone(),
                        output: format!("Error: {e}"),
                        is_error: true,
                    },
                };
                result.output = evict_large_output(&result.name, result.output);

                events.emit(StreamEvent::OnToolEnd {
                    name: result.name.clone(),
                    run_id: tool_run_id,
                    thread_id: thread_id.clone(),
                    data: json!({ "output": result.output.clone() }),
                });

                state.push_message(result.into());
            }

            // i. Persist the thread (refresh its TTL).
            threads.touch(&thread_id);

            if stopped || cancel.is_cancelled() {
                done(&events);
                return;
            }
        }

        // 5. Iteration budget exhausted.
        events.emit(StreamEvent::Error {
            error: "max_iterations_exceeded".into(),
        });
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::test_support::StubLlm;
    use crate::hooks::build_hooks;
    use crate::thread_store::DEFAULT_TTL;
    use crate::tool::{ToolOutcome, ToolContext as TCtx};
    use std::collections::HashMap;
    use wick_domain::config::ModelRef;
    use wick_domain::message::{Role, ToolCall};
    use wick_llm::ChatResponse;

    fn config() -> AgentConfig {
        AgentConfig {
            name: "tester".into(),
            model: ModelRef::Shortcut("stub-model".into()),
            system_prompt: String::new(),
            tools: Vec::new(),
            middleware: Vec::new(),
            subagents: Vec::new(),
            backend: None,
            skills: None,
            memory: None,
            context_window: 128_000,
            max_iterations: 25,
            builtin_config: HashMap::new(),
            debug: false,
        }
    }

    fn agent_with(responses: Vec<ChatResponse>, registry: &ToolRegistry) -> Agent {
        let cfg = config();
        let hooks = build_hooks(&cfg, None);
        Agent::new(
            cfg,
            StubLlm::scripted(responses),
            None,
            hooks,
            registry,
            None,
            Arc::new(TraceRecorder::new()),
        )
    }

    /// Drive a turn to completion, collecting every event.
    async fn run_and_collect(
        agent: &Agent,
        threads: &Arc<ThreadStore>,
        thread_id: &str,
        text: &str,
    ) -> Vec<StreamEvent> {
        let state = threads.load_or_create(thread_id);
        let (events, mut rx) = EventSink::new();

        let collector = tokio::spawn(async move {
            let mut seen = Vec::new();
            loop {
                match rx.recv().await {
                    Ok(ev) => {
                        let terminal = ev.is_terminal();
                        seen.push(ev);
                        if terminal {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(_) => break,
                }
            }
            seen
        });

        agent
            .run_turn(
                threads,
                state,
                Message::user(text),
                "alice",
                CancelToken::new(),
                events,
                false,
            )
            .await;

        collector.await.unwrap()
    }

    fn names(events: &[StreamEvent]) -> Vec<&'static str> {
        events.iter().map(|e| e.event_name()).collect()
    }

    #[tokio::test]
    async fn no_tool_reply_event_sequence() {
        let registry = ToolRegistry::new();
        let agent = agent_with(vec![StubLlm::reply("Hi")], &registry);
        let threads = ThreadStore::new(DEFAULT_TTL);

        let events = run_and_collect(&agent, &threads, "t1", "Say hi").await;
        assert_eq!(
            names(&events),
            vec![
                "on_chain_start",
                "on_chat_model_start",
                "on_chat_model_stream",
                "on_chat_model_end",
                "on_chain_end",
                "done",
            ]
        );

        // Final state: user + assistant.
        let state = threads.get("t1").unwrap();
        let msgs = state.messages_snapshot();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[1].role, Role::Assistant);
        assert_eq!(msgs[1].content, "Hi");
    }

    #[tokio::test]
    async fn tool_using_turn_event_sequence() {
        let registry = ToolRegistry::with_builtins();
        let agent = agent_with(
            vec![
                StubLlm::tool_reply(vec![ToolCall {
                    id: "c1".into(),
                    name: "calculate".into(),
                    args: serde_json::json!({ "expr": "2+2" }),
                    raw_args: String::new(),
                }]),
                StubLlm::reply("2+2=4"),
            ],
            &registry,
        );
        let threads = ThreadStore::new(DEFAULT_TTL);

        let events = run_and_collect(&agent, &threads, "t2", "what is 2+2?").await;
        let sequence = names(&events);
        assert_eq!(
            sequence,
            vec![
                "on_chain_start",
                "on_chat_model_start",
                "on_chat_model_end",
                "on_tool_start",
                "on_tool_end",
                "on_chat_model_start",
                "on_chat_model_stream",
                "on_chat_model_end",
                "on_chain_end",
                "done",
            ]
        );

        // Tool result is "4" and the final reply lands in state.
        let tool_end = events
            .iter()
            .find_map(|e| match e {
                StreamEvent::OnToolEnd { data, .. } => Some(data.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(tool_end["output"], "4");

        let msgs = threads.get("t2").unwrap().messages_snapshot();
        assert_eq!(msgs.last().unwrap().content, "2+2=4");
        assert_eq!(msgs[2].role, Role::Tool);
        assert_eq!(msgs[2].content, "4");
        assert!(validate_messages(&msgs).is_ok());
    }

    #[tokio::test]
    async fn run_ids_pair_start_and_end() {
        let registry = ToolRegistry::with_builtins();
        let agent = agent_with(
            vec![
                StubLlm::tool_reply(vec![ToolCall {
                    id: "c1".into(),
                    name: "calculate".into(),
                    args: serde_json::json!({ "expr": "1+1" }),
                    raw_args: String::new(),
                }]),
                StubLlm::reply("ok"),
            ],
            &registry,
        );
        let threads = ThreadStore::new(DEFAULT_TTL);
        let events = run_and_collect(&agent, &threads, "t3", "go").await;

        let mut open_model: Option<String> = None;
        for ev in &events {
            match ev {
                StreamEvent::OnChatModelStart { run_id, .. } => {
                    assert!(open_model.is_none(), "unbalanced model start");
                    open_model = Some(run_id.clone());
                }
                StreamEvent::OnChatModelStream { run_id, .. } => {
                    assert_eq!(Some(run_id), open_model.as_ref());
                }
                StreamEvent::OnChatModelEnd { run_id, .. } => {
                    assert_eq!(Some(run_id.clone()), open_model.take());
                }
                _ => {}
            }
        }
        assert!(open_model.is_none());

        let starts: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::OnToolStart { run_id, .. } => Some(run_id.clone()),
                _ => None,
            })
            .collect();
        let ends: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::OnToolEnd { run_id, .. } => Some(run_id.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(starts, ends);
    }

    #[tokio::test]
    async fn unknown_tool_keeps_loop_alive() {
        let registry = ToolRegistry::new();
        let agent = agent_with(
            vec![
                StubLlm::tool_reply(vec![ToolCall {
                    id: "c1".into(),
                    name: "no_such_tool".into(),
                    args: serde_json::json!({}),
                    raw_args: String::new(),
                }]),
                StubLlm::reply("recovered"),
            ],
            &registry,
        );
        let threads = ThreadStore::new(DEFAULT_TTL);
        let events = run_and_collect(&agent, &threads, "t4", "go").await;

        assert!(matches!(events.last(), Some(StreamEvent::Done { .. })));
        let msgs = threads.get("t4").unwrap().messages_snapshot();
        let tool_msg = msgs.iter().find(|m| m.role == Role::Tool).unwrap();
        assert!(tool_msg.content.starts_with("Error: unknown tool"));
    }

    #[tokio::test]
    async fn max_iterations_exceeded() {
        let registry = ToolRegistry::with_builtins();
        // Every response asks for another tool call: the loop must stop
        // after max_iterations with the canonical error.
        let mut cfg = config();
        cfg.max_iterations = 3;
        let responses: Vec<ChatResponse> = (0..10)
            .map(|i| {
                StubLlm::tool_reply(vec![ToolCall {
                    id: format!("c{i}"),
                    name: "calculate".into(),
                    args: serde_json::json!({ "expr": "1+1" }),
                    raw_args: String::new(),
                }])
            })
            .collect();
        let hooks = build_hooks(&cfg, None);
        let llm = StubLlm::scripted(responses);
        let agent = Agent::new(
            cfg,
            llm.clone(),
            None,
            hooks,
            &registry,
            None,
            Arc::new(TraceRecorder::new()),
        );
        let threads = ThreadStore::new(DEFAULT_TTL);

        let events = run_and_collect(&agent, &threads, "t5", "loop forever").await;
        match events.last().unwrap() {
            StreamEvent::Error { error } => assert_eq!(error, "max_iterations_exceeded"),
            other => panic!("expected error event, got {other:?}"),
        }
        assert_eq!(llm.calls.lock().len(), 3);
    }

    #[tokio::test]
    async fn cancellation_emits_done_with_partial_state() {
        let registry = ToolRegistry::with_builtins();
        let agent = agent_with(vec![StubLlm::reply("partial answer")], &registry);
        let threads = ThreadStore::new(DEFAULT_TTL);
        let state = threads.load_or_create("t6");
        let (events, mut rx) = EventSink::new();

        let cancel = CancelToken::new();
        cancel.cancel();

        agent
            .run_turn(
                &threads,
                state,
                Message::user("hi"),
                "alice",
                cancel,
                events,
                false,
            )
            .await;

        let mut last = None;
        while let Ok(ev) = rx.try_recv() {
            last = Some(ev);
        }
        assert!(matches!(last, Some(StreamEvent::Done { .. })));
    }

    struct BigDumpTool;

    #[async_trait::async_trait]
    impl Tool for BigDumpTool {
        fn name(&self) -> &str {
            "bigdump"
        }
        fn description(&self) -> &str {
            "Dump a lot of output."
        }
        fn parameters(&self) -> serde_json::Value {
            serde_json::json!({ "type": "object", "properties": {} })
        }
        async fn execute(&self, _ctx: &TCtx, _args: serde_json::Value) -> ToolOutcome {
            ToolOutcome::ok("y".repeat(100_000))
        }
    }

    #[tokio::test]
    async fn large_tool_output_is_evicted() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(BigDumpTool));
        let agent = agent_with(
            vec![
                StubLlm::tool_reply(vec![ToolCall {
                    id: "c1".into(),
                    name: "bigdump".into(),
                    args: serde_json::json!({}),
                    raw_args: String::new(),
                }]),
                StubLlm::reply("done"),
            ],
            &registry,
        );
        let threads = ThreadStore::new(DEFAULT_TTL);
        let _ = run_and_collect(&agent, &threads, "t7", "dump").await;

        let msgs = threads.get("t7").unwrap().messages_snapshot();
        let tool_msg = msgs.iter().find(|m| m.role == Role::Tool).unwrap();
        assert!(tool_msg.content.len() <= 4200);
        assert!(tool_msg.content.contains("[truncated 96000 chars]"));
    }

    #[test]
    fn eviction_spares_excluded_tools() {
        let big = "x".repeat(100_000);
        assert_eq!(evict_large_output("read_file", big.clone()).len(), 100_000);
        let evicted = evict_large_output("execute", big);
        assert!(evicted.len() <= 4200);
        assert!(evicted.starts_with("xxx"));
        assert!(evicted.ends_with("xxx"));
    }

    #[test]
    fn eviction_ignores_small_outputs() {
        assert_eq!(evict_large_output("execute", "small".into()), "small");
    }
}
