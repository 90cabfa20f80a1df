//! Records model and tool spans into the trace recorder for traced turns.

use wick_domain::message::{ToolCall, ToolResult};
use wick_domain::trace::{SpanKind, TraceSpan};
use wick_domain::Result;
use wick_llm::{ChatRequest, ChatResponse, LlmClient};

use super::{Hook, HookContext, HookPhase, ModelNext, ToolNext};

pub struct TracingHook;

#[async_trait::async_trait]
impl Hook for TracingHook {
    fn name(&self) -> &'static str {
        "tracing"
    }

    fn phases(&self) -> &'static [HookPhase] {
        &[HookPhase::WrapModelCall, HookPhase::WrapToolCall]
    }

    async fn wrap_model_call(
        &self,
        ctx: &HookContext,
        req: ChatRequest,
        next: ModelNext<'_>,
    ) -> Result<ChatResponse> {
        let Some(recorder) = ctx.trace.clone() else {
            return next.run(req).await;
        };

        let mut span = TraceSpan::start(ctx.llm.model_id(), SpanKind::Model, None);
        span.data = serde_json::json!({ "messages": req.messages.len(), "tools": req.tools.len() });

        let result = next.run(req).await;

        span.finish();
        if let Ok(resp) = &result {
            span.data["tool_calls"] = serde_json::json!(resp.tool_calls.len());
            span.data["content_chars"] = serde_json::json!(resp.content.len());
        }
        recorder.record(&ctx.thread_id, span);
        result
    }

    async fn wrap_tool_call(
        &self,
        ctx: &HookContext,
        call: ToolCall,
        next: ToolNext<'_>,
    ) -> Result<ToolResult> {
        let Some(recorder) = ctx.trace.clone() else {
            return next.run(call).await;
        };

        let mut span = TraceSpan::start(call.name.clone(), SpanKind::Tool, None);
        span.data = serde_json::json!({ "args": call.args });

        let result = next.run(call).await;

        span.finish();
        if let Ok(tool_result) = &result {
            span.data["is_error"] = serde_json::json!(tool_result.is_error);
            span.data["output_chars"] = serde_json::json!(tool_result.output.len());
        }
        recorder.record(&ctx.thread_id, span);
        result
    }
}
