//! Conversation compression.
//!
//! When the estimated token load crosses 85% of the context window, the
//! older part of the conversation is summarized by the agent's own model
//! and replaced with a synthetic `[Conversation Summary]` system message.
//! On any failure the original message list goes through untouched.

use wick_domain::message::{Message, Role};
use wick_domain::Result;
use wick_llm::{CallCtx, ChatRequest, ChatResponse, LlmClient};

use super::{Hook, HookContext, HookPhase, ModelNext};

/// Rough chars-per-token estimate.
const CHARS_PER_TOKEN: usize = 4;
/// Compression triggers above this share of the context window.
const TRIGGER_PERCENT: usize = 85;
/// Token budget for the summary reply.
const SUMMARY_MAX_TOKENS: u32 = 2000;
/// File-writing tool outputs are clipped to this many chars in the prompt.
const FILE_CONTENT_CLIP: usize = 2000;

pub struct SummarizationHook;

/// Σ len(content)/4 over the message list.
pub(crate) fn estimate_tokens(msgs: &[Message]) -> usize {
    msgs.iter().map(|m| m.content.len() / CHARS_PER_TOKEN).sum()
}

/// How many trailing messages stay verbatim.
pub(crate) fn keep_count(len: usize) -> usize {
    (len / 10).max(2)
}

fn clip(content: &str, max: usize) -> &str {
    let mut end = max.min(content.len());
    while end > 0 && !content.is_char_boundary(end) {
        end -= 1;
    }
    &content[..end]
}

/// Render the old messages into the summarization prompt.
pub(crate) fn build_summary_prompt(old: &[Message]) -> String {
    let mut lines = Vec::with_capacity(old.len() + 2);
    lines.push(
        "Summarize the following conversation so it can replace the original \
         messages. Preserve decisions, file paths, open tasks, and facts the \
         assistant will need later."
            .to_string(),
    );
    for msg in old {
        let is_file_tool = msg.role == Role::Tool
            && matches!(msg.name.as_deref(), Some("write_file") | Some("edit_file"));
        let content = if is_file_tool && msg.content.len() > FILE_CONTENT_CLIP {
            format!("{}…", clip(&msg.content, FILE_CONTENT_CLIP))
        } else {
            msg.content.clone()
        };
        lines.push(format!("[{}] {content}", msg.role));
    }
    lines.join("\n")
}

#[async_trait::async_trait]
impl Hook for SummarizationHook {
    fn name(&self) -> &'static str {
        "summarization"
    }

    fn phases(&self) -> &'static [HookPhase] {
        &[HookPhase::WrapModelCall]
    }

    async fn wrap_model_call(
        &self,
        ctx: &HookContext,
        req: ChatRequest,
        next: ModelNext<'_>,
    ) -> Result<ChatResponse> {
        let threshold = (ctx.context_window * TRIGGER_PERCENT).div_ceil(100);
        let estimated = estimate_tokens(&req.messages);
        if estimated <= threshold {
            return next.run(req).await;
        }

        let keep = keep_count(req.messages.len());
        if req.messages.len() <= keep {
            return next.run(req).await;
        }
        let split = req.messages.len() - keep;

        tracing::info!(
            estimated_tokens = estimated,
            context_window = ctx.context_window,
            compressing = split,
            keeping = keep,
            "compressing conversation"
        );

        let prompt = build_summary_prompt(&req.messages[..split]);
        let summary_req = ChatRequest {
            messages: vec![Message::user(prompt)],
            tools: Vec::new(),
            max_tokens: Some(SUMMARY_MAX_TOKENS),
            temperature: None,
        };

        let call_ctx = CallCtx::new(ctx.cancel.clone());
        match ctx.llm.call(&call_ctx, summary_req).await {
            Ok(summary) if !summary.content.is_empty() => {
                let mut compressed =
                    Vec::with_capacity(keep + 1);
                compressed.push(Message::system(format!(
                    "[Conversation Summary]\n{}",
                    summary.content
                )));
                compressed.extend_from_slice(&req.messages[split..]);
                let compressed_req = ChatRequest {
                    messages: compressed,
                    ..req
                };
                next.run(compressed_req).await
            }
            Ok(_) => {
                tracing::warn!("summarization returned empty content, passing through");
                next.run(req).await
            }
            Err(e) => {
                // Degraded but functional: the oversized request goes through.
                tracing::warn!(error = %e, "summarization failed, passing through");
                next.run(req).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_estimate_sums_quarters() {
        let msgs = vec![Message::user("x".repeat(400)), Message::assistant("y".repeat(40))];
        assert_eq!(estimate_tokens(&msgs), 110);
    }

    #[test]
    fn keep_count_floors_at_two() {
        assert_eq!(keep_count(5), 2);
        assert_eq!(keep_count(20), 2);
        assert_eq!(keep_count(50), 5);
        assert_eq!(keep_count(100), 10);
    }

    #[test]
    fn prompt_lists_roles_and_clips_file_tools() {
        let big = "z".repeat(5000);
        let old = vec![
            Message::user("please write the file"),
            Message::tool("c1", "write_file", big),
            Message::tool("c2", "execute", "w".repeat(3000)),
        ];
        let prompt = build_summary_prompt(&old);
        assert!(prompt.contains("[user] please write the file"));
        // write_file output clipped to 2000 chars (plus ellipsis).
        let tool_line = prompt.lines().find(|l| l.starts_with("[tool] zzz")).unwrap();
        assert!(tool_line.len() < 2100);
        // Non-file tools are not clipped.
        assert!(prompt.contains(&"w".repeat(3000)));
    }

    // Exactly the threshold does not trigger; one token above does.
    #[test]
    fn threshold_boundary() {
        let ctx_window = 1000usize;
        let threshold = (ctx_window * TRIGGER_PERCENT).div_ceil(100);
        assert_eq!(threshold, 850);

        let at = vec![Message::user("x".repeat(850 * CHARS_PER_TOKEN))];
        assert_eq!(estimate_tokens(&at), 850);
        assert!(estimate_tokens(&at) <= threshold);

        let above = vec![Message::user("x".repeat(851 * CHARS_PER_TOKEN))];
        assert!(estimate_tokens(&above) > threshold);
    }
}
