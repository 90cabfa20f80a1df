//! Injects agent memory files into the request as an `<agent_memory>` block.

use parking_lot::Mutex;

use wick_backend::{Backend, FileSystem};
use wick_domain::message::Message;
use wick_domain::Result;

use super::skills::inject_into_system;
use super::{Hook, HookContext, HookPhase};

pub struct MemoryHook {
    paths: Vec<String>,
    memory: Mutex<Option<String>>,
}

impl MemoryHook {
    pub fn new(paths: Vec<String>) -> Self {
        Self {
            paths,
            memory: Mutex::new(None),
        }
    }
}

#[async_trait::async_trait]
impl Hook for MemoryHook {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn phases(&self) -> &'static [HookPhase] {
        &[HookPhase::BeforeAgent, HookPhase::ModifyRequest]
    }

    async fn before_agent(&self, ctx: &HookContext) -> Result<()> {
        let Some(fs) = ctx.backend.as_ref().and_then(|b| b.fs()) else {
            return Ok(());
        };

        let mut sections: Vec<String> = Vec::new();
        for path in &self.paths {
            match fs.read_file(path, None, None).await {
                Ok(content) if !content.trim().is_empty() => {
                    sections.push(content.trim_end().to_string());
                }
                Ok(_) => {}
                Err(e) => {
                    // Memory files appear over time; absence is normal.
                    tracing::debug!(path = %path, error = %e, "memory file not readable");
                }
            }
        }

        *self.memory.lock() = if sections.is_empty() {
            None
        } else {
            Some(format!("<agent_memory>\n{}\n</agent_memory>", sections.join("\n\n")))
        };
        Ok(())
    }

    async fn modify_request(&self, _ctx: &HookContext, msgs: Vec<Message>) -> Result<Vec<Message>> {
        let memory = self.memory.lock().clone();
        match memory {
            Some(block) => Ok(inject_into_system(msgs, &block)),
            None => Ok(msgs),
        }
    }
}
