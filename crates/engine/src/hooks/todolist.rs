//! Registers the `write_todos` runtime tool.

use std::sync::Arc;

use wick_domain::Result;

use crate::tools::workspace::WriteTodosTool;

use super::{Hook, HookContext, HookPhase};

pub struct TodolistHook;

#[async_trait::async_trait]
impl Hook for TodolistHook {
    fn name(&self) -> &'static str {
        "todolist"
    }

    fn phases(&self) -> &'static [HookPhase] {
        &[HookPhase::BeforeAgent]
    }

    async fn before_agent(&self, ctx: &HookContext) -> Result<()> {
        ctx.state
            .register_tool(Arc::new(WriteTodosTool::new(ctx.state.todos.clone())));
        Ok(())
    }
}
