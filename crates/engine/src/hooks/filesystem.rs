//! Registers the workspace runtime tools bound to the instance backend.

use std::sync::Arc;

use wick_backend::Backend;
use wick_domain::{Error, Result};

use crate::tools::workspace::{
    EditFileTool, ExecuteTool, GlobTool, GrepTool, LsTool, ReadFileTool, WriteFileTool,
};

use super::{Hook, HookContext, HookPhase};

pub struct FilesystemHook;

#[async_trait::async_trait]
impl Hook for FilesystemHook {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    fn phases(&self) -> &'static [HookPhase] {
        &[HookPhase::BeforeAgent]
    }

    async fn before_agent(&self, ctx: &HookContext) -> Result<()> {
        let backend = ctx
            .backend
            .clone()
            .ok_or_else(|| Error::Config("filesystem hook requires a backend".into()))?;
        let fs = backend
            .fs()
            .ok_or_else(|| Error::Config("filesystem hook requires a filesystem backend".into()))?;

        let state = &ctx.state;
        state.register_tool(Arc::new(LsTool::new(fs.clone())));
        state.register_tool(Arc::new(ReadFileTool::new(fs.clone())));
        state.register_tool(Arc::new(WriteFileTool::new(
            backend.clone(),
            fs.clone(),
            state.files.clone(),
        )));
        state.register_tool(Arc::new(EditFileTool::new(
            backend.clone(),
            fs.clone(),
            state.files.clone(),
        )));
        state.register_tool(Arc::new(GlobTool::new(fs.clone())));
        state.register_tool(Arc::new(GrepTool::new(fs)));
        state.register_tool(Arc::new(ExecuteTool::new(backend)));
        Ok(())
    }
}
