//! The tool capability and the process-wide static registry.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use wick_backend::Backend;
use wick_domain::cancel::CancelToken;
use wick_domain::tool::{validate_args, ToolDefinition};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Context threaded into every tool execution.
#[derive(Clone)]
pub struct ToolContext {
    pub thread_id: String,
    pub user: String,
    pub cancel: CancelToken,
    pub backend: Option<Arc<dyn Backend>>,
}

impl ToolContext {
    pub fn new(thread_id: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            user: user.into(),
            cancel: CancelToken::new(),
            backend: None,
        }
    }
}

/// What a tool hands back. Failures stay in-band: the loop appends the
/// error output as a tool message and the model decides what to do next.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub output: String,
    pub is_error: bool,
}

impl ToolOutcome {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            is_error: false,
        }
    }

    pub fn error(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            is_error: true,
        }
    }
}

#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema for the tool's parameters. Arguments are validated
    /// against it at the registry boundary, not inside the tool.
    fn parameters(&self) -> Value;

    async fn execute(&self, ctx: &ToolContext, args: Value) -> ToolOutcome;
}

/// The definition advertised to the model for one tool.
pub fn definition_of(tool: &dyn Tool) -> ToolDefinition {
    ToolDefinition {
        name: tool.name().to_string(),
        description: tool.description().to_string(),
        parameters: tool.parameters(),
    }
}

/// Validate-then-execute: the single entry point the loop uses.
pub async fn run_tool(tool: &dyn Tool, ctx: &ToolContext, args: Value) -> ToolOutcome {
    if let Err(e) = validate_args(&tool.parameters(), &args) {
        return ToolOutcome::error(format!("Error: invalid arguments for {}: {e}", tool.name()));
    }
    tool.execute(ctx, args).await
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Static registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Process-wide registry populated at startup with the builtin tools plus
/// any user-defined ones.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-loaded with the builtin static tools.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(crate::tools::builtin::CalculateTool));
        registry.register(Arc::new(crate::tools::builtin::CurrentDatetimeTool));
        registry.register(Arc::new(crate::tools::builtin::InternetSearchTool::new()));
        registry
    }

    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.write().insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "static tool re-registered");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().get(name).cloned()
    }

    pub fn list(&self) -> Vec<Arc<dyn Tool>> {
        let mut tools: Vec<_> = self.tools.read().values().cloned().collect();
        tools.sort_by(|a, b| a.name().cmp(b.name()));
        tools
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.tools.read().keys().cloned().collect();
        names.sort();
        names
    }
}
