//! Per-thread conversation state.
//!
//! The thread store hands out `Arc<AgentState>`; the engine loop is the
//! single logical owner during a turn and takes the interior locks only
//! briefly. Runtime tools close over the `todos`/`files` substructures they
//! mutate, so no back-reference from tool to state exists.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use wick_domain::message::{Message, Todo};

use crate::tool::Tool;

pub struct AgentState {
    pub thread_id: String,
    messages: Mutex<Vec<Message>>,
    pub todos: Arc<Mutex<Vec<Todo>>>,
    pub files: Arc<Mutex<HashMap<String, String>>>,
    /// Runtime tool registry. Not persisted — repopulated by `before_agent`
    /// hooks on every run.
    runtime_tools: Mutex<Vec<Arc<dyn Tool>>>,
}

impl AgentState {
    pub fn new(thread_id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            thread_id: thread_id.into(),
            messages: Mutex::new(Vec::new()),
            todos: Arc::new(Mutex::new(Vec::new())),
            files: Arc::new(Mutex::new(HashMap::new())),
            runtime_tools: Mutex::new(Vec::new()),
        })
    }

    // ── Messages ──────────────────────────────────────────────────

    pub fn push_message(&self, msg: Message) {
        self.messages.lock().push(msg);
    }

    pub fn messages_snapshot(&self) -> Vec<Message> {
        self.messages.lock().clone()
    }

    pub fn message_count(&self) -> usize {
        self.messages.lock().len()
    }

    // ── Runtime tools ─────────────────────────────────────────────

    /// Register a runtime tool; a same-named tool is replaced.
    pub fn register_tool(&self, tool: Arc<dyn Tool>) {
        let mut tools = self.runtime_tools.lock();
        tools.retain(|t| t.name() != tool.name());
        tools.push(tool);
    }

    pub fn runtime_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.runtime_tools
            .lock()
            .iter()
            .find(|t| t.name() == name)
            .cloned()
    }

    pub fn runtime_tools(&self) -> Vec<Arc<dyn Tool>> {
        self.runtime_tools.lock().clone()
    }

    /// Drop all runtime tools. Called at the start of every run before the
    /// `before_agent` hooks repopulate the registry.
    pub fn clear_runtime_tools(&self) {
        self.runtime_tools.lock().clear();
    }
}
