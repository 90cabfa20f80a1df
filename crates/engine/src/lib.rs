//! The agent execution engine: the model/tool/hook loop with middleware
//! composition, streaming event emission, and conversation state handling.

pub mod agent;
pub mod events;
pub mod hooks;
pub mod state;
pub mod thread_store;
pub mod tool;
pub mod tools;
pub mod trace;

pub use agent::Agent;
pub use events::EventSink;
pub use hooks::{build_hooks, Hook, HookContext, HookPhase, ModelNext, ToolNext};
pub use state::AgentState;
pub use thread_store::ThreadStore;
pub use tool::{Tool, ToolContext, ToolOutcome, ToolRegistry};
pub use trace::TraceRecorder;
