//! Shared application state passed to all API handlers.

use std::sync::Arc;

use parking_lot::RwLock;

use wick_domain::config::{GatewayConfig, UserConfig};
use wick_engine::{ThreadStore, ToolRegistry, TraceRecorder};
use wick_mcp::{RoleFilter, ToolAggregator};

use crate::api::mcp::McpSessionMap;
use crate::config_store::ConfigStore;
use crate::runtime::{AgentRegistry, CancelMap, TurnLockMap};

/// Everything the handlers share.
///
/// Grouped by concern: configuration, agent runtime, MCP federation,
/// security.
#[derive(Clone)]
pub struct AppState {
    // ── Configuration ─────────────────────────────────────────────
    pub config: Arc<GatewayConfig>,
    pub config_store: Arc<ConfigStore>,
    /// Live user table, persisted back to the YAML document on CRUD.
    pub users: Arc<RwLock<Vec<UserConfig>>>,

    // ── Agent runtime ─────────────────────────────────────────────
    pub registry: Arc<AgentRegistry>,
    pub threads: Arc<ThreadStore>,
    pub static_tools: Arc<ToolRegistry>,
    pub traces: Arc<TraceRecorder>,
    pub turn_locks: Arc<TurnLockMap>,
    pub cancel_map: Arc<CancelMap>,

    // ── MCP federation ────────────────────────────────────────────
    pub federation: Arc<ToolAggregator>,
    pub roles: Arc<RwLock<RoleFilter>>,
    pub mcp_sessions: Arc<McpSessionMap>,

    // ── Security (startup-computed) ───────────────────────────────
    /// SHA-256 of the API bearer token. `None` = dev mode, no auth.
    pub api_token_hash: Option<Arc<Vec<u8>>>,
}
