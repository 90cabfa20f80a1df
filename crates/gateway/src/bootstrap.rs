//! Server assembly: turn a validated config into the shared [`AppState`],
//! spawning the background loops (thread reaper, MCP health).

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use wick_domain::config::GatewayConfig;
use wick_engine::{ThreadStore, ToolRegistry, TraceRecorder};
use wick_mcp::aggregator::HEALTH_INTERVAL;
use wick_mcp::{DownstreamClient, RoleFilter, ToolAggregator};

use crate::api::mcp::McpSessionMap;
use crate::auth;
use crate::config_store::ConfigStore;
use crate::runtime::{AgentRegistry, CancelMap, TurnLockMap};
use crate::state::AppState;

pub async fn build_state(config: GatewayConfig, store: ConfigStore) -> AppState {
    // ── Agent runtime ────────────────────────────────────────────
    let registry = Arc::new(AgentRegistry::new());
    for agent in &config.agents {
        tracing::info!(agent = %agent.name, model = %agent.model.model_id(), "registering agent template");
        registry.register_template(agent.clone());
    }

    let threads = ThreadStore::new(Duration::from_secs(config.thread_ttl_s));
    threads.spawn_reaper();

    let static_tools = Arc::new(ToolRegistry::with_builtins());
    let traces = Arc::new(TraceRecorder::new());

    // ── MCP federation ───────────────────────────────────────────
    let federation = Arc::new(ToolAggregator::new());
    for downstream in &config.downstream {
        tracing::info!(downstream = %downstream.name, url = %downstream.url, "adding MCP downstream");
        federation
            .add_downstream(Arc::new(DownstreamClient::new(
                downstream.name.clone(),
                downstream.url.clone(),
            )))
            .await;
    }

    let mcp_sessions = Arc::new(McpSessionMap::new());
    {
        // Federation changes invalidate built agents and notify sessions.
        let registry = registry.clone();
        let sessions = mcp_sessions.clone();
        federation.set_on_change(move || {
            registry.invalidate_all();
            sessions.broadcast_list_changed();
        });
    }
    federation.spawn_health_loop(HEALTH_INTERVAL);

    AppState {
        users: Arc::new(RwLock::new(config.users.clone())),
        roles: Arc::new(RwLock::new(RoleFilter::new(&config.roles))),
        config: Arc::new(config),
        config_store: Arc::new(store),
        registry,
        threads,
        static_tools,
        traces,
        turn_locks: Arc::new(TurnLockMap::new()),
        cancel_map: Arc::new(CancelMap::new()),
        federation,
        mcp_sessions,
        api_token_hash: auth::token_hash_from_env().map(Arc::new),
    }
}
