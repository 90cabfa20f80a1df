//! Tool aggregation across downstream MCP servers.
//!
//! Maintains the federated tool set (`tool name → owning client`), handles
//! shadowing (later registration wins, with a warning), and runs the
//! background health loop that reconnects dead downstreams and pings live
//! ones.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;

use wick_domain::{Error, Result};

use crate::client::{DownstreamClient, Health};
use crate::protocol::ToolCallResult;

/// Health loop interval.
pub const HEALTH_INTERVAL: Duration = Duration::from_secs(30);

/// One entry of the federated tool set.
#[derive(Debug, Clone, Serialize)]
pub struct FederatedTool {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
    /// Name of the downstream server that owns this tool.
    pub source: String,
}

#[derive(Default)]
struct Aggregate {
    /// tool name → downstream name. Later registrations shadow earlier ones.
    tool_map: HashMap<String, String>,
    all_tools: Vec<FederatedTool>,
}

type ChangeCallback = Box<dyn Fn() + Send + Sync>;

pub struct ToolAggregator {
    /// Registration order matters: it decides shadowing.
    clients: RwLock<Vec<Arc<DownstreamClient>>>,
    aggregate: RwLock<Aggregate>,
    on_change: RwLock<Option<ChangeCallback>>,
}

impl Default for ToolAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolAggregator {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(Vec::new()),
            aggregate: RwLock::new(Aggregate::default()),
            on_change: RwLock::new(None),
        }
    }

    /// Install the callback fired whenever the federated tool set changes
    /// (used to push `notifications/tools/list_changed` and to invalidate
    /// built agents).
    pub fn set_on_change(&self, callback: impl Fn() + Send + Sync + 'static) {
        *self.on_change.write() = Some(Box::new(callback));
    }

    fn fire_on_change(&self) {
        if let Some(callback) = self.on_change.read().as_ref() {
            callback();
        }
    }

    // ── Discovery ─────────────────────────────────────────────────

    /// Connect and discover every configured client. Per-client failure is
    /// logged and skipped — a dead downstream must not block startup.
    pub async fn discover_all(&self) {
        let clients: Vec<_> = self.clients.read().clone();
        for client in &clients {
            if let Err(e) = Self::connect_and_list(client).await {
                tracing::warn!(
                    downstream = %client.name(),
                    error = %e,
                    "MCP downstream discovery failed, continuing"
                );
                client.mark_disconnected();
            }
        }
        self.rebuild();
    }

    async fn connect_and_list(client: &DownstreamClient) -> Result<()> {
        client.connect().await?;
        let tools = client.list_tools().await?;
        tracing::info!(
            downstream = %client.name(),
            tool_count = tools.len(),
            "MCP downstream ready"
        );
        Ok(())
    }

    /// Recompute the federated set from every connected client's tool list.
    fn rebuild(&self) {
        let clients = self.clients.read();
        let mut aggregate = Aggregate::default();

        for client in clients.iter() {
            if !client.is_connected() {
                continue;
            }
            for tool in client.tools() {
                if let Some(previous) = aggregate.tool_map.get(&tool.name) {
                    tracing::warn!(
                        tool = %tool.name,
                        shadowed = %previous,
                        winner = %client.name(),
                        "tool name shadowed by later downstream"
                    );
                    aggregate.all_tools.retain(|t| t.name != tool.name);
                }
                aggregate.tool_map.insert(tool.name.clone(), client.name().to_string());
                aggregate.all_tools.push(FederatedTool {
                    name: tool.name,
                    description: tool.description,
                    input_schema: tool.input_schema,
                    source: client.name().to_string(),
                });
            }
        }

        *self.aggregate.write() = aggregate;
    }

    // ── Downstream management ─────────────────────────────────────

    pub async fn add_downstream(&self, client: Arc<DownstreamClient>) {
        if let Err(e) = Self::connect_and_list(&client).await {
            tracing::warn!(downstream = %client.name(), error = %e, "new downstream failed discovery");
            client.mark_disconnected();
        }
        self.clients.write().push(client);
        self.rebuild();
        self.fire_on_change();
    }

    pub async fn remove_downstream(&self, name: &str) -> bool {
        let removed = {
            let mut clients = self.clients.write();
            clients
                .iter()
                .position(|c| c.name() == name)
                .map(|i| clients.remove(i))
        };
        match removed {
            Some(client) => {
                client.close().await;
                self.rebuild();
                self.fire_on_change();
                true
            }
            None => false,
        }
    }

    // ── Queries ───────────────────────────────────────────────────

    pub fn tools(&self) -> Vec<FederatedTool> {
        self.aggregate.read().all_tools.clone()
    }

    pub fn owner_of(&self, tool_name: &str) -> Option<String> {
        self.aggregate.read().tool_map.get(tool_name).cloned()
    }

    pub fn health(&self) -> Vec<(String, Health)> {
        self.clients
            .read()
            .iter()
            .map(|c| (c.name().to_string(), c.health()))
            .collect()
    }

    /// Route a tool call to its owning downstream.
    pub async fn call_tool(&self, tool_name: &str, arguments: Value) -> Result<ToolCallResult> {
        let owner = self
            .owner_of(tool_name)
            .ok_or_else(|| Error::UnknownTool(tool_name.to_string()))?;
        let client = self
            .clients
            .read()
            .iter()
            .find(|c| c.name() == owner)
            .cloned()
            .ok_or_else(|| Error::UnknownTool(tool_name.to_string()))?;
        client.call_tool(tool_name, arguments).await
    }

    // ── Health loop ───────────────────────────────────────────────

    /// One pass of the health loop: reconnect disconnected clients, ping
    /// connected ones, demote on failure. Returns true when the federated
    /// set changed.
    pub async fn health_pass(&self) -> bool {
        let clients: Vec<_> = self.clients.read().clone();
        let mut changed = false;

        for client in &clients {
            if client.is_connected() {
                if let Err(e) = client.ping().await {
                    tracing::warn!(downstream = %client.name(), error = %e, "ping failed, marking disconnected");
                    client.mark_disconnected();
                    changed = true;
                }
            } else if Self::connect_and_list(client).await.is_ok() {
                tracing::info!(downstream = %client.name(), "downstream reconnected");
                changed = true;
            }
        }

        if changed {
            self.rebuild();
            self.fire_on_change();
        }
        changed
    }

    /// Spawn the background health loop.
    pub fn spawn_health_loop(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let aggregator = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                aggregator.health_pass().await;
            }
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
