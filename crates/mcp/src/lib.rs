//! MCP federation: a JSON-RPC 2.0 hub that aggregates tools from multiple
//! downstream MCP servers, routes tool calls to the owning server, and
//! filters what each role may see.

pub mod aggregator;
pub mod client;
pub mod protocol;
pub mod roles;

pub use aggregator::{FederatedTool, ToolAggregator};
pub use client::{DownstreamClient, Health};
pub use protocol::{
    JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, McpToolDef,
    ToolCallContent, ToolCallResult, ToolsListResult, INTERNAL_ERROR, INVALID_PARAMS,
    METHOD_NOT_FOUND, PARSE_ERROR, PROTOCOL_VERSION,
};
pub use roles::{pattern_matches, RoleFilter};
