//! Tool admin: the role-filtered listing of everything callable — builtin
//! static tools plus the MCP federation.

use axum::extract::{Extension, State};
use axum::response::IntoResponse;
use axum::Json;

use wick_engine::tool::definition_of;
use wick_mcp::FederatedTool;

use crate::auth::Identity;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /tools/
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> impl IntoResponse {
    let mut all: Vec<FederatedTool> = state
        .static_tools
        .list()
        .iter()
        .map(|tool| {
            let def = definition_of(tool.as_ref());
            FederatedTool {
                name: def.name,
                description: def.description,
                input_schema: def.parameters,
                source: "builtin".into(),
            }
        })
        .collect();
    all.extend(state.federation.tools());

    let filtered = state.roles.read().filter(&identity.role, all);
    Json(filtered)
}
