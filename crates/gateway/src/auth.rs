//! Request authentication and identity resolution.
//!
//! The bearer token (env `WICK_API_TOKEN`) is read once at startup and its
//! SHA-256 digest cached; requests compare in constant time. The identity
//! layer resolves `{user, role}`: OIDC/JWT validation happens in front of
//! the gateway, which trusts the forwarded `x-wick-user` / `x-wick-role`
//! headers and falls back to the configured user table.

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::state::AppState;

/// The authenticated caller, inserted into request extensions.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user: String,
    pub role: String,
}

/// Hash the startup token, if configured.
pub fn token_hash_from_env() -> Option<Vec<u8>> {
    match std::env::var("WICK_API_TOKEN") {
        Ok(token) if !token.is_empty() => Some(Sha256::digest(token.as_bytes()).to_vec()),
        _ => {
            tracing::warn!("WICK_API_TOKEN not set; running without API authentication");
            None
        }
    }
}

/// Axum middleware: enforce the bearer token (when configured) and resolve
/// the caller identity.
pub async fn authenticate(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    if let Some(expected) = &state.api_token_hash {
        let provided = req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .unwrap_or("");
        let provided_hash = Sha256::digest(provided.as_bytes());
        if !bool::from(provided_hash.ct_eq(expected.as_slice())) {
            return (
                axum::http::StatusCode::UNAUTHORIZED,
                axum::Json(serde_json::json!({ "error": "invalid or missing API token" })),
            )
                .into_response();
        }
    }

    let identity = resolve_identity(&state, &req);
    req.extensions_mut().insert(identity);
    next.run(req).await
}

fn resolve_identity(state: &AppState, req: &Request<Body>) -> Identity {
    let header = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    let user = header("x-wick-user").unwrap_or_else(|| "anonymous".into());

    let role = header("x-wick-role").unwrap_or_else(|| {
        state
            .users
            .read()
            .iter()
            .find(|u| u.username == user)
            .map(|u| u.role.clone())
            .unwrap_or_else(|| "default".into())
    });

    Identity { user, role }
}
