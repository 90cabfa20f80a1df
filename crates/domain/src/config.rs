//! Gateway and agent configuration.
//!
//! The gateway reads one YAML document at startup. Agent templates are
//! immutable once registered; per-user instances carry deep copies that
//! admin endpoints may patch.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Model reference
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The `model` field accepts either a string shortcut (`"gpt-4o"`) or a
/// full provider block. Resolved once at instance construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModelRef {
    Shortcut(String),
    Explicit {
        provider: String,
        model: String,
        #[serde(default)]
        api_key: Option<String>,
        #[serde(default)]
        base_url: Option<String>,
    },
}

impl ModelRef {
    /// The bare model identifier, for display and event names.
    pub fn model_id(&self) -> &str {
        match self {
            ModelRef::Shortcut(s) => s,
            ModelRef::Explicit { model, .. } => model,
        }
    }
}

impl Default for ModelRef {
    fn default() -> Self {
        ModelRef::Shortcut("gpt-4o-mini".into())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Backend configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Chat-only agent: no workspace, every backend op errors.
    #[default]
    State,
    Local,
    Docker,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendCfg {
    #[serde(rename = "type", default)]
    pub kind: BackendKind,
    #[serde(default = "d_workdir")]
    pub workdir: PathBuf,
    #[serde(default = "d_timeout_s")]
    pub timeout_s: u64,
    #[serde(default = "d_max_output")]
    pub max_output_bytes: usize,
    /// Docker image to launch when the container is missing.
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub container_name: Option<String>,
    #[serde(default)]
    pub docker_host: Option<String>,
}

impl Default for BackendCfg {
    fn default() -> Self {
        Self {
            kind: BackendKind::State,
            workdir: d_workdir(),
            timeout_s: d_timeout_s(),
            max_output_bytes: d_max_output(),
            image: None,
            container_name: None,
            docker_host: None,
        }
    }
}

fn d_workdir() -> PathBuf {
    PathBuf::from("./workspace")
}
fn d_timeout_s() -> u64 {
    120
}
fn d_max_output() -> usize {
    100_000
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent template
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SubagentCfg {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub tools: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SkillsCfg {
    /// Directories scanned for `SKILL.md` catalogs (backend-relative).
    #[serde(default)]
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MemoryCfg {
    /// Memory files injected as `<agent_memory>` (backend-relative).
    #[serde(default)]
    pub paths: Vec<String>,
}

/// Immutable agent template registered at server startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub name: String,
    #[serde(default)]
    pub model: ModelRef,
    #[serde(default)]
    pub system_prompt: String,
    /// Static-registry tool names granted to this agent.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Extra hook names appended after the default set.
    #[serde(default)]
    pub middleware: Vec<String>,
    #[serde(default)]
    pub subagents: Vec<SubagentCfg>,
    #[serde(default)]
    pub backend: Option<BackendCfg>,
    #[serde(default)]
    pub skills: Option<SkillsCfg>,
    #[serde(default)]
    pub memory: Option<MemoryCfg>,
    #[serde(default = "d_context_window")]
    pub context_window: usize,
    #[serde(default = "d_max_iterations")]
    pub max_iterations: usize,
    /// Opaque settings passed through to builtin hooks.
    #[serde(default)]
    pub builtin_config: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub debug: bool,
}

fn d_context_window() -> usize {
    128_000
}
fn d_max_iterations() -> usize {
    25
}

impl AgentConfig {
    /// Hook names the engine installs for this config, in order.
    /// `filesystem` requires a real backend; `skills`/`memory` additionally
    /// require configured paths.
    pub fn default_hook_names(&self) -> Vec<String> {
        let has_backend = self
            .backend
            .as_ref()
            .is_some_and(|b| b.kind != BackendKind::State);

        let mut names = vec!["tracing".to_string(), "todolist".to_string()];
        if has_backend {
            names.push("filesystem".into());
            if self.skills.as_ref().is_some_and(|s| !s.paths.is_empty()) {
                names.push("skills".into());
            }
            if self.memory.as_ref().is_some_and(|m| !m.paths.is_empty()) {
                names.push("memory".into());
            }
        }
        names.push("summarization".into());
        names.extend(self.middleware.iter().cloned());
        names
    }
}

/// A per-user hook override applied on top of the default list:
/// remove named hooks, append new ones, and pass per-hook settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HookOverrides {
    #[serde(default)]
    pub remove: Vec<String>,
    #[serde(default)]
    pub add: Vec<String>,
    #[serde(default)]
    pub config: HashMap<String, serde_json::Value>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Gateway configuration (YAML document)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GatewayConfig {
    #[serde(default = "d_listen")]
    pub listen: String,
    #[serde(default)]
    pub auth: AuthConfig,
    /// Role name → allowed tool patterns (`*` | `prefix*` | exact).
    #[serde(default)]
    pub roles: HashMap<String, RoleConfig>,
    #[serde(default)]
    pub users: Vec<UserConfig>,
    #[serde(default)]
    pub oauth_clients: Vec<OauthClientConfig>,
    /// Downstream MCP servers federated behind `/mcp`.
    #[serde(default)]
    pub downstream: Vec<DownstreamConfig>,
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
    /// Thread TTL in seconds (default 1 hour).
    #[serde(default = "d_thread_ttl")]
    pub thread_ttl_s: u64,
}

fn d_listen() -> String {
    "127.0.0.1:8080".into()
}
fn d_thread_ttl() -> u64 {
    3600
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub jwt_secret: Option<String>,
    /// Token lifetime in seconds.
    #[serde(default = "d_token_expiry")]
    pub token_expiry: u64,
    #[serde(default)]
    pub oidc: Option<OidcConfig>,
    /// Advertised resource URL, overridable via `WICK_AUTH_RESOURCE_URL`.
    #[serde(default)]
    pub resource_url: Option<String>,
}

fn d_token_expiry() -> u64 {
    86_400
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OidcConfig {
    pub issuer: String,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RoleConfig {
    #[serde(default)]
    pub tools: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    pub username: String,
    /// bcrypt digest; verification is delegated to the auth front-end.
    pub password_hash: String,
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OauthClientConfig {
    pub client_id: String,
    pub client_secret: String,
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownstreamConfig {
    pub name: String,
    pub url: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Environment overrides + validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl GatewayConfig {
    /// Apply `WICK_*` environment overrides:
    /// `WICK_DOWNSTREAM_<NAME>_URL` and `WICK_AUTH_RESOURCE_URL`.
    pub fn apply_env_overrides(&mut self) {
        for ds in &mut self.downstream {
            let var = format!("WICK_DOWNSTREAM_{}_URL", ds.name.to_uppercase().replace('-', "_"));
            if let Ok(url) = std::env::var(&var) {
                if !url.is_empty() {
                    tracing::info!(downstream = %ds.name, %url, "downstream URL overridden from environment");
                    ds.url = url;
                }
            }
        }
        if let Ok(url) = std::env::var("WICK_AUTH_RESOURCE_URL") {
            if !url.is_empty() {
                self.auth.resource_url = Some(url);
            }
        }
    }

    /// Validate the config, returning severity-tagged issues.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.agents.is_empty() {
            issues.push(ConfigIssue::warning("no agents configured"));
        }

        let mut seen = std::collections::HashSet::new();
        for agent in &self.agents {
            if agent.name.is_empty() {
                issues.push(ConfigIssue::error("agent with empty name"));
            }
            if !seen.insert(agent.name.as_str()) {
                issues.push(ConfigIssue::error(format!("duplicate agent name '{}'", agent.name)));
            }
            if let Some(backend) = &agent.backend {
                if backend.kind == BackendKind::Docker && backend.image.is_none() {
                    issues.push(ConfigIssue::error(format!(
                        "agent '{}': docker backend without an image",
                        agent.name
                    )));
                }
            }
            if agent.max_iterations == 0 {
                issues.push(ConfigIssue::error(format!(
                    "agent '{}': max_iterations must be at least 1",
                    agent.name
                )));
            }
        }

        for user in &self.users {
            if !self.roles.contains_key(&user.role) {
                issues.push(ConfigIssue::warning(format!(
                    "user '{}' references unknown role '{}'",
                    user.username, user.role
                )));
            }
        }
        for client in &self.oauth_clients {
            if !self.roles.contains_key(&client.role) {
                issues.push(ConfigIssue::warning(format!(
                    "oauth client '{}' references unknown role '{}'",
                    client.client_id, client.role
                )));
            }
        }

        if self.auth.enabled && self.auth.jwt_secret.is_none() && self.auth.oidc.is_none() {
            issues.push(ConfigIssue::error("auth enabled but neither jwt_secret nor oidc configured"));
        }

        issues
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl ConfigIssue {
    fn warning(msg: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            message: msg.into(),
        }
    }
    fn error(msg: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            message: msg.into(),
        }
    }
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
