//! Role-based tool filtering.
//!
//! A role maps to a list of glob patterns. A tool is allowed iff any
//! pattern is `*`, equals the tool name, or is a `prefix*` whose prefix
//! the tool name starts with.

use std::collections::HashMap;

use wick_domain::config::RoleConfig;

use crate::aggregator::FederatedTool;

/// Does `name` match one pattern of the grammar `*` | `prefix*` | `exact`?
pub fn pattern_matches(name: &str, pattern: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return name.starts_with(prefix);
    }
    name == pattern
}

pub struct RoleFilter {
    roles: HashMap<String, Vec<String>>,
}

impl RoleFilter {
    pub fn new(roles: &HashMap<String, RoleConfig>) -> Self {
        Self {
            roles: roles
                .iter()
                .map(|(name, cfg)| (name.clone(), cfg.tools.clone()))
                .collect(),
        }
    }

    /// Is the tool visible to this role? Unknown roles see nothing.
    pub fn allowed(&self, role: &str, tool_name: &str) -> bool {
        self.roles
            .get(role)
            .is_some_and(|patterns| patterns.iter().any(|p| pattern_matches(tool_name, p)))
    }

    /// Filter a federated tool list down to what the role may see.
    pub fn filter(&self, role: &str, tools: Vec<FederatedTool>) -> Vec<FederatedTool> {
        tools
            .into_iter()
            .filter(|t| self.allowed(role, &t.name))
            .collect()
    }

    // ── Role CRUD (backing the admin surface) ─────────────────────

    pub fn set_role(&mut self, name: impl Into<String>, patterns: Vec<String>) {
        self.roles.insert(name.into(), patterns);
    }

    pub fn remove_role(&mut self, name: &str) -> bool {
        self.roles.remove(name).is_some()
    }

    /// The current role table in config form, for persisting.
    pub fn to_config(&self) -> HashMap<String, RoleConfig> {
        self.roles
            .iter()
            .map(|(name, tools)| {
                (
                    name.clone(),
                    RoleConfig {
                        tools: tools.clone(),
                    },
                )
            })
            .collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
