//! YAML config loading and the preserving rewrite used by role/user CRUD.
//!
//! The store keeps the raw document alongside the typed config: managed
//! sections (`roles`, `users`, `oauth_clients`) are replaced on save while
//! every unmanaged field survives byte-for-byte semantically.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde_yaml::Value;

use wick_domain::config::{GatewayConfig, OauthClientConfig, RoleConfig, UserConfig};
use wick_domain::{Error, Result};

pub struct ConfigStore {
    path: PathBuf,
    raw: Mutex<Value>,
}

impl ConfigStore {
    /// Load the YAML document, apply environment overrides, and return the
    /// typed config plus the store handle for later rewrites.
    pub fn load(path: &Path) -> Result<(GatewayConfig, Self)> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read '{}': {e}", path.display())))?;
        let raw: Value = serde_yaml::from_str(&text)
            .map_err(|e| Error::Config(format!("bad YAML in '{}': {e}", path.display())))?;
        let mut config: GatewayConfig = serde_yaml::from_value(raw.clone())
            .map_err(|e| Error::Config(format!("bad config in '{}': {e}", path.display())))?;
        config.apply_env_overrides();

        Ok((
            config,
            Self {
                path: path.to_path_buf(),
                raw: Mutex::new(raw),
            },
        ))
    }

    fn set_section(&self, key: &str, value: Value) -> Result<()> {
        let mut raw = self.raw.lock();
        if !raw.is_mapping() {
            *raw = Value::Mapping(Default::default());
        }
        raw.as_mapping_mut()
            .expect("just ensured mapping")
            .insert(Value::String(key.to_string()), value);

        let text = serde_yaml::to_string(&*raw)
            .map_err(|e| Error::Config(format!("cannot serialize config: {e}")))?;
        std::fs::write(&self.path, text)
            .map_err(|e| Error::Config(format!("cannot write '{}': {e}", self.path.display())))?;
        Ok(())
    }

    pub fn save_roles(&self, roles: &HashMap<String, RoleConfig>) -> Result<()> {
        self.set_section(
            "roles",
            serde_yaml::to_value(roles).map_err(|e| Error::Config(e.to_string()))?,
        )
    }

    pub fn save_users(&self, users: &[UserConfig]) -> Result<()> {
        self.set_section(
            "users",
            serde_yaml::to_value(users).map_err(|e| Error::Config(e.to_string()))?,
        )
    }

    pub fn save_oauth_clients(&self, clients: &[OauthClientConfig]) -> Result<()> {
        self.set_section(
            "oauth_clients",
            serde_yaml::to_value(clients).map_err(|e| Error::Config(e.to_string()))?,
        )
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DOC: &str = r#"
listen: 0.0.0.0:9900
custom_note: operators write things here
roles:
  admin:
    tools: ["*"]
agents:
  - name: coder
    model: gpt-4o
"#;

    #[test]
    fn load_parses_typed_config() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("wick.yaml");
        std::fs::write(&path, DOC).unwrap();

        let (config, _store) = ConfigStore::load(&path).unwrap();
        assert_eq!(config.listen, "0.0.0.0:9900");
        assert_eq!(config.agents[0].name, "coder");
        assert!(config.roles.contains_key("admin"));
    }

    #[test]
    fn save_roles_preserves_unmanaged_fields() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("wick.yaml");
        std::fs::write(&path, DOC).unwrap();

        let (_config, store) = ConfigStore::load(&path).unwrap();
        let mut roles = HashMap::new();
        roles.insert(
            "analyst".to_string(),
            RoleConfig {
                tools: vec!["search*".into()],
            },
        );
        store.save_roles(&roles).unwrap();

        let rewritten = std::fs::read_to_string(&path).unwrap();
        // The unmanaged scalar survives the rewrite.
        assert!(rewritten.contains("custom_note: operators write things here"));
        assert!(rewritten.contains("analyst"));
        assert!(!rewritten.contains("admin"));

        // And the rewritten document still parses.
        let (config, _) = ConfigStore::load(&path).unwrap();
        assert_eq!(config.roles["analyst"].tools, vec!["search*"]);
        assert_eq!(config.listen, "0.0.0.0:9900");
    }

    #[test]
    fn save_users_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("wick.yaml");
        std::fs::write(&path, DOC).unwrap();

        let (_config, store) = ConfigStore::load(&path).unwrap();
        store
            .save_users(&[UserConfig {
                username: "alice".into(),
                password_hash: "$2b$12$abc".into(),
                role: "admin".into(),
            }])
            .unwrap();

        let (config, _) = ConfigStore::load(&path).unwrap();
        assert_eq!(config.users.len(), 1);
        assert_eq!(config.users[0].username, "alice");
    }

    #[test]
    fn missing_file_errors() {
        assert!(ConfigStore::load(Path::new("/nonexistent/wick.yaml")).is_err());
    }
}
