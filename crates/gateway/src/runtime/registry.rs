//! Agent templates and per-user instances.
//!
//! Templates are immutable after startup registration. An instance is the
//! lazy per-user clone of a template: it owns a deep-copied config, the
//! user's hook overrides, the workspace backend, and the lazily built
//! engine snapshot. Nulling the snapshot forces a rebuild on next use —
//! that is how hook/config/federation changes take effect.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use wick_backend::{build_backend, Backend};
use wick_domain::config::{AgentConfig, BackendKind, HookOverrides};
use wick_domain::{Error, Result};
use wick_engine::{build_hooks, Agent, ToolRegistry, TraceRecorder};
use wick_llm::resolve_model;
use wick_mcp::ToolAggregator;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Instance
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Instance {
    pub agent_id: String,
    pub user: String,
    config: Mutex<AgentConfig>,
    hook_overrides: Mutex<Option<HookOverrides>>,
    /// The built engine snapshot. `None` forces a rebuild next run.
    agent: Mutex<Option<Arc<Agent>>>,
    backend: Mutex<Option<Arc<dyn Backend>>>,
}

impl Instance {
    fn new(agent_id: String, user: String, config: AgentConfig) -> Arc<Self> {
        Arc::new(Self {
            agent_id,
            user,
            config: Mutex::new(config),
            hook_overrides: Mutex::new(None),
            agent: Mutex::new(None),
            backend: Mutex::new(None),
        })
    }

    pub fn config_snapshot(&self) -> AgentConfig {
        self.config.lock().clone()
    }

    pub fn hook_overrides_snapshot(&self) -> Option<HookOverrides> {
        self.hook_overrides.lock().clone()
    }

    /// Null the built engine, forcing a rebuild on next use.
    pub fn invalidate(&self) {
        *self.agent.lock() = None;
    }

    pub fn backend(&self) -> Option<Arc<dyn Backend>> {
        self.backend.lock().clone()
    }

    /// Hook names as they would apply on the next run.
    pub fn effective_hook_names(&self) -> Vec<String> {
        let config = self.config.lock();
        let overrides = self.hook_overrides.lock();
        let mut names = config.default_hook_names();
        if let Some(ov) = overrides.as_ref() {
            names.retain(|n| !ov.remove.contains(n));
            for add in &ov.add {
                if !names.contains(add) {
                    names.push(add.clone());
                }
            }
        }
        names
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AgentInfo (admin listing)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
pub struct AgentInfo {
    pub agent_id: String,
    pub name: String,
    pub model: String,
    pub system_prompt: String,
    pub tools: Vec<String>,
    pub subagents: Vec<String>,
    pub middleware: Vec<String>,
    pub hooks: Vec<String>,
    pub backend_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox_url: Option<String>,
    pub skills: Vec<String>,
    pub memory: Vec<String>,
    pub debug: bool,
    pub container_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_error: Option<String>,
}

const SYSTEM_PROMPT_PREVIEW: usize = 120;

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{cut}…")
    }
}

fn info_from(config: &AgentConfig, hooks: Vec<String>, backend: Option<&Arc<dyn Backend>>) -> AgentInfo {
    let backend_type = config
        .backend
        .as_ref()
        .map(|b| match b.kind {
            BackendKind::State => "state",
            BackendKind::Local => "local",
            BackendKind::Docker => "docker",
        })
        .unwrap_or("state")
        .to_string();

    AgentInfo {
        agent_id: config.name.clone(),
        name: config.name.clone(),
        model: config.model.model_id().to_string(),
        system_prompt: truncate_chars(&config.system_prompt, SYSTEM_PROMPT_PREVIEW),
        tools: config.tools.clone(),
        subagents: config.subagents.iter().map(|s| s.name.clone()).collect(),
        middleware: config.middleware.clone(),
        hooks,
        backend_type,
        sandbox_url: config.backend.as_ref().and_then(|b| b.docker_host.clone()),
        skills: config.skills.as_ref().map(|s| s.paths.clone()).unwrap_or_default(),
        memory: config.memory.as_ref().map(|m| m.paths.clone()).unwrap_or_default(),
        debug: config.debug,
        container_status: backend
            .map(|b| b.container_status().to_string())
            .unwrap_or_else(|| "idle".into()),
        container_error: backend.and_then(|b| b.container_error()),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct AgentRegistry {
    templates: RwLock<HashMap<String, Arc<AgentConfig>>>,
    /// Keyed `"{agent_id}:{user}"`.
    instances: RwLock<HashMap<String, Arc<Instance>>>,
}

fn instance_key(agent_id: &str, user: &str) -> String {
    format!("{agent_id}:{user}")
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_template(&self, config: AgentConfig) {
        let id = config.name.clone();
        if self
            .templates
            .write()
            .insert(id.clone(), Arc::new(config))
            .is_some()
        {
            tracing::warn!(agent = %id, "agent template re-registered");
        }
    }

    pub fn template(&self, agent_id: &str) -> Option<Arc<AgentConfig>> {
        self.templates.read().get(agent_id).cloned()
    }

    /// Registered template ids, sorted.
    pub fn template_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.templates.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Fetch the per-user instance, cloning it from the template on first
    /// use. Idempotent under concurrent access.
    pub fn get_or_clone(&self, agent_id: &str, user: &str) -> Result<Arc<Instance>> {
        let key = instance_key(agent_id, user);

        if let Some(instance) = self.instances.read().get(&key) {
            return Ok(instance.clone());
        }

        let template = self
            .template(agent_id)
            .ok_or_else(|| Error::UnknownAgent(agent_id.to_string()))?;

        let mut instances = self.instances.write();
        // Double-checked: another task may have cloned while we waited.
        if let Some(instance) = instances.get(&key) {
            return Ok(instance.clone());
        }

        tracing::info!(agent = %agent_id, user = %user, "cloning agent instance");
        let instance = Instance::new(
            agent_id.to_string(),
            user.to_string(),
            (*template).clone(),
        );
        instances.insert(key, instance.clone());
        Ok(instance)
    }

    pub fn get_instance(&self, agent_id: &str, user: &str) -> Option<Arc<Instance>> {
        self.instances.read().get(&instance_key(agent_id, user)).cloned()
    }

    /// Build (or fetch) the engine snapshot for an instance.
    pub fn ensure_agent(
        &self,
        instance: &Arc<Instance>,
        static_tools: &ToolRegistry,
        federation: Arc<ToolAggregator>,
        trace: Arc<TraceRecorder>,
    ) -> Result<Arc<Agent>> {
        if let Some(agent) = instance.agent.lock().clone() {
            return Ok(agent);
        }

        // Build outside the lock; double-check before storing.
        let config = instance.config_snapshot();
        let overrides = instance.hook_overrides_snapshot();
        let hooks = build_hooks(&config, overrides.as_ref());
        let llm = resolve_model(&config.model)?;

        let backend = match &config.backend {
            Some(cfg) => {
                let mut slot = instance.backend.lock();
                match slot.as_ref() {
                    Some(existing) => Some(existing.clone()),
                    None => {
                        let backend = build_backend(&instance.agent_id, cfg, &instance.user)?;
                        backend.launch();
                        *slot = Some(backend.clone());
                        Some(backend)
                    }
                }
            }
            None => None,
        };

        let built = Arc::new(Agent::new(
            config,
            llm,
            backend,
            hooks,
            static_tools,
            Some(federation),
            trace,
        ));

        let mut slot = instance.agent.lock();
        match slot.as_ref() {
            Some(existing) => Ok(existing.clone()),
            None => {
                *slot = Some(built.clone());
                Ok(built)
            }
        }
    }

    // ── Mutations ─────────────────────────────────────────────────

    /// Replace the instance's hook overrides and force an engine rebuild.
    pub fn update_hook_overrides(
        &self,
        agent_id: &str,
        user: &str,
        overrides: HookOverrides,
    ) -> Result<Vec<String>> {
        let instance = self.get_or_clone(agent_id, user)?;
        *instance.hook_overrides.lock() = Some(overrides);
        instance.invalidate();
        Ok(instance.effective_hook_names())
    }

    /// Mutate the instance config (backend patches) and force both the
    /// engine and the backend to rebuild.
    pub fn update_instance_config(
        &self,
        agent_id: &str,
        user: &str,
        mutate: impl FnOnce(&mut AgentConfig),
    ) -> Result<Arc<Instance>> {
        let instance = self.get_or_clone(agent_id, user)?;
        mutate(&mut instance.config.lock());
        instance.invalidate();

        // The old backend no longer matches the config: shut it down.
        if let Some(old) = instance.backend.lock().take() {
            tokio::spawn(async move { old.shutdown().await });
        }
        Ok(instance)
    }

    /// Remove the per-user instance. Returns the removed instance so the
    /// caller can shut its backend down.
    pub fn delete_instance(&self, agent_id: &str, user: &str) -> Option<Arc<Instance>> {
        self.instances.write().remove(&instance_key(agent_id, user))
    }

    /// Null every built engine. Used when the MCP federation changes.
    pub fn invalidate_all(&self) {
        for instance in self.instances.read().values() {
            instance.invalidate();
        }
        tracing::debug!("all agent instances invalidated");
    }

    /// Live-instance info for the user plus not-yet-cloned templates.
    pub fn list_agents(&self, user: &str) -> Vec<AgentInfo> {
        let templates = self.templates.read();
        let instances = self.instances.read();

        let mut infos: Vec<AgentInfo> = templates
            .values()
            .map(|template| {
                match instances.get(&instance_key(&template.name, user)) {
                    Some(instance) => {
                        let config = instance.config_snapshot();
                        let backend = instance.backend();
                        info_from(&config, instance.effective_hook_names(), backend.as_ref())
                    }
                    None => info_from(template, template.default_hook_names(), None),
                }
            })
            .collect();
        infos.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        infos
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
