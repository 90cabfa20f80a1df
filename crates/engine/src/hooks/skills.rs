//! Loads skill catalogs from the workspace and injects them into the
//! system message.
//!
//! A skill is a `SKILL.md` file with YAML-ish frontmatter carrying `name:`
//! and `description:` lines. `before_agent` scans the configured paths via
//! the backend filesystem; `modify_request` appends the catalog to the
//! system message (or prepends one when the conversation has none).

use parking_lot::Mutex;

use wick_backend::{Backend, FileSystem};
use wick_domain::message::Message;
use wick_domain::Result;

use super::{Hook, HookContext, HookPhase};

pub struct SkillsHook {
    paths: Vec<String>,
    catalog: Mutex<Option<String>>,
}

impl SkillsHook {
    pub fn new(paths: Vec<String>) -> Self {
        Self {
            paths,
            catalog: Mutex::new(None),
        }
    }
}

/// Pull `name:` / `description:` out of a `---`-fenced frontmatter block.
pub(crate) fn parse_frontmatter(content: &str) -> Option<(String, String)> {
    let rest = content.strip_prefix("---")?;
    let end = rest.find("\n---")?;
    let block = &rest[..end];

    let mut name = None;
    let mut description = None;
    for line in block.lines() {
        if let Some(v) = line.strip_prefix("name:") {
            name = Some(v.trim().to_string());
        } else if let Some(v) = line.strip_prefix("description:") {
            description = Some(v.trim().to_string());
        }
    }
    Some((name?, description.unwrap_or_default()))
}

/// Append the catalog block to the first system message, or prepend a new
/// system message when the conversation has none.
pub(crate) fn inject_into_system(mut msgs: Vec<Message>, block: &str) -> Vec<Message> {
    match msgs
        .iter_mut()
        .find(|m| m.role == wick_domain::message::Role::System)
    {
        Some(system) => {
            system.content.push_str("\n\n");
            system.content.push_str(block);
        }
        None => {
            msgs.insert(0, Message::system(block));
        }
    }
    msgs
}

#[async_trait::async_trait]
impl Hook for SkillsHook {
    fn name(&self) -> &'static str {
        "skills"
    }

    fn phases(&self) -> &'static [HookPhase] {
        &[HookPhase::BeforeAgent, HookPhase::ModifyRequest]
    }

    async fn before_agent(&self, ctx: &HookContext) -> Result<()> {
        let Some(fs) = ctx.backend.as_ref().and_then(|b| b.fs()) else {
            return Ok(());
        };

        let mut skills: Vec<(String, String)> = Vec::new();
        for path in &self.paths {
            // A missing skills directory is not fatal: the agent simply has
            // no catalog from that path.
            let hits = match fs.glob("**/SKILL.md", path).await {
                Ok(hits) => hits,
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "skills path not readable");
                    continue;
                }
            };
            for hit in hits {
                match fs.read_file(&hit, None, None).await {
                    Ok(content) => {
                        if let Some(skill) = parse_frontmatter(&content) {
                            skills.push(skill);
                        } else {
                            tracing::debug!(file = %hit, "SKILL.md without frontmatter, skipped");
                        }
                    }
                    Err(e) => {
                        tracing::warn!(file = %hit, error = %e, "cannot read skill file");
                    }
                }
            }
        }

        if skills.is_empty() {
            *self.catalog.lock() = None;
            return Ok(());
        }

        skills.sort_by(|a, b| a.0.cmp(&b.0));
        let lines: Vec<String> = skills
            .iter()
            .map(|(name, description)| format!("- {name}: {description}"))
            .collect();
        *self.catalog.lock() = Some(format!("## Available skills\n{}", lines.join("\n")));
        tracing::debug!(count = skills.len(), "skills catalog loaded");
        Ok(())
    }

    async fn modify_request(&self, _ctx: &HookContext, msgs: Vec<Message>) -> Result<Vec<Message>> {
        let catalog = self.catalog.lock().clone();
        match catalog {
            Some(block) => Ok(inject_into_system(msgs, &block)),
            None => Ok(msgs),
        }
    }
}
