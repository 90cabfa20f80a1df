//! Remote filesystem — serializes each call to the in-container `wickfs`
//! helper.
//!
//! Requests ride on stdin as one JSON document (`wickfs <op>` reads it and
//! answers with an `{ok, data, error}` envelope on stdout), so arbitrarily
//! large file contents never touch the shell command line.

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use wick_domain::{Error, Result};

use crate::backend::ExecResult;

use super::{EditOutcome, FileSystem, FsEntry, GrepMatch};

/// Transport the remote filesystem rides on. Implemented by the docker
/// backend's internals; stubbed in tests.
#[async_trait::async_trait]
pub trait RemoteExec: Send + Sync {
    fn workdir(&self) -> &Path;

    async fn run(&self, command: &str, stdin: Option<&str>) -> ExecResult;
}

#[derive(Debug, Deserialize)]
struct WickfsEnvelope {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    error: Option<String>,
}

pub struct RemoteFs {
    transport: Arc<dyn RemoteExec>,
}

impl RemoteFs {
    pub fn new(transport: Arc<dyn RemoteExec>) -> Self {
        Self { transport }
    }

    async fn call(&self, op: &str, request: Value) -> Result<Value> {
        let stdin = serde_json::to_string(&request)?;
        let result = self.transport.run(&format!("wickfs {op}"), Some(&stdin)).await;

        if result.exit_code != 0 {
            return Err(Error::Backend(format!(
                "wickfs {op} failed (exit {}): {}",
                result.exit_code, result.output
            )));
        }

        let envelope: WickfsEnvelope = serde_json::from_str(result.output.trim())
            .map_err(|e| Error::Backend(format!("wickfs {op}: bad response: {e}")))?;

        if !envelope.ok {
            return Err(Error::Backend(
                envelope.error.unwrap_or_else(|| format!("wickfs {op} failed")),
            ));
        }
        Ok(envelope.data)
    }
}

#[async_trait::async_trait]
impl FileSystem for RemoteFs {
    async fn ls(&self, path: &str) -> Result<Vec<FsEntry>> {
        let data = self.call("ls", serde_json::json!({ "path": path })).await?;
        Ok(serde_json::from_value(data)?)
    }

    async fn read_file(
        &self,
        path: &str,
        offset: Option<usize>,
        limit: Option<usize>,
    ) -> Result<String> {
        let data = self
            .call(
                "read",
                serde_json::json!({ "path": path, "offset": offset, "limit": limit }),
            )
            .await?;
        Ok(data.as_str().unwrap_or_default().to_string())
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        self.call(
            "write",
            serde_json::json!({ "path": path, "content": content }),
        )
        .await?;
        Ok(())
    }

    async fn edit_file(&self, path: &str, old: &str, new: &str) -> Result<EditOutcome> {
        let data = self
            .call(
                "edit",
                serde_json::json!({ "path": path, "old": old, "new": new }),
            )
            .await?;
        Ok(serde_json::from_value(data)?)
    }

    async fn grep(&self, pattern: &str, path: &str) -> Result<Vec<GrepMatch>> {
        let data = self
            .call("grep", serde_json::json!({ "pattern": pattern, "path": path }))
            .await?;
        Ok(serde_json::from_value(data)?)
    }

    async fn glob(&self, pattern: &str, path: &str) -> Result<Vec<String>> {
        let data = self
            .call("glob", serde_json::json!({ "pattern": pattern, "path": path }))
            .await?;
        Ok(serde_json::from_value(data)?)
    }

    async fn exec(&self, command: &str) -> Result<ExecResult> {
        Ok(self.transport.run(command, None).await)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
