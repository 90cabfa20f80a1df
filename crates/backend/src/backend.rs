//! The backend capability surface and the helpers shared by all variants.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use wick_domain::cancel::CancelToken;
use wick_domain::{Error, Result};

use crate::fs::FileSystem;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Results
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Outcome of one command execution. Failures are carried in-band: a
/// backend that cannot run the command returns a synthetic output line
/// and a non-zero exit code, so the model sees the error and may retry.
#[derive(Debug, Clone, Serialize)]
pub struct ExecResult {
    pub output: String,
    pub exit_code: i32,
    pub truncated: bool,
}

impl ExecResult {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            output: message.into(),
            exit_code: 1,
            truncated: false,
        }
    }

    pub fn timeout(timeout_s: u64) -> Self {
        Self {
            output: format!("Error: Command timed out after {timeout_s}s."),
            exit_code: 124,
            truncated: false,
        }
    }
}

/// Per-file outcome of an upload batch.
#[derive(Debug, Clone, Serialize)]
pub struct TransferResult {
    pub path: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-file outcome of a download batch.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadResult {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Container lifecycle status. Non-docker backends report `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Idle,
    Launching,
    Launched,
    Error,
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerStatus::Idle => write!(f, "idle"),
            ContainerStatus::Launching => write!(f, "launching"),
            ContainerStatus::Launched => write!(f, "launched"),
            ContainerStatus::Error => write!(f, "error"),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Backend trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
pub trait Backend: Send + Sync {
    fn id(&self) -> &str;

    fn workdir(&self) -> &Path;

    /// Resolve an agent-supplied path inside the workdir. See [`resolve_path`].
    fn resolve_path(&self, path: &str) -> Result<PathBuf> {
        resolve_path(self.workdir(), path)
    }

    async fn execute(&self, cancel: &CancelToken, command: &str) -> ExecResult;

    async fn execute_with_stdin(
        &self,
        cancel: &CancelToken,
        command: &str,
        stdin: &str,
    ) -> ExecResult;

    async fn upload_files(&self, files: &[(String, Vec<u8>)]) -> Vec<TransferResult>;

    async fn download_files(&self, paths: &[String]) -> Vec<DownloadResult>;

    fn container_status(&self) -> ContainerStatus {
        ContainerStatus::Idle
    }

    fn container_error(&self) -> Option<String> {
        None
    }

    /// Command line for an interactive terminal into the workspace, when
    /// the variant supports one.
    fn terminal_cmd(&self) -> Option<Vec<String>> {
        None
    }

    fn fs(&self) -> Option<Arc<dyn FileSystem>>;

    /// Begin any asynchronous startup work (container launch). No-op for
    /// variants that are ready immediately.
    fn launch(&self) {}

    /// Stop an in-flight launch. No-op outside the docker variant.
    fn cancel_launch(&self) {}

    /// Stop any container owned by this backend. No-op for other variants.
    async fn shutdown(&self) {}
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Path resolution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Resolve a path against a workdir with a traversal guard.
///
/// - empty path → the workdir itself;
/// - relative path → joined onto the workdir, `..` components rejected;
/// - absolute path → must equal the workdir or sit under `workdir + "/"`.
pub fn resolve_path(workdir: &Path, path: &str) -> Result<PathBuf> {
    if path.is_empty() {
        return Ok(workdir.to_path_buf());
    }

    let requested = Path::new(path);

    if requested.is_absolute() {
        if requested == workdir || requested.starts_with(workdir) {
            return Ok(requested.to_path_buf());
        }
        return Err(Error::Backend(format!(
            "path '{}' is outside the workspace '{}'",
            path,
            workdir.display()
        )));
    }

    for component in requested.components() {
        if matches!(component, Component::ParentDir) {
            return Err(Error::Backend(format!(
                "path '{path}' must not contain '..' components"
            )));
        }
    }

    Ok(workdir.join(requested))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Output assembly
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Combine stdout/stderr into the single output string the model sees:
/// stdout preferred, stderr as fallback, stderr appended on failure,
/// `<no output>` when both are empty.
pub fn assemble_output(stdout: &str, stderr: &str, exit_code: i32) -> String {
    let stdout = stdout.trim_end_matches('\n');
    let stderr = stderr.trim_end_matches('\n');

    let mut output = if !stdout.is_empty() {
        stdout.to_string()
    } else {
        stderr.to_string()
    };

    if exit_code != 0 && !stderr.is_empty() && !stdout.is_empty() {
        output.push('\n');
        output.push_str(stderr);
    }

    if output.is_empty() {
        output = "<no output>".into();
    }

    output
}

/// Enforce the configured output cap, appending a truncation marker.
pub fn truncate_output(output: String, max_bytes: usize) -> (String, bool) {
    if output.len() <= max_bytes {
        return (output, false);
    }

    // Cut on a char boundary at or below the cap.
    let mut cut = max_bytes;
    while cut > 0 && !output.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut truncated = output[..cut].to_string();
    truncated.push_str(&format!("\n… Output truncated at {max_bytes} bytes."));
    (truncated, true)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
