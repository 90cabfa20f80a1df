//! Docker backend — commands run inside a named container.
//!
//! The container progresses `idle → launching → launched | error`. Launch
//! happens asynchronously: the launch task inspects the container, starts it
//! from the configured image when missing, injects the `wickfs` helper
//! binary when the image lacks it, and finally tries to dial the in-container
//! `wick-daemon`. Execution prefers the daemon transport and falls back to
//! `docker exec`.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use wick_domain::cancel::CancelToken;
use wick_domain::config::BackendCfg;
use wick_domain::{Error, Result};

use crate::backend::{
    assemble_output, truncate_output, Backend, ContainerStatus, DownloadResult, ExecResult,
    TransferResult,
};
use crate::daemon::{DaemonClient, DaemonRequest, DAEMON_PORT};
use crate::fs::{FileSystem, RemoteExec, RemoteFs};

/// How often the execute pipeline polls a launching container.
const LAUNCH_POLL: Duration = Duration::from_millis(500);
/// How long execute waits for a launch before giving up.
const LAUNCH_WAIT_MAX: Duration = Duration::from_secs(60);
/// Where the helper binary lives inside the container.
const WICKFS_PATH: &str = "/usr/local/bin/wickfs";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inner state (shared with RemoteFs)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct LaunchState {
    status: ContainerStatus,
    error: Option<String>,
}

pub(crate) struct DockerInner {
    id: String,
    workdir: PathBuf,
    container: String,
    image: Option<String>,
    docker_host: Option<String>,
    timeout: Duration,
    max_output_bytes: usize,
    state: Mutex<LaunchState>,
    daemon: tokio::sync::Mutex<Option<DaemonClient>>,
    launch_cancel: Mutex<Option<CancelToken>>,
}

impl DockerInner {
    fn status(&self) -> ContainerStatus {
        self.state.lock().status
    }

    fn error(&self) -> Option<String> {
        self.state.lock().error.clone()
    }

    fn set_status(&self, status: ContainerStatus, error: Option<String>) {
        let mut state = self.state.lock();
        state.status = status;
        state.error = error;
    }

    /// Raw docker CLI invocation. Used for inspect/run/exec/cp.
    async fn docker(
        &self,
        args: &[&str],
        stdin: Option<&[u8]>,
        timeout: Duration,
    ) -> std::result::Result<(String, String, i32), String> {
        let mut cmd = Command::new("docker");
        cmd.args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);
        if let Some(host) = &self.docker_host {
            cmd.env("DOCKER_HOST", host);
        }

        let mut child = cmd.spawn().map_err(|e| format!("failed to spawn docker: {e}"))?;

        if let (Some(data), Some(mut pipe)) = (stdin, child.stdin.take()) {
            let data = data.to_vec();
            tokio::spawn(async move {
                let _ = pipe.write_all(&data).await;
                let _ = pipe.shutdown().await;
            });
        }

        let out = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| format!("docker command timed out after {}s", timeout.as_secs()))?
            .map_err(|e| format!("docker command failed: {e}"))?;

        Ok((
            String::from_utf8_lossy(&out.stdout).to_string(),
            String::from_utf8_lossy(&out.stderr).to_string(),
            out.status.code().unwrap_or(-1),
        ))
    }

    /// Block until the container is `launched`, polling through a launch in
    /// progress. Errors describe the terminal status for the synthetic
    /// "container not available" output.
    async fn wait_ready(&self) -> std::result::Result<(), String> {
        let deadline = tokio::time::Instant::now() + LAUNCH_WAIT_MAX;
        loop {
            match self.status() {
                ContainerStatus::Launched => return Ok(()),
                ContainerStatus::Launching => {
                    if tokio::time::Instant::now() >= deadline {
                        return Err("Error: container launch did not finish within 60s.".into());
                    }
                    tokio::time::sleep(LAUNCH_POLL).await;
                }
                status @ (ContainerStatus::Idle | ContainerStatus::Error) => {
                    let detail = self.error().unwrap_or_default();
                    return Err(format!(
                        "Error: container not available (status: {status}). {detail}"
                    ));
                }
            }
        }
    }

    /// Run a command in the container without output-cap truncation
    /// (the filesystem helper needs raw stdout). Prefers the daemon.
    async fn exec_raw(&self, command: &str, stdin: Option<&str>) -> ExecResult {
        if let Err(msg) = self.wait_ready().await {
            return ExecResult::failure(msg);
        }

        // Daemon first: one framed request over the persistent connection.
        // A failed transport is dropped and the call falls back to exec.
        {
            let workdir = self.workdir.to_string_lossy().to_string();
            let mut daemon = self.daemon.lock().await;
            if let Some(client) = daemon.take() {
                if client.is_alive() {
                    let req = DaemonRequest {
                        command,
                        workdir: &workdir,
                        stdin,
                        timeout_s: self.timeout.as_secs(),
                    };
                    match client.send(&req).await {
                        Ok(resp) => {
                            *daemon = Some(client);
                            if let Some(err) = resp.error {
                                return ExecResult::failure(format!("Error: {err}"));
                            }
                            let output =
                                assemble_output(&resp.stdout, &resp.stderr, resp.exit_code);
                            return ExecResult {
                                output,
                                exit_code: resp.exit_code,
                                truncated: false,
                            };
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "wick-daemon transport failed, falling back to docker exec");
                        }
                    }
                }
            }
        }

        // Fallback: docker exec.
        let workdir = self.workdir.to_string_lossy().to_string();
        let mut args: Vec<&str> = vec!["exec"];
        if stdin.is_some() {
            args.push("-i");
        }
        args.extend(["-w", workdir.as_str(), self.container.as_str(), "sh", "-c", command]);

        match self
            .docker(&args, stdin.map(str::as_bytes), self.timeout)
            .await
        {
            Ok((stdout, stderr, exit_code)) => {
                let output = assemble_output(&stdout, &stderr, exit_code);
                ExecResult {
                    output,
                    exit_code,
                    truncated: false,
                }
            }
            Err(msg) if msg.contains("timed out") => ExecResult::timeout(self.timeout.as_secs()),
            Err(msg) => ExecResult::failure(format!("Error: {msg}")),
        }
    }

    /// The full execute pipeline: raw execution plus the output cap.
    async fn execute_capped(&self, command: &str, stdin: Option<&str>) -> ExecResult {
        let result = self.exec_raw(command, stdin).await;
        let (output, truncated) = truncate_output(result.output, self.max_output_bytes);
        ExecResult {
            output,
            exit_code: result.exit_code,
            truncated: truncated || result.truncated,
        }
    }

    // ── Launch sequence ────────────────────────────────────────────

    async fn launch(&self, cancel: CancelToken) {
        if let Err(e) = self.launch_steps(&cancel).await {
            if cancel.is_cancelled() {
                tracing::info!(container = %self.container, "container launch cancelled");
                self.set_status(ContainerStatus::Idle, None);
            } else {
                tracing::error!(container = %self.container, error = %e, "container launch failed");
                self.set_status(ContainerStatus::Error, Some(e));
            }
            return;
        }
        if cancel.is_cancelled() {
            self.set_status(ContainerStatus::Idle, None);
            return;
        }
        self.set_status(ContainerStatus::Launched, None);
        tracing::info!(container = %self.container, "container launched");
    }

    async fn launch_steps(&self, cancel: &CancelToken) -> std::result::Result<(), String> {
        // 1. Inspect; start or run as needed.
        let (stdout, _, code) = self
            .docker(
                &["inspect", "-f", "{{.State.Running}}", self.container.as_str()],
                None,
                Duration::from_secs(10),
            )
            .await?;

        if cancel.is_cancelled() {
            return Err("cancelled".into());
        }

        if code != 0 {
            // Missing container: launch from the image.
            let image = self
                .image
                .as_deref()
                .ok_or_else(|| "no image configured for docker backend".to_string())?;
            let workdir = self.workdir.to_string_lossy().to_string();
            let (_, stderr, code) = self
                .docker(
                    &[
                        "run", "-d", "--name", self.container.as_str(), "-w", workdir.as_str(), image, "sleep",
                        "infinity",
                    ],
                    None,
                    Duration::from_secs(60),
                )
                .await?;
            if code != 0 {
                return Err(format!("docker run failed: {}", stderr.trim()));
            }
        } else if stdout.trim() != "true" {
            let (_, stderr, code) = self
                .docker(
                    &["start", self.container.as_str()],
                    None,
                    Duration::from_secs(30),
                )
                .await?;
            if code != 0 {
                return Err(format!("docker start failed: {}", stderr.trim()));
            }
        }

        if cancel.is_cancelled() {
            return Err("cancelled".into());
        }

        // 2. Ensure the wickfs helper: probe the image, then copy from host.
        let probe = self
            .docker(
                &[
                    "exec",
                    self.container.as_str(),
                    "sh",
                    "-c",
                    "command -v wickfs >/dev/null 2>&1",
                ],
                None,
                Duration::from_secs(10),
            )
            .await?;
        if probe.2 != 0 {
            let host_binary =
                std::env::var("WICK_FS_BINARY").unwrap_or_else(|_| WICKFS_PATH.into());
            let dest = format!("{}:{}", self.container, WICKFS_PATH);
            let cp = self
                .docker(
                    &["cp", host_binary.as_str(), dest.as_str()],
                    None,
                    Duration::from_secs(30),
                )
                .await?;
            if cp.2 != 0 {
                tracing::warn!(
                    container = %self.container,
                    "wickfs helper unavailable (probe and copy both failed); file tools will degrade"
                );
            } else {
                let _ = self
                    .docker(
                        &["exec", self.container.as_str(), "chmod", "+x", WICKFS_PATH],
                        None,
                        Duration::from_secs(10),
                    )
                    .await;
            }
        }

        if cancel.is_cancelled() {
            return Err("cancelled".into());
        }

        // 3. Optional: dial the in-container daemon for fast execution.
        let (ip, _, code) = self
            .docker(
                &[
                    "inspect",
                    "-f",
                    "{{range .NetworkSettings.Networks}}{{.IPAddress}}{{end}}",
                    self.container.as_str(),
                ],
                None,
                Duration::from_secs(10),
            )
            .await?;
        if code == 0 {
            let ip = ip.trim();
            if !ip.is_empty() {
                match DaemonClient::connect(&format!("{ip}:{DAEMON_PORT}")).await {
                    Ok(client) => {
                        *self.daemon.lock().await = Some(client);
                        tracing::info!(container = %self.container, "wick-daemon transport active");
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "wick-daemon not reachable, using docker exec");
                    }
                }
            }
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl RemoteExec for DockerInner {
    fn workdir(&self) -> &Path {
        &self.workdir
    }

    async fn run(&self, command: &str, stdin: Option<&str>) -> ExecResult {
        self.exec_raw(command, stdin).await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Public backend
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct DockerBackend {
    inner: Arc<DockerInner>,
    fs: Arc<RemoteFs>,
}

impl DockerBackend {
    pub fn new(id: &str, cfg: &BackendCfg, user: &str) -> Result<Self> {
        let container = cfg
            .container_name
            .clone()
            .unwrap_or_else(|| format!("wick-{id}-{user}"));
        if cfg.image.is_none() {
            return Err(Error::Config(format!(
                "docker backend '{id}' has no image configured"
            )));
        }

        let inner = Arc::new(DockerInner {
            id: id.to_string(),
            workdir: cfg.workdir.clone(),
            container,
            image: cfg.image.clone(),
            docker_host: cfg.docker_host.clone(),
            timeout: Duration::from_secs(cfg.timeout_s),
            max_output_bytes: cfg.max_output_bytes,
            state: Mutex::new(LaunchState {
                status: ContainerStatus::Idle,
                error: None,
            }),
            daemon: tokio::sync::Mutex::new(None),
            launch_cancel: Mutex::new(None),
        });

        let fs = Arc::new(RemoteFs::new(inner.clone()));

        Ok(Self { inner, fs })
    }

    /// Begin an asynchronous launch. Idempotent while a launch is in flight
    /// or the container is already up.
    pub fn launch_async(&self) {
        {
            let mut state = self.inner.state.lock();
            match state.status {
                ContainerStatus::Launching | ContainerStatus::Launched => return,
                _ => {
                    state.status = ContainerStatus::Launching;
                    state.error = None;
                }
            }
        }

        let cancel = CancelToken::new();
        *self.inner.launch_cancel.lock() = Some(cancel.clone());

        let inner = self.inner.clone();
        tokio::spawn(async move {
            inner.launch(cancel).await;
        });
    }

    /// Stop an in-flight launch. The launch task notices at its next step
    /// and returns the status to `idle`.
    pub fn cancel_launch(&self) {
        if let Some(cancel) = self.inner.launch_cancel.lock().take() {
            cancel.cancel();
        }
        let mut state = self.inner.state.lock();
        if state.status == ContainerStatus::Launching {
            state.status = ContainerStatus::Idle;
            state.error = None;
        }
    }

    /// Close the daemon connection and remove the container.
    pub async fn stop_container(&self) {
        self.cancel_launch();
        *self.inner.daemon.lock().await = None;
        let _ = self
            .inner
            .docker(
                &["rm", "-f", self.inner.container.as_str()],
                None,
                Duration::from_secs(30),
            )
            .await;
        self.inner.set_status(ContainerStatus::Idle, None);
        tracing::info!(container = %self.inner.container, "container stopped");
    }
}

#[async_trait::async_trait]
impl Backend for DockerBackend {
    fn id(&self) -> &str {
        &self.inner.id
    }

    fn workdir(&self) -> &Path {
        &self.inner.workdir
    }

    async fn execute(&self, cancel: &CancelToken, command: &str) -> ExecResult {
        if cancel.is_cancelled() {
            return ExecResult::failure("Error: turn cancelled.");
        }
        self.inner.execute_capped(command, None).await
    }

    async fn execute_with_stdin(
        &self,
        cancel: &CancelToken,
        command: &str,
        stdin: &str,
    ) -> ExecResult {
        if cancel.is_cancelled() {
            return ExecResult::failure("Error: turn cancelled.");
        }
        self.inner.execute_capped(command, Some(stdin)).await
    }

    async fn upload_files(&self, files: &[(String, Vec<u8>)]) -> Vec<TransferResult> {
        use base64::Engine;
        let engine = base64::engine::general_purpose::STANDARD;

        let mut results = Vec::with_capacity(files.len());
        for (path, content) in files {
            let abs = match self.resolve_path(path) {
                Ok(p) => p,
                Err(e) => {
                    results.push(TransferResult {
                        path: path.clone(),
                        ok: false,
                        error: Some(e.to_string()),
                    });
                    continue;
                }
            };
            let quoted = shell_quote(&abs.to_string_lossy());
            let command = format!(
                "mkdir -p \"$(dirname {quoted})\" && base64 -d > {quoted}"
            );
            let encoded = engine.encode(content);
            let r = self.inner.exec_raw(&command, Some(&encoded)).await;
            results.push(TransferResult {
                path: path.clone(),
                ok: r.exit_code == 0,
                error: (r.exit_code != 0).then(|| r.output),
            });
        }
        results
    }

    async fn download_files(&self, paths: &[String]) -> Vec<DownloadResult> {
        use base64::Engine;
        let engine = base64::engine::general_purpose::STANDARD;

        let mut results = Vec::with_capacity(paths.len());
        for path in paths {
            let abs = match self.resolve_path(path) {
                Ok(p) => p,
                Err(e) => {
                    results.push(DownloadResult {
                        path: path.clone(),
                        content: None,
                        error: Some(e.to_string()),
                    });
                    continue;
                }
            };
            let command = format!("base64 < {}", shell_quote(&abs.to_string_lossy()));
            let r = self.inner.exec_raw(&command, None).await;
            if r.exit_code != 0 {
                results.push(DownloadResult {
                    path: path.clone(),
                    content: None,
                    error: Some(r.output),
                });
                continue;
            }
            let cleaned: String = r.output.chars().filter(|c| !c.is_whitespace()).collect();
            match engine.decode(cleaned.as_bytes()) {
                Ok(bytes) => results.push(DownloadResult {
                    path: path.clone(),
                    content: Some(bytes),
                    error: None,
                }),
                Err(e) => results.push(DownloadResult {
                    path: path.clone(),
                    content: None,
                    error: Some(format!("base64 decode failed: {e}")),
                }),
            }
        }
        results
    }

    fn container_status(&self) -> ContainerStatus {
        self.inner.status()
    }

    fn container_error(&self) -> Option<String> {
        self.inner.error()
    }

    fn terminal_cmd(&self) -> Option<Vec<String>> {
        Some(vec![
            "docker".into(),
            "exec".into(),
            "-it".into(),
            "-w".into(),
            self.inner.workdir.to_string_lossy().into_owned(),
            self.inner.container.clone(),
            "sh".into(),
        ])
    }

    fn fs(&self) -> Option<Arc<dyn FileSystem>> {
        Some(self.fs.clone())
    }

    fn launch(&self) {
        self.launch_async();
    }

    fn cancel_launch(&self) {
        DockerBackend::cancel_launch(self);
    }

    async fn shutdown(&self) {
        self.stop_container().await;
    }
}

/// Single-quote a string for `sh -c`, escaping embedded quotes.
pub(crate) fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests (no docker daemon required)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use wick_domain::config::BackendKind;

    fn cfg() -> BackendCfg {
        BackendCfg {
            kind: BackendKind::Docker,
            workdir: PathBuf::from("/workspace"),
            timeout_s: 5,
            max_output_bytes: 1000,
            image: Some("alpine:3".into()),
            container_name: None,
            docker_host: None,
        }
    }

    #[test]
    fn starts_idle_with_derived_container_name() {
        let b = DockerBackend::new("coder", &cfg(), "alice").unwrap();
        assert_eq!(b.container_status(), ContainerStatus::Idle);
        assert_eq!(b.inner.container, "wick-coder-alice");
        assert!(b.container_error().is_none());
    }

    #[test]
    fn missing_image_rejected() {
        let mut c = cfg();
        c.image = None;
        assert!(DockerBackend::new("coder", &c, "alice").is_err());
    }

    #[tokio::test]
    async fn execute_on_idle_container_returns_synthetic_error() {
        let b = DockerBackend::new("coder", &cfg(), "alice").unwrap();
        let r = b.execute(&CancelToken::new(), "ls").await;
        assert_eq!(r.exit_code, 1);
        assert!(r.output.contains("container not available (status: idle)"));
    }

    #[tokio::test]
    async fn execute_after_error_status_reports_detail() {
        let b = DockerBackend::new("coder", &cfg(), "alice").unwrap();
        b.inner
            .set_status(ContainerStatus::Error, Some("docker run failed: no space".into()));
        let r = b.execute(&CancelToken::new(), "ls").await;
        assert!(r.output.contains("status: error"));
        assert!(r.output.contains("no space"));
    }

    #[test]
    fn cancel_launch_returns_to_idle() {
        let b = DockerBackend::new("coder", &cfg(), "alice").unwrap();
        b.inner.set_status(ContainerStatus::Launching, None);
        *b.inner.launch_cancel.lock() = Some(CancelToken::new());
        b.cancel_launch();
        assert_eq!(b.container_status(), ContainerStatus::Idle);
    }

    #[test]
    fn shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn terminal_cmd_targets_container() {
        let b = DockerBackend::new("coder", &cfg(), "alice").unwrap();
        let cmd = b.terminal_cmd().unwrap();
        assert_eq!(cmd[0], "docker");
        assert!(cmd.contains(&"wick-coder-alice".to_string()));
    }

    #[test]
    fn resolve_path_guards_container_workdir() {
        let b = DockerBackend::new("coder", &cfg(), "alice").unwrap();
        assert!(b.resolve_path("src/main.rs").is_ok());
        assert!(b.resolve_path("/etc/passwd").is_err());
    }
}
