//! Local backend — commands run on the host via `sh -c`, scoped to a
//! per-user working directory.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use wick_domain::cancel::CancelToken;
use wick_domain::config::BackendCfg;
use wick_domain::{Error, Result};

use crate::backend::{
    assemble_output, truncate_output, Backend, DownloadResult, ExecResult, TransferResult,
};
use crate::fs::{FileSystem, LocalFs};

pub struct LocalBackend {
    id: String,
    workdir: PathBuf,
    timeout: Duration,
    max_output_bytes: usize,
    fs: Arc<LocalFs>,
}

impl LocalBackend {
    /// Create the backend, scoping the configured workdir per user and
    /// creating the directory if needed.
    pub fn new(id: &str, cfg: &BackendCfg, user: &str) -> Result<Self> {
        let workdir = cfg.workdir.join(user);
        std::fs::create_dir_all(&workdir).map_err(|e| {
            Error::Backend(format!("cannot create workdir '{}': {e}", workdir.display()))
        })?;

        tracing::debug!(backend = %id, workdir = %workdir.display(), "local backend ready");

        Ok(Self {
            id: id.to_string(),
            workdir: workdir.clone(),
            timeout: Duration::from_secs(cfg.timeout_s),
            max_output_bytes: cfg.max_output_bytes,
            fs: Arc::new(LocalFs::new(workdir)),
        })
    }

    async fn run(&self, command: &str, stdin: Option<&str>) -> ExecResult {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&self.workdir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => return ExecResult::failure(format!("Error: failed to spawn: {e}")),
        };

        if let (Some(data), Some(mut pipe)) = (stdin, child.stdin.take()) {
            let data = data.as_bytes().to_vec();
            tokio::spawn(async move {
                let _ = pipe.write_all(&data).await;
                let _ = pipe.shutdown().await;
            });
        }

        let waited = tokio::time::timeout(self.timeout, child.wait_with_output()).await;
        match waited {
            Ok(Ok(out)) => {
                let exit_code = out.status.code().unwrap_or(-1);
                let stdout = String::from_utf8_lossy(&out.stdout);
                let stderr = String::from_utf8_lossy(&out.stderr);
                let output = assemble_output(&stdout, &stderr, exit_code);
                let (output, truncated) = truncate_output(output, self.max_output_bytes);
                ExecResult {
                    output,
                    exit_code,
                    truncated,
                }
            }
            Ok(Err(e)) => ExecResult::failure(format!("Error: command failed: {e}")),
            Err(_) => ExecResult::timeout(self.timeout.as_secs()),
        }
    }
}

#[async_trait::async_trait]
impl Backend for LocalBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn workdir(&self) -> &Path {
        &self.workdir
    }

    async fn execute(&self, cancel: &CancelToken, command: &str) -> ExecResult {
        if cancel.is_cancelled() {
            return ExecResult::failure("Error: turn cancelled.");
        }
        self.run(command, None).await
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
        self.run(command, Some(stdin)).await
    }

    async fn upload_files(&self, files: &[(String, Vec<u8>)]) -> Vec<TransferResult> {
        let mut results = Vec::with_capacity(files.len());
        for (path, content) in files {
            let result = match self.resolve_path(path) {
                Ok(abs) => {
                    let write = async {
                        if let Some(parent) = abs.parent() {
                            tokio::fs::create_dir_all(parent).await?;
                        }
                        tokio::fs::write(&abs, content).await
                    };
                    match write.await {
                        Ok(()) => TransferResult {
                            path: path.clone(),
                            ok: true,
                            error: None,
                        },
                        Err(e) => TransferResult {
                            path: path.clone(),
                            ok: false,
                            error: Some(e.to_string()),
                        },
                    }
                }
                Err(e) => TransferResult {
                    path: path.clone(),
                    ok: false,
                    error: Some(e.to_string()),
                },
            };
            results.push(result);
        }
        results
    }

    async fn download_files(&self, paths: &[String]) -> Vec<DownloadResult> {
        let mut results = Vec::with_capacity(paths.len());
        for path in paths {
            let result = match self.resolve_path(path) {
                Ok(abs) => match tokio::fs::read(&abs).await {
                    Ok(content) => DownloadResult {
                        path: path.clone(),
                        content: Some(content),
                        error: None,
                    },
                    Err(e) => DownloadResult {
                        path: path.clone(),
                        content: None,
                        error: Some(e.to_string()),
                    },
                },
                Err(e) => DownloadResult {
                    path: path.clone(),
                    content: None,
                    error: Some(e.to_string()),
                },
            };
            results.push(result);
        }
        results
    }

    fn terminal_cmd(&self) -> Option<Vec<String>> {
        Some(vec![
            "sh".into(),
            "-c".into(),
            format!("cd '{}' && exec ${{SHELL:-sh}}", self.workdir.display()),
        ])
    }

    fn fs(&self) -> Option<Arc<dyn FileSystem>> {
        Some(self.fs.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn backend(tmp: &TempDir) -> LocalBackend {
        let cfg = BackendCfg {
            kind: wick_domain::config::BackendKind::Local,
            workdir: tmp.path().to_path_buf(),
            timeout_s: 5,
            max_output_bytes: 200,
            ..Default::default()
        };
        LocalBackend::new("dev", &cfg, "alice").unwrap()
    }

    #[test]
    fn workdir_is_scoped_per_user() {
        let tmp = TempDir::new().unwrap();
        let b = backend(&tmp);
        assert!(b.workdir().ends_with("alice"));
        assert!(b.workdir().is_dir());
    }

    #[tokio::test]
    async fn execute_captures_output() {
        let tmp = TempDir::new().unwrap();
        let b = backend(&tmp);
        let r = b.execute(&CancelToken::new(), "echo hello").await;
        assert_eq!(r.exit_code, 0);
        assert_eq!(r.output, "hello");
        assert!(!r.truncated);
    }

    #[tokio::test]
    async fn execute_reports_exit_code_and_stderr() {
        let tmp = TempDir::new().unwrap();
        let b = backend(&tmp);
        let r = b.execute(&CancelToken::new(), "echo oops >&2; exit 3").await;
        assert_eq!(r.exit_code, 3);
        assert_eq!(r.output, "oops");
    }

    #[tokio::test]
    async fn oversized_output_is_truncated() {
        let tmp = TempDir::new().unwrap();
        let b = backend(&tmp);
        let r = b
            .execute(&CancelToken::new(), "head -c 100000 /dev/zero | tr '\\0' x")
            .await;
        assert!(r.truncated);
        assert!(r.output.contains("Output truncated at 200 bytes."));
    }

    #[tokio::test]
    async fn stdin_is_piped_through() {
        let tmp = TempDir::new().unwrap();
        let b = backend(&tmp);
        let r = b
            .execute_with_stdin(&CancelToken::new(), "cat", "piped data")
            .await;
        assert_eq!(r.output, "piped data");
    }

    #[tokio::test]
    async fn timeout_returns_124() {
        let tmp = TempDir::new().unwrap();
        let cfg = BackendCfg {
            kind: wick_domain::config::BackendKind::Local,
            workdir: tmp.path().to_path_buf(),
            timeout_s: 1,
            ..Default::default()
        };
        let b = LocalBackend::new("dev", &cfg, "bob").unwrap();
        let r = b.execute(&CancelToken::new(), "sleep 10").await;
        assert_eq!(r.exit_code, 124);
        assert!(r.output.contains("timed out"));
    }

    #[tokio::test]
    async fn upload_download_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let b = backend(&tmp);
        let up = b
            .upload_files(&[("notes/todo.txt".into(), b"remember".to_vec())])
            .await;
        assert!(up[0].ok);

        let down = b.download_files(&["notes/todo.txt".into()]).await;
        assert_eq!(down[0].content.as_deref(), Some(b"remember".as_slice()));
    }

    #[tokio::test]
    async fn upload_outside_workdir_rejected() {
        let tmp = TempDir::new().unwrap();
        let b = backend(&tmp);
        let up = b.upload_files(&[("../escape.txt".into(), b"x".to_vec())]).await;
        assert!(!up[0].ok);
    }

    #[tokio::test]
    async fn empty_output_marked() {
        let tmp = TempDir::new().unwrap();
        let b = backend(&tmp);
        let r = b.execute(&CancelToken::new(), "true").await;
        assert_eq!(r.output, "<no output>");
    }
}
