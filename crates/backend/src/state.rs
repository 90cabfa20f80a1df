//! The no-op backend for chat-only agents.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use wick_domain::cancel::CancelToken;
use wick_domain::{Error, Result};

use crate::backend::{Backend, DownloadResult, ExecResult, TransferResult};
use crate::fs::FileSystem;

const NO_BACKEND: &str = "Error: this agent has no workspace backend.";

pub struct StateBackend {
    id: String,
    workdir: PathBuf,
}

impl StateBackend {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            workdir: PathBuf::new(),
        }
    }
}

#[async_trait::async_trait]
impl Backend for StateBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn resolve_path(&self, _path: &str) -> Result<PathBuf> {
        Err(Error::Backend(NO_BACKEND.into()))
    }

    async fn execute(&self, _cancel: &CancelToken, _command: &str) -> ExecResult {
        ExecResult::failure(NO_BACKEND)
    }

    async fn execute_with_stdin(
        &self,
        _cancel: &CancelToken,
        _command: &str,
        _stdin: &str,
    ) -> ExecResult {
        ExecResult::failure(NO_BACKEND)
    }

    async fn upload_files(&self, files: &[(String, Vec<u8>)]) -> Vec<TransferResult> {
        files
            .iter()
            .map(|(path, _)| TransferResult {
                path: path.clone(),
                ok: false,
                error: Some(NO_BACKEND.into()),
            })
            .collect()
    }

    async fn download_files(&self, paths: &[String]) -> Vec<DownloadResult> {
        paths
            .iter()
            .map(|path| DownloadResult {
                path: path.clone(),
                content: None,
                error: Some(NO_BACKEND.into()),
            })
            .collect()
    }

    fn fs(&self) -> Option<Arc<dyn FileSystem>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_operation_reports_missing_backend() {
        let b = StateBackend::new("chat");
        let cancel = CancelToken::new();

        let r = b.execute(&cancel, "ls").await;
        assert_eq!(r.exit_code, 1);
        assert!(r.output.starts_with("Error:"));

        assert!(b.resolve_path("file.txt").is_err());
        assert!(b.fs().is_none());

        let up = b.upload_files(&[("a.txt".into(), b"x".to_vec())]).await;
        assert!(!up[0].ok);
    }
}
