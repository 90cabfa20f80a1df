//! In-process filesystem implementation rooted at a workspace directory.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use wick_domain::{Error, Result};

use crate::backend::{assemble_output, resolve_path, ExecResult};

use super::{
    glob_to_regex, is_binary_path, EditOutcome, FileSystem, FsEntry, GrepMatch, GLOB_MAX_RESULTS,
    GREP_MAX_MATCHES, SKIP_DIRS,
};

pub struct LocalFs {
    root: PathBuf,
}

impl LocalFs {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        resolve_path(&self.root, path)
    }

    /// Recursive walk collecting files, honoring the skip-dir list.
    fn walk(&self, dir: &Path, out: &mut Vec<PathBuf>, cap: usize) {
        if out.len() >= cap {
            return;
        }
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        let mut entries: Vec<_> = entries.flatten().collect();
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            if out.len() >= cap {
                return;
            }
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            if path.is_dir() {
                if SKIP_DIRS.contains(&name.as_str()) {
                    continue;
                }
                self.walk(&path, out, cap);
            } else {
                out.push(path);
            }
        }
    }

    fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .to_string()
    }
}

#[async_trait::async_trait]
impl FileSystem for LocalFs {
    async fn ls(&self, path: &str) -> Result<Vec<FsEntry>> {
        let dir = self.resolve(path)?;
        let mut read_dir = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| Error::Backend(format!("cannot list '{path}': {e}")))?;

        let mut entries = Vec::new();
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| Error::Backend(format!("cannot read entry: {e}")))?
        {
            let meta = entry
                .metadata()
                .await
                .map_err(|e| Error::Backend(format!("cannot stat entry: {e}")))?;
            let modified = meta
                .modified()
                .ok()
                .map(|t| {
                    let dt: DateTime<Utc> = t.into();
                    dt.to_rfc3339()
                })
                .unwrap_or_default();
            entries.push(FsEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                size: meta.len(),
                modified,
                is_dir: meta.is_dir(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn read_file(
        &self,
        path: &str,
        offset: Option<usize>,
        limit: Option<usize>,
    ) -> Result<String> {
        let abs = self.resolve(path)?;
        let content = tokio::fs::read_to_string(&abs)
            .await
            .map_err(|e| Error::Backend(format!("cannot read '{path}': {e}")))?;

        match (offset, limit) {
            (None, None) => Ok(content),
            _ => {
                let offset = offset.unwrap_or(0);
                let selected: Vec<&str> = content
                    .lines()
                    .skip(offset)
                    .take(limit.unwrap_or(usize::MAX))
                    .collect();
                Ok(selected.join("\n"))
            }
        }
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        let abs = self.resolve(path)?;
        if let Some(parent) = abs.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Backend(format!("cannot create parent dirs: {e}")))?;
        }

        // Atomic write: uniquely-named temp sibling, then rename into place.
        let tmp_name = format!(
            ".{}.{}.tmp",
            abs.file_name().unwrap_or_default().to_string_lossy(),
            uuid::Uuid::new_v4().as_simple()
        );
        let tmp_path = abs.with_file_name(tmp_name);

        let mut file = tokio::fs::File::create(&tmp_path)
            .await
            .map_err(|e| Error::Backend(format!("cannot create temp file: {e}")))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| Error::Backend(format!("cannot write temp file: {e}")))?;
        file.sync_data()
            .await
            .map_err(|e| Error::Backend(format!("cannot sync temp file: {e}")))?;
        drop(file);

        tokio::fs::rename(&tmp_path, &abs).await.map_err(|e| {
            let tmp = tmp_path.clone();
            tokio::spawn(async move {
                let _ = tokio::fs::remove_file(&tmp).await;
            });
            Error::Backend(format!("cannot rename temp file into place: {e}"))
        })
    }

    async fn edit_file(&self, path: &str, old: &str, new: &str) -> Result<EditOutcome> {
        let abs = self.resolve(path)?;
        let content = tokio::fs::read_to_string(&abs)
            .await
            .map_err(|e| Error::Backend(format!("cannot read '{path}': {e}")))?;

        let Some(pos) = content.find(old) else {
            return Err(Error::Backend(format!(
                "edit target not found in '{path}'"
            )));
        };

        let mut edited = String::with_capacity(content.len() + new.len());
        edited.push_str(&content[..pos]);
        edited.push_str(new);
        edited.push_str(&content[pos + old.len()..]);

        self.write_file(path, &edited).await?;
        Ok(EditOutcome {
            replaced: 1,
            content: edited,
        })
    }

    async fn grep(&self, pattern: &str, path: &str) -> Result<Vec<GrepMatch>> {
        let re = regex::Regex::new(pattern)
            .map_err(|e| Error::Backend(format!("bad grep pattern: {e}")))?;
        let base = self.resolve(path)?;

        let mut files = Vec::new();
        if base.is_file() {
            files.push(base.clone());
        } else {
            self.walk(&base, &mut files, usize::MAX);
        }

        let mut matches = Vec::new();
        'outer: for file in files {
            if is_binary_path(&file) {
                continue;
            }
            let Ok(content) = std::fs::read_to_string(&file) else {
                continue; // non-UTF8 or unreadable
            };
            for (i, line) in content.lines().enumerate() {
                if re.is_match(line) {
                    matches.push(GrepMatch {
                        path: self.relative(&file),
                        line_number: i + 1,
                        line: line.to_string(),
                    });
                    if matches.len() >= GREP_MAX_MATCHES {
                        break 'outer;
                    }
                }
            }
        }
        Ok(matches)
    }

    async fn glob(&self, pattern: &str, path: &str) -> Result<Vec<String>> {
        let re = glob_to_regex(pattern)
            .map_err(|e| Error::Backend(format!("bad glob pattern: {e}")))?;
        let base = self.resolve(path)?;

        let mut files = Vec::new();
        self.walk(&base, &mut files, usize::MAX);

        let mut results = Vec::new();
        for file in files {
            let rel = file
                .strip_prefix(&base)
                .unwrap_or(&file)
                .to_string_lossy()
                .to_string();
            if re.is_match(&rel) {
                results.push(self.relative(&file));
                if results.len() >= GLOB_MAX_RESULTS {
                    break;
                }
            }
        }
        Ok(results)
    }

    async fn exec(&self, command: &str) -> Result<ExecResult> {
        let out = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.root)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::Backend(format!("cannot spawn: {e}")))?;

        let exit_code = out.status.code().unwrap_or(-1);
        Ok(ExecResult {
            output: assemble_output(
                &String::from_utf8_lossy(&out.stdout),
                &String::from_utf8_lossy(&out.stderr),
                exit_code,
            ),
            exit_code,
            truncated: false,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
