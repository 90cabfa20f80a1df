//! Typed filesystem operations over a workspace.
//!
//! Two implementations: [`LocalFs`] works directly on the host filesystem,
//! [`RemoteFs`] serializes each call to the in-container `wickfs` helper.

mod local;
mod remote;

pub use local::LocalFs;
pub use remote::{RemoteExec, RemoteFs};

use serde::{Deserialize, Serialize};

use wick_domain::Result;

use crate::backend::ExecResult;

/// Directories never descended into by grep/glob.
pub const SKIP_DIRS: &[&str] = &[".git", "node_modules", "__pycache__", "vendor"];

/// Extensions treated as binary and skipped by grep.
pub const BINARY_EXTS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "pdf", "zip", "tar", "gz", "bz2", "xz",
    "7z", "exe", "dll", "so", "dylib", "a", "o", "class", "jar", "pyc", "wasm", "sqlite", "db",
    "woff", "woff2", "ttf", "eot", "mp3", "mp4", "avi", "mov",
];

/// Result caps keep tool outputs model-sized.
pub const GREP_MAX_MATCHES: usize = 200;
pub const GLOB_MAX_RESULTS: usize = 100;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Structured results
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsEntry {
    pub name: String,
    pub size: u64,
    pub modified: String,
    pub is_dir: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrepMatch {
    pub path: String,
    pub line_number: usize,
    pub line: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditOutcome {
    /// Occurrences replaced (the first match only; 1 on success).
    pub replaced: usize,
    /// The file content after the edit.
    pub content: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Capability trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
pub trait FileSystem: Send + Sync {
    async fn ls(&self, path: &str) -> Result<Vec<FsEntry>>;

    async fn read_file(
        &self,
        path: &str,
        offset: Option<usize>,
        limit: Option<usize>,
    ) -> Result<String>;

    /// Atomic write: temp sibling + rename.
    async fn write_file(&self, path: &str, content: &str) -> Result<()>;

    /// Replace the first occurrence of `old` with `new`.
    async fn edit_file(&self, path: &str, old: &str, new: &str) -> Result<EditOutcome>;

    /// Regex search under `path`, capped at [`GREP_MAX_MATCHES`].
    async fn grep(&self, pattern: &str, path: &str) -> Result<Vec<GrepMatch>>;

    /// Glob match under `path`, capped at [`GLOB_MAX_RESULTS`].
    async fn glob(&self, pattern: &str, path: &str) -> Result<Vec<String>>;

    async fn exec(&self, command: &str) -> Result<ExecResult>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Glob translation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Translate a glob pattern (`*`, `**`, `?`) into an anchored regex over
/// `/`-separated relative paths.
pub(crate) fn glob_to_regex(pattern: &str) -> std::result::Result<regex::Regex, regex::Error> {
    let mut re = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    // `**/` matches zero or more directories.
                    if chars.peek() == Some(&'/') {
                        chars.next();
                        re.push_str("(?:.*/)?");
                    } else {
                        re.push_str(".*");
                    }
                } else {
                    re.push_str("[^/]*");
                }
            }
            '?' => re.push_str("[^/]"),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    regex::Regex::new(&re)
}

pub(crate) fn is_binary_path(path: &std::path::Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| BINARY_EXTS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
