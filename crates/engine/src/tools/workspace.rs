//! Runtime tools registered per state by the `todolist` and `filesystem`
//! hooks. Each tool closes over the state substructure it mutates and the
//! backend it delegates to, so the closure is scoped to one thread's state.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use wick_backend::{Backend, FileSystem};
use wick_domain::message::{Todo, TodoStatus};

use crate::tool::{Tool, ToolContext, ToolOutcome};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// write_todos
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct WriteTodosTool {
    todos: Arc<Mutex<Vec<Todo>>>,
}

impl WriteTodosTool {
    pub fn new(todos: Arc<Mutex<Vec<Todo>>>) -> Self {
        Self { todos }
    }
}

#[async_trait::async_trait]
impl Tool for WriteTodosTool {
    fn name(&self) -> &str {
        "write_todos"
    }

    fn description(&self) -> &str {
        "Replace the task list. Use to plan multi-step work and track progress."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "todos": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "string" },
                            "title": { "type": "string" },
                            "status": { "type": "string", "enum": ["pending", "in_progress", "done"] }
                        },
                        "required": ["title"]
                    }
                }
            },
            "required": ["todos"]
        })
    }

    async fn execute(&self, _ctx: &ToolContext, args: Value) -> ToolOutcome {
        let Some(items) = args["todos"].as_array() else {
            return ToolOutcome::error("Error: 'todos' must be an array");
        };

        let mut todos = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let Some(title) = item["title"].as_str() else {
                return ToolOutcome::error(format!("Error: todo {i} is missing a title"));
            };
            let status = match item["status"].as_str().unwrap_or("pending") {
                "pending" => TodoStatus::Pending,
                "in_progress" => TodoStatus::InProgress,
                "done" => TodoStatus::Done,
                other => {
                    return ToolOutcome::error(format!("Error: unknown todo status '{other}'"))
                }
            };
            todos.push(Todo {
                id: item["id"]
                    .as_str()
                    .map(String::from)
                    .unwrap_or_else(|| format!("todo-{}", i + 1)),
                title: title.to_string(),
                status,
            });
        }

        let count = todos.len();
        let done = todos.iter().filter(|t| t.status == TodoStatus::Done).count();
        *self.todos.lock() = todos;
        ToolOutcome::ok(format!("Updated todo list: {count} items ({done} done)."))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Filesystem tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn fs_error(e: impl std::fmt::Display) -> ToolOutcome {
    ToolOutcome::error(format!("Error: {e}"))
}

pub struct LsTool {
    fs: Arc<dyn FileSystem>,
}

impl LsTool {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self { fs }
    }
}

#[async_trait::async_trait]
impl Tool for LsTool {
    fn name(&self) -> &str {
        "ls"
    }

    fn description(&self) -> &str {
        "List directory contents in the workspace."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory, relative to the workspace root" }
            }
        })
    }

    async fn execute(&self, _ctx: &ToolContext, args: Value) -> ToolOutcome {
        let path = args["path"].as_str().unwrap_or("");
        match self.fs.ls(path).await {
            Ok(entries) => {
                if entries.is_empty() {
                    return ToolOutcome::ok("(empty directory)");
                }
                let lines: Vec<String> = entries
                    .iter()
                    .map(|e| {
                        if e.is_dir {
                            format!("{}/", e.name)
                        } else {
                            format!("{} ({} bytes)", e.name, e.size)
                        }
                    })
                    .collect();
                ToolOutcome::ok(lines.join("\n"))
            }
            Err(e) => fs_error(e),
        }
    }
}

pub struct ReadFileTool {
    fs: Arc<dyn FileSystem>,
}

impl ReadFileTool {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self { fs }
    }
}

#[async_trait::async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file from the workspace, optionally a line range."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "file_path": { "type": "string" },
                "offset": { "type": "integer", "description": "First line to return (0-based)" },
                "limit": { "type": "integer", "description": "Maximum number of lines" }
            },
            "required": ["file_path"]
        })
    }

    async fn execute(&self, _ctx: &ToolContext, args: Value) -> ToolOutcome {
        let path = args["file_path"].as_str().unwrap_or_default();
        let offset = args["offset"].as_u64().map(|v| v as usize);
        let limit = args["limit"].as_u64().map(|v| v as usize);
        match self.fs.read_file(path, offset, limit).await {
            Ok(content) => ToolOutcome::ok(content),
            Err(e) => fs_error(e),
        }
    }
}

pub struct WriteFileTool {
    backend: Arc<dyn Backend>,
    fs: Arc<dyn FileSystem>,
    files: Arc<Mutex<HashMap<String, String>>>,
}

impl WriteFileTool {
    pub fn new(
        backend: Arc<dyn Backend>,
        fs: Arc<dyn FileSystem>,
        files: Arc<Mutex<HashMap<String, String>>>,
    ) -> Self {
        Self { backend, fs, files }
    }
}

#[async_trait::async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Create or overwrite a file in the workspace."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "file_path": { "type": "string" },
                "content": { "type": "string" }
            },
            "required": ["file_path", "content"]
        })
    }

    async fn execute(&self, _ctx: &ToolContext, args: Value) -> ToolOutcome {
        let path = args["file_path"].as_str().unwrap_or_default();
        let content = args["content"].as_str().unwrap_or_default();

        let resolved = match self.backend.resolve_path(path) {
            Ok(p) => p,
            Err(e) => return fs_error(e),
        };
        if let Err(e) = self.fs.write_file(path, content).await {
            return fs_error(e);
        }

        // Track the written content for UI rendering.
        self.files
            .lock()
            .insert(resolved.to_string_lossy().to_string(), content.to_string());
        ToolOutcome::ok(format!("Wrote {} bytes to {path}", content.len()))
    }
}

pub struct EditFileTool {
    backend: Arc<dyn Backend>,
    fs: Arc<dyn FileSystem>,
    files: Arc<Mutex<HashMap<String, String>>>,
}

impl EditFileTool {
    pub fn new(
        backend: Arc<dyn Backend>,
        fs: Arc<dyn FileSystem>,
        files: Arc<Mutex<HashMap<String, String>>>,
    ) -> Self {
        Self { backend, fs, files }
    }
}

#[async_trait::async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Replace the first occurrence of a string in a workspace file."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "file_path": { "type": "string" },
                "old_string": { "type": "string" },
                "new_string": { "type": "string" }
            },
            "required": ["file_path", "old_string", "new_string"]
        })
    }

    async fn execute(&self, _ctx: &ToolContext, args: Value) -> ToolOutcome {
        let path = args["file_path"].as_str().unwrap_or_default();
        let old = args["old_string"].as_str().unwrap_or_default();
        let new = args["new_string"].as_str().unwrap_or_default();

        let resolved = match self.backend.resolve_path(path) {
            Ok(p) => p,
            Err(e) => return fs_error(e),
        };
        match self.fs.edit_file(path, old, new).await {
            Ok(outcome) => {
                // Read-back content keeps the UI mirror accurate.
                self.files
                    .lock()
                    .insert(resolved.to_string_lossy().to_string(), outcome.content);
                ToolOutcome::ok(format!("Edited {path} ({} replacement)", outcome.replaced))
            }
            Err(e) => fs_error(e),
        }
    }
}

pub struct GlobTool {
    fs: Arc<dyn FileSystem>,
}

impl GlobTool {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self { fs }
    }
}

#[async_trait::async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str {
        "glob"
    }

    fn description(&self) -> &str {
        "Find workspace files matching a glob pattern."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string", "description": "e.g. '**/*.rs'" },
                "path": { "type": "string", "description": "Directory to search under" }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, _ctx: &ToolContext, args: Value) -> ToolOutcome {
        let pattern = args["pattern"].as_str().unwrap_or_default();
        let path = args["path"].as_str().unwrap_or("");
        match self.fs.glob(pattern, path).await {
            Ok(hits) if hits.is_empty() => ToolOutcome::ok("No matches."),
            Ok(hits) => ToolOutcome::ok(hits.join("\n")),
            Err(e) => fs_error(e),
        }
    }
}

pub struct GrepTool {
    fs: Arc<dyn FileSystem>,
}

impl GrepTool {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self { fs }
    }
}

#[async_trait::async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search workspace files for a regex pattern."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string" },
                "path": { "type": "string", "description": "File or directory to search" }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, _ctx: &ToolContext, args: Value) -> ToolOutcome {
        let pattern = args["pattern"].as_str().unwrap_or_default();
        let path = args["path"].as_str().unwrap_or("");
        match self.fs.grep(pattern, path).await {
            Ok(matches) if matches.is_empty() => ToolOutcome::ok("No matches."),
            Ok(matches) => {
                let lines: Vec<String> = matches
                    .iter()
                    .map(|m| format!("{}:{}: {}", m.path, m.line_number, m.line))
                    .collect();
                ToolOutcome::ok(lines.join("\n"))
            }
            Err(e) => fs_error(e),
        }
    }
}

pub struct ExecuteTool {
    backend: Arc<dyn Backend>,
}

impl ExecuteTool {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }
}

#[async_trait::async_trait]
impl Tool for ExecuteTool {
    fn name(&self) -> &str {
        "execute"
    }

    fn description(&self) -> &str {
        "Run a shell command in the workspace."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": { "type": "string" }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> ToolOutcome {
        let command = args["command"].as_str().unwrap_or_default();
        let result = self.backend.execute(&ctx.cancel, command).await;
        ToolOutcome {
            output: result.output,
            is_error: result.exit_code != 0,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wick_backend::LocalBackend;
    use wick_domain::config::{BackendCfg, BackendKind};

    fn local_backend(tmp: &TempDir) -> Arc<dyn Backend> {
        let cfg = BackendCfg {
            kind: BackendKind::Local,
            workdir: tmp.path().to_path_buf(),
            ..Default::default()
        };
        Arc::new(LocalBackend::new("test", &cfg, "u1").unwrap())
    }

    #[tokio::test]
    async fn write_todos_replaces_list() {
        let todos = Arc::new(Mutex::new(Vec::new()));
        let tool = WriteTodosTool::new(todos.clone());
        let ctx = ToolContext::new("t", "u");

        let r = tool
            .execute(
                &ctx,
                serde_json::json!({
                    "todos": [
                        { "title": "plan", "status": "done" },
                        { "id": "x", "title": "build", "status": "in_progress" }
                    ]
                }),
            )
            .await;
        assert!(!r.is_error);
        assert!(r.output.contains("2 items (1 done)"));

        let list = todos.lock();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, "todo-1");
        assert_eq!(list[1].id, "x");
        assert_eq!(list[1].status, TodoStatus::InProgress);
    }

    #[tokio::test]
    async fn write_todos_rejects_bad_status() {
        let tool = WriteTodosTool::new(Arc::new(Mutex::new(Vec::new())));
        let ctx = ToolContext::new("t", "u");
        let r = tool
            .execute(
                &ctx,
                serde_json::json!({ "todos": [{ "title": "x", "status": "someday" }] }),
            )
            .await;
        assert!(r.is_error);
    }

    #[tokio::test]
    async fn write_file_tracks_state_files() {
        let tmp = TempDir::new().unwrap();
        let backend = local_backend(&tmp);
        let fs = backend.fs().unwrap();
        let files = Arc::new(Mutex::new(HashMap::new()));
        let tool = WriteFileTool::new(backend.clone(), fs, files.clone());
        let ctx = ToolContext::new("t", "u");

        let r = tool
            .execute(
                &ctx,
                serde_json::json!({ "file_path": "out.txt", "content": "payload" }),
            )
            .await;
        assert!(!r.is_error);

        let resolved = backend.resolve_path("out.txt").unwrap();
        let files = files.lock();
        assert_eq!(
            files.get(&resolved.to_string_lossy().to_string()).map(String::as_str),
            Some("payload")
        );
    }

    #[tokio::test]
    async fn edit_file_reads_back_content() {
        let tmp = TempDir::new().unwrap();
        let backend = local_backend(&tmp);
        let fs = backend.fs().unwrap();
        let files = Arc::new(Mutex::new(HashMap::new()));

        fs.write_file("f.txt", "one two three").await.unwrap();

        let tool = EditFileTool::new(backend.clone(), fs, files.clone());
        let ctx = ToolContext::new("t", "u");
        let r = tool
            .execute(
                &ctx,
                serde_json::json!({
                    "file_path": "f.txt",
                    "old_string": "two",
                    "new_string": "2"
                }),
            )
            .await;
        assert!(!r.is_error);

        let resolved = backend.resolve_path("f.txt").unwrap();
        assert_eq!(
            files.lock().get(&resolved.to_string_lossy().to_string()).map(String::as_str),
            Some("one 2 three")
        );
    }

    #[tokio::test]
    async fn read_file_outside_workspace_errors_inline() {
        let tmp = TempDir::new().unwrap();
        let backend = local_backend(&tmp);
        let tool = ReadFileTool::new(backend.fs().unwrap());
        let ctx = ToolContext::new("t", "u");
        let r = tool
            .execute(&ctx, serde_json::json!({ "file_path": "../../etc/passwd" }))
            .await;
        assert!(r.is_error);
        assert!(r.output.starts_with("Error:"));
    }

    #[tokio::test]
    async fn execute_reports_exit_code_as_error() {
        let tmp = TempDir::new().unwrap();
        let backend = local_backend(&tmp);
        let tool = ExecuteTool::new(backend);
        let ctx = ToolContext::new("t", "u");

        let ok = tool
            .execute(&ctx, serde_json::json!({ "command": "echo fine" }))
            .await;
        assert!(!ok.is_error);
        assert_eq!(ok.output, "fine");

        let bad = tool
            .execute(&ctx, serde_json::json!({ "command": "exit 2" }))
            .await;
        assert!(bad.is_error);
    }

    #[tokio::test]
    async fn grep_and_glob_format_matches() {
        let tmp = TempDir::new().unwrap();
        let backend = local_backend(&tmp);
        let fs = backend.fs().unwrap();
        fs.write_file("src/lib.rs", "pub fn alpha() {}\n").await.unwrap();

        let ctx = ToolContext::new("t", "u");
        let grep = GrepTool::new(fs.clone());
        let r = grep
            .execute(&ctx, serde_json::json!({ "pattern": "alpha" }))
            .await;
        assert!(r.output.contains("src/lib.rs:1:"));

        let glob = GlobTool::new(fs);
        let r = glob
            .execute(&ctx, serde_json::json!({ "pattern": "**/*.rs" }))
            .await;
        assert_eq!(r.output, "src/lib.rs");
    }
}
