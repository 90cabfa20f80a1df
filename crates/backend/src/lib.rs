//! Workspace backends: where an agent's shell and filesystem tools run.
//!
//! Three variants share one capability surface ([`Backend`]):
//! - `state` — chat-only, every operation errors;
//! - `local` — commands run on the host under a per-user workdir;
//! - `docker` — commands run inside a named container, preferring a
//!   persistent in-container daemon over `docker exec` when available.

pub mod backend;
pub mod daemon;
pub mod docker;
pub mod fs;
pub mod local;
pub mod state;

pub use backend::{
    assemble_output, resolve_path, truncate_output, Backend, ContainerStatus, DownloadResult,
    ExecResult, TransferResult,
};
pub use docker::DockerBackend;
pub use fs::{EditOutcome, FileSystem, FsEntry, GrepMatch, LocalFs, RemoteFs};
pub use local::LocalBackend;
pub use state::StateBackend;

use std::sync::Arc;

use wick_domain::config::{BackendCfg, BackendKind};
use wick_domain::Result;

/// Build a backend from config. Local backends scope their workdir per
/// user (`{configured}/{username}`); docker backends start idle and launch
/// their container asynchronously on first use.
pub fn build_backend(id: &str, cfg: &BackendCfg, user: &str) -> Result<Arc<dyn Backend>> {
    match cfg.kind {
        BackendKind::State => Ok(Arc::new(StateBackend::new(id))),
        BackendKind::Local => Ok(Arc::new(LocalBackend::new(id, cfg, user)?)),
        BackendKind::Docker => Ok(Arc::new(DockerBackend::new(id, cfg, user)?)),
    }
}
