//! Client for the in-container `wick-daemon`.
//!
//! A persistent TCP connection that supplants `docker exec` for execution
//! speed. Each message is a single line of JSON (newline-delimited); the
//! request/response cycle is serialized so concurrent callers cannot read
//! each other's responses.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// Default port the daemon listens on inside the container.
pub const DAEMON_PORT: u16 = 7077;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("daemon I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("daemon JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("daemon connection closed")]
    Closed,

    #[error("timeout waiting for daemon response")]
    Timeout,
}

#[derive(Debug, Serialize)]
pub struct DaemonRequest<'a> {
    pub command: &'a str,
    pub workdir: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdin: Option<&'a str>,
    pub timeout_s: u64,
}

#[derive(Debug, Deserialize)]
pub struct DaemonResponse {
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub exit_code: i32,
    #[serde(default)]
    pub error: Option<String>,
}

pub struct DaemonClient {
    stream: Mutex<BufStream<TcpStream>>,
    alive: AtomicBool,
}

impl DaemonClient {
    /// Dial the daemon. Fails fast — the caller falls back to `docker exec`.
    pub async fn connect(addr: &str) -> Result<Self, DaemonError> {
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| DaemonError::Timeout)??;
        stream.set_nodelay(true)?;

        tracing::debug!(%addr, "connected to wick-daemon");

        Ok(Self {
            stream: Mutex::new(BufStream::new(stream)),
            alive: AtomicBool::new(true),
        })
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Send one framed request and wait for its response. Any transport
    /// failure marks the client dead so the backend stops preferring it.
    pub async fn send(&self, req: &DaemonRequest<'_>) -> Result<DaemonResponse, DaemonError> {
        if !self.is_alive() {
            return Err(DaemonError::Closed);
        }

        let result = self.send_inner(req).await;
        if result.is_err() {
            self.alive.store(false, Ordering::SeqCst);
        }
        result
    }

    async fn send_inner(&self, req: &DaemonRequest<'_>) -> Result<DaemonResponse, DaemonError> {
        let json = serde_json::to_string(req)?;

        // One lock across the full cycle: the connection carries exactly one
        // request at a time.
        let mut stream = self.stream.lock().await;
        stream.write_all(json.as_bytes()).await?;
        stream.write_all(b"\n").await?;
        stream.flush().await?;

        // The daemon enforces the command timeout; allow a little slack on
        // top before declaring the transport dead.
        let read_timeout = Duration::from_secs(req.timeout_s.saturating_add(5));
        let mut line = String::new();
        let read = tokio::time::timeout(read_timeout, stream.read_line(&mut line)).await;
        match read {
            Ok(Ok(0)) => Err(DaemonError::Closed),
            Ok(Ok(_)) => Ok(serde_json::from_str(line.trim())?),
            Ok(Err(e)) => Err(DaemonError::Io(e)),
            Err(_) => Err(DaemonError::Timeout),
        }
    }
}
