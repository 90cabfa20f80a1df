/// Shared error type used across all wick crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("backend: {0}")]
    Backend(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for errors worth surfacing to the model as retryable
    /// (network hiccups, 5xx upstreams).
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Http(_) | Error::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
