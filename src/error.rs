//! Typed error kinds for the monitor core.
//!
//! Leaf modules return `Result<T, MonitorError>` so that the orchestrator and
//! the CLI boundary can match on kind and apply the propagation policy: most
//! kinds degrade the current cycle (logged and counted), a few abort the run.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("invalid configuration: {0}")]
    ConfigError(String),

    #[error("journal root is not readable: {path}")]
    RootUnreadable { path: PathBuf },

    #[error("failed to parse {path}:{line}: {reason}")]
    FileParseError {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("cache file corrupt: {path}")]
    CacheCorrupt { path: PathBuf },

    #[error("no pricing entry for model `{model}` token kind `{kind}`")]
    PricingNotFound { model: String, kind: String },

    #[error("pricing provider `{provider}` unavailable: {reason}")]
    PricingUnavailable { provider: String, reason: String },

    #[error("window history corrupt: {path}")]
    HistoryCorrupt { path: PathBuf },

    #[error("interrupted")]
    Interrupted,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MonitorError>;

impl MonitorError {
    /// Whether this error aborts the run rather than degrading the current
    /// cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MonitorError::ConfigError(_)
                | MonitorError::RootUnreadable { .. }
                | MonitorError::Interrupted
        )
    }

    /// Process exit code for a fatal top-level error.
    pub fn exit_code(&self) -> i32 {
        match self {
            MonitorError::ConfigError(_) => 2,
            MonitorError::RootUnreadable { .. } => 3,
            MonitorError::Interrupted => 130,
            _ => 1,
        }
    }
}
