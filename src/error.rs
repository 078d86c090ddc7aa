//! Runner error types
//!
//! Structured error handling for every runner operation, following the
//! taxonomy of setup / transient / fatal / observer / checkpoint errors.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for runner operations.
pub type RunnerResult<T> = Result<T, RunnerError>;

/// Errors that can occur during runner operations.
#[derive(Error, Debug)]
pub enum RunnerError {
    /// Agent-context or skill file has exactly one of the two hook markers.
    #[error("corrupt markers in {path}: exactly one of the start/end markers is present")]
    CorruptMarkers { path: PathBuf },

    /// Neither hook marker is present and `agentsMode` is `fail`.
    #[error("hook block missing from {path}")]
    HookMissing { path: PathBuf },

    /// Checkpoint file exists but failed to parse as JSON.
    #[error("corrupt checkpoint at {path}: {source}")]
    CorruptCheckpoint {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The external task store failed to answer a call.
    #[error("task store error: {message}")]
    TaskStore { message: String },

    /// A runtime knob was given an invalid value.
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RunnerError {
    pub fn corrupt_markers(path: impl Into<PathBuf>) -> Self {
        Self::CorruptMarkers { path: path.into() }
    }

    pub fn hook_missing(path: impl Into<PathBuf>) -> Self {
        Self::HookMissing { path: path.into() }
    }

    pub fn corrupt_checkpoint(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::CorruptCheckpoint {
            path: path.into(),
            source,
        }
    }

    pub fn task_store(message: impl Into<String>) -> Self {
        Self::TaskStore {
            message: message.into(),
        }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Whether the runner should refuse to start at all for this error, as
    /// opposed to surfacing it mid-run.
    pub fn is_setup_fatal(&self) -> bool {
        matches!(self, Self::CorruptMarkers { .. } | Self::HookMissing { .. })
    }
}
