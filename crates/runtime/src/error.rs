//! Container runtime error types.

use {std::time::Duration, thiserror::Error, warmbox_common::ErrorKind};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("{command} failed (exit code {exit_code}): {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("{command} timed out after {}s", timeout.as_secs())]
    Timeout { command: String, timeout: Duration },

    #[error("failed to spawn {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("invalid work directory {path}: {reason}")]
    InvalidWorkDir { path: String, reason: String },

    #[error("unexpected runtime output: {0}")]
    InvalidOutput(String),
}

impl RuntimeError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthorized(_) => ErrorKind::Authorization,
            Self::InvalidWorkDir { .. } => ErrorKind::Validation,
            Self::CommandFailed { .. }
            | Self::Timeout { .. }
            | Self::Spawn { .. }
            | Self::InvalidOutput(_) => ErrorKind::ExternalService,
        }
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
