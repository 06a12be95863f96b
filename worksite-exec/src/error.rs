//! Error types for worksite-exec.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use worksite_core::ErrorKind;

/// All errors that can arise while running external tools.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The process could not be started at all (missing binary, bad cwd, ...).
    #[error("failed to spawn `{program}` in {cwd}: {source}")]
    SpawnFailed {
        program: String,
        cwd: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The child outlived its deadline and was killed.
    #[error("command `{command}` timed out after {}s and was killed", .timeout.as_secs_f64())]
    CommandTimedOut { command: String, timeout: Duration },

    #[error("could not create worktree at {path}: {message}")]
    WorktreeCreateFailed { path: PathBuf, message: String },

    #[error("could not remove worktree at {path}: {message}")]
    WorktreeDestroyFailed { path: PathBuf, message: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ExecError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ExternalTool
    }
}

/// Convenience constructor for [`ExecError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ExecError {
    ExecError::Io {
        path: path.into(),
        source,
    }
}
