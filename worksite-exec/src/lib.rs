//! # worksite-exec
//!
//! Everything that spawns an external process.
//!
//! - [`process`]: run shell command strings with optional capture and timeout
//! - [`worktree`]: create and destroy per-workspace checkouts through a [`Vcs`]
//! - [`shell`]: quoting helpers for turning argv into a command string

pub mod error;
pub mod process;
pub mod shell;
pub mod worktree;

pub use error::ExecError;
pub use process::{CommandOutput, OutputMode, ProcessRunner, ShellCommand};
pub use worktree::{GitCli, Vcs, WorktreeManager};
