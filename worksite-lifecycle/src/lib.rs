//! # worksite-lifecycle
//!
//! The workspace state machine on top of the registry, the worktree manager
//! and the process runner. [`Orchestrator`] is the only entry point the CLI
//! uses.

pub mod error;
pub mod infra;
pub mod lookup;
pub mod orchestrator;

pub use error::{DestroyStep, LifecycleError};
pub use orchestrator::{
    CreateOutcome, CreateRequest, DestroyOutcome, Orchestrator, ProjectRemoved, ProjectView,
    StopAttempt, Transition, WorkspaceView,
};
