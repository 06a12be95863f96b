//! Error types for worksite-lifecycle.

use std::fmt;

use thiserror::Error;
use worksite_core::{ErrorKind, ProjectName, RegistryError, WorkspaceName};
use worksite_exec::ExecError;

/// The step a partially-destroyed workspace still needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyStep {
    /// The checkout is still on disk; the workspace stays registered.
    RemoveWorktree,
    /// The checkout is gone but the registry entry is not.
    Unregister,
}

impl fmt::Display for DestroyStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DestroyStep::RemoveWorktree => f.write_str("remove worktree"),
            DestroyStep::Unregister => f.write_str("unregister"),
        }
    }
}

/// All errors that can arise from lifecycle operations.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("destroy of '{project}/{name}' is incomplete (remaining: {remaining}): {source}")]
    DestroyIncomplete {
        project: ProjectName,
        name: WorkspaceName,
        remaining: DestroyStep,
        #[source]
        source: Box<LifecycleError>,
    },

    #[error("project '{project}' has no infra command '{command}' (available: {})", .available.join(", "))]
    UnknownInfraCommand {
        project: ProjectName,
        command: String,
        available: Vec<String>,
    },

    #[error("project '{project}' defines no {} agent command", agent_label(.readonly))]
    MissingAgentCommand { project: ProjectName, readonly: bool },
}

impl LifecycleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LifecycleError::Registry(e) => e.kind(),
            LifecycleError::Exec(e) => e.kind(),
            LifecycleError::DestroyIncomplete { .. } => ErrorKind::PartialFailure,
            LifecycleError::UnknownInfraCommand { .. }
            | LifecycleError::MissingAgentCommand { .. } => ErrorKind::Config,
        }
    }
}

fn agent_label(readonly: &bool) -> &'static str {
    if *readonly {
        "read-only"
    } else {
        "primary"
    }
}
