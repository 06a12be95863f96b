//! Error types for worksite-core.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::types::{ProjectName, WorkspaceName};

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

/// Coarse classification shared by every worksite error type.
///
/// The CLI maps each kind to a distinct process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Config,
    Lookup,
    Conflict,
    Concurrency,
    ExternalTool,
    PartialFailure,
}

impl ErrorKind {
    /// Process exit code for this kind. `Concurrency` uses `EX_TEMPFAIL`.
    pub fn exit_code(self) -> u8 {
        match self {
            ErrorKind::Config => 3,
            ErrorKind::Lookup => 4,
            ErrorKind::Conflict => 5,
            ErrorKind::ExternalTool => 6,
            ErrorKind::PartialFailure => 7,
            ErrorKind::Concurrency => 75,
        }
    }

    /// Only lock contention is worth retrying with backoff.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Concurrency)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::Config => "config",
            ErrorKind::Lookup => "lookup",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Concurrency => "concurrency",
            ErrorKind::ExternalTool => "external tool",
            ErrorKind::PartialFailure => "partial failure",
        };
        f.write_str(label)
    }
}

// ---------------------------------------------------------------------------
// Config documents
// ---------------------------------------------------------------------------

/// Failures reading or decoding one of the YAML documents.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file is not syntactically valid YAML.
    #[error("malformed config at {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// Valid YAML, but required fields are missing or have the wrong shape.
    #[error("invalid config at {path}: {message}")]
    Schema { path: PathBuf, message: String },

    /// No `.worksite.yaml` in the project root.
    #[error("project config not found at {path}")]
    MissingProjectConfig { path: PathBuf },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML serialization error: {0}")]
    Encode(#[from] serde_yaml::Error),
}

// ---------------------------------------------------------------------------
// Registry and catalog
// ---------------------------------------------------------------------------

/// All errors that can arise from registry and catalog operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `dirs::home_dir()` returned `None`, so we cannot locate `~/.worksite/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    #[error("invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("project '{identifier}' not found: not a registered name and no .worksite.yaml there")]
    ProjectNotFound { identifier: String },

    #[error("workspace '{name}' not found{}", project_suffix(.project))]
    WorkspaceNotFound {
        project: Option<ProjectName>,
        name: WorkspaceName,
    },

    #[error("workspace '{name}' exists in several projects ({}); pass --project", join_names(.projects))]
    AmbiguousWorkspace {
        name: WorkspaceName,
        projects: Vec<ProjectName>,
    },

    #[error("workspace '{name}' already exists in project '{project}'")]
    DuplicateWorkspace {
        project: ProjectName,
        name: WorkspaceName,
    },

    #[error("project '{name}' is already registered at {existing_root}")]
    DuplicateProject {
        name: ProjectName,
        existing_root: PathBuf,
    },

    /// The registry lock was not acquired in time. Safe to retry.
    #[error("registry at {path} is busy (lock not acquired within {}ms)", .waited.as_millis())]
    RegistryBusy { path: PathBuf, waited: Duration },
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::Config(_)
            | RegistryError::HomeNotFound
            | RegistryError::InvalidName { .. } => ErrorKind::Config,
            RegistryError::Io { .. } => ErrorKind::ExternalTool,
            RegistryError::ProjectNotFound { .. }
            | RegistryError::WorkspaceNotFound { .. }
            | RegistryError::AmbiguousWorkspace { .. } => ErrorKind::Lookup,
            RegistryError::DuplicateWorkspace { .. } | RegistryError::DuplicateProject { .. } => {
                ErrorKind::Conflict
            }
            RegistryError::RegistryBusy { .. } => ErrorKind::Concurrency,
        }
    }
}

fn project_suffix(project: &Option<ProjectName>) -> String {
    match project {
        Some(p) => format!(" in project '{p}'"),
        None => String::new(),
    }
}

fn join_names(projects: &[ProjectName]) -> String {
    projects
        .iter()
        .map(|p| p.0.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Convenience constructor for [`RegistryError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RegistryError {
    RegistryError::Io {
        path: path.into(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_is_the_only_retryable_kind() {
        let busy = RegistryError::RegistryBusy {
            path: PathBuf::from("/tmp/registry.yaml"),
            waited: Duration::from_millis(250),
        };
        assert!(busy.kind().is_retryable());
        assert_eq!(busy.kind().exit_code(), 75);
        assert!(busy.to_string().contains("250ms"));

        let missing = RegistryError::WorkspaceNotFound {
            project: None,
            name: WorkspaceName::from("x"),
        };
        assert!(!missing.kind().is_retryable());
    }

    #[test]
    fn workspace_not_found_mentions_project_when_known() {
        let err = RegistryError::WorkspaceNotFound {
            project: Some(ProjectName::from("my-app")),
            name: WorkspaceName::from("feature-x"),
        };
        assert_eq!(
            err.to_string(),
            "workspace 'feature-x' not found in project 'my-app'"
        );
    }

    #[test]
    fn ambiguous_lists_projects() {
        let err = RegistryError::AmbiguousWorkspace {
            name: WorkspaceName::from("fix"),
            projects: vec![ProjectName::from("a"), ProjectName::from("b")],
        };
        assert!(err.to_string().contains("a, b"));
        assert_eq!(err.kind(), ErrorKind::Lookup);
    }
}
