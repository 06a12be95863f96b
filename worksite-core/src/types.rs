//! Domain types for the worksite registry and project definitions.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem paths.
//! All document types carry a flattened `extra` map so fields written by a
//! newer worksite survive a load/save cycle untouched.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

/// Current on-disk registry format version.
pub const REGISTRY_VERSION: u32 = 1;

/// Directory under a project root that holds every worktree of that project.
pub const WORKTREES_DIR: &str = "worktrees";

/// Unknown keys preserved verbatim across decode/encode.
pub type ExtraFields = BTreeMap<String, serde_yaml::Value>;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed name for a registered project.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProjectName(pub String);

impl fmt::Display for ProjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ProjectName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ProjectName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A strongly-typed name for a workspace inside a project.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkspaceName(pub String);

impl fmt::Display for WorkspaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for WorkspaceName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for WorkspaceName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Check that `name` can be used as a single path component and a branch name.
pub fn validate_name(name: &str) -> Result<(), RegistryError> {
    let reason = if name.is_empty() {
        Some("must not be empty")
    } else if name == "." || name == ".." {
        Some("must not be '.' or '..'")
    } else if name.starts_with('-') {
        Some("must not start with '-'")
    } else if name.contains(['/', '\\']) {
        Some("must not contain path separators")
    } else if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        Some("must not contain whitespace or control characters")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(RegistryError::InvalidName {
            name: name.to_owned(),
            reason,
        }),
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Registry documents
// ---------------------------------------------------------------------------

/// A version-controlled repository that owns zero or more workspaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub name: ProjectName,
    /// Absolute path to the repository root on disk.
    pub root_directory: PathBuf,
    /// Registered implicitly by the first `create` that used it. Such a
    /// project leaves the catalog together with its last workspace.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub auto_registered: bool,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl Project {
    pub fn new(name: impl Into<ProjectName>, root_directory: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root_directory: root_directory.into(),
            auto_registered: false,
            extra: ExtraFields::new(),
        }
    }

    /// A project found by discovery rather than `project add`.
    pub fn into_auto_registered(mut self) -> Self {
        self.auto_registered = true;
        self
    }

    /// `<root>/worktrees/`
    pub fn worktrees_dir(&self) -> PathBuf {
        self.root_directory.join(WORKTREES_DIR)
    }
}

/// `<root>/worktrees/<project>-<name>`, the only place a workspace path is derived.
pub fn worktree_path(project: &Project, name: &WorkspaceName) -> PathBuf {
    project
        .worktrees_dir()
        .join(format!("{}-{}", project.name, name))
}

/// Inverse of [`worktree_path`] for the repository root: `<path>/../..`.
///
/// Used when a workspace outlived its project's catalog entry.
pub fn project_root_of(workspace_path: &Path) -> Option<&Path> {
    workspace_path.parent().and_then(Path::parent)
}

/// An isolated checkout of a project plus its last known infra state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub project: ProjectName,
    pub name: WorkspaceName,
    pub path: PathBuf,
    /// Last successful infra transition. Not verified against real containers.
    pub started: bool,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl Workspace {
    /// A stopped workspace at the derived path for `(project, name)`.
    pub fn new(project: &Project, name: WorkspaceName) -> Self {
        Self {
            project: project.name.clone(),
            path: worktree_path(project, &name),
            name,
            started: false,
            created_at: Utc::now(),
            extra: ExtraFields::new(),
        }
    }

    pub fn is(&self, project: &ProjectName, name: &WorkspaceName) -> bool {
        &self.project == project && &self.name == name
    }
}

/// Root of the global registry document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    pub version: u32,
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub workspaces: Vec<Workspace>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            version: REGISTRY_VERSION,
            projects: Vec::new(),
            workspaces: Vec::new(),
            extra: ExtraFields::new(),
        }
    }
}

impl Registry {
    pub fn project(&self, name: &ProjectName) -> Option<&Project> {
        self.projects.iter().find(|p| &p.name == name)
    }

    pub fn workspace(&self, project: &ProjectName, name: &WorkspaceName) -> Option<&Workspace> {
        self.workspaces.iter().find(|w| w.is(project, name))
    }

    pub fn workspace_mut(
        &mut self,
        project: &ProjectName,
        name: &WorkspaceName,
    ) -> Option<&mut Workspace> {
        self.workspaces.iter_mut().find(|w| w.is(project, name))
    }

    /// All workspaces called `name`, across projects.
    pub fn workspaces_named<'a>(
        &'a self,
        name: &WorkspaceName,
    ) -> impl Iterator<Item = &'a Workspace> + 'a {
        let name = name.clone();
        self.workspaces.iter().filter(move |w| w.name == name)
    }

    pub fn workspaces_of<'a>(
        &'a self,
        project: &'a ProjectName,
    ) -> impl Iterator<Item = &'a Workspace> + 'a {
        self.workspaces.iter().filter(move |w| &w.project == project)
    }

    /// Append `workspace`; fails if its `(project, name)` is taken.
    pub fn insert_workspace(&mut self, workspace: Workspace) -> Result<(), RegistryError> {
        if self.workspace(&workspace.project, &workspace.name).is_some() {
            return Err(RegistryError::DuplicateWorkspace {
                project: workspace.project,
                name: workspace.name,
            });
        }
        self.workspaces.push(workspace);
        Ok(())
    }

    pub fn remove_workspace(
        &mut self,
        project: &ProjectName,
        name: &WorkspaceName,
    ) -> Result<Workspace, RegistryError> {
        let idx = self
            .workspaces
            .iter()
            .position(|w| w.is(project, name))
            .ok_or_else(|| RegistryError::WorkspaceNotFound {
                project: Some(project.clone()),
                name: name.clone(),
            })?;
        let removed = self.workspaces.remove(idx);
        self.release_auto_registered(project);
        Ok(removed)
    }

    /// Drop `project` if it was registered implicitly and owns no workspace.
    fn release_auto_registered(&mut self, project: &ProjectName) {
        if self.workspaces_of(project).next().is_some() {
            return;
        }
        if let Some(idx) = self
            .projects
            .iter()
            .position(|p| &p.name == project && p.auto_registered)
        {
            let dropped = self.projects.remove(idx);
            tracing::info!(
                "unregistered project '{}' with its last workspace",
                dropped.name
            );
        }
    }

    /// Register `project`, or confirm it is already registered at the same root.
    ///
    /// Registering explicitly a project that was auto-registered makes it
    /// permanent. Returns `true` when the registry changed.
    pub fn upsert_project(&mut self, project: Project) -> Result<bool, RegistryError> {
        let Some(idx) = self.projects.iter().position(|p| p.name == project.name) else {
            self.projects.push(project);
            return Ok(true);
        };
        let existing = &mut self.projects[idx];
        if existing.root_directory != project.root_directory {
            return Err(RegistryError::DuplicateProject {
                name: project.name,
                existing_root: existing.root_directory.clone(),
            });
        }
        if existing.auto_registered && !project.auto_registered {
            existing.auto_registered = false;
            return Ok(true);
        }
        Ok(false)
    }

    /// Dotted paths of every unknown key in the document, e.g. `projects[0].color`.
    pub fn unknown_fields(&self) -> Vec<String> {
        let mut out: Vec<String> = self.extra.keys().cloned().collect();
        for (i, p) in self.projects.iter().enumerate() {
            out.extend(p.extra.keys().map(|k| format!("projects[{i}].{k}")));
        }
        for (i, w) in self.workspaces.iter().enumerate() {
            out.extend(w.extra.keys().map(|k| format!("workspaces[{i}].{k}")));
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Project definition (`<root>/.worksite.yaml`)
// ---------------------------------------------------------------------------

/// Agent launch commands for a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCommands {
    /// Agent granted write access to the checkout.
    pub primary: String,
    /// Agent restricted to read-only tools, if the project defines one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readonly: Option<String>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// Per-project definition, owned by the project's repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectDefinition {
    pub name: ProjectName,
    /// Named shell commands. `start` and `stop` are required.
    pub infra: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentCommands>,
    /// Run `infra.start` right after `create`.
    #[serde(default, skip_serializing_if = "is_false")]
    pub auto_start: bool,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

pub const INFRA_START: &str = "start";
pub const INFRA_STOP: &str = "stop";

impl ProjectDefinition {
    pub fn infra_command(&self, name: &str) -> Option<&str> {
        self.infra.get(name).map(String::as_str)
    }

    pub fn start_command(&self) -> &str {
        self.infra_command(INFRA_START).unwrap_or_default()
    }

    pub fn stop_command(&self) -> &str {
        self.infra_command(INFRA_STOP).unwrap_or_default()
    }

    pub fn unknown_fields(&self) -> Vec<String> {
        let mut out: Vec<String> = self.extra.keys().cloned().collect();
        if let Some(agent) = &self.agent {
            out.extend(agent.extra.keys().map(|k| format!("agent.{k}")));
        }
        out
    }
}

fn is_false(v: &bool) -> bool {
    !*v
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
