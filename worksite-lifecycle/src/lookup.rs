//! Find a workspace by name when the project may be omitted.

use std::path::{Path, PathBuf};

use worksite_core::types::project_root_of;
use worksite_core::{ProjectName, Registry, RegistryError, Workspace, WorkspaceName};

/// Locate `(project, name)`.
///
/// With `project`, the exact pair. Without it, the only workspace called
/// `name`; if several projects have one, the project containing `cwd` wins,
/// otherwise the lookup is ambiguous.
pub fn find_workspace<'a>(
    registry: &'a Registry,
    project: Option<&ProjectName>,
    name: &WorkspaceName,
    cwd: Option<&Path>,
) -> Result<&'a Workspace, RegistryError> {
    if let Some(project) = project {
        return registry
            .workspace(project, name)
            .ok_or_else(|| RegistryError::WorkspaceNotFound {
                project: Some(project.clone()),
                name: name.clone(),
            });
    }

    let candidates: Vec<&Workspace> = registry.workspaces_named(name).collect();
    match candidates.as_slice() {
        [] => Err(RegistryError::WorkspaceNotFound {
            project: None,
            name: name.clone(),
        }),
        [only] => Ok(*only),
        many => {
            let here: Vec<&Workspace> = match cwd {
                Some(cwd) => {
                    let cwd = canonical(cwd);
                    many.iter()
                        .copied()
                        .filter(|ws| {
                            root_of(registry, ws).is_some_and(|root| {
                                cwd.starts_with(&root) || cwd.starts_with(canonical(&root))
                            })
                        })
                        .collect()
                }
                None => Vec::new(),
            };
            match here.as_slice() {
                [one] => {
                    tracing::debug!("'{name}' resolved to project '{}' from cwd", one.project);
                    Ok(*one)
                }
                _ => Err(RegistryError::AmbiguousWorkspace {
                    name: name.clone(),
                    projects: many.iter().map(|ws| ws.project.clone()).collect(),
                }),
            }
        }
    }
}

/// Repository root of `ws`: its project's root, or for an orphan the root
/// recovered from the workspace path.
pub fn root_of(registry: &Registry, ws: &Workspace) -> Option<PathBuf> {
    match registry.project(&ws.project) {
        Some(project) => Some(project.root_directory.clone()),
        None => project_root_of(&ws.path).map(Path::to_path_buf),
    }
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}
