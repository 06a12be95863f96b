//! Project catalog: resolve a project by name or directory and load its
//! `.worksite.yaml` definition.
//!
//! Resolution never writes. A project found by discovery is returned with
//! `discovered = true`; the caller registers it in the same registry
//! transaction that first uses it.

use std::path::{Path, PathBuf};

use crate::codec;
use crate::error::{ConfigError, RegistryError};
use crate::paths::definition_path;
use crate::types::{Project, ProjectDefinition, ProjectName, Registry};

/// Outcome of a catalog lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub project: Project,
    /// `true` when the project is not yet in the registry.
    pub discovered: bool,
}

/// Resolve `identifier` as a registered project name, else as a directory
/// holding a project definition.
pub fn resolve(registry: &Registry, identifier: &str) -> Result<Resolved, RegistryError> {
    if let Some(project) = registry.project(&ProjectName::from(identifier)) {
        return Ok(Resolved {
            project: project.clone(),
            discovered: false,
        });
    }

    let dir = Path::new(identifier);
    if dir.is_dir() && definition_path(dir).is_file() {
        return discover(registry, dir);
    }

    Err(RegistryError::ProjectNotFound {
        identifier: identifier.to_owned(),
    })
}

/// Resolve the project that contains `dir`.
///
/// The registered project with the deepest root above `dir` wins; otherwise
/// the nearest ancestor holding `.worksite.yaml` is discovered.
pub fn resolve_from_dir(registry: &Registry, dir: &Path) -> Result<Resolved, RegistryError> {
    let dir = canonical(dir);

    let registered = registry
        .projects
        .iter()
        .filter(|p| dir.starts_with(&p.root_directory) || dir.starts_with(canonical(&p.root_directory)))
        .max_by_key(|p| p.root_directory.components().count());
    if let Some(project) = registered {
        return Ok(Resolved {
            project: project.clone(),
            discovered: false,
        });
    }

    match dir.ancestors().find(|a| definition_path(a).is_file()) {
        Some(root) => discover(registry, root),
        None => Err(RegistryError::ProjectNotFound {
            identifier: dir.display().to_string(),
        }),
    }
}

fn discover(registry: &Registry, dir: &Path) -> Result<Resolved, RegistryError> {
    let root = dir
        .canonicalize()
        .map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    let definition = load_definition_at(&root)?;

    match registry.project(&definition.name) {
        Some(existing) if existing.root_directory == root => Ok(Resolved {
            project: existing.clone(),
            discovered: false,
        }),
        Some(existing) => Err(RegistryError::DuplicateProject {
            name: definition.name,
            existing_root: existing.root_directory.clone(),
        }),
        None => {
            tracing::debug!("discovered project '{}' at {}", definition.name, root.display());
            Ok(Resolved {
                project: Project::new(definition.name, root).into_auto_registered(),
                discovered: true,
            })
        }
    }
}

/// Load `<project.root_directory>/.worksite.yaml`.
pub fn load_definition(project: &Project) -> Result<ProjectDefinition, RegistryError> {
    let definition = load_definition_at(&project.root_directory)?;
    if definition.name != project.name {
        tracing::warn!(
            "{} names the project '{}' but it is registered as '{}'",
            definition_path(&project.root_directory).display(),
            definition.name,
            project.name
        );
    }
    Ok(definition)
}

/// Load the definition file in `root`, without registry context.
pub fn load_definition_at(root: &Path) -> Result<ProjectDefinition, ConfigError> {
    let path = definition_path(root);
    let bytes = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::MissingProjectConfig { path });
        }
        Err(source) => return Err(ConfigError::Io { path, source }),
    };
    let definition = codec::decode_definition(&bytes).map_err(|e| e.at(&path))?;
    codec::warn_unknown_fields(definition.unknown_fields(), &path);
    Ok(definition)
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
