//! Storage layout.
//!
//! ```text
//! ~/.worksite/              (mode 0700)
//!   registry.yaml           (mode 0600)
//!   registry.yaml.lock      (advisory lock target, never holds data)
//!   registry.yaml.tmp       (only exists mid-write or after a crash)
//!   settings.yaml           (optional, user-edited)
//! ```

use std::path::{Path, PathBuf};

use crate::error::RegistryError;

pub const REGISTRY_FILE: &str = "registry.yaml";
pub const SETTINGS_FILE: &str = "settings.yaml";
pub const PROJECT_DEFINITION_FILE: &str = ".worksite.yaml";

pub fn home() -> Result<PathBuf, RegistryError> {
    dirs::home_dir().ok_or(RegistryError::HomeNotFound)
}

pub fn worksite_root(home: &Path) -> PathBuf {
    home.join(".worksite")
}

pub fn registry_path(home: &Path) -> PathBuf {
    worksite_root(home).join(REGISTRY_FILE)
}

pub fn settings_path(home: &Path) -> PathBuf {
    worksite_root(home).join(SETTINGS_FILE)
}

/// `<registry>.lock`, next to the registry so both share a filesystem.
pub fn lock_path(registry: &Path) -> PathBuf {
    sibling(registry, "lock")
}

pub fn tmp_path(registry: &Path) -> PathBuf {
    sibling(registry, "tmp")
}

pub fn definition_path(project_root: &Path) -> PathBuf {
    project_root.join(PROJECT_DEFINITION_FILE)
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}
