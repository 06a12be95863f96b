//! File-backed workspace registry.
//!
//! # Storage layout
//!
//! See [`crate::paths`]. One YAML document holds every project and workspace.
//!
//! # Transaction protocol
//!
//! Every mutation is a full transaction against the file, never against a
//! cached copy, because any number of other `worksite` processes may have
//! written since this one started:
//!
//! 1. take an exclusive advisory lock on `registry.yaml.lock` (bounded wait)
//! 2. read + decode `registry.yaml` (missing file = empty registry)
//! 3. apply the mutation in memory
//! 4. if anything changed: write `registry.yaml.tmp` → fsync → `chmod 0600` → `rename`
//! 5. release the lock (drop)
//!
//! A failed mutation writes nothing, so the file stays byte-identical.
//! Reads (`load`, `list`) take no lock; `rename` guarantees they see either
//! the old or the new document.
//!
//! # API pattern
//!
//! - `RegistryStore::at(home)`: explicit home; used in tests with `TempDir`
//! - `RegistryStore::open()`: derives home from `dirs::home_dir()`

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::codec;
use crate::error::{io_err, RegistryError};
use crate::paths;
use crate::settings::DEFAULT_LOCK_TIMEOUT_MS;
use crate::types::{Project, ProjectName, Registry, Workspace, WorkspaceName};

const LOCK_BACKOFF_START: Duration = Duration::from_millis(5);
const LOCK_BACKOFF_MAX: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// 1. Lock
// ---------------------------------------------------------------------------

/// Exclusive advisory lock on the registry. Released on drop.
#[derive(Debug)]
pub struct RegistryLock {
    file: File,
    path: PathBuf,
}

impl RegistryLock {
    /// Poll for the lock until `timeout` elapses, then fail with `RegistryBusy`.
    pub fn acquire(lock_path: &Path, timeout: Duration) -> Result<Self, RegistryError> {
        if let Some(dir) = lock_path.parent() {
            ensure_dir(dir)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(lock_path)
            .map_err(|e| io_err(lock_path, e))?;

        let started = Instant::now();
        let mut backoff = LOCK_BACKOFF_START;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    tracing::debug!(
                        "acquired registry lock {} after {:?}",
                        lock_path.display(),
                        started.elapsed()
                    );
                    return Ok(Self {
                        file,
                        path: lock_path.to_path_buf(),
                    });
                }
                Err(e) if is_contended(&e) => {
                    let waited = started.elapsed();
                    if waited >= timeout {
                        return Err(RegistryError::RegistryBusy {
                            path: lock_path.to_path_buf(),
                            waited,
                        });
                    }
                    sleep(backoff.min(timeout - waited));
                    backoff = (backoff * 2).min(LOCK_BACKOFF_MAX);
                }
                Err(e) => return Err(io_err(lock_path, e)),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RegistryLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!("failed to release registry lock {}: {e}", self.path.display());
        }
    }
}

fn is_contended(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

// ---------------------------------------------------------------------------
// 2. Store
// ---------------------------------------------------------------------------

/// Handle on the durable registry file. Holds no registry state itself.
#[derive(Debug, Clone)]
pub struct RegistryStore {
    path: PathBuf,
    lock_timeout: Duration,
}

impl RegistryStore {
    /// Store at `<home>/.worksite/registry.yaml`.
    pub fn at(home: &Path) -> Self {
        Self::with_path(paths::registry_path(home))
    }

    /// `at` convenience wrapper.
    pub fn open() -> Result<Self, RegistryError> {
        Ok(Self::at(&paths::home()?))
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock(&self) -> Result<RegistryLock, RegistryError> {
        RegistryLock::acquire(&paths::lock_path(&self.path), self.lock_timeout)
    }

    /// Point-in-time snapshot. Takes no lock.
    pub fn load(&self) -> Result<Registry, RegistryError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Registry::default()),
            Err(e) => return Err(io_err(&self.path, e)),
        };
        let registry = codec::decode_registry(&bytes).map_err(|e| e.at(&self.path))?;
        codec::warn_unknown_fields(registry.unknown_fields(), &self.path);
        Ok(registry)
    }

    pub fn list(&self) -> Result<Vec<Workspace>, RegistryError> {
        Ok(self.load()?.workspaces)
    }

    /// Run `f` against the current on-disk registry under the lock.
    ///
    /// The document is written back only if `f` succeeds and changed it.
    pub fn transact<T, E>(&self, f: impl FnOnce(&mut Registry) -> Result<T, E>) -> Result<T, E>
    where
        E: From<RegistryError>,
    {
        let _lock = self.lock()?;
        let mut registry = self.load()?;
        let before = registry.clone();
        let out = f(&mut registry)?;
        if registry == before {
            tracing::debug!("registry unchanged; skipping write");
        } else if registry == Registry::default() {
            self.clear()?;
        } else {
            self.persist(&registry)?;
        }
        Ok(out)
    }

    pub fn insert(&self, workspace: Workspace) -> Result<(), RegistryError> {
        tracing::debug!("insert workspace {}/{}", workspace.project, workspace.name);
        self.transact(|reg| reg.insert_workspace(workspace))
    }

    /// Apply `mutator` to an existing workspace and persist. Returns the updated record.
    ///
    /// `mutator` must not change the workspace's project or name.
    pub fn update(
        &self,
        project: &ProjectName,
        name: &WorkspaceName,
        mutator: impl FnOnce(&mut Workspace),
    ) -> Result<Workspace, RegistryError> {
        self.transact(|reg| {
            let ws = reg
                .workspace_mut(project, name)
                .ok_or_else(|| RegistryError::WorkspaceNotFound {
                    project: Some(project.clone()),
                    name: name.clone(),
                })?;
            mutator(&mut *ws);
            debug_assert!(ws.is(project, name), "update must not change identity");
            Ok(ws.clone())
        })
    }

    pub fn remove(
        &self,
        project: &ProjectName,
        name: &WorkspaceName,
    ) -> Result<Workspace, RegistryError> {
        tracing::debug!("remove workspace {project}/{name}");
        self.transact(|reg| reg.remove_workspace(project, name))
    }

    /// Register `project`. Idempotent for an identical root.
    pub fn upsert_project(&self, project: Project) -> Result<bool, RegistryError> {
        self.transact(|reg| reg.upsert_project(project))
    }

    /// Drop `name` from the catalog. Its workspaces stay registered and are
    /// returned so the caller can report them as orphaned.
    pub fn remove_project(
        &self,
        name: &ProjectName,
    ) -> Result<(Project, Vec<Workspace>), RegistryError> {
        self.transact(|reg| {
            let idx = reg
                .projects
                .iter()
                .position(|p| &p.name == name)
                .ok_or_else(|| RegistryError::ProjectNotFound {
                    identifier: name.0.clone(),
                })?;
            let project = reg.projects.remove(idx);
            let orphans: Vec<Workspace> = reg.workspaces_of(name).cloned().collect();
            Ok((project, orphans))
        })
    }

    // -----------------------------------------------------------------------
    // 3. Save (atomic)
    // -----------------------------------------------------------------------

    /// Write flow: encode → `.tmp` sibling → fsync → `chmod 0600` → `rename`.
    ///
    /// Callers must hold the lock; use [`RegistryStore::transact`].
    /// An empty registry is stored as no file at all, the same state a
    /// fresh home starts in.
    fn clear(&self) -> Result<(), RegistryError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_err(&self.path, e)),
        }
        if let Some(dir) = self.path.parent() {
            sync_dir(dir);
        }
        tracing::debug!("registry {} is empty; removed", self.path.display());
        Ok(())
    }

    fn persist(&self, registry: &Registry) -> Result<(), RegistryError> {
        let dir = self
            .path
            .parent()
            .ok_or_else(|| io_err(&self.path, std::io::Error::other("registry path has no parent")))?;
        ensure_dir(dir)?;

        let bytes = codec::encode_registry(registry)?;
        let tmp = paths::tmp_path(&self.path);
        let result = write_synced(&tmp, &bytes)
            .and_then(|()| set_file_permissions(&tmp))
            .and_then(|()| std::fs::rename(&tmp, &self.path).map_err(|e| io_err(&self.path, e)));
        if let Err(e) = result {
            let _ = std::fs::remove_file(&tmp);
            return Err(e);
        }
        sync_dir(dir);
        tracing::debug!(
            "wrote registry {} ({} projects, {} workspaces)",
            self.path.display(),
            registry.projects.len(),
            registry.workspaces.len()
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn write_synced(path: &Path, bytes: &[u8]) -> Result<(), RegistryError> {
    let mut file = File::create(path).map_err(|e| io_err(path, e))?;
    file.write_all(bytes).map_err(|e| io_err(path, e))?;
    file.sync_all().map_err(|e| io_err(path, e))
}

fn ensure_dir(dir: &Path) -> Result<(), RegistryError> {
    if !dir.exists() {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        set_dir_permissions(dir)?;
    }
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
        tracing::debug!("could not fsync {}: {e}", dir.display());
    }
}
#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), RegistryError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), RegistryError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), RegistryError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), RegistryError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
