//! Per-workspace checkouts.
//!
//! A workspace's checkout lives at the path derived by
//! [`worksite_core::types::worktree_path`]; its branch is the workspace name.
//! The version-control tool sits behind [`Vcs`] so the lifecycle can be
//! tested without git.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use worksite_core::settings::DEFAULT_REF;
use worksite_core::{Project, WorkspaceName};

use crate::error::{io_err, ExecError};
use crate::process::best_error_line;

// ---------------------------------------------------------------------------
// 1. Collaborator
// ---------------------------------------------------------------------------

/// The version-control operations worksite relies on.
///
/// Refusals map to [`ExecError::WorktreeCreateFailed`] /
/// [`ExecError::WorktreeDestroyFailed`] carrying the tool's best error line.
pub trait Vcs {
    /// Check out `branch` at `path`, creating the branch from `reference`
    /// if it does not exist yet.
    fn create_worktree(
        &self,
        repo_root: &Path,
        path: &Path,
        branch: &str,
        reference: &str,
    ) -> Result<(), ExecError>;

    fn remove_worktree(&self, repo_root: &Path, path: &Path, force: bool) -> Result<(), ExecError>;

    /// Forget worktrees whose directories no longer exist.
    fn prune(&self, repo_root: &Path) -> Result<(), ExecError>;
}

/// [`Vcs`] backed by the `git` binary.
#[derive(Debug, Clone, Default)]
pub struct GitCli;

impl GitCli {
    fn git(&self, repo_root: &Path, args: &[&str]) -> Result<Output, ExecError> {
        tracing::debug!("git {} (in {})", args.join(" "), repo_root.display());
        Command::new("git")
            .args(args)
            .current_dir(repo_root)
            .output()
            .map_err(|source| ExecError::SpawnFailed {
                program: "git".to_string(),
                cwd: repo_root.to_path_buf(),
                source,
            })
    }

    fn branch_exists(&self, repo_root: &Path, branch: &str) -> Result<bool, ExecError> {
        let full = format!("refs/heads/{branch}");
        let out = self.git(repo_root, &["rev-parse", "--verify", "--quiet", &full])?;
        Ok(out.status.success())
    }
}

impl Vcs for GitCli {
    fn create_worktree(
        &self,
        repo_root: &Path,
        path: &Path,
        branch: &str,
        reference: &str,
    ) -> Result<(), ExecError> {
        let target = path_arg(path)?;
        let out = if self.branch_exists(repo_root, branch)? {
            self.git(repo_root, &["worktree", "add", target, branch])?
        } else {
            self.git(repo_root, &["worktree", "add", "-b", branch, target, reference])?
        };
        if !out.status.success() {
            return Err(ExecError::WorktreeCreateFailed {
                path: path.to_path_buf(),
                message: best_error_line(&String::from_utf8_lossy(&out.stderr)),
            });
        }
        Ok(())
    }

    fn remove_worktree(&self, repo_root: &Path, path: &Path, force: bool) -> Result<(), ExecError> {
        let target = path_arg(path)?;
        let mut args = vec!["worktree", "remove"];
        if force {
            args.push("--force");
        }
        args.push(target);
        let out = self.git(repo_root, &args)?;
        if !out.status.success() {
            return Err(ExecError::WorktreeDestroyFailed {
                path: path.to_path_buf(),
                message: best_error_line(&String::from_utf8_lossy(&out.stderr)),
            });
        }
        Ok(())
    }

    fn prune(&self, repo_root: &Path) -> Result<(), ExecError> {
        let out = self.git(repo_root, &["worktree", "prune"])?;
        if !out.status.success() {
            return Err(ExecError::WorktreeDestroyFailed {
                path: repo_root.to_path_buf(),
                message: best_error_line(&String::from_utf8_lossy(&out.stderr)),
            });
        }
        Ok(())
    }
}

fn path_arg(path: &Path) -> Result<&str, ExecError> {
    path.to_str().ok_or_else(|| ExecError::WorktreeCreateFailed {
        path: path.to_path_buf(),
        message: "path is not valid UTF-8".to_string(),
    })
}

// ---------------------------------------------------------------------------
// 2. Manager
// ---------------------------------------------------------------------------

/// Creates and destroys workspace checkouts at their derived paths.
#[derive(Debug, Clone, Default)]
pub struct WorktreeManager<V: Vcs = GitCli> {
    vcs: V,
}

impl<V: Vcs> WorktreeManager<V> {
    pub fn new(vcs: V) -> Self {
        Self { vcs }
    }

    pub fn vcs(&self) -> &V {
        &self.vcs
    }

    /// Check out branch `name` at `<root>/worktrees/<project>-<name>`.
    ///
    /// `reference` (default `HEAD`) is only used when the branch is new.
    pub fn create(
        &self,
        project: &Project,
        name: &WorkspaceName,
        reference: Option<&str>,
    ) -> Result<PathBuf, ExecError> {
        let path = worksite_core::types::worktree_path(project, name);
        if path.exists() {
            return Err(ExecError::WorktreeCreateFailed {
                path,
                message: "path already exists".to_string(),
            });
        }
        let dir = project.worktrees_dir();
        std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;

        let reference = reference.unwrap_or(DEFAULT_REF);
        if let Err(e) = self
            .vcs
            .create_worktree(&project.root_directory, &path, &name.0, reference)
        {
            remove_if_empty(Some(&dir));
            return Err(e);
        }
        tracing::info!("created worktree {} (branch {name})", path.display());
        Ok(path)
    }

    /// Remove the checkout at `path`.
    ///
    /// A directory that is already gone only needs the tool's bookkeeping
    /// pruned; that case always succeeds.
    pub fn destroy(&self, project_root: &Path, path: &Path, force: bool) -> Result<(), ExecError> {
        if path.exists() {
            self.vcs.remove_worktree(project_root, path, force)?;
            tracing::info!("removed worktree {}", path.display());
        } else {
            tracing::warn!(
                "worktree {} is already gone; pruning stale entries",
                path.display()
            );
            if let Err(e) = self.vcs.prune(project_root) {
                tracing::warn!("prune in {} failed: {e}", project_root.display());
            }
        }
        remove_if_empty(path.parent());
        Ok(())
    }
}

/// Drop `<root>/worktrees/` once its last checkout is gone.
fn remove_if_empty(dir: Option<&Path>) {
    let Some(dir) = dir else { return };
    let empty = std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false);
    if empty {
        match std::fs::remove_dir(dir) {
            Ok(()) => tracing::debug!("removed empty {}", dir.display()),
            Err(e) => tracing::debug!("kept {}: {e}", dir.display()),
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
