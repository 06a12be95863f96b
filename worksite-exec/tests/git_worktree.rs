//! `GitCli` against a real repository. Skipped when `git` is not installed.

use std::path::Path;
use std::process::Command;

use tempfile::TempDir;
use worksite_core::{Project, WorkspaceName};
use worksite_exec::process::binary_available;
use worksite_exec::{ExecError, GitCli, WorktreeManager};

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(["-c", "user.name=worksite", "-c", "user.email=worksite@example.com"])
        .args(args)
        .current_dir(dir)
        .output()
        .expect("spawn git");
    assert!(
        status.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&status.stderr)
    );
}

/// A repository with one commit, or `None` when git is unavailable.
fn repo() -> Option<(TempDir, Project)> {
    if !binary_available("git") {
        eprintln!("git not available; skipping");
        return None;
    }
    let dir = TempDir::new().expect("tempdir");
    git(dir.path(), &["init", "--quiet"]);
    git(dir.path(), &["commit", "--quiet", "--allow-empty", "-m", "init"]);
    let root = dir.path().canonicalize().expect("canonicalize");
    Some((dir, Project::new("my-app", root)))
}

#[test]
fn create_and_destroy_round_trip() {
    let Some((_dir, project)) = repo() else { return };
    let mgr = WorktreeManager::new(GitCli);
    let name = WorkspaceName::from("feature-x");

    let path = mgr.create(&project, &name, None).expect("create");
    assert_eq!(path, project.root_directory.join("worktrees/my-app-feature-x"));
    assert!(path.join(".git").exists(), "worktree must be checked out");

    mgr.destroy(&project.root_directory, &path, false).expect("destroy");
    assert!(!path.exists());
    assert!(!project.worktrees_dir().exists());
}

#[test]
fn existing_branch_is_checked_out_again() {
    let Some((_dir, project)) = repo() else { return };
    let mgr = WorktreeManager::new(GitCli);
    let name = WorkspaceName::from("reuse");

    let path = mgr.create(&project, &name, None).expect("first create");
    mgr.destroy(&project.root_directory, &path, false).expect("destroy");
    // The branch survives the worktree; the second create must reuse it.
    let path = mgr.create(&project, &name, Some("no-such-ref")).expect("second create");
    assert!(path.exists());
}

#[test]
fn dirty_worktree_needs_force() {
    let Some((_dir, project)) = repo() else { return };
    let mgr = WorktreeManager::new(GitCli);
    let path = mgr.create(&project, &"dirty".into(), None).expect("create");
    std::fs::write(path.join("scratch.txt"), "wip").expect("write");

    let err = mgr
        .destroy(&project.root_directory, &path, false)
        .unwrap_err();
    assert!(matches!(err, ExecError::WorktreeDestroyFailed { .. }), "got: {err}");
    assert!(path.exists());

    mgr.destroy(&project.root_directory, &path, true).expect("forced destroy");
    assert!(!path.exists());
}

#[test]
fn manually_deleted_worktree_is_pruned() {
    let Some((_dir, project)) = repo() else { return };
    let mgr = WorktreeManager::new(GitCli);
    let path = mgr.create(&project, &"gone".into(), None).expect("create");
    std::fs::remove_dir_all(&path).expect("rm");

    mgr.destroy(&project.root_directory, &path, false).expect("destroy after manual rm");
    // Pruned: the same path can be created again.
    mgr.create(&project, &"gone".into(), None).expect("recreate");
}

#[test]
fn unknown_reference_is_create_failure() {
    let Some((_dir, project)) = repo() else { return };
    let mgr = WorktreeManager::new(GitCli);
    let err = mgr
        .create(&project, &"new-branch".into(), Some("does-not-exist"))
        .unwrap_err();
    assert!(matches!(err, ExecError::WorktreeCreateFailed { .. }), "got: {err}");
}
