//! Orchestrator integration tests against a temp home, a temp project root
//! and a directory-only [`Vcs`] stand-in.

#![cfg(unix)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

use rstest::rstest;
use tempfile::TempDir;
use worksite_core::{paths, ErrorKind, RegistryError, RegistryStore, Settings};
use worksite_exec::{ExecError, Vcs, WorktreeManager};
use worksite_lifecycle::{
    CreateRequest, DestroyStep, LifecycleError, Orchestrator, StopAttempt,
};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeState {
    created: Vec<PathBuf>,
    refuse_remove: bool,
}

/// Creates and removes plain directories instead of real worktrees.
#[derive(Clone, Default)]
struct FakeVcs(Arc<Mutex<FakeState>>);

impl FakeVcs {
    fn created(&self) -> usize {
        self.0.lock().unwrap().created.len()
    }

    fn refuse_remove(&self, refuse: bool) {
        self.0.lock().unwrap().refuse_remove = refuse;
    }
}

impl Vcs for FakeVcs {
    fn create_worktree(
        &self,
        _repo_root: &Path,
        path: &Path,
        _branch: &str,
        _reference: &str,
    ) -> Result<(), ExecError> {
        fs::create_dir(path).map_err(|e| ExecError::WorktreeCreateFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        self.0.lock().unwrap().created.push(path.to_path_buf());
        Ok(())
    }

    fn remove_worktree(&self, _repo_root: &Path, path: &Path, _force: bool) -> Result<(), ExecError> {
        if self.0.lock().unwrap().refuse_remove {
            return Err(ExecError::WorktreeDestroyFailed {
                path: path.to_path_buf(),
                message: "contains modified or untracked files".to_string(),
            });
        }
        fs::remove_dir_all(path).map_err(|e| ExecError::WorktreeDestroyFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    fn prune(&self, _repo_root: &Path) -> Result<(), ExecError> {
        Ok(())
    }
}

const DEFINITION: &str = r#"name: my-app
infra:
  start: touch "$WORKSITE_PROJECT_ROOT/started.flag"
  stop: touch "$WORKSITE_PROJECT_ROOT/stopped.flag"
  test: echo "testing $WORKSITE_NAME in $(basename "$(pwd -P)")"
agent:
  primary: echo primary-agent
"#;

struct Fixture {
    home: TempDir,
    repo: TempDir,
    vcs: FakeVcs,
}

impl Fixture {
    fn new() -> Self {
        Self::with_definition(DEFINITION)
    }

    fn with_definition(definition: &str) -> Self {
        let home = TempDir::new().expect("home");
        let repo = TempDir::new().expect("repo");
        fs::write(repo.path().join(".worksite.yaml"), definition).expect("definition");
        Self {
            home,
            repo,
            vcs: FakeVcs::default(),
        }
    }

    fn root(&self) -> PathBuf {
        self.repo.path().canonicalize().expect("canonical root")
    }

    fn store(&self) -> RegistryStore {
        RegistryStore::at(self.home.path()).with_lock_timeout(Duration::from_secs(10))
    }

    fn orchestrator(&self) -> Orchestrator<FakeVcs> {
        Orchestrator::new(
            self.store(),
            WorktreeManager::new(self.vcs.clone()),
            Settings::default(),
        )
        .with_cwd(self.repo.path())
    }

    fn registry_bytes(&self) -> Option<Vec<u8>> {
        fs::read(self.store().path()).ok()
    }
}

fn create(name: &str) -> CreateRequest {
    CreateRequest {
        name: name.to_string(),
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// 1. create
// ---------------------------------------------------------------------------

#[test]
fn create_registers_stopped_workspace_at_derived_path() {
    let fx = Fixture::new();
    let out = fx.orchestrator().create(create("feature-x")).expect("create");

    let expected = fx.root().join("worktrees").join("my-app-feature-x");
    assert_eq!(out.workspace.path, expected);
    assert!(expected.is_dir());
    assert!(!out.workspace.started);
    assert!(out.registered_project, "project is discovered from the cwd");
    assert!(out.start.is_none());

    let reg = fx.store().load().expect("load");
    assert_eq!(reg.projects.len(), 1);
    assert_eq!(reg.projects[0].root_directory, fx.root());
    assert_eq!(reg.workspaces, vec![out.workspace]);
}

#[test]
fn create_with_start_runs_infra_start() {
    let fx = Fixture::new();
    let out = fx
        .orchestrator()
        .create(CreateRequest {
            start: Some(true),
            ..create("feature-x")
        })
        .expect("create");

    assert!(out.workspace.started);
    assert_eq!(out.start.map(|o| o.exit_code), Some(0));
    assert!(fx.root().join("started.flag").exists());
    assert!(fx.store().load().unwrap().workspaces[0].started);
}

#[test]
fn auto_start_from_definition_and_no_start_override() {
    let fx = Fixture::with_definition(&format!("{DEFINITION}auto_start: true\n"));
    let orch = fx.orchestrator();

    assert!(orch.create(create("auto")).expect("create").workspace.started);
    let manual = orch
        .create(CreateRequest {
            start: Some(false),
            ..create("manual")
        })
        .expect("create");
    assert!(!manual.workspace.started);
}

#[test]
fn failing_start_keeps_workspace_registered_and_stopped() {
    let fx = Fixture::with_definition("name: my-app\ninfra:\n  start: exit 3\n  stop: 'true'\n");
    let out = fx
        .orchestrator()
        .create(CreateRequest {
            start: Some(true),
            ..create("feature-x")
        })
        .expect("create succeeds even though start failed");

    assert!(!out.workspace.started);
    assert_eq!(out.start.expect("start ran").exit_code, 3);
    let reg = fx.store().load().expect("load");
    assert_eq!(reg.workspaces.len(), 1);
    assert!(!reg.workspaces[0].started);
}

#[test]
fn duplicate_create_fails_and_changes_nothing() {
    let fx = Fixture::new();
    let orch = fx.orchestrator();
    orch.create(create("feature-x")).expect("first create");
    let before = fx.registry_bytes();

    let err = orch.create(create("feature-x")).unwrap_err();
    assert!(
        matches!(err, LifecycleError::Registry(RegistryError::DuplicateWorkspace { .. })),
        "got: {err}"
    );
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(fx.registry_bytes(), before);
    assert_eq!(fx.vcs.created(), 1);
}

#[rstest]
#[case("")]
#[case("../escape")]
#[case("-rf")]
#[case("has space")]
fn invalid_names_are_rejected_before_anything_happens(#[case] name: &str) {
    let fx = Fixture::new();
    let err = fx.orchestrator().create(create(name)).unwrap_err();
    assert!(
        matches!(err, LifecycleError::Registry(RegistryError::InvalidName { .. })),
        "got: {err}"
    );
    assert_eq!(fx.registry_bytes(), None);
    assert_eq!(fx.vcs.created(), 0);
}

#[test]
fn unknown_project_is_lookup_error() {
    let fx = Fixture::new();
    let err = fx
        .orchestrator()
        .create(CreateRequest {
            project: Some("nope".to_string()),
            ..create("feature-x")
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Lookup, "got: {err}");
}

#[test]
fn failed_persist_rolls_back_worktree() {
    let fx = Fixture::new();
    // A directory where the tmp file should go makes the atomic write fail
    // after the worktree already exists.
    let tmp = paths::tmp_path(fx.store().path());
    fs::create_dir_all(&tmp).expect("mkdir tmp");

    let err = fx.orchestrator().create(create("feature-x")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExternalTool, "got: {err}");
    assert_eq!(fx.vcs.created(), 1);
    assert!(!fx.root().join("worktrees").join("my-app-feature-x").exists());
    assert!(fx.store().load().expect("load").workspaces.is_empty());
}

// ---------------------------------------------------------------------------
// 2. start / stop / infra / agent / run
// ---------------------------------------------------------------------------

#[test]
fn start_and_stop_toggle_and_are_idempotent() {
    let fx = Fixture::new();
    let orch = fx.orchestrator();
    orch.create(create("feature-x")).expect("create");

    let started = orch.start(None, "feature-x").expect("start");
    assert!(started.workspace.started);
    assert!(started.output.is_some());

    let again = orch.start(None, "feature-x").expect("start again");
    assert!(again.output.is_none(), "already started: nothing runs");

    let stopped = orch.stop(Some("my-app"), "feature-x").expect("stop");
    assert!(!stopped.workspace.started);
    assert!(fx.root().join("stopped.flag").exists());
    assert!(!fx.store().load().unwrap().workspaces[0].started);
}

#[test]
fn failed_start_leaves_state_unchanged() {
    let fx = Fixture::with_definition("name: my-app\ninfra:\n  start: exit 9\n  stop: 'true'\n");
    let orch = fx.orchestrator();
    orch.create(create("feature-x")).expect("create");

    let t = orch.start(None, "feature-x").expect("start returns the output");
    assert_eq!(t.output.expect("ran").exit_code, 9);
    assert!(!t.workspace.started);
    assert!(!fx.store().load().unwrap().workspaces[0].started);
}

#[test]
fn named_infra_command_runs_in_workspace_with_env() {
    let fx = Fixture::new();
    let orch = fx.orchestrator();
    orch.create(create("feature-x")).expect("create");

    let out = orch.infra(None, "feature-x", "test").expect("infra test");
    assert_eq!(out.stdout.trim(), "testing feature-x in my-app-feature-x");

    let err = orch.infra(None, "feature-x", "deploy").unwrap_err();
    assert!(matches!(err, LifecycleError::UnknownInfraCommand { .. }), "got: {err}");
    assert_eq!(err.kind(), ErrorKind::Config);
}

#[test]
fn agent_commands() {
    let fx = Fixture::new();
    let orch = fx.orchestrator();
    orch.create(create("feature-x")).expect("create");

    let out = orch.agent(None, "feature-x", false).expect("agent");
    assert_eq!(out.stdout.trim(), "primary-agent");

    let err = orch.agent(None, "feature-x", true).unwrap_err();
    assert!(
        matches!(err, LifecycleError::MissingAgentCommand { readonly: true, .. }),
        "got: {err}"
    );
}

#[test]
fn run_quotes_argv_and_propagates_exit_code() {
    let fx = Fixture::new();
    let orch = fx.orchestrator();
    orch.create(create("feature-x")).expect("create");

    let argv: Vec<String> = ["sh", "-c", "echo \"$1\"; exit 7", "sh", "two words"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let out = orch.run(None, "feature-x", &argv, None).expect("run");
    assert_eq!(out.stdout.trim(), "two words");
    assert_eq!(out.exit_code, 7);
}

#[test]
fn run_timeout_is_reported() {
    let fx = Fixture::new();
    let orch = fx.orchestrator();
    orch.create(create("feature-x")).expect("create");

    let argv = vec!["sleep".to_string(), "5".to_string()];
    let err = orch
        .run(None, "feature-x", &argv, Some(Duration::from_millis(100)))
        .unwrap_err();
    assert!(
        matches!(err, LifecycleError::Exec(ExecError::CommandTimedOut { .. })),
        "got: {err}"
    );
}

#[test]
fn switch_reports_path() {
    let fx = Fixture::new();
    let orch = fx.orchestrator();
    let created = orch.create(create("feature-x")).expect("create");
    let ws = orch.switch(None, "feature-x").expect("switch");
    assert_eq!(ws.path, created.workspace.path);
}

// ---------------------------------------------------------------------------
// 3. destroy
// ---------------------------------------------------------------------------

#[test]
fn create_then_destroy_restores_registry_bytes_and_tree() {
    let fx = Fixture::new();
    let orch = fx.orchestrator();
    orch.add_project(fx.repo.path(), None).expect("add project");
    let before = fx.registry_bytes().expect("registry written");

    orch.create(create("tmp")).expect("create");
    let out = orch.destroy(None, "tmp", false).expect("destroy");

    assert_eq!(out.stop, StopAttempt::NotStarted);
    assert_eq!(fx.registry_bytes().expect("registry"), before);
    assert!(!fx.root().join("worktrees").exists());
}

#[test]
fn create_then_destroy_through_discovery_leaves_no_registry() {
    let fx = Fixture::new();
    let orch = fx.orchestrator();
    let before = fx.registry_bytes();
    assert!(before.is_none());

    orch.create(create("tmp")).expect("create");
    let reg = fx.store().load().expect("load");
    assert!(reg.projects[0].auto_registered);

    orch.destroy(None, "tmp", false).expect("destroy");
    assert_eq!(fx.registry_bytes(), before);
    assert!(!fx.root().join("worktrees").exists());
}

#[test]
fn discovered_project_stays_while_it_has_workspaces() {
    let fx = Fixture::new();
    let orch = fx.orchestrator();
    orch.create(create("a")).expect("create a");
    orch.create(create("b")).expect("create b");

    orch.destroy(None, "a", false).expect("destroy a");
    assert_eq!(fx.store().load().expect("load").projects.len(), 1);

    orch.destroy(None, "b", false).expect("destroy b");
    assert!(fx.registry_bytes().is_none());
}

#[test]
fn explicitly_added_project_survives_destroy_after_discovery() {
    let fx = Fixture::new();
    let orch = fx.orchestrator();
    orch.create(create("tmp")).expect("create");
    orch.add_project(fx.repo.path(), None).expect("add project");

    orch.destroy(None, "tmp", false).expect("destroy");
    let reg = fx.store().load().expect("load");
    assert_eq!(reg.projects.len(), 1);
    assert!(!reg.projects[0].auto_registered);
}

#[test]
fn destroy_of_unknown_name_leaves_registry_untouched() {
    let fx = Fixture::new();
    let orch = fx.orchestrator();
    orch.create(create("feature-x")).expect("create");
    let before = fx.registry_bytes();

    let err = orch.destroy(None, "nope", false).unwrap_err();
    assert!(
        matches!(err, LifecycleError::Registry(RegistryError::WorkspaceNotFound { .. })),
        "got: {err}"
    );
    assert_eq!(err.kind(), ErrorKind::Lookup);
    assert_eq!(fx.registry_bytes(), before);
}

#[test]
fn destroy_stops_started_workspace_first() {
    let fx = Fixture::new();
    let orch = fx.orchestrator();
    orch.create(CreateRequest {
        start: Some(true),
        ..create("feature-x")
    })
    .expect("create");

    let out = orch.destroy(None, "feature-x", false).expect("destroy");
    assert_eq!(out.stop, StopAttempt::Stopped);
    assert!(fx.root().join("stopped.flag").exists());
    assert!(fx.store().load().unwrap().workspaces.is_empty());
}

#[test]
fn destroy_continues_past_failed_stop() {
    let fx = Fixture::with_definition("name: my-app\ninfra:\n  start: 'true'\n  stop: exit 2\n");
    let orch = fx.orchestrator();
    orch.create(CreateRequest {
        start: Some(true),
        ..create("feature-x")
    })
    .expect("create");

    let out = orch.destroy(None, "feature-x", false).expect("destroy");
    assert!(matches!(out.stop, StopAttempt::Failed(_)), "got: {:?}", out.stop);
    assert!(fx.store().load().unwrap().workspaces.is_empty());
}

#[test]
fn refused_worktree_removal_is_incomplete_and_keeps_registration() {
    let fx = Fixture::new();
    let orch = fx.orchestrator();
    orch.create(CreateRequest {
        start: Some(true),
        ..create("feature-x")
    })
    .expect("create");
    fx.vcs.refuse_remove(true);

    let err = orch.destroy(None, "feature-x", false).unwrap_err();
    match &err {
        LifecycleError::DestroyIncomplete { remaining, .. } => {
            assert_eq!(*remaining, DestroyStep::RemoveWorktree)
        }
        other => panic!("expected DestroyIncomplete, got {other}"),
    }
    assert_eq!(err.kind(), ErrorKind::PartialFailure);

    let reg = fx.store().load().expect("load");
    assert_eq!(reg.workspaces.len(), 1);
    assert!(!reg.workspaces[0].started, "stop succeeded, so started is cleared");

    fx.vcs.refuse_remove(false);
    orch.destroy(None, "feature-x", true).expect("retry destroy");
    assert!(fx.store().load().unwrap().workspaces.is_empty());
}

#[test]
fn destroy_after_manual_delete_succeeds() {
    let fx = Fixture::new();
    let orch = fx.orchestrator();
    let created = orch.create(create("feature-x")).expect("create");
    fs::remove_dir_all(&created.workspace.path).expect("rm");

    orch.destroy(None, "feature-x", false).expect("destroy");
    assert!(fx.store().load().unwrap().workspaces.is_empty());
}

// ---------------------------------------------------------------------------
// 4. projects and list
// ---------------------------------------------------------------------------

#[test]
fn add_project_is_idempotent() {
    let fx = Fixture::new();
    let orch = fx.orchestrator();
    let (project, added) = orch.add_project(fx.repo.path(), None).expect("add");
    assert!(added);
    assert_eq!(project.root_directory, fx.root());
    let (_, added_again) = orch.add_project(fx.repo.path(), None).expect("add again");
    assert!(!added_again);

    let views = orch.projects().expect("projects");
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].workspaces, 0);
}

#[test]
fn add_project_without_definition_is_config_error() {
    let fx = Fixture::new();
    let bare = TempDir::new().expect("bare");
    let err = fx.orchestrator().add_project(bare.path(), None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config, "got: {err}");
}

#[test]
fn removed_project_leaves_orphans_that_can_still_be_destroyed() {
    let fx = Fixture::new();
    let orch = fx.orchestrator();
    orch.create(create("feature-x")).expect("create");

    let removed = orch.remove_project("my-app").expect("remove project");
    assert_eq!(removed.orphans.len(), 1);

    let views = orch.list(None).expect("list");
    assert_eq!(views.len(), 1);
    assert!(views[0].orphaned);
    assert!(views[0].present);

    orch.destroy(None, "feature-x", false).expect("destroy orphan");
    assert!(orch.list(None).expect("list").is_empty());
    assert!(!fx.root().join("worktrees").exists());
}

#[test]
fn list_filters_by_project_and_serializes_flat() {
    let fx = Fixture::new();
    let orch = fx.orchestrator();
    orch.create(create("a")).expect("create a");
    orch.create(create("b")).expect("create b");

    assert_eq!(orch.list(Some("my-app")).unwrap().len(), 2);
    assert!(orch.list(Some("other")).unwrap().is_empty());

    let json = serde_json::to_value(&orch.list(None).unwrap()[0]).expect("json");
    assert_eq!(json["project"], "my-app");
    assert_eq!(json["name"], "a");
    assert_eq!(json["started"], false);
    assert_eq!(json["orphaned"], false);
}

// ---------------------------------------------------------------------------
// 5. Concurrency
// ---------------------------------------------------------------------------

#[test]
fn concurrent_creates_of_distinct_names_all_survive() {
    const THREADS: usize = 6;
    let fx = Arc::new(Fixture::new());
    fx.orchestrator().add_project(fx.repo.path(), None).expect("add");
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let fx = Arc::clone(&fx);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let orch = fx.orchestrator();
                barrier.wait();
                orch.create(create(&format!("ws-{i}"))).map(|_| ())
            })
        })
        .collect();
    for h in handles {
        h.join().expect("thread").expect("create");
    }

    let reg = fx.store().load().expect("load");
    assert_eq!(reg.workspaces.len(), THREADS);
    assert_eq!(fx.vcs.created(), THREADS);
}

#[test]
fn concurrent_creates_of_the_same_pair_have_one_winner() {
    const THREADS: usize = 4;
    let fx = Arc::new(Fixture::new());
    fx.orchestrator().add_project(fx.repo.path(), None).expect("add");
    let barrier = Arc::new(Barrier::new(THREADS));

    let results: Vec<Result<(), LifecycleError>> = (0..THREADS)
        .map(|_| {
            let fx = Arc::clone(&fx);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let orch = fx.orchestrator();
                barrier.wait();
                orch.create(create("same")).map(|_| ())
            })
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|h| h.join().expect("thread"))
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(
            matches!(err, LifecycleError::Registry(RegistryError::DuplicateWorkspace { .. })),
            "got: {err}"
        );
    }
    assert_eq!(fx.vcs.created(), 1, "exactly one worktree");
    assert_eq!(fx.store().load().unwrap().workspaces.len(), 1);
}

#[test]
fn concurrent_destroys_and_creates_keep_survivors() {
    let fx = Arc::new(Fixture::new());
    let orch = fx.orchestrator();
    for name in ["keep", "drop-1", "drop-2"] {
        orch.create(create(name)).expect("seed");
    }

    let handles: Vec<_> = ["drop-1", "drop-2"]
        .into_iter()
        .map(|name| {
            let fx = Arc::clone(&fx);
            thread::spawn(move || fx.orchestrator().destroy(None, name, false).map(|_| ()))
        })
        .chain(["new-1", "new-2"].into_iter().map(|name| {
            let fx = Arc::clone(&fx);
            thread::spawn(move || fx.orchestrator().create(create(name)).map(|_| ()))
        }))
        .collect();
    for h in handles {
        h.join().expect("thread").expect("op");
    }

    let mut names: Vec<String> = fx
        .store()
        .list()
        .expect("list")
        .into_iter()
        .map(|w| w.name.0)
        .collect();
    names.sort();
    assert_eq!(names, vec!["keep", "new-1", "new-2"]);
}
