//! Workspace lifecycle.
//!
//! ```text
//! absent --create--> created(stopped) <--start/stop--> created(started)
//!    ^                        |                                |
//!    +---------destroy--------+----------------destroy---------+
//! ```
//!
//! Every command reloads the registry from disk. Mutations go through
//! [`RegistryStore`] transactions; infra, agent and `run` commands execute
//! outside the registry lock and may block for as long as they like.

use std::path::{Path, PathBuf};

use serde::Serialize;
use worksite_core::types::{validate_name, INFRA_START, INFRA_STOP};
use worksite_core::{
    catalog, paths, Project, ProjectDefinition, ProjectName, Registry, RegistryError,
    RegistryStore, Settings, Workspace, WorkspaceName,
};
use worksite_exec::shell::shell_join;
use worksite_exec::{CommandOutput, GitCli, OutputMode, ProcessRunner, Vcs, WorktreeManager};

use crate::error::{DestroyStep, LifecycleError};
use crate::infra::{agent_command, infra_command, workspace_command};
use crate::lookup::{find_workspace, root_of};

// ---------------------------------------------------------------------------
// 1. Requests and outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct CreateRequest {
    pub name: String,
    /// Registered project name or a directory holding `.worksite.yaml`.
    /// Defaults to the project containing the current directory.
    pub project: Option<String>,
    /// Starting point for a new branch. Defaults to `settings.default_ref`.
    pub reference: Option<String>,
    /// Overrides the definition's `auto_start`.
    pub start: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct CreateOutcome {
    pub workspace: Workspace,
    /// `true` when the project was registered by this create.
    pub registered_project: bool,
    /// Output of `infra.start`, when it ran.
    pub start: Option<CommandOutput>,
}

/// Result of `start` / `stop`.
#[derive(Debug, Clone)]
pub struct Transition {
    pub workspace: Workspace,
    /// `None` when the workspace was already in the requested state.
    pub output: Option<CommandOutput>,
}

/// What happened to infra during `destroy`.
#[derive(Debug, Clone, PartialEq)]
pub enum StopAttempt {
    NotStarted,
    Stopped,
    /// `infra.stop` ran but failed; destroy carried on.
    Failed(String),
    /// The definition could not be loaded; destroy carried on.
    Skipped(String),
}

#[derive(Debug, Clone)]
pub struct DestroyOutcome {
    pub workspace: Workspace,
    pub stop: StopAttempt,
}

/// A registry row as shown by `list`.
#[derive(Debug, Clone, Serialize)]
pub struct WorkspaceView {
    #[serde(flatten)]
    pub workspace: Workspace,
    /// Its project is no longer in the catalog.
    pub orphaned: bool,
    /// The checkout directory exists on disk.
    pub present: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectView {
    #[serde(flatten)]
    pub project: Project,
    pub workspaces: usize,
}

#[derive(Debug, Clone)]
pub struct ProjectRemoved {
    pub project: Project,
    /// Workspaces left registered without a project.
    pub orphans: Vec<Workspace>,
}

// ---------------------------------------------------------------------------
// 2. Orchestrator
// ---------------------------------------------------------------------------

/// Drives workspaces through their lifecycle.
pub struct Orchestrator<V: Vcs = GitCli> {
    store: RegistryStore,
    worktrees: WorktreeManager<V>,
    runner: ProcessRunner,
    settings: Settings,
    output: OutputMode,
    cwd: Option<PathBuf>,
}

impl Orchestrator<GitCli> {
    /// Orchestrator over `<home>/.worksite`, using git.
    pub fn at(home: &Path, settings: Settings) -> Self {
        let store = RegistryStore::at(home).with_lock_timeout(settings.lock_timeout());
        Self::new(store, WorktreeManager::new(GitCli), settings)
    }

    /// `at` convenience wrapper.
    pub fn open(settings: Settings) -> Result<Self, LifecycleError> {
        Ok(Self::at(&paths::home()?, settings))
    }
}

impl<V: Vcs> Orchestrator<V> {
    pub fn new(store: RegistryStore, worktrees: WorktreeManager<V>, settings: Settings) -> Self {
        Self {
            store,
            worktrees,
            runner: ProcessRunner::with_shell(settings.shell.clone()),
            settings,
            output: OutputMode::Capture,
            cwd: std::env::current_dir().ok(),
        }
    }

    /// Directory used to infer the project when none is given.
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// How infra, agent and `run` commands treat stdio.
    pub fn with_output(mut self, output: OutputMode) -> Self {
        self.output = output;
        self
    }

    pub fn store(&self) -> &RegistryStore {
        &self.store
    }

    pub fn worktrees(&self) -> &WorktreeManager<V> {
        &self.worktrees
    }

    // -----------------------------------------------------------------------
    // create
    // -----------------------------------------------------------------------

    pub fn create(&self, req: CreateRequest) -> Result<CreateOutcome, LifecycleError> {
        validate_name(&req.name)?;
        let name = WorkspaceName::from(req.name.as_str());

        let snapshot = self.store.load()?;
        let resolved = match req.project.as_deref() {
            Some(identifier) => catalog::resolve(&snapshot, identifier)?,
            None => {
                let cwd = self.cwd()?;
                catalog::resolve_from_dir(&snapshot, &cwd)?
            }
        };
        let project = resolved.project;
        let definition = catalog::load_definition(&project)?;
        let reference = req
            .reference
            .clone()
            .unwrap_or_else(|| self.settings.default_ref.clone());

        // The lock is held across the worktree creation so two racing creates
        // of the same pair cannot both get past the duplicate check.
        let mut created_path: Option<PathBuf> = None;
        let result = self.store.transact(|reg| -> Result<Workspace, LifecycleError> {
            // An auto-registered project may have left with its last
            // workspace since the snapshot was taken.
            if resolved.discovered || project.auto_registered {
                if reg.upsert_project(project.clone())? {
                    tracing::info!(
                        "registered project '{}' at {}",
                        project.name,
                        project.root_directory.display()
                    );
                }
            } else if reg.project(&project.name).is_none() {
                return Err(RegistryError::ProjectNotFound {
                    identifier: project.name.0.clone(),
                }
                .into());
            }
            if reg.workspace(&project.name, &name).is_some() {
                return Err(RegistryError::DuplicateWorkspace {
                    project: project.name.clone(),
                    name: name.clone(),
                }
                .into());
            }

            created_path = Some(self.worktrees.create(&project, &name, Some(&reference))?);
            let workspace = Workspace::new(&project, name.clone());
            reg.insert_workspace(workspace.clone())?;
            Ok(workspace)
        });

        let mut workspace = match result {
            Ok(ws) => ws,
            Err(e) => {
                if let Some(path) = created_path {
                    self.roll_back_worktree(&project.root_directory, &path);
                }
                return Err(e);
            }
        };
        tracing::info!("created workspace {}/{}", workspace.project, workspace.name);

        let mut start = None;
        if req.start.unwrap_or(definition.auto_start) {
            let output = self.run_infra(&workspace, &project.root_directory, &definition, INFRA_START)?;
            if output.success() {
                workspace = self.mark_started(&workspace, true)?;
            } else {
                tracing::warn!(
                    "infra.start for {}/{} exited with {}; workspace left stopped",
                    workspace.project,
                    workspace.name,
                    output.exit_code
                );
            }
            start = Some(output);
        }

        Ok(CreateOutcome {
            workspace,
            registered_project: resolved.discovered,
            start,
        })
    }

    fn roll_back_worktree(&self, root: &Path, path: &Path) {
        tracing::warn!("rolling back worktree {}", path.display());
        if let Err(e) = self.worktrees.destroy(root, path, true) {
            tracing::warn!("rollback of {} failed: {e}", path.display());
        }
    }

    // -----------------------------------------------------------------------
    // switch / run / infra / agent
    // -----------------------------------------------------------------------

    /// The workspace to switch to. Warns when its directory is missing.
    pub fn switch(&self, project: Option<&str>, name: &str) -> Result<Workspace, LifecycleError> {
        let (ws, _) = self.locate(project, name)?;
        if !ws.path.is_dir() {
            tracing::warn!("workspace directory {} does not exist", ws.path.display());
        }
        Ok(ws)
    }

    /// Run `argv` inside the workspace. The caller propagates the exit code.
    pub fn run(
        &self,
        project: Option<&str>,
        name: &str,
        argv: &[String],
        timeout: Option<std::time::Duration>,
    ) -> Result<CommandOutput, LifecycleError> {
        let (ws, root) = self.locate(project, name)?;
        let cmd = workspace_command(
            &ws,
            &root,
            shell_join(argv),
            timeout.or_else(|| self.settings.command_timeout()),
            self.output,
        );
        Ok(self.runner.run(&cmd)?)
    }

    /// Run the named infra entry (`test`, `logs`, ...) without touching state.
    pub fn infra(
        &self,
        project: Option<&str>,
        name: &str,
        command: &str,
    ) -> Result<CommandOutput, LifecycleError> {
        let (ws, root) = self.locate(project, name)?;
        let definition = self.definition_for(&ws, &root)?;
        self.run_infra(&ws, &root, &definition, command)
    }

    pub fn agent(
        &self,
        project: Option<&str>,
        name: &str,
        readonly: bool,
    ) -> Result<CommandOutput, LifecycleError> {
        let (ws, root) = self.locate(project, name)?;
        let definition = self.definition_for(&ws, &root)?;
        let command = agent_command(&definition, readonly)?;
        let cmd = workspace_command(
            &ws,
            &root,
            command,
            self.settings.command_timeout(),
            self.output,
        );
        Ok(self.runner.run(&cmd)?)
    }

    // -----------------------------------------------------------------------
    // start / stop
    // -----------------------------------------------------------------------

    pub fn start(&self, project: Option<&str>, name: &str) -> Result<Transition, LifecycleError> {
        self.transition(project, name, true)
    }

    pub fn stop(&self, project: Option<&str>, name: &str) -> Result<Transition, LifecycleError> {
        self.transition(project, name, false)
    }

    fn transition(
        &self,
        project: Option<&str>,
        name: &str,
        target: bool,
    ) -> Result<Transition, LifecycleError> {
        let (ws, root) = self.locate(project, name)?;
        if ws.started == target {
            tracing::info!(
                "{}/{} is already {}",
                ws.project,
                ws.name,
                if target { "started" } else { "stopped" }
            );
            return Ok(Transition {
                workspace: ws,
                output: None,
            });
        }

        let definition = self.definition_for(&ws, &root)?;
        let entry = if target { INFRA_START } else { INFRA_STOP };
        let output = self.run_infra(&ws, &root, &definition, entry)?;
        let workspace = if output.success() {
            self.mark_started(&ws, target)?
        } else {
            tracing::warn!(
                "infra.{entry} for {}/{} exited with {}",
                ws.project,
                ws.name,
                output.exit_code
            );
            ws
        };
        Ok(Transition {
            workspace,
            output: Some(output),
        })
    }

    // -----------------------------------------------------------------------
    // destroy
    // -----------------------------------------------------------------------

    pub fn destroy(
        &self,
        project: Option<&str>,
        name: &str,
        force: bool,
    ) -> Result<DestroyOutcome, LifecycleError> {
        let (ws, root) = self.locate(project, name)?;

        let stop = if ws.started {
            self.stop_before_destroy(&ws, &root)
        } else {
            StopAttempt::NotStarted
        };

        if let Err(e) = self.worktrees.destroy(&root, &ws.path, force) {
            if stop == StopAttempt::Stopped {
                if let Err(update) = self.mark_started(&ws, false) {
                    tracing::warn!("could not record stop of {}/{}: {update}", ws.project, ws.name);
                }
            }
            return Err(LifecycleError::DestroyIncomplete {
                project: ws.project.clone(),
                name: ws.name.clone(),
                remaining: DestroyStep::RemoveWorktree,
                source: Box::new(e.into()),
            });
        }

        match self.store.remove(&ws.project, &ws.name) {
            Ok(_) => {}
            Err(RegistryError::WorkspaceNotFound { .. }) => {
                tracing::warn!(
                    "{}/{} was already unregistered by another process",
                    ws.project,
                    ws.name
                );
            }
            Err(e) => {
                return Err(LifecycleError::DestroyIncomplete {
                    project: ws.project.clone(),
                    name: ws.name.clone(),
                    remaining: DestroyStep::Unregister,
                    source: Box::new(e.into()),
                });
            }
        }
        tracing::info!("destroyed workspace {}/{}", ws.project, ws.name);
        Ok(DestroyOutcome { workspace: ws, stop })
    }

    fn stop_before_destroy(&self, ws: &Workspace, root: &Path) -> StopAttempt {
        let definition = match self.definition_for(ws, root) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!("skipping infra.stop for {}/{}: {e}", ws.project, ws.name);
                return StopAttempt::Skipped(e.to_string());
            }
        };
        match self.run_infra(ws, root, &definition, INFRA_STOP) {
            Ok(out) if out.success() => StopAttempt::Stopped,
            Ok(out) => {
                let reason = format!("exit code {}: {}", out.exit_code, out.error_line());
                tracing::warn!("infra.stop for {}/{} failed ({reason}); continuing", ws.project, ws.name);
                StopAttempt::Failed(reason)
            }
            Err(e) => {
                tracing::warn!("infra.stop for {}/{} failed ({e}); continuing", ws.project, ws.name);
                StopAttempt::Failed(e.to_string())
            }
        }
    }

    // -----------------------------------------------------------------------
    // list
    // -----------------------------------------------------------------------

    pub fn list(&self, project: Option<&str>) -> Result<Vec<WorkspaceView>, LifecycleError> {
        let reg = self.store.load()?;
        let filter = project.map(ProjectName::from);
        Ok(reg
            .workspaces
            .iter()
            .filter(|ws| filter.as_ref().map_or(true, |p| &ws.project == p))
            .map(|ws| WorkspaceView {
                orphaned: reg.project(&ws.project).is_none(),
                present: ws.path.is_dir(),
                workspace: ws.clone(),
            })
            .collect())
    }

    // -----------------------------------------------------------------------
    // projects
    // -----------------------------------------------------------------------

    /// Register the project whose definition lives in `dir`.
    ///
    /// `name` overrides the definition's name. Re-adding the same project at
    /// the same root is a no-op and returns `false`.
    pub fn add_project(
        &self,
        dir: &Path,
        name: Option<&str>,
    ) -> Result<(Project, bool), LifecycleError> {
        let root = dir.canonicalize().map_err(|source| RegistryError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let definition = catalog::load_definition_at(&root).map_err(RegistryError::from)?;
        let project_name = match name {
            Some(n) => {
                validate_name(n)?;
                ProjectName::from(n)
            }
            None => definition.name,
        };
        let project = Project::new(project_name, root);
        let added = self.store.upsert_project(project.clone())?;
        if added {
            tracing::info!(
                "registered project '{}' at {}",
                project.name,
                project.root_directory.display()
            );
        }
        Ok((project, added))
    }

    pub fn projects(&self) -> Result<Vec<ProjectView>, LifecycleError> {
        let reg = self.store.load()?;
        Ok(reg
            .projects
            .iter()
            .map(|p| ProjectView {
                workspaces: reg.workspaces_of(&p.name).count(),
                project: p.clone(),
            })
            .collect())
    }

    /// Drop a project from the catalog. Its workspaces stay registered as
    /// orphans and can still be destroyed.
    pub fn remove_project(&self, name: &str) -> Result<ProjectRemoved, LifecycleError> {
        let (project, orphans) = self.store.remove_project(&ProjectName::from(name))?;
        for ws in &orphans {
            tracing::warn!(
                "workspace {}/{} is now orphaned; destroy it to clean up {}",
                ws.project,
                ws.name,
                ws.path.display()
            );
        }
        Ok(ProjectRemoved { project, orphans })
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    fn cwd(&self) -> Result<PathBuf, LifecycleError> {
        self.cwd.clone().ok_or_else(|| {
            RegistryError::ProjectNotFound {
                identifier: "<current directory>".to_string(),
            }
            .into()
        })
    }

    /// Find a workspace and its repository root in a fresh snapshot.
    fn locate(
        &self,
        project: Option<&str>,
        name: &str,
    ) -> Result<(Workspace, PathBuf), LifecycleError> {
        let reg = self.store.load()?;
        let project = project.map(ProjectName::from);
        let ws = find_workspace(
            &reg,
            project.as_ref(),
            &WorkspaceName::from(name),
            self.cwd.as_deref(),
        )?
        .clone();
        let root = self.root_for(&reg, &ws)?;
        Ok((ws, root))
    }

    fn root_for(&self, reg: &Registry, ws: &Workspace) -> Result<PathBuf, LifecycleError> {
        if reg.project(&ws.project).is_none() {
            tracing::warn!("workspace {}/{} belongs to an unregistered project", ws.project, ws.name);
        }
        root_of(reg, ws).ok_or_else(|| {
            RegistryError::ProjectNotFound {
                identifier: ws.project.0.clone(),
            }
            .into()
        })
    }

    fn definition_for(&self, ws: &Workspace, root: &Path) -> Result<ProjectDefinition, LifecycleError> {
        let project = Project::new(ws.project.clone(), root);
        Ok(catalog::load_definition(&project)?)
    }

    fn run_infra(
        &self,
        ws: &Workspace,
        root: &Path,
        definition: &ProjectDefinition,
        entry: &str,
    ) -> Result<CommandOutput, LifecycleError> {
        let command = infra_command(definition, entry)?;
        tracing::info!("infra.{entry} for {}/{}: {command}", ws.project, ws.name);
        let cmd = workspace_command(ws, root, command, self.settings.command_timeout(), self.output);
        Ok(self.runner.run(&cmd)?)
    }

    fn mark_started(&self, ws: &Workspace, started: bool) -> Result<Workspace, LifecycleError> {
        Ok(self
            .store
            .update(&ws.project, &ws.name, |w| w.started = started)?)
    }
}
