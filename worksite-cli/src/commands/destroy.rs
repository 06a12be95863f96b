//! `worksite destroy <name> [--project P] [--force]`

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use worksite_lifecycle::{DestroyStep, LifecycleError, StopAttempt};

use crate::Ctx;

/// Stop infra, remove the worktree and unregister a workspace.
#[derive(Args, Debug)]
pub struct DestroyArgs {
    pub name: String,

    #[arg(long, short = 'p')]
    pub project: Option<String>,

    /// Remove the worktree even if it has uncommitted changes.
    #[arg(long, short = 'f')]
    pub force: bool,
}

impl DestroyArgs {
    pub fn run(self, ctx: &Ctx) -> Result<ExitCode> {
        let outcome = match ctx
            .orchestrator()
            .destroy(self.project.as_deref(), &self.name, self.force)
        {
            Ok(outcome) => outcome,
            Err(err) => {
                if let LifecycleError::DestroyIncomplete {
                    remaining: DestroyStep::RemoveWorktree,
                    ..
                } = &err
                {
                    eprintln!(
                        "hint: commit or discard changes in the worktree, or re-run with --force"
                    );
                }
                return Err(err).with_context(|| format!("failed to destroy '{}'", self.name));
            }
        };

        let ws = &outcome.workspace;
        match &outcome.stop {
            StopAttempt::NotStarted => {}
            StopAttempt::Stopped => println!("  Infra stopped"),
            StopAttempt::Failed(reason) | StopAttempt::Skipped(reason) => eprintln!(
                "{} infra.stop did not complete ({reason}); destroyed anyway",
                "warning:".yellow().bold()
            ),
        }
        println!("✓ Destroyed workspace '{}' in project '{}'", ws.name, ws.project);
        Ok(ExitCode::SUCCESS)
    }
}
