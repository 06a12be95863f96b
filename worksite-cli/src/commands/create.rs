//! `worksite create <name> [--project P] [--from REF] [--start|--no-start]`

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use worksite_lifecycle::CreateRequest;

use crate::{child_exit, Ctx};

/// Create a workspace.
#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Workspace name; also the branch name.
    pub name: String,

    /// Registered project name or a directory containing `.worksite.yaml`.
    /// Defaults to the project containing the current directory.
    #[arg(long, short = 'p')]
    pub project: Option<String>,

    /// Branch a new workspace branch from this ref (default: HEAD).
    #[arg(long = "from", value_name = "REF")]
    pub reference: Option<String>,

    /// Run `infra.start` after creating, regardless of `auto_start`.
    #[arg(long, conflicts_with = "no_start")]
    pub start: bool,

    /// Do not run `infra.start`, even if the project sets `auto_start`.
    #[arg(long)]
    pub no_start: bool,
}

impl CreateArgs {
    pub fn run(self, ctx: &Ctx) -> Result<ExitCode> {
        let start = match (self.start, self.no_start) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        };
        let name = self.name.clone();
        let outcome = ctx
            .orchestrator()
            .create(CreateRequest {
                name: self.name,
                project: self.project,
                reference: self.reference,
                start,
            })
            .with_context(|| format!("failed to create workspace '{name}'"))?;

        let ws = &outcome.workspace;
        if outcome.registered_project {
            println!("✓ Registered project '{}'", ws.project);
        }
        println!("✓ Created workspace '{}' in project '{}'", ws.name, ws.project);
        println!("  Path: {}", ws.path.display());

        match outcome.start {
            None => Ok(ExitCode::SUCCESS),
            Some(out) if out.success() => {
                println!("  Infra started");
                Ok(ExitCode::SUCCESS)
            }
            Some(out) => {
                eprintln!(
                    "{} infra.start exited with {}; workspace '{}' is registered but stopped",
                    "warning:".yellow().bold(),
                    out.exit_code,
                    ws.name
                );
                Ok(child_exit(out.exit_code))
            }
        }
    }
}
