//! `worksite run <name> [--project P] [--timeout SECS] -- <command...>`

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;

use crate::{child_exit, Ctx};

/// Run a command inside a workspace.
#[derive(Args, Debug)]
pub struct RunArgs {
    pub name: String,

    #[arg(long, short = 'p')]
    pub project: Option<String>,

    /// Kill the command after this many seconds.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Command and arguments, after `--`.
    #[arg(last = true, required = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

impl RunArgs {
    pub fn run(self, ctx: &Ctx) -> Result<ExitCode> {
        let out = ctx
            .orchestrator()
            .run(
                self.project.as_deref(),
                &self.name,
                &self.command,
                self.timeout.map(Duration::from_secs),
            )
            .with_context(|| format!("failed to run in workspace '{}'", self.name))?;
        Ok(child_exit(out.exit_code))
    }
}
