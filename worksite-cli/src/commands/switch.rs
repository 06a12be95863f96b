//! `worksite switch <name> [--project P]`

use std::process::ExitCode;

use anyhow::Result;
use clap::Args;

use crate::Ctx;

/// Print a workspace's directory.
#[derive(Args, Debug)]
pub struct SwitchArgs {
    pub name: String,

    #[arg(long, short = 'p')]
    pub project: Option<String>,
}

impl SwitchArgs {
    pub fn run(self, ctx: &Ctx) -> Result<ExitCode> {
        let ws = ctx
            .orchestrator()
            .switch(self.project.as_deref(), &self.name)?;
        // Path only, so `cd "$(worksite switch NAME)"` works.
        println!("{}", ws.path.display());
        Ok(ExitCode::SUCCESS)
    }
}
