//! `worksite start|stop|infra|agent`: commands that run a project-defined
//! shell command inside a workspace.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use worksite_exec::{CommandOutput, OutputMode};
use worksite_lifecycle::Transition;

use crate::{child_exit, Ctx};

/// A workspace, optionally qualified by project.
#[derive(Args, Debug)]
pub struct TargetArgs {
    pub name: String,

    #[arg(long, short = 'p')]
    pub project: Option<String>,
}

impl TargetArgs {
    pub fn start(self, ctx: &Ctx) -> Result<ExitCode> {
        let t = ctx
            .orchestrator()
            .start(self.project.as_deref(), &self.name)
            .with_context(|| format!("failed to start '{}'", self.name))?;
        Ok(report(&t, "started"))
    }

    pub fn stop(self, ctx: &Ctx) -> Result<ExitCode> {
        let t = ctx
            .orchestrator()
            .stop(self.project.as_deref(), &self.name)
            .with_context(|| format!("failed to stop '{}'", self.name))?;
        Ok(report(&t, "stopped"))
    }
}

fn report(t: &Transition, state: &str) -> ExitCode {
    let ws = &t.workspace;
    match &t.output {
        None => {
            println!("'{}/{}' is already {state}", ws.project, ws.name);
            ExitCode::SUCCESS
        }
        Some(out) if out.success() => {
            println!("✓ {}/{} {state}", ws.project, ws.name);
            ExitCode::SUCCESS
        }
        Some(out) => {
            eprintln!(
                "{} infra command exited with {}; '{}/{}' state unchanged",
                "warning:".yellow().bold(),
                out.exit_code,
                ws.project,
                ws.name
            );
            child_exit(out.exit_code)
        }
    }
}

/// Run a named infra command.
#[derive(Args, Debug)]
pub struct InfraArgs {
    pub name: String,

    /// Infra entry from `.worksite.yaml` (e.g. `test`, `logs`).
    pub command: String,

    #[arg(long, short = 'p')]
    pub project: Option<String>,

    /// Collect output and print it once the command finishes.
    #[arg(long)]
    pub capture: bool,
}

impl InfraArgs {
    pub fn run(self, ctx: &Ctx) -> Result<ExitCode> {
        let mode = if self.capture {
            OutputMode::Capture
        } else {
            OutputMode::Inherit
        };
        let out = ctx
            .orchestrator_with(mode)
            .infra(self.project.as_deref(), &self.name, &self.command)
            .with_context(|| format!("infra '{}' failed for '{}'", self.command, self.name))?;
        if self.capture {
            print_command_output(&self.command, &out);
        }
        Ok(child_exit(out.exit_code))
    }
}

fn print_command_output(command: &str, out: &CommandOutput) {
    println!("- {command} (exit {})", out.exit_code);
    for line in out.stdout.trim().lines() {
        println!("  {line}");
    }
    for line in out.stderr.trim().lines() {
        println!("  {} {line}", "[stderr]".bright_black());
    }
}

/// Launch the project's agent.
#[derive(Args, Debug)]
pub struct AgentArgs {
    pub name: String,

    #[arg(long, short = 'p')]
    pub project: Option<String>,

    /// Use the read-only agent command.
    #[arg(long)]
    pub readonly: bool,
}

impl AgentArgs {
    pub fn run(self, ctx: &Ctx) -> Result<ExitCode> {
        let out = ctx
            .orchestrator()
            .agent(self.project.as_deref(), &self.name, self.readonly)
            .with_context(|| format!("failed to launch agent in '{}'", self.name))?;
        Ok(child_exit(out.exit_code))
    }
}
