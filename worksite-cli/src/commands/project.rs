//! `worksite project add|list|remove`

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use worksite_exec::OutputMode;

use crate::Ctx;

/// Manage the project catalog.
#[derive(Subcommand, Debug)]
pub enum ProjectCommand {
    /// Register the project whose `.worksite.yaml` is in PATH.
    Add(AddArgs),

    /// List registered projects.
    List,

    /// Unregister a project. Its workspaces stay, marked orphaned.
    Remove(RemoveArgs),
}

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Repository root containing `.worksite.yaml`.
    pub path: PathBuf,

    /// Register under this name instead of the one in `.worksite.yaml`.
    #[arg(long)]
    pub name: Option<String>,
}

#[derive(Args, Debug)]
pub struct RemoveArgs {
    pub name: String,
}

#[derive(Tabled)]
struct ProjectRow {
    #[tabled(rename = "project")]
    name: String,
    #[tabled(rename = "root")]
    root: String,
    #[tabled(rename = "workspaces")]
    workspaces: usize,
}

pub fn run(cmd: ProjectCommand, ctx: &Ctx) -> Result<ExitCode> {
    match cmd {
        ProjectCommand::Add(args) => add(args, ctx),
        ProjectCommand::List => list(ctx),
        ProjectCommand::Remove(args) => remove(args, ctx),
    }
}

fn add(args: AddArgs, ctx: &Ctx) -> Result<ExitCode> {
    let (project, added) = ctx
        .orchestrator_with(OutputMode::Capture)
        .add_project(&args.path, args.name.as_deref())
        .with_context(|| format!("failed to add project at '{}'", args.path.display()))?;
    if added {
        println!(
            "✓ Registered project '{}' at {}",
            project.name,
            project.root_directory.display()
        );
    } else {
        println!("Project '{}' is already registered", project.name);
    }
    Ok(ExitCode::SUCCESS)
}

fn list(ctx: &Ctx) -> Result<ExitCode> {
    let projects = ctx
        .orchestrator_with(OutputMode::Capture)
        .projects()
        .context("failed to load registry")?;
    if projects.is_empty() {
        println!("No projects registered.");
        println!("Run: worksite project add <path>");
        return Ok(ExitCode::SUCCESS);
    }

    let rows: Vec<ProjectRow> = projects
        .into_iter()
        .map(|p| ProjectRow {
            name: p.project.name.0,
            root: p.project.root_directory.display().to_string(),
            workspaces: p.workspaces,
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(ExitCode::SUCCESS)
}

fn remove(args: RemoveArgs, ctx: &Ctx) -> Result<ExitCode> {
    let removed = ctx
        .orchestrator_with(OutputMode::Capture)
        .remove_project(&args.name)
        .with_context(|| format!("failed to remove project '{}'", args.name))?;
    println!("✓ Removed project '{}'", removed.project.name);
    if !removed.orphans.is_empty() {
        println!(
            "{} {} workspace(s) are now orphaned; `worksite destroy <name>` still cleans them up:",
            "note:".yellow().bold(),
            removed.orphans.len()
        );
        for ws in &removed.orphans {
            println!("  - {} ({})", ws.name, ws.path.display());
        }
    }
    Ok(ExitCode::SUCCESS)
}
