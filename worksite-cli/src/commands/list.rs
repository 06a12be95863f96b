//! `worksite list [--project P] [--json]`

use std::collections::BTreeMap;
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::Local;
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use worksite_exec::OutputMode;
use worksite_lifecycle::WorkspaceView;

use crate::Ctx;

/// List registered workspaces.
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Only workspaces of this project.
    #[arg(long, short = 'p')]
    pub project: Option<String>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct WorkspaceRow {
    #[tabled(rename = "workspace")]
    name: String,
    #[tabled(rename = "infra")]
    state: String,
    #[tabled(rename = "path")]
    path: String,
    #[tabled(rename = "created")]
    created: String,
    #[tabled(rename = "notes")]
    notes: String,
}

impl ListArgs {
    pub fn run(self, ctx: &Ctx) -> Result<ExitCode> {
        let views = ctx
            .orchestrator_with(OutputMode::Capture)
            .list(self.project.as_deref())
            .context("failed to load registry")?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&views).context("failed to serialize workspaces")?
            );
            return Ok(ExitCode::SUCCESS);
        }
        print_table(views);
        Ok(ExitCode::SUCCESS)
    }
}

fn print_table(views: Vec<WorkspaceView>) {
    if views.is_empty() {
        println!("No workspaces registered.");
        println!("Run: worksite create <name>");
        return;
    }

    let started = views.iter().filter(|v| v.workspace.started).count();
    let mut grouped = BTreeMap::<String, Vec<WorkspaceView>>::new();
    for view in views {
        grouped
            .entry(view.workspace.project.0.clone())
            .or_default()
            .push(view);
    }
    println!(
        "worksite v{} | {} projects | {} workspaces | {} started",
        env!("CARGO_PKG_VERSION"),
        grouped.len(),
        grouped.values().map(Vec::len).sum::<usize>(),
        started,
    );

    for (project, rows) in grouped {
        println!("{}", project.to_uppercase().bold());
        let rows: Vec<WorkspaceRow> = rows.into_iter().map(row).collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
    }
}

fn row(view: WorkspaceView) -> WorkspaceRow {
    let ws = view.workspace;
    let state = if ws.started {
        "started".green().to_string()
    } else {
        "stopped".bright_black().to_string()
    };
    let mut notes = Vec::new();
    if view.orphaned {
        notes.push("orphaned".magenta().to_string());
    }
    if !view.present {
        notes.push("missing".red().to_string());
    }
    WorkspaceRow {
        name: ws.name.0,
        state,
        path: ws.path.display().to_string(),
        created: ws
            .created_at
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M")
            .to_string(),
        notes: notes.join(", "),
    }
}
