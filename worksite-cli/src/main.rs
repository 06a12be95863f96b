//! worksite: isolated per-task workspaces (worktree + infra) for registered projects.
//!
//! # Usage
//!
//! ```text
//! worksite create <name> [--project P] [--from REF] [--start|--no-start]
//! worksite list [--project P] [--json]
//! worksite switch <name> [--project P]
//! worksite run <name> [--project P] [--timeout SECS] -- <command...>
//! worksite start|stop <name> [--project P]
//! worksite infra <name> <command> [--project P] [--capture]
//! worksite agent <name> [--project P] [--readonly]
//! worksite destroy <name> [--project P] [--force]
//! worksite project add <path> [--name N]
//! worksite project list
//! worksite project remove <name>
//! ```
//!
//! Exit codes: 0 success, 3 config, 4 lookup, 5 conflict, 6 external tool,
//! 7 partial failure, 75 registry busy (retry). Commands that run a child
//! process exit with the child's code when it fails.

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;

use commands::{
    create::CreateArgs, destroy::DestroyArgs, infra::AgentArgs, infra::InfraArgs,
    infra::TargetArgs, list::ListArgs, project::ProjectCommand, run::RunArgs, switch::SwitchArgs,
};
use worksite_core::{ConfigError, ErrorKind, RegistryError, Settings};
use worksite_exec::{ExecError, OutputMode};
use worksite_lifecycle::{LifecycleError, Orchestrator};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "worksite",
    version,
    about = "Create, run and tear down isolated workspaces for your projects",
    long_about = None,
)]
struct Cli {
    /// Raise log verbosity (-v info, -vv debug). RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// How long to wait for the registry lock, in milliseconds.
    #[arg(long, global = true, value_name = "MS")]
    lock_timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a workspace: worktree + registry entry (+ infra start).
    Create(CreateArgs),

    /// List registered workspaces.
    List(ListArgs),

    /// Print a workspace's directory (use with `cd "$(worksite switch NAME)"`).
    Switch(SwitchArgs),

    /// Run a command inside a workspace.
    Run(RunArgs),

    /// Run the project's `infra.start` for a workspace.
    Start(TargetArgs),

    /// Run the project's `infra.stop` for a workspace.
    Stop(TargetArgs),

    /// Run a named infra command (e.g. `test`) for a workspace.
    Infra(InfraArgs),

    /// Launch the project's agent inside a workspace.
    Agent(AgentArgs),

    /// Stop infra, remove the worktree and unregister a workspace.
    Destroy(DestroyArgs),

    /// Manage the project catalog.
    Project {
        #[command(subcommand)]
        command: ProjectCommand,
    },
}

// ---------------------------------------------------------------------------
// Shared context
// ---------------------------------------------------------------------------

/// Per-invocation state shared by every command.
pub struct Ctx {
    pub home: PathBuf,
    pub settings: Settings,
}

impl Ctx {
    fn load(lock_timeout_ms: Option<u64>) -> Result<Self> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let settings = Settings::load_at(&home)
            .context("failed to load settings")?
            .with_cli_overrides(lock_timeout_ms, None);
        Ok(Self { home, settings })
    }

    /// Orchestrator whose child processes share this terminal.
    pub fn orchestrator(&self) -> Orchestrator {
        self.orchestrator_with(OutputMode::Inherit)
    }

    pub fn orchestrator_with(&self, output: OutputMode) -> Orchestrator {
        Orchestrator::at(&self.home, self.settings.clone()).with_output(output)
    }
}

/// Exit with a child's code.
pub fn child_exit(code: i32) -> ExitCode {
    ExitCode::from(child_code(code))
}

/// Non-zero codes that do not fit a process exit status become 1.
fn child_code(code: i32) -> u8 {
    match u8::try_from(code) {
        Ok(c) => c,
        Err(_) => 1,
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{} {err:#}", "error:".red().bold());
            let kind = error_kind(&err);
            if kind.is_some_and(ErrorKind::is_retryable) {
                eprintln!("another worksite command holds the registry; try again");
            }
            ExitCode::from(kind.map_or(1, ErrorKind::exit_code))
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let ctx = Ctx::load(cli.lock_timeout_ms)?;
    match cli.command {
        Commands::Create(args) => args.run(&ctx),
        Commands::List(args) => args.run(&ctx),
        Commands::Switch(args) => args.run(&ctx),
        Commands::Run(args) => args.run(&ctx),
        Commands::Start(args) => args.start(&ctx),
        Commands::Stop(args) => args.stop(&ctx),
        Commands::Infra(args) => args.run(&ctx),
        Commands::Agent(args) => args.run(&ctx),
        Commands::Destroy(args) => args.run(&ctx),
        Commands::Project { command } => commands::project::run(command, &ctx),
    }
}

/// Logs go to stderr so stdout stays parseable.
fn init_tracing(verbose: u8) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// The first worksite error in the chain decides the exit code.
fn error_kind(err: &anyhow::Error) -> Option<ErrorKind> {
    err.chain().find_map(|cause| {
        if let Some(e) = cause.downcast_ref::<LifecycleError>() {
            Some(e.kind())
        } else if let Some(e) = cause.downcast_ref::<RegistryError>() {
            Some(e.kind())
        } else if let Some(e) = cause.downcast_ref::<ExecError>() {
            Some(e.kind())
        } else if cause.downcast_ref::<ConfigError>().is_some() {
            Some(ErrorKind::Config)
        } else {
            None
        }
    })
}
