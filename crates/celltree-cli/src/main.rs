#![deny(unsafe_code)]

mod commands;
mod config;
mod exit_code;
mod output;
mod state;

use std::io;
use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use celltree_core::config::ConfigError;
use celltree_core::error::ConflictReason;
use celltree_core::{DavError, EngineConfig};

use crate::commands::{acl, boxes, cell, get, init, ls, mkcol, mv, proppatch, put, rm, role};
use crate::config::Config;
use crate::state::Workspace;

/// Command-line interface for a local celltree state directory
#[derive(Parser)]
#[command(name = "celltree")]
#[command(author, version)]
#[command(propagate_version = true)]
#[command(after_help = "EXAMPLES:
    # Create a state directory, a cell and a box
    celltree init
    celltree cell create alice
    celltree box create alice box1

    # Store and read a file
    echo hello | celltree put /alice/box1/docs/hello.txt
    celltree get /alice/box1/docs/hello.txt

    # Move without replacing an existing destination
    celltree mv /alice/box1/docs/hello.txt /alice/box1/hello.txt
")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Configuration file (default: platform config dir)
    #[arg(long, env = "CELLTREE_CONFIG", global = true)]
    config: Option<std::path::PathBuf>,

    /// State directory holding documents and binary content
    #[arg(long, env = "CELLTREE_STATE_DIR", global = true)]
    state_dir: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty state directory
    Init(init::Args),

    #[command(flatten)]
    Workspace(WorkspaceCommand),
}

/// Commands that run against an opened state directory
#[derive(Subcommand)]
enum WorkspaceCommand {
    // ============ Tree operations (paths are /cell/box/...) ============

    /// Create a collection
    Mkcol(mkcol::Args),

    /// Create or replace a file from stdin or a local file
    Put(put::Args),

    /// Write file content to stdout
    Get(get::Args),

    /// List collection contents
    Ls(ls::Args),

    /// Delete a file or an empty collection
    Rm(rm::Args),

    /// Move or rename a resource within a box
    Mv(mv::Args),

    /// Set or remove dead properties
    Proppatch(proppatch::Args),

    /// Show or replace a resource ACL
    Acl(acl::Args),

    // ============ Control objects ============

    /// Manage cells
    Cell(cell::Args),

    /// Manage boxes
    #[command(name = "box")]
    Boxes(boxes::Args),

    /// Manage roles
    Role(role::Args),
}

impl WorkspaceCommand {
    /// Commands that never change stored state skip the snapshot write.
    fn modifies_state(&self) -> bool {
        match self {
            WorkspaceCommand::Get(_) | WorkspaceCommand::Ls(_) => false,
            WorkspaceCommand::Acl(args) => args.modifies_state(),
            WorkspaceCommand::Cell(args) => args.modifies_state(),
            WorkspaceCommand::Boxes(args) => args.modifies_state(),
            WorkspaceCommand::Role(args) => args.modifies_state(),
            _ => true,
        }
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::from(exit_code::SUCCESS),
        Err(e) => {
            let code = categorize_error(&e);

            let args: Vec<String> = std::env::args().collect();
            let is_quiet = args.iter().any(|a| a == "-q" || a == "--quiet");

            if !is_quiet {
                eprintln!("Error: {e:#}");
            }

            ExitCode::from(code)
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    if !cli.quiet {
        setup_tracing(cli.verbose);
    }

    let config = Config::load(cli.config.as_deref())?;
    let state_dir = config.state_dir(cli.state_dir.as_deref())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    runtime.block_on(dispatch(cli.command, &state_dir, config.engine, cli.quiet))
}

async fn dispatch(command: Commands, state_dir: &Path, engine_config: EngineConfig, quiet: bool) -> Result<()> {
    let command = match command {
        Commands::Init(args) => return init::execute(state_dir, &args, quiet).await,
        Commands::Workspace(command) => command,
    };

    let save = command.modifies_state();
    let workspace = Workspace::open(state_dir, engine_config).await?;

    let result = match &command {
        WorkspaceCommand::Mkcol(args) => mkcol::execute(&workspace, args).await,
        WorkspaceCommand::Put(args) => put::execute(&workspace, args).await,
        WorkspaceCommand::Get(args) => get::execute(&workspace, args).await,
        WorkspaceCommand::Ls(args) => ls::execute(&workspace, args).await,
        WorkspaceCommand::Rm(args) => rm::execute(&workspace, args).await,
        WorkspaceCommand::Mv(args) => mv::execute(&workspace, args).await,
        WorkspaceCommand::Proppatch(args) => proppatch::execute(&workspace, args).await,
        WorkspaceCommand::Acl(args) => acl::execute(&workspace, args).await,
        WorkspaceCommand::Cell(args) => cell::execute(&workspace, args).await,
        WorkspaceCommand::Boxes(args) => boxes::execute(&workspace, args).await,
        WorkspaceCommand::Role(args) => role::execute(&workspace, args).await,
    };

    // Failed operations leave the store consistent, so their partial
    // effects (a rolled back MOVE, a DELETE whose blob removal failed) are
    // persisted like any other.
    let closed = workspace.close(save).await;
    result?;
    closed
}

fn setup_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(io::stderr)
        .init();
}

/// Categorize an error into an exit code using typed error downcasting
fn categorize_error(e: &anyhow::Error) -> u8 {
    for cause in e.chain() {
        if let Some(dav_err) = cause.downcast_ref::<DavError>() {
            return match dav_err {
                DavError::NotFound { .. } => exit_code::NOT_FOUND,
                DavError::Conflict {
                    reason: ConflictReason::CellBusy,
                    ..
                }
                | DavError::LockTimeout { .. }
                | DavError::Unavailable { .. } => exit_code::BUSY,
                DavError::Conflict { .. } | DavError::PreconditionFailed { .. } => exit_code::CONFLICT,
                DavError::BadRequest { .. }
                | DavError::NotImplemented { .. }
                | DavError::RangeNotSatisfiable { .. } => exit_code::USAGE_ERROR,
                DavError::Forbidden { .. } => exit_code::FORBIDDEN,
                _ => exit_code::GENERAL_ERROR,
            };
        }

        if cause.downcast_ref::<ConfigError>().is_some() {
            return exit_code::USAGE_ERROR;
        }

        if let Some(state_err) = cause.downcast_ref::<state::StateError>() {
            return match state_err {
                state::StateError::NotInitialized(_) => exit_code::NOT_FOUND,
                _ => exit_code::STATE_INVALID,
            };
        }

        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            match io_err.kind() {
                io::ErrorKind::NotFound => return exit_code::NOT_FOUND,
                io::ErrorKind::PermissionDenied => return exit_code::FORBIDDEN,
                _ => {}
            }
        }
    }

    exit_code::GENERAL_ERROR
}
