//! pipesync: keep locally maintained Tekton pipelines in step with upstream.
//!
//! # Usage
//!
//! ```text
//! pipesync sync [--config FILE] [--mapping NAME] [--dry-run] [--auto-patch] [--update-refs]
//!               [--mode skip|auto-patch|refresh-bundles|both] [--github-output FILE] [--json]
//! pipesync diff [--config FILE] [--mapping NAME] [--mode ...]
//! pipesync tasks [--config FILE] [--json]
//! ```

mod catalog;
mod command_capability;
mod commands;
mod github;
mod session;
mod source;
mod writer;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};

use commands::{diff::DiffArgs, sync::SyncArgs, tasks::TasksArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "pipesync",
    version,
    about = "Reconcile local Tekton pipelines against their upstream definitions",
    long_about = None,
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Reconcile every configured pipeline and write the merged result.
    Sync(SyncArgs),

    /// Show unified diff of what sync would write.
    Diff(DiffArgs),

    /// List missing and local-only tasks per pipeline.
    Tasks(TasksArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match cli.command {
        Commands::Sync(args) => args.run(),
        Commands::Diff(args) => args.run(),
        Commands::Tasks(args) => args.run(),
    }
}
