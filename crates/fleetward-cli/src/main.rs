use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use fleetward_core::DEFAULT_MAX_WAIT_MINUTES;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod commands;
mod completion;
mod dispatch;
mod render;

use completion::CliCompletionShell;
use dispatch::run_cli;

#[derive(Parser, Debug)]
#[command(name = "fleetward")]
#[command(about = "Safe in-place upgrades for self-hosted CI runners", long_about = None)]
pub(crate) struct Cli {
    /// Runner installation directory; falls back to FLEETWARD_RUNNER_PATH.
    #[arg(long, global = true)]
    path: Option<PathBuf>,
    /// TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Commands {
    /// Upgrade the runner to the latest or a pinned release.
    Upgrade {
        #[arg(long = "version", value_name = "VERSION")]
        target_version: Option<String>,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        skip_backup: bool,
        #[arg(long)]
        dry_run: bool,
        #[arg(long, default_value_t = DEFAULT_MAX_WAIT_MINUTES)]
        max_wait_minutes: u64,
    },
    /// Show installed version, service state and the last run.
    Status,
    /// Run named health checks against the installation.
    Doctor,
    /// List state backups, newest first.
    Backups,
    /// Restore a state backup and restart the service.
    Rollback {
        #[arg(long = "backup", value_name = "ID")]
        backup_id: Option<String>,
        #[arg(long)]
        dry_run: bool,
    },
    Completions {
        #[arg(value_enum)]
        shell: CliCompletionShell,
    },
    Version,
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match run_cli(cli) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(1)
        }
    }
}

#[cfg(test)]
mod tests;
