//! inkbook CLI
//!
//! Command-line interface for the inkbook studio database: initialization,
//! snapshots, retention, archive export and restore.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use inkbook_core::{Config, Principal, Role, Vault, VaultResult};

mod commands;
mod logging;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "inkbook")]
#[command(about = "inkbook - Studio database snapshots, archives and restore")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and seed the administrator (idempotent)
    Init,
    /// Show database health and snapshot count
    Status,
    /// Manage snapshots
    Snapshot {
        #[command(subcommand)]
        command: SnapshotCommands,
    },
    /// Prune old snapshots
    Retention {
        #[command(subcommand)]
        command: RetentionCommands,
    },
    /// Export snapshots to a zip archive
    Export {
        /// Snapshot IDs to include (all snapshots when omitted)
        ids: Vec<String>,
        /// Archive path (default: <data_dir>/export/inkbook-export-<timestamp>.zip)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Replace the live database with a snapshot or archive
    Restore {
        /// Snapshot ID, "latest", or path to an exported .zip archive
        target: String,
        /// Snapshot inside the archive (default: newest)
        #[arg(long)]
        snapshot_id: Option<String>,
        /// Skip checksum verification of the source
        #[arg(long)]
        no_verify: bool,
        /// Do not snapshot the current database first
        #[arg(long)]
        no_safety_snapshot: bool,
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
    /// Run the backup job (snapshot, then retention) on an interval
    Schedule {
        /// Seconds between runs
        #[arg(long, default_value_t = 86_400)]
        interval: u64,
    },
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum SnapshotCommands {
    /// Take a snapshot of the live database
    #[command(alias = "new")]
    Create,
    /// List snapshots, newest first
    #[command(alias = "ls")]
    List,
    /// Check a snapshot's checksum
    Verify {
        /// Snapshot ID or "latest"
        id: String,
    },
}

#[derive(Subcommand)]
enum RetentionCommands {
    /// Delete snapshots outside the retention policy
    Apply {
        /// Keep at least this many of the newest snapshots
        #[arg(long)]
        max_count: Option<usize>,
        /// Keep snapshots younger than this many days
        #[arg(long)]
        max_age_days: Option<u32>,
        /// Show what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (data_dir, database_file, lock_timeout_secs,
        /// retention.max_count, retention.max_age_days, admin_username,
        /// log_file, asset_dirs)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    match run(cli, &output).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            output.error(&e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, output: &Output) -> Result<()> {
    // Config commands don't need the database
    if let Commands::Config { command } = &cli.command {
        return handle_config_command(command.clone(), cli.config.as_ref(), output);
    }

    let config = Config::load_with_cli_override(cli.config.as_ref())
        .context("Failed to load configuration")?;
    logging::init(cli.verbose, config.log_file.as_deref());

    let principal = operator(&config);
    let vault = open_vault(&cli.command, config).context("Failed to open the studio database")?;

    match cli.command {
        Commands::Init => commands::init::run(&vault, &principal, output),
        Commands::Status => commands::status::show(&vault, &principal, output),
        Commands::Snapshot { command } => match command {
            SnapshotCommands::Create => commands::snapshot::create(&vault, &principal, output),
            SnapshotCommands::List => commands::snapshot::list(&vault, &principal, output),
            SnapshotCommands::Verify { id } => {
                commands::snapshot::verify(&vault, &principal, &id, output)
            }
        },
        Commands::Retention { command } => match command {
            RetentionCommands::Apply {
                max_count,
                max_age_days,
                dry_run,
            } => commands::retention::apply(
                &vault,
                &principal,
                max_count,
                max_age_days,
                dry_run,
                output,
            ),
        },
        Commands::Export { ids, output: path } => {
            commands::export::run(&vault, &principal, ids, path, output).await
        }
        Commands::Restore {
            target,
            snapshot_id,
            no_verify,
            no_safety_snapshot,
            force,
        } => commands::restore::run(
            &vault,
            &principal,
            commands::restore::RestoreArgs {
                target,
                snapshot_id,
                verify: !no_verify,
                safety_snapshot: !no_safety_snapshot,
                force,
            },
            output,
        ),
        Commands::Schedule { interval } => {
            commands::schedule::run(vault, principal, interval, output).await
        }
        Commands::Config { .. } => unreachable!(), // Handled above
    }
}

/// A restore has to get past a live database that no longer opens
fn open_vault(command: &Commands, config: Config) -> VaultResult<Vault> {
    if matches!(command, Commands::Restore { .. }) {
        Vault::open_for_recovery(config)
    } else {
        Vault::open(config)
    }
}

/// The CLI operates as the configured administrator
fn operator(config: &Config) -> Principal {
    Principal::new(config.admin_username.clone(), Role::Admin)
}

fn handle_config_command(
    command: Option<ConfigCommands>,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(config_path, output),
        Some(ConfigCommands::Set { key, value }) => {
            commands::config::set(key, value, config_path, output)
        }
    }
}
