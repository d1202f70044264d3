//! sleet CLI - publish packages to a static feed

use anyhow::Result;
use clap::{Parser, Subcommand};
use sleet::commands::CommandError;
use std::{path::PathBuf, process::ExitCode};
use tracing::error;

mod commands;
mod logging;

use commands::{
  Global, cmd_delete, cmd_destroy, cmd_init, cmd_push, cmd_retention_clear, cmd_retention_prune, cmd_retention_set,
  cmd_settings_clear, cmd_settings_get, cmd_settings_list, cmd_settings_set, cmd_settings_unset, cmd_stats,
  cmd_validate,
};
use logging::init_logging;

#[derive(Parser)]
#[command(name = "sleet")]
#[command(about = "Publish packages to a static feed")]
#[command(after_help = "\
QUICK START:
  sleet init                      # Create the feed documents
  sleet push pkg.json             # Publish packages from manifests
  sleet stats                     # Show feed counters

MAINTENANCE:
  sleet validate                  # Cross-check derived documents
  sleet retention set --stable 5  # Keep the newest five stable versions")]
struct Cli {
  /// Config file (default: ./sleet.toml, then the user config)
  #[arg(long, global = true, value_name = "FILE")]
  config: Option<PathBuf>,
  /// Source name from the config
  #[arg(long, global = true)]
  source: Option<String>,
  /// Debug logging
  #[arg(short, long, global = true)]
  verbose: bool,
  /// Seconds to wait for the feed lock (0 fails fast)
  #[arg(long, global = true, value_name = "SECS")]
  lock_timeout: Option<u64>,
  #[command(subcommand)]
  command: Commands,
}

/// Subcommands for `sleet retention`
#[derive(Subcommand)]
pub enum RetentionCommand {
  /// Store version limits in the feed settings
  Set {
    /// Maximum stable versions per id
    #[arg(long)]
    stable: Option<usize>,
    /// Maximum prerelease versions per id
    #[arg(long)]
    prerelease: Option<usize>,
    /// Count prereleases per first label (beta, rc, ...)
    #[arg(long)]
    group_by_label: bool,
  },
  /// Remove version limits
  Clear,
  /// Apply the configured limits now
  Prune,
}

/// Subcommands for `sleet settings`
#[derive(Subcommand)]
pub enum SettingsCommand {
  /// Print one setting
  Get { key: String },
  /// Set one or more settings
  Set {
    #[arg(value_name = "KEY=VALUE", required = true)]
    pairs: Vec<String>,
  },
  /// Remove settings
  Unset {
    #[arg(required = true)]
    keys: Vec<String>,
  },
  /// Print all settings
  List {
    #[arg(long)]
    json: bool,
  },
  /// Remove every setting
  Clear,
}

#[derive(Subcommand)]
enum Commands {
  /// Create the feed container and root documents
  Init {
    /// Initial feed setting
    #[arg(long = "setting", value_name = "KEY=VALUE")]
    settings: Vec<String>,
  },
  /// Publish packages described by JSON manifests
  Push {
    /// Manifest files, each holding one descriptor or an array of them
    #[arg(required = true)]
    manifests: Vec<PathBuf>,
    /// Leave packages that already exist alone
    #[arg(long, conflicts_with = "force")]
    skip_existing: bool,
    /// Replace packages that already exist
    #[arg(long)]
    force: bool,
  },
  /// Remove one version, or every version of an id
  Delete {
    id: String,
    #[arg(long)]
    version: Option<String>,
    /// Reason recorded in the catalog
    #[arg(long)]
    reason: Option<String>,
    /// Succeed when nothing matches
    #[arg(long)]
    force: bool,
  },
  /// Version retention
  Retention {
    #[command(subcommand)]
    command: RetentionCommand,
  },
  /// Feed settings
  Settings {
    #[command(subcommand)]
    command: SettingsCommand,
  },
  /// Show feed counters
  Stats {
    #[arg(long)]
    json: bool,
  },
  /// Cross-check derived documents against the package index
  Validate {
    #[arg(long)]
    json: bool,
  },
  /// Delete every feed file
  Destroy {
    /// Also delete the container
    #[arg(long)]
    container: bool,
  },
}

#[tokio::main]
async fn main() -> ExitCode {
  let cli = Cli::parse();

  let global = match Global::load(cli.config.as_deref(), cli.source, cli.lock_timeout) {
    Ok(global) => global,
    Err(e) => {
      eprintln!("Error: {e:#}");
      return ExitCode::from(exit_status(&e));
    }
  };
  let guard = init_logging(&global.config.logging, cli.verbose);

  let status = match run(cli.command, &global).await {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      error!("{e:#}");
      ExitCode::from(exit_status(&e))
    }
  };
  // Flush the file writer before exiting
  drop(guard);
  status
}

fn exit_code(err: &anyhow::Error) -> i32 {
  err.downcast_ref::<CommandError>().map_or(1, CommandError::exit_code)
}

fn exit_status(err: &anyhow::Error) -> u8 {
  u8::try_from(exit_code(err)).unwrap_or(1)
}

async fn run(command: Commands, global: &Global) -> Result<()> {
  match command {
    Commands::Init { settings } => cmd_init(global, &settings).await,
    Commands::Push {
      manifests,
      skip_existing,
      force,
    } => cmd_push(global, &manifests, skip_existing, force).await,
    Commands::Delete {
      id,
      version,
      reason,
      force,
    } => cmd_delete(global, &id, version.as_deref(), reason, force).await,

    Commands::Retention { command } => match command {
      RetentionCommand::Set {
        stable,
        prerelease,
        group_by_label,
      } => cmd_retention_set(global, stable, prerelease, group_by_label).await,
      RetentionCommand::Clear => cmd_retention_clear(global).await,
      RetentionCommand::Prune => cmd_retention_prune(global).await,
    },

    Commands::Settings { command } => match command {
      SettingsCommand::Get { key } => cmd_settings_get(global, &key).await,
      SettingsCommand::Set { pairs } => cmd_settings_set(global, &pairs).await,
      SettingsCommand::Unset { keys } => cmd_settings_unset(global, &keys).await,
      SettingsCommand::List { json } => cmd_settings_list(global, json).await,
      SettingsCommand::Clear => cmd_settings_clear(global).await,
    },

    Commands::Stats { json } => cmd_stats(global, json).await,
    Commands::Validate { json } => cmd_validate(global, json).await,
    Commands::Destroy { container } => cmd_destroy(global, container).await,
  }
}
