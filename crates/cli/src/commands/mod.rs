//! CLI command implementations

mod feed;
mod maintenance;
mod settings;

use anyhow::{Context, Result, bail};
use sleet::{commands::CommandContext, config::Config};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub use feed::{cmd_delete, cmd_init, cmd_push};
pub use maintenance::{cmd_destroy, cmd_stats, cmd_validate};
pub use settings::{
  cmd_retention_clear, cmd_retention_prune, cmd_retention_set, cmd_settings_clear, cmd_settings_get, cmd_settings_list,
  cmd_settings_set, cmd_settings_unset,
};

/// Resolved global flags shared by every command.
pub struct Global {
  pub config: Config,
  pub source: Option<String>,
  cancel: CancellationToken,
}

impl Global {
  /// Load config (`--config` errors surface, otherwise the usual lookup) and apply flag overrides.
  pub fn load(config: Option<&Path>, source: Option<String>, lock_timeout: Option<u64>) -> Result<Self> {
    let mut config = match config {
      Some(path) => Config::load_from_path(path)?,
      None => {
        let cwd = std::env::current_dir().unwrap_or_else(|_| std::path::PathBuf::from("."));
        Config::load_for_dir(&cwd)
      }
    };
    if let Some(secs) = lock_timeout {
      config.lock.timeout_secs = Some(secs);
    }

    Ok(Self {
      config,
      source,
      cancel: CancellationToken::new(),
    })
  }

  /// Command context for the selected source, cancelled on Ctrl-C.
  pub fn context(&self) -> Result<CommandContext> {
    let ctx = CommandContext::from_config(&self.config, self.source.as_deref())?;
    let cancel = self.cancel.clone();
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        warn!("Interrupted, abandoning the current operation");
        cancel.cancel();
      }
    });
    Ok(ctx.with_cancel(self.cancel.clone()))
  }
}

/// Split `KEY=VALUE`.
pub fn parse_pair(pair: &str) -> Result<(String, String)> {
  let Some((key, value)) = pair.split_once('=') else {
    bail!("expected KEY=VALUE, got '{pair}'");
  };
  let key = key.trim();
  if key.is_empty() {
    bail!("empty key in '{pair}'");
  }
  Ok((key.to_string(), value.trim().to_string()))
}

pub fn parse_pairs(pairs: &[String]) -> Result<Vec<(String, String)>> {
  pairs
    .iter()
    .map(|p| parse_pair(p).with_context(|| format!("Invalid setting '{p}'")))
    .collect()
}
