//! Logging setup for the CLI

use sleet::config::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Parse log level from config string
fn parse_log_level(level: &str) -> tracing::Level {
  match level.to_lowercase().as_str() {
    "off" | "error" => tracing::Level::ERROR,
    "warn" => tracing::Level::WARN,
    "info" => tracing::Level::INFO,
    "debug" => tracing::Level::DEBUG,
    "trace" => tracing::Level::TRACE,
    _ => tracing::Level::INFO,
  }
}

/// Initialize logging from the `[logging]` config section.
///
/// Console output goes to stderr so command output on stdout stays machine-readable. With
/// `logging.file` set, logs go to that file only (no ANSI).
///
/// Returns the guard that must be kept alive for the duration of the program
pub fn init_logging(config: &LoggingConfig, verbose: bool) -> Option<WorkerGuard> {
  let level = if verbose {
    tracing::Level::DEBUG
  } else {
    parse_log_level(&config.level)
  };

  // RUST_LOG still overrides
  let env_filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();

  let Some(file) = &config.file else {
    tracing_subscriber::fmt()
      .with_env_filter(env_filter)
      .with_target(false)
      .with_writer(std::io::stderr)
      .init();
    return None;
  };

  let dir = file
    .parent()
    .filter(|p| !p.as_os_str().is_empty())
    .unwrap_or_else(|| std::path::Path::new("."));
  let name = file.file_name().map_or_else(|| "sleet.log".into(), |n| n.to_os_string());

  if std::fs::create_dir_all(dir).is_err() {
    // Fall back to console logging
    tracing_subscriber::fmt()
      .with_env_filter(env_filter)
      .with_writer(std::io::stderr)
      .init();
    return None;
  }

  let file_appender = tracing_appender::rolling::never(dir, name);
  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

  tracing_subscriber::fmt()
    .with_env_filter(env_filter)
    .with_target(true)
    .with_ansi(false)
    .with_writer(file_writer)
    .init();

  Some(guard)
}
