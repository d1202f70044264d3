//! Application configuration for the sleet tool.
//!
//! Config priority: explicit path > project-relative (./sleet.toml) > user (~/.config/sleet/config.toml)

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use serde::{Deserialize, Serialize};

pub const PROJECT_CONFIG_FILE: &str = "sleet.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("Failed to read config file {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("Failed to parse config file {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },
  #[error("Unknown source '{0}'")]
  UnknownSource(String),
  #[error("Invalid source '{name}': {reason}")]
  InvalidSource { name: String, reason: String },
}

// ============================================================================
// Lock Configuration
// ============================================================================

/// Feed lock behaviour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
  /// How long to wait for the lock. Absent waits forever, 0 fails fast.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub timeout_secs: Option<u64>,

  /// Age after which a lock marker is considered abandoned (default: 3600)
  pub stale_after_secs: u64,

  /// Initial delay between acquisition attempts (default: 250)
  pub poll_interval_ms: u64,

  /// Upper bound for the backoff delay (default: 5000)
  pub max_poll_interval_ms: u64,
}

impl Default for LockConfig {
  fn default() -> Self {
    Self {
      timeout_secs: None,
      stale_after_secs: 3600,
      poll_interval_ms: 250,
      max_poll_interval_ms: 5000,
    }
  }
}

impl LockConfig {
  pub fn timeout(&self) -> Option<Duration> {
    self.timeout_secs.map(Duration::from_secs)
  }

  pub fn stale_after(&self) -> Duration {
    Duration::from_secs(self.stale_after_secs)
  }

  pub fn poll_interval(&self) -> Duration {
    Duration::from_millis(self.poll_interval_ms.max(1))
  }

  pub fn max_poll_interval(&self) -> Duration {
    Duration::from_millis(self.max_poll_interval_ms.max(self.poll_interval_ms).max(1))
  }
}

// ============================================================================
// Logging Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Log level: error, warn, info, debug, trace (default: info)
  pub level: String,

  /// Write logs to this file instead of the console
  #[serde(skip_serializing_if = "Option::is_none")]
  pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      file: None,
    }
  }
}

// ============================================================================
// Source Configuration
// ============================================================================

/// Storage backend kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
  #[default]
  Local,
  Memory,
}

/// One feed the tool can operate on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
  pub name: String,

  #[serde(rename = "type", default)]
  pub source_type: SourceType,

  /// Root directory (local sources only)
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub path: Option<PathBuf>,

  /// URI the feed documents are addressed by. Defaults to the file:// URI of `path`.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub base_uri: Option<String>,

  /// URI written into generated links, when clients reach the feed through a different host.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub external_uri: Option<String>,
}

impl SourceConfig {
  pub fn local(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
    Self {
      name: name.into(),
      source_type: SourceType::Local,
      path: Some(path.into()),
      base_uri: None,
      external_uri: None,
    }
  }

  pub fn memory(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      source_type: SourceType::Memory,
      path: None,
      base_uri: None,
      external_uri: None,
    }
  }
}

// ============================================================================
// Root Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Source used when none is named on the command line
  #[serde(skip_serializing_if = "Option::is_none")]
  pub default_source: Option<String>,

  pub lock: LockConfig,

  pub logging: LoggingConfig,

  pub sources: Vec<SourceConfig>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      default_source: None,
      lock: LockConfig::default(),
      logging: LoggingConfig::default(),
      sources: vec![SourceConfig::local("local", "feed")],
    }
  }
}

impl Config {
  /// Load config from an explicit file. Errors are surfaced to the caller.
  pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  /// Load config for a working directory, falling back to user config, then defaults.
  pub fn load_for_dir(dir: &Path) -> Self {
    let project_config = dir.join(PROJECT_CONFIG_FILE);
    if project_config.exists()
      && let Ok(content) = std::fs::read_to_string(&project_config)
      && let Ok(config) = toml::from_str(&content)
    {
      return config;
    }

    if let Some(user_config_path) = Self::user_config_path()
      && user_config_path.exists()
      && let Ok(content) = std::fs::read_to_string(&user_config_path)
      && let Ok(config) = toml::from_str(&content)
    {
      return config;
    }

    Self::default()
  }

  /// Get the user-level config path
  pub fn user_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("SLEET_CONFIG_DIR") {
      return Some(PathBuf::from(path).join("config.toml"));
    }
    dirs::config_dir().map(|p| p.join("sleet").join("config.toml"))
  }

  /// Pick a source by name, else the configured default, else the only/first source.
  pub fn source(&self, name: Option<&str>) -> Result<&SourceConfig, ConfigError> {
    let wanted = name.or(self.default_source.as_deref());
    match wanted {
      Some(wanted) => self
        .sources
        .iter()
        .find(|s| s.name.eq_ignore_ascii_case(wanted))
        .ok_or_else(|| ConfigError::UnknownSource(wanted.to_string())),
      None => self
        .sources
        .first()
        .ok_or_else(|| ConfigError::UnknownSource("<none configured>".to_string())),
    }
  }

  /// Generate a commented config file suitable for `sleet.toml`
  pub fn generate_template() -> String {
    r#"# sleet configuration

# default_source = "local"

[lock]
# Seconds to wait for the feed lock. Remove to wait forever, 0 to fail fast.
# timeout_secs = 300
stale_after_secs = 3600
poll_interval_ms = 250
max_poll_interval_ms = 5000

[logging]
level = "info"
# file = "sleet.log"

[[sources]]
name = "local"
type = "local"
path = "feed"
# base_uri = "https://example.com/feed/"
# external_uri = "https://cdn.example.com/feed/"
"#
    .to_string()
  }
}

#[cfg(test)]
mod tests {
  use tempfile::TempDir;

  use super::*;

  #[test]
  fn test_defaults() {
    let config = Config::default();
    assert_eq!(config.lock.timeout_secs, None);
    assert_eq!(config.lock.stale_after_secs, 3600);
    assert_eq!(config.logging.level, "info");
    assert_eq!(config.sources.len(), 1);
    assert_eq!(config.sources[0].source_type, SourceType::Local);
  }

  #[test]
  fn test_template_parses() {
    let config: Config = toml::from_str(&Config::generate_template()).unwrap();
    assert_eq!(config.sources[0].name, "local");
    assert_eq!(config.sources[0].path, Some(PathBuf::from("feed")));
  }

  #[test]
  fn test_partial_config_uses_defaults() {
    let toml_content = r#"
[lock]
timeout_secs = 0

[[sources]]
name = "mem"
type = "memory"
"#;
    let config: Config = toml::from_str(toml_content).unwrap();
    assert_eq!(config.lock.timeout(), Some(Duration::ZERO));
    assert_eq!(config.lock.poll_interval_ms, 250);
    assert_eq!(config.logging.level, "info");
    assert_eq!(config.sources[0].source_type, SourceType::Memory);
  }

  #[test]
  fn test_source_lookup() {
    let config = Config {
      default_source: Some("b".to_string()),
      sources: vec![SourceConfig::memory("a"), SourceConfig::memory("B")],
      ..Config::default()
    };
    assert_eq!(config.source(None).unwrap().name, "B");
    assert_eq!(config.source(Some("a")).unwrap().name, "a");
    assert!(matches!(config.source(Some("zzz")), Err(ConfigError::UnknownSource(_))));
  }

  #[test]
  fn test_load_for_dir_prefers_project_file() {
    let temp = TempDir::new().unwrap();
    std::fs::write(
      temp.path().join(PROJECT_CONFIG_FILE),
      "[logging]\nlevel = \"debug\"\n",
    )
    .unwrap();
    let config = Config::load_for_dir(temp.path());
    assert_eq!(config.logging.level, "debug");
  }

  #[test]
  fn test_load_from_path_reports_parse_errors() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("bad.toml");
    std::fs::write(&path, "[lock\n").unwrap();
    assert!(matches!(Config::load_from_path(&path), Err(ConfigError::Parse { .. })));
  }
}
