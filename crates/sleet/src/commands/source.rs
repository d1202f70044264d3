//! Opening a feed from a configured source.

use std::sync::Arc;

use tracing::debug;
use url::Url;

use super::{CommandContext, CommandError};
use crate::{
  domain::config::{Config, ConfigError, SourceConfig, SourceType},
  fs::{BlobBackend, FileSystem, LocalBackend, MemoryBackend},
  lock::LockOptions,
};

fn invalid(source: &SourceConfig, reason: impl Into<String>) -> CommandError {
  CommandError::Config(ConfigError::InvalidSource {
    name: source.name.clone(),
    reason: reason.into(),
  })
}

fn parse_uri(source: &SourceConfig, uri: &str) -> Result<Url, CommandError> {
  Url::parse(uri).map_err(|e| invalid(source, format!("bad URI '{uri}': {e}")))
}

/// Build the file system for a source.
pub fn open_source(source: &SourceConfig) -> Result<FileSystem, CommandError> {
  let (backend, root): (Arc<dyn BlobBackend>, Url) = match source.source_type {
    SourceType::Local => {
      let Some(path) = &source.path else {
        return Err(invalid(source, "local sources need a path"));
      };
      let path = std::path::absolute(path).map_err(|e| invalid(source, e.to_string()))?;
      let root = match &source.base_uri {
        Some(uri) => parse_uri(source, uri)?,
        None => Url::from_directory_path(&path)
          .map_err(|_| invalid(source, format!("{} is not a usable directory", path.display())))?,
      };
      (Arc::new(LocalBackend::new(path)), root)
    }
    SourceType::Memory => {
      let root = parse_uri(source, source.base_uri.as_deref().unwrap_or("memory://feed/"))?;
      (Arc::new(MemoryBackend::new()), root)
    }
  };

  let mut fs = FileSystem::new(backend, root)?;
  if let Some(external) = &source.external_uri {
    fs = fs.with_external_root(parse_uri(source, external)?);
  }
  debug!(source = %source.name, root = %fs.root(), "Opened source");
  Ok(fs)
}

impl CommandContext {
  /// Context for the named source (or the default one) with the configured lock behaviour.
  pub fn from_config(config: &Config, source: Option<&str>) -> Result<Self, CommandError> {
    let source = config.source(source)?;
    let fs = open_source(source)?;
    Ok(Self::new(Arc::new(fs)).with_lock_options(LockOptions::from(&config.lock)))
  }
}

#[cfg(test)]
mod tests {
  use tempfile::TempDir;

  use super::*;

  #[test]
  fn test_local_source_uses_directory_uri() {
    let temp = TempDir::new().unwrap();
    let fs = open_source(&SourceConfig::local("local", temp.path())).unwrap();
    assert_eq!(fs.root().scheme(), "file");
    assert!(fs.root().as_str().ends_with('/'));
  }

  #[test]
  fn test_external_uri_used_for_links() {
    let mut source = SourceConfig::memory("mem");
    source.external_uri = Some("https://cdn.example.com/feed/".to_string());
    let fs = open_source(&source).unwrap();
    assert_eq!(
      fs.uri_for("search/query").unwrap().as_str(),
      "https://cdn.example.com/feed/search/query"
    );
  }

  #[test]
  fn test_local_without_path_rejected() {
    let mut source = SourceConfig::local("local", "feed");
    source.path = None;
    assert!(matches!(
      open_source(&source),
      Err(CommandError::Config(ConfigError::InvalidSource { .. }))
    ));
  }
}
