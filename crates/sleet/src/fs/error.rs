use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum FsError {
  #[error("IO error on {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("Backend '{backend}' failed on {key}: {message}")]
  Backend {
    backend: String,
    key: String,
    message: String,
  },
  #[error("Invalid JSON in {path}: {source}")]
  Json {
    path: String,
    #[source]
    source: serde_json::Error,
  },
  #[error("Invalid feed path '{0}'")]
  InvalidPath(String),
  #[error("'{0}' is not under the feed root")]
  OutsideRoot(String),
  #[error("Invalid URI '{0}'")]
  InvalidUri(String),
  #[error("Commit failed after flushing {flushed} files, at {path}: {source}")]
  Commit {
    flushed: usize,
    path: String,
    #[source]
    source: Box<FsError>,
  },
}

impl FsError {
  pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
    Self::Io {
      path: path.as_ref().to_path_buf(),
      source,
    }
  }

  pub fn backend(backend: impl Into<String>, key: impl Into<String>, message: impl Into<String>) -> Self {
    Self::Backend {
      backend: backend.into(),
      key: key.into(),
      message: message.into(),
    }
  }
}

pub type Result<T> = std::result::Result<T, FsError>;
