//! Local disk backend.
//!
//! Writes go through a temp file + rename so readers never see a half-written document.
//! `create_if_absent` writes the full payload to a temp file and hard-links it into place, which
//! fails atomically when the target already exists.

use std::{
  io::ErrorKind,
  path::{Path, PathBuf},
};

use async_trait::async_trait;
use tracing::{debug, trace};
use uuid::Uuid;

use super::{
  backend::BlobBackend,
  error::{FsError, Result},
};

const TEMP_SUFFIX: &str = ".tmp";

#[derive(Debug, Clone)]
pub struct LocalBackend {
  root: PathBuf,
}

impl LocalBackend {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn full_path(&self, key: &str) -> PathBuf {
    let mut path = self.root.clone();
    for segment in key.split('/').filter(|s| !s.is_empty()) {
      path.push(segment);
    }
    path
  }

  fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_default();
    path.with_file_name(format!(".{}.{}{}", name, Uuid::new_v4().simple(), TEMP_SUFFIX))
  }

  async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
      tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| FsError::io(parent, e))?;
    }
    Ok(())
  }

  fn is_temp_file(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(TEMP_SUFFIX)
  }
}

#[async_trait]
impl BlobBackend for LocalBackend {
  fn name(&self) -> &str {
    "local"
  }

  async fn exists(&self, key: &str) -> Result<bool> {
    let path = self.full_path(key);
    match tokio::fs::metadata(&path).await {
      Ok(meta) => Ok(meta.is_file()),
      Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
      Err(e) => Err(FsError::io(&path, e)),
    }
  }

  async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
    let path = self.full_path(key);
    match tokio::fs::read(&path).await {
      Ok(data) => {
        trace!(path = %path.display(), bytes = data.len(), "Read local file");
        Ok(Some(data))
      }
      Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
      Err(e) => Err(FsError::io(&path, e)),
    }
  }

  async fn write(&self, key: &str, data: &[u8]) -> Result<()> {
    let path = self.full_path(key);
    Self::ensure_parent(&path).await?;

    let temp_path = Self::temp_path_for(&path);
    tokio::fs::write(&temp_path, data)
      .await
      .map_err(|e| FsError::io(&temp_path, e))?;
    if let Err(e) = tokio::fs::rename(&temp_path, &path).await {
      let _ = tokio::fs::remove_file(&temp_path).await;
      return Err(FsError::io(&path, e));
    }

    debug!(path = %path.display(), bytes = data.len(), "Wrote local file");
    Ok(())
  }

  async fn write_from_file(&self, key: &str, source: &Path) -> Result<()> {
    let path = self.full_path(key);
    Self::ensure_parent(&path).await?;

    let temp_path = Self::temp_path_for(&path);
    tokio::fs::copy(source, &temp_path)
      .await
      .map_err(|e| FsError::io(source, e))?;
    if let Err(e) = tokio::fs::rename(&temp_path, &path).await {
      let _ = tokio::fs::remove_file(&temp_path).await;
      return Err(FsError::io(&path, e));
    }

    debug!(path = %path.display(), source = %source.display(), "Copied local file");
    Ok(())
  }

  async fn create_if_absent(&self, key: &str, data: &[u8]) -> Result<bool> {
    let path = self.full_path(key);
    Self::ensure_parent(&path).await?;

    let temp_path = Self::temp_path_for(&path);
    tokio::fs::write(&temp_path, data)
      .await
      .map_err(|e| FsError::io(&temp_path, e))?;

    let linked = tokio::fs::hard_link(&temp_path, &path).await;
    let _ = tokio::fs::remove_file(&temp_path).await;

    match linked {
      Ok(()) => Ok(true),
      Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
      Err(e) => Err(FsError::io(&path, e)),
    }
  }

  async fn delete(&self, key: &str) -> Result<()> {
    let path = self.full_path(key);
    match tokio::fs::remove_file(&path).await {
      Ok(()) => {
        debug!(path = %path.display(), "Deleted local file");
        Ok(())
      }
      Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
      Err(e) => Err(FsError::io(&path, e)),
    }
  }

  async fn list(&self) -> Result<Vec<String>> {
    let mut keys = Vec::new();
    if !self.has_container().await? {
      return Ok(keys);
    }

    let mut pending = vec![(self.root.clone(), String::new())];
    while let Some((dir, prefix)) = pending.pop() {
      let mut entries = tokio::fs::read_dir(&dir).await.map_err(|e| FsError::io(&dir, e))?;
      while let Some(entry) = entries.next_entry().await.map_err(|e| FsError::io(&dir, e))? {
        let name = entry.file_name().to_string_lossy().into_owned();
        let key = if prefix.is_empty() {
          name.clone()
        } else {
          format!("{prefix}/{name}")
        };
        let file_type = entry.file_type().await.map_err(|e| FsError::io(entry.path(), e))?;
        if file_type.is_dir() {
          pending.push((entry.path(), key));
        } else if !Self::is_temp_file(&name) {
          keys.push(key);
        }
      }
    }

    keys.sort();
    Ok(keys)
  }

  async fn has_container(&self) -> Result<bool> {
    match tokio::fs::metadata(&self.root).await {
      Ok(meta) => Ok(meta.is_dir()),
      Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
      Err(e) => Err(FsError::io(&self.root, e)),
    }
  }

  async fn create_container(&self) -> Result<bool> {
    if self.has_container().await? {
      return Ok(false);
    }
    tokio::fs::create_dir_all(&self.root)
      .await
      .map_err(|e| FsError::io(&self.root, e))?;
    Ok(true)
  }

  async fn delete_container(&self) -> Result<bool> {
    if !self.has_container().await? {
      return Ok(false);
    }
    tokio::fs::remove_dir_all(&self.root)
      .await
      .map_err(|e| FsError::io(&self.root, e))?;
    Ok(true)
  }
}
