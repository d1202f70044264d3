//! A single addressable feed document.
//!
//! Entities are owned by a `FileSystem` and handed out as `Arc<FileEntity>`, one per normalized
//! path. Reads hit the backend at most once; writes, links and deletes only change local state
//! until the owning file system commits.

use std::{path::PathBuf, sync::Arc};

use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::Mutex;
use tracing::{debug, trace};
use url::Url;

use super::{
  backend::BlobBackend,
  error::{FsError, Result},
};

/// Externally visible content state of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityStatus {
  Unfetched,
  Fetched,
  Modified,
  Deleted,
  Linked,
}

#[derive(Debug, Clone)]
enum Content {
  Unfetched,
  /// Existence known from a probe, payload not downloaded.
  Probed(bool),
  /// Downloaded. `None` means the blob doesn't exist remotely.
  Fetched(Option<Arc<Vec<u8>>>),
  Modified(Arc<Vec<u8>>),
  Linked(PathBuf),
  Deleted,
}

/// What a commit has to do for one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PendingFlush {
  Link,
  Write,
  Delete,
}

pub struct FileEntity {
  path: String,
  uri: Url,
  backend: Arc<dyn BlobBackend>,
  content: Mutex<Content>,
}

impl std::fmt::Debug for FileEntity {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("FileEntity")
      .field("path", &self.path)
      .field("uri", &self.uri.as_str())
      .finish()
  }
}

impl FileEntity {
  pub(crate) fn new(path: String, uri: Url, backend: Arc<dyn BlobBackend>) -> Self {
    Self {
      path,
      uri,
      backend,
      content: Mutex::new(Content::Unfetched),
    }
  }

  /// Normalized path relative to the feed root.
  pub fn path(&self) -> &str {
    &self.path
  }

  /// Link URI, under the external base when one is configured.
  pub fn uri(&self) -> &Url {
    &self.uri
  }

  pub async fn status(&self) -> EntityStatus {
    match &*self.content.lock().await {
      Content::Unfetched | Content::Probed(_) => EntityStatus::Unfetched,
      Content::Fetched(_) => EntityStatus::Fetched,
      Content::Modified(_) => EntityStatus::Modified,
      Content::Linked(_) => EntityStatus::Linked,
      Content::Deleted => EntityStatus::Deleted,
    }
  }

  pub async fn is_dirty(&self) -> bool {
    self.pending_flush().await.is_some()
  }

  pub(crate) async fn pending_flush(&self) -> Option<PendingFlush> {
    match &*self.content.lock().await {
      Content::Modified(_) => Some(PendingFlush::Write),
      Content::Linked(_) => Some(PendingFlush::Link),
      Content::Deleted => Some(PendingFlush::Delete),
      _ => None,
    }
  }

  /// Whether the document exists, counting staged changes. Probes the backend without
  /// downloading when nothing is known yet.
  pub async fn exists(&self) -> Result<bool> {
    let mut content = self.content.lock().await;
    match &*content {
      Content::Unfetched => {
        let exists = self.backend.exists(&self.path).await?;
        trace!(path = %self.path, exists, "Probed file");
        *content = Content::Probed(exists);
        Ok(exists)
      }
      Content::Probed(exists) => Ok(*exists),
      Content::Fetched(data) => Ok(data.is_some()),
      Content::Modified(_) | Content::Linked(_) => Ok(true),
      Content::Deleted => Ok(false),
    }
  }

  /// Current bytes, staged or remote. None if the document doesn't exist.
  pub async fn read(&self) -> Result<Option<Vec<u8>>> {
    let mut content = self.content.lock().await;
    match &*content {
      Content::Unfetched | Content::Probed(true) => {
        let data = self.backend.read(&self.path).await?.map(Arc::new);
        debug!(path = %self.path, found = data.is_some(), "Fetched file");
        let result = data.as_ref().map(|d| d.as_ref().clone());
        *content = Content::Fetched(data);
        Ok(result)
      }
      Content::Probed(false) | Content::Deleted => Ok(None),
      Content::Fetched(data) => Ok(data.as_ref().map(|d| d.as_ref().clone())),
      Content::Modified(data) => Ok(Some(data.as_ref().clone())),
      Content::Linked(path) => {
        let data = tokio::fs::read(path).await.map_err(|e| FsError::io(path, e))?;
        Ok(Some(data))
      }
    }
  }

  pub async fn read_json<T: DeserializeOwned>(&self) -> Result<Option<T>> {
    match self.read().await? {
      Some(data) => serde_json::from_slice(&data).map(Some).map_err(|source| FsError::Json {
        path: self.path.clone(),
        source,
      }),
      None => Ok(None),
    }
  }

  pub async fn write(&self, data: Vec<u8>) {
    trace!(path = %self.path, bytes = data.len(), "Staged write");
    *self.content.lock().await = Content::Modified(Arc::new(data));
  }

  /// Stage a JSON document, indented.
  pub async fn write_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
    let data = serde_json::to_vec_pretty(value).map_err(|source| FsError::Json {
      path: self.path.clone(),
      source,
    })?;
    self.write(data).await;
    Ok(())
  }

  /// Stage an on-disk file as this document's content without copying it.
  pub async fn link(&self, source: PathBuf) {
    trace!(path = %self.path, source = %source.display(), "Staged link");
    *self.content.lock().await = Content::Linked(source);
  }

  pub async fn delete(&self) {
    trace!(path = %self.path, "Staged delete");
    *self.content.lock().await = Content::Deleted;
  }

  /// Push staged state to the backend and mark the entity clean.
  pub(crate) async fn flush(&self) -> Result<()> {
    let mut content = self.content.lock().await;
    let next = match &*content {
      Content::Modified(data) => {
        self.backend.write(&self.path, data).await?;
        Content::Fetched(Some(data.clone()))
      }
      Content::Linked(source) => {
        self.backend.write_from_file(&self.path, source).await?;
        Content::Probed(true)
      }
      Content::Deleted => {
        self.backend.delete(&self.path).await?;
        Content::Fetched(None)
      }
      _ => return Ok(()),
    };
    *content = next;
    Ok(())
  }

  /// Drop staged and cached state.
  pub(crate) async fn discard(&self) {
    *self.content.lock().await = Content::Unfetched;
  }
}
