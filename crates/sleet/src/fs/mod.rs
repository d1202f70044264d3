//! Virtual file system over a blob backend.
//!
//! A `FileSystem` hands out one `FileEntity` per normalized path and buffers every mutation
//! locally. Nothing reaches the backend until `commit`; a file system that is dropped without
//! committing leaves the feed untouched.
//!
//! ## Commit order
//!
//! The backend has no multi-key transactions, so commit is a best-effort flush that fails loudly.
//! Files are flushed so that references resolve as early as possible:
//!
//! ```text
//! linked content → modified documents → modified index documents → deletions
//! ```
//!
//! Within each group the deepest path goes first. Index documents (`catalog/index.json`,
//! `registration/<id>/index.json`, `index.json`, ...) land after every page and leaf they point
//! to, so a commit that stops early never leaves an index referencing a file that is missing.

mod backend;
mod entity;
mod error;
mod local;
mod memory;
mod path;

use std::{
  cmp::Reverse,
  path::{Path, PathBuf},
  sync::Arc,
};

use dashmap::DashMap;
use tempfile::TempDir;
use tokio::io::AsyncRead;
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

pub use self::{
  backend::BlobBackend,
  entity::{EntityStatus, FileEntity},
  error::{FsError, Result},
  local::LocalBackend,
  memory::MemoryBackend,
  path::normalize_path,
};
use self::{
  entity::PendingFlush,
  path::{depth, is_index_document},
};

/// Local scratch space for staged content, private to one file system.
#[derive(Debug)]
enum CacheDir {
  Temp(TempDir),
  Fixed(PathBuf),
}

impl CacheDir {
  fn path(&self) -> &Path {
    match self {
      CacheDir::Temp(dir) => dir.path(),
      CacheDir::Fixed(path) => path,
    }
  }
}

/// Result of a successful commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
  pub written: usize,
  pub deleted: usize,
}

pub struct FileSystem {
  backend: Arc<dyn BlobBackend>,
  root: Url,
  external_root: Url,
  cache: CacheDir,
  entities: DashMap<String, Arc<FileEntity>>,
}

impl std::fmt::Debug for FileSystem {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("FileSystem")
      .field("backend", &self.backend.name())
      .field("root", &self.root.as_str())
      .field("external_root", &self.external_root.as_str())
      .field("entities", &self.entities.len())
      .finish()
  }
}

fn with_trailing_slash(mut uri: Url) -> Url {
  if !uri.path().ends_with('/') {
    let path = format!("{}/", uri.path());
    uri.set_path(&path);
  }
  uri
}

impl FileSystem {
  /// Create a file system with a private temp cache directory.
  pub fn new(backend: Arc<dyn BlobBackend>, root: Url) -> Result<Self> {
    let cache = TempDir::with_prefix("sleet-cache-").map_err(|e| FsError::io(std::env::temp_dir(), e))?;
    let root = with_trailing_slash(root);
    debug!(root = %root, backend = backend.name(), cache = %cache.path().display(), "Created file system");
    Ok(Self {
      backend,
      external_root: root.clone(),
      root,
      cache: CacheDir::Temp(cache),
      entities: DashMap::new(),
    })
  }

  /// An in-memory feed, mainly for tests and dry runs.
  pub fn in_memory(backend: Arc<MemoryBackend>) -> Result<Self> {
    let root = Url::parse("memory://feed/").map_err(|_| FsError::InvalidUri("memory://feed/".to_string()))?;
    Self::new(backend, root)
  }

  /// Use a different base for generated links. Lookups accept both bases.
  pub fn with_external_root(mut self, external_root: Url) -> Self {
    self.external_root = with_trailing_slash(external_root);
    self
  }

  /// Stage content under `dir` instead of a temp directory.
  pub fn with_cache_dir(mut self, dir: PathBuf) -> Self {
    self.cache = CacheDir::Fixed(dir);
    self
  }

  pub fn root(&self) -> &Url {
    &self.root
  }

  pub fn external_root(&self) -> &Url {
    &self.external_root
  }

  pub fn backend(&self) -> &Arc<dyn BlobBackend> {
    &self.backend
  }

  pub fn cache_dir(&self) -> &Path {
    self.cache.path()
  }

  /// Turn a relative path or an absolute URI under either base into a normalized key.
  pub fn relative_path(&self, path_or_uri: &str) -> Result<String> {
    if !path_or_uri.contains("://") {
      return normalize_path(path_or_uri);
    }

    let lower = path_or_uri.to_lowercase();
    for base in [&self.root, &self.external_root] {
      let base_str = base.as_str().to_lowercase();
      if let Some(rest) = lower.strip_prefix(&base_str) {
        return normalize_path(rest);
      }
    }
    Err(FsError::OutsideRoot(path_or_uri.to_string()))
  }

  /// External link URI for a path.
  pub fn uri_for(&self, path: &str) -> Result<Url> {
    let key = self.relative_path(path)?;
    self
      .external_root
      .join(&key)
      .map_err(|_| FsError::InvalidUri(format!("{}{}", self.external_root, key)))
  }

  /// Get the entity for a path, creating it unfetched on first use.
  ///
  /// Different spellings of the same resource resolve to the same entity.
  pub fn get(&self, path_or_uri: &str) -> Result<Arc<FileEntity>> {
    let key = self.relative_path(path_or_uri)?;
    if let Some(existing) = self.entities.get(&key) {
      return Ok(Arc::clone(existing.value()));
    }

    let uri = self.uri_for(&key)?;
    let entry = self
      .entities
      .entry(key.clone())
      .or_insert_with(|| Arc::new(FileEntity::new(key, uri, self.backend.clone())));
    Ok(Arc::clone(entry.value()))
  }

  pub async fn exists(&self, path: &str) -> Result<bool> {
    self.get(path)?.exists().await
  }

  /// Stage the bytes of `reader` in the local cache and link `path` to them.
  pub async fn write_from_reader<R: AsyncRead + Unpin>(&self, path: &str, reader: &mut R) -> Result<Arc<FileEntity>> {
    let entity = self.get(path)?;
    let staged = self.cache_dir().join(format!("{}.blob", Uuid::new_v4().simple()));
    let mut file = tokio::fs::File::create(&staged)
      .await
      .map_err(|e| FsError::io(&staged, e))?;
    tokio::io::copy(reader, &mut file)
      .await
      .map_err(|e| FsError::io(&staged, e))?;
    entity.link(staged).await;
    Ok(entity)
  }

  /// Paths with staged changes, in commit order.
  pub async fn dirty_paths(&self) -> Vec<String> {
    self.pending().await.into_iter().map(|(_, entity)| entity.path().to_string()).collect()
  }

  async fn pending(&self) -> Vec<(PendingFlush, Arc<FileEntity>)> {
    let entities: Vec<Arc<FileEntity>> = self.entities.iter().map(|e| Arc::clone(e.value())).collect();
    let mut pending = Vec::new();
    for entity in entities {
      if let Some(flush) = entity.pending_flush().await {
        pending.push((flush, entity));
      }
    }

    pending.sort_by_key(|(flush, entity)| {
      let rank = match flush {
        PendingFlush::Link => 0,
        PendingFlush::Write => 1,
        PendingFlush::Delete => 2,
      };
      let path = entity.path();
      (rank, is_index_document(path), Reverse(depth(path)), path.to_string())
    });
    pending
  }

  /// Flush every staged change to the backend.
  ///
  /// Stops at the first failure. Entities flushed before the failure are clean; the rest keep
  /// their staged state, so the caller can retry or roll back.
  pub async fn commit(&self) -> Result<CommitSummary> {
    let pending = self.pending().await;
    if pending.is_empty() {
      debug!("Commit with no staged changes");
      return Ok(CommitSummary::default());
    }

    info!(files = pending.len(), backend = self.backend.name(), "Committing changes");
    let mut summary = CommitSummary::default();
    for (flushed, (kind, entity)) in pending.iter().enumerate() {
      if let Err(e) = entity.flush().await {
        error!(path = %entity.path(), flushed, err = %e, "Commit failed");
        return Err(FsError::Commit {
          flushed,
          path: entity.path().to_string(),
          source: Box::new(e),
        });
      }
      match kind {
        PendingFlush::Delete => summary.deleted += 1,
        _ => summary.written += 1,
      }
    }

    info!(written = summary.written, deleted = summary.deleted, "Commit complete");
    Ok(summary)
  }

  /// Discard every staged change and cached read.
  pub async fn rollback(&self) {
    let entities: Vec<Arc<FileEntity>> = self.entities.iter().map(|e| Arc::clone(e.value())).collect();
    let mut discarded = 0;
    for entity in entities {
      if entity.is_dirty().await {
        discarded += 1;
      }
      entity.discard().await;
    }
    if discarded > 0 {
      warn!(discarded, "Rolled back staged changes");
    }
  }

  /// Every file currently in the backend, as entities.
  pub async fn list_files(&self) -> Result<Vec<Arc<FileEntity>>> {
    self.backend.list().await?.iter().map(|key| self.get(key)).collect()
  }

  /// Check that the backing container is reachable and exists.
  pub async fn validate(&self) -> Result<bool> {
    let exists = self.backend.has_container().await?;
    if !exists {
      error!(root = %self.root, "Feed container does not exist");
    }
    Ok(exists)
  }

  pub async fn has_bucket(&self) -> Result<bool> {
    self.backend.has_container().await
  }

  pub async fn create_bucket(&self) -> Result<bool> {
    let created = self.backend.create_container().await?;
    if created {
      info!(root = %self.root, "Created feed container");
    }
    Ok(created)
  }

  pub async fn delete_bucket(&self) -> Result<bool> {
    let deleted = self.backend.delete_container().await?;
    self.entities.clear();
    if deleted {
      info!(root = %self.root, "Deleted feed container");
    }
    Ok(deleted)
  }
}
