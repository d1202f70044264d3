//! Blob storage backend interface.

use std::path::Path;

use async_trait::async_trait;

use super::error::{FsError, Result};

/// Low-level blob operations - implemented by each storage driver.
///
/// Keys are normalized feed paths relative to the feed root. Nothing here is buffered: the
/// `FileSystem` layer decides when these calls happen.
#[async_trait]
pub trait BlobBackend: Send + Sync {
  /// Short name for logs and errors.
  fn name(&self) -> &str;

  /// Check for a blob without downloading it.
  async fn exists(&self, key: &str) -> Result<bool>;

  /// Download a blob. Returns None if it doesn't exist.
  async fn read(&self, key: &str) -> Result<Option<Vec<u8>>>;

  /// Upload a blob, replacing any existing content.
  async fn write(&self, key: &str, data: &[u8]) -> Result<()>;

  /// Upload a blob from a local file.
  async fn write_from_file(&self, key: &str, source: &Path) -> Result<()> {
    let data = tokio::fs::read(source).await.map_err(|e| FsError::io(source, e))?;
    self.write(key, &data).await
  }

  /// Atomically create a blob only if no blob exists at `key`. Returns false if one did.
  async fn create_if_absent(&self, key: &str, data: &[u8]) -> Result<bool>;

  /// Remove a blob. Removing a missing blob is not an error.
  async fn delete(&self, key: &str) -> Result<()>;

  /// All blob keys under the feed root.
  async fn list(&self) -> Result<Vec<String>>;

  /// Whether the container (directory, bucket) exists.
  async fn has_container(&self) -> Result<bool>;

  /// Create the container. Returns false if it already existed.
  async fn create_container(&self) -> Result<bool>;

  /// Delete the container and everything in it. Returns false if it didn't exist.
  async fn delete_container(&self) -> Result<bool>;
}
