//! In-process backend.
//!
//! Used for dry runs and tests. Several `FileSystem`s can share one `MemoryBackend` to stand in
//! for independent processes pointed at the same feed root. Write failures can be injected to
//! exercise commit error handling.

use std::{
  collections::BTreeMap,
  sync::{
    Mutex, MutexGuard,
    atomic::{AtomicUsize, Ordering},
  },
};

use async_trait::async_trait;

use super::{
  backend::BlobBackend,
  error::{FsError, Result},
};

#[derive(Debug, Default)]
struct MemoryState {
  container: bool,
  files: BTreeMap<String, Vec<u8>>,
  /// Number of successful writes before every further write fails.
  fail_after_writes: Option<usize>,
  /// Writes to keys containing one of these fragments fail.
  fail_keys: Vec<String>,
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
  state: Mutex<MemoryState>,
  reads: AtomicUsize,
  probes: AtomicUsize,
  writes: AtomicUsize,
}

impl MemoryBackend {
  /// A backend whose container already exists.
  pub fn new() -> Self {
    let backend = Self::default();
    backend.lock_state().container = true;
    backend
  }

  /// A backend with no container yet, as before `init`.
  pub fn without_container() -> Self {
    Self::default()
  }

  fn lock_state(&self) -> MutexGuard<'_, MemoryState> {
    // A panic while holding this lock can only come from a test assertion; keep going.
    self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Let `count` more writes succeed, then fail every write after that.
  pub fn fail_writes_after(&self, count: usize) {
    let mut state = self.lock_state();
    let done = self.writes.load(Ordering::SeqCst);
    state.fail_after_writes = Some(done + count);
  }

  /// Fail any write whose key contains `fragment`.
  pub fn fail_writes_matching(&self, fragment: impl Into<String>) {
    self.lock_state().fail_keys.push(fragment.into());
  }

  pub fn clear_failures(&self) {
    let mut state = self.lock_state();
    state.fail_after_writes = None;
    state.fail_keys.clear();
  }

  /// Full downloads performed so far.
  pub fn read_count(&self) -> usize {
    self.reads.load(Ordering::SeqCst)
  }

  /// Existence probes performed so far.
  pub fn probe_count(&self) -> usize {
    self.probes.load(Ordering::SeqCst)
  }

  /// Successful writes performed so far.
  pub fn write_count(&self) -> usize {
    self.writes.load(Ordering::SeqCst)
  }

  /// Snapshot of a blob, bypassing the counters.
  pub fn get(&self, key: &str) -> Option<Vec<u8>> {
    self.lock_state().files.get(key).cloned()
  }

  /// Parse a blob as JSON, bypassing the counters.
  pub fn get_json(&self, key: &str) -> Option<serde_json::Value> {
    self.get(key).and_then(|data| serde_json::from_slice(&data).ok())
  }

  pub fn keys(&self) -> Vec<String> {
    self.lock_state().files.keys().cloned().collect()
  }

  fn check_write(&self, state: &MemoryState, key: &str) -> Result<()> {
    if !state.container {
      return Err(FsError::backend(self.name(), key, "container does not exist"));
    }
    if let Some(limit) = state.fail_after_writes
      && self.writes.load(Ordering::SeqCst) >= limit
    {
      return Err(FsError::backend(self.name(), key, "injected write failure"));
    }
    if state.fail_keys.iter().any(|fragment| key.contains(fragment.as_str())) {
      return Err(FsError::backend(self.name(), key, "injected write failure"));
    }
    Ok(())
  }
}

#[async_trait]
impl BlobBackend for MemoryBackend {
  fn name(&self) -> &str {
    "memory"
  }

  async fn exists(&self, key: &str) -> Result<bool> {
    self.probes.fetch_add(1, Ordering::SeqCst);
    Ok(self.lock_state().files.contains_key(key))
  }

  async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
    self.reads.fetch_add(1, Ordering::SeqCst);
    Ok(self.lock_state().files.get(key).cloned())
  }

  async fn write(&self, key: &str, data: &[u8]) -> Result<()> {
    let mut state = self.lock_state();
    self.check_write(&state, key)?;
    state.files.insert(key.to_string(), data.to_vec());
    self.writes.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }

  async fn create_if_absent(&self, key: &str, data: &[u8]) -> Result<bool> {
    let mut state = self.lock_state();
    if !state.container {
      return Err(FsError::backend(self.name(), key, "container does not exist"));
    }
    if state.files.contains_key(key) {
      return Ok(false);
    }
    state.files.insert(key.to_string(), data.to_vec());
    Ok(true)
  }

  async fn delete(&self, key: &str) -> Result<()> {
    self.lock_state().files.remove(key);
    Ok(())
  }

  async fn list(&self) -> Result<Vec<String>> {
    Ok(self.keys())
  }

  async fn has_container(&self) -> Result<bool> {
    Ok(self.lock_state().container)
  }

  async fn create_container(&self) -> Result<bool> {
    let mut state = self.lock_state();
    let created = !state.container;
    state.container = true;
    Ok(created)
  }

  async fn delete_container(&self) -> Result<bool> {
    let mut state = self.lock_state();
    let existed = state.container;
    state.container = false;
    state.files.clear();
    Ok(existed)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_injected_failure_after_count() {
    let backend = MemoryBackend::new();
    backend.fail_writes_after(1);
    backend.write("a", b"1").await.unwrap();
    assert!(backend.write("b", b"2").await.is_err());
    backend.clear_failures();
    backend.write("b", b"2").await.unwrap();
    assert_eq!(backend.write_count(), 2);
  }

  #[tokio::test]
  async fn test_injected_failure_by_key() {
    let backend = MemoryBackend::new();
    backend.fail_writes_matching("catalog/");
    assert!(backend.write("catalog/index.json", b"{}").await.is_err());
    backend.write("index.json", b"{}").await.unwrap();
  }

  #[tokio::test]
  async fn test_writes_require_container() {
    let backend = MemoryBackend::without_container();
    assert!(backend.write("a", b"1").await.is_err());
    assert!(backend.create_container().await.unwrap());
    backend.write("a", b"1").await.unwrap();
  }

  #[tokio::test]
  async fn test_counters() {
    let backend = MemoryBackend::new();
    backend.write("a", b"1").await.unwrap();
    backend.exists("a").await.unwrap();
    backend.read("a").await.unwrap();
    assert_eq!(backend.probe_count(), 1);
    assert_eq!(backend.read_count(), 1);
  }
}
