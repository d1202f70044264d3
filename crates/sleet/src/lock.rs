//! Feed lock - cross-process mutual exclusion on top of blob storage.
//!
//! The lock is a marker blob at `.lock` created with the backend's create-if-absent primitive.
//! Correctness rests entirely on that primitive; no process-local state is consulted, so two
//! `FeedLock`s in one process exclude each other exactly like two machines would.
//!
//! A marker whose age exceeds its own embedded TTL is considered abandoned and taken over.
//!
//! ## Takeover race
//!
//! Blob storage offers no compare-and-delete, so taking over a stale marker is read, compare,
//! delete, create. Two contenders that judged the same stale marker can still interleave so that
//! one deletes the other's fresh marker. After a takeover the winner waits one poll interval and
//! re-reads the marker, keeping the lock only if it still names itself. This narrows the window
//! but does not close it; `release` has the same read-then-delete gap. A TTL well above the
//! longest command keeps takeovers rare.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
  domain::config::LockConfig,
  fs::{BlobBackend, FileSystem, FsError},
};

pub const LOCK_FILE: &str = ".lock";

#[derive(Debug, thiserror::Error)]
pub enum LockError {
  #[error("Storage error while locking: {0}")]
  Storage(#[from] FsError),
  #[error("Lock marker could not be encoded: {0}")]
  Encode(#[from] serde_json::Error),
  #[error("Cancelled while waiting for the feed lock")]
  Cancelled,
}

/// Contents of the lock marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockMarker {
  pub holder: String,
  pub pid: u32,
  pub host: String,
  pub acquired: DateTime<Utc>,
  pub expires_after_secs: u64,
  #[serde(default)]
  pub message: String,
}

impl LockMarker {
  pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
    let age = now.signed_duration_since(self.acquired);
    age.num_seconds() >= 0 && age.num_seconds() as u64 > self.expires_after_secs
  }
}

fn host_name() -> String {
  std::env::var("HOSTNAME")
    .or_else(|_| std::env::var("COMPUTERNAME"))
    .unwrap_or_else(|_| "unknown".to_string())
}

/// Lock settings resolved from config.
#[derive(Debug, Clone)]
pub struct LockOptions {
  /// None waits forever, zero makes a single attempt.
  pub timeout: Option<Duration>,
  pub stale_after: Duration,
  pub poll_interval: Duration,
  pub max_poll_interval: Duration,
  /// Shown to anyone waiting on this lock.
  pub message: String,
}

impl Default for LockOptions {
  fn default() -> Self {
    Self::from(&LockConfig::default())
  }
}

impl From<&LockConfig> for LockOptions {
  fn from(config: &LockConfig) -> Self {
    Self {
      timeout: config.timeout(),
      stale_after: config.stale_after(),
      poll_interval: config.poll_interval(),
      max_poll_interval: config.max_poll_interval(),
      message: String::new(),
    }
  }
}

impl LockOptions {
  pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn with_message(mut self, message: impl Into<String>) -> Self {
    self.message = message.into();
    self
  }
}

pub struct FeedLock {
  backend: Arc<dyn BlobBackend>,
  holder: String,
  options: LockOptions,
  held: bool,
}

impl std::fmt::Debug for FeedLock {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("FeedLock")
      .field("holder", &self.holder)
      .field("held", &self.held)
      .finish()
  }
}

impl FeedLock {
  pub fn new(fs: &FileSystem, options: LockOptions) -> Self {
    Self {
      backend: fs.backend().clone(),
      holder: Uuid::new_v4().to_string(),
      options,
      held: false,
    }
  }

  pub fn holder(&self) -> &str {
    &self.holder
  }

  pub fn is_held(&self) -> bool {
    self.held
  }

  fn marker(&self) -> LockMarker {
    LockMarker {
      holder: self.holder.clone(),
      pid: std::process::id(),
      host: host_name(),
      acquired: Utc::now(),
      expires_after_secs: self.options.stale_after.as_secs(),
      message: self.options.message.clone(),
    }
  }

  /// One attempt: create the marker, or take over a stale one.
  async fn try_acquire(&mut self) -> Result<bool, LockError> {
    let body = serde_json::to_vec_pretty(&self.marker())?;
    if self.backend.create_if_absent(LOCK_FILE, &body).await? {
      self.held = true;
      return Ok(true);
    }

    let existing = match self.backend.read(LOCK_FILE).await? {
      Some(data) => data,
      // Released between our create attempt and this read; retry right away.
      None => {
        let created = self.backend.create_if_absent(LOCK_FILE, &body).await? && self.confirm().await?;
        self.held = created;
        return Ok(created);
      }
    };

    let stale = match serde_json::from_slice::<LockMarker>(&existing) {
      Ok(marker) if marker.is_stale(Utc::now()) => {
        warn!(
          holder = %marker.holder,
          host = %marker.host,
          acquired = %marker.acquired,
          "Lock marker expired, taking over"
        );
        true
      }
      Ok(_) => false,
      Err(e) => {
        warn!(err = %e, "Lock marker is unreadable, treating it as abandoned");
        true
      }
    };

    if stale {
      // Someone else may have taken over already; only remove the marker we judged.
      if self.backend.read(LOCK_FILE).await?.as_deref() != Some(existing.as_slice()) {
        return Ok(false);
      }
      self.backend.delete(LOCK_FILE).await?;
      if self.backend.create_if_absent(LOCK_FILE, &body).await? && self.confirm().await? {
        self.held = true;
        return Ok(true);
      }
    }
    Ok(false)
  }

  /// After a contended create: let racing contenders finish, then check the marker is still ours.
  async fn confirm(&self) -> Result<bool, LockError> {
    tokio::time::sleep(self.options.poll_interval).await;
    let ours = match self.backend.read(LOCK_FILE).await? {
      Some(data) => serde_json::from_slice::<LockMarker>(&data).is_ok_and(|m| m.holder == self.holder),
      None => false,
    };
    if !ours {
      warn!(holder = %self.holder, "Lost the lock marker to another contender during takeover");
    }
    Ok(ours)
  }

  /// Try to obtain the lock, polling with backoff until the timeout elapses.
  pub async fn acquire(&mut self, cancel: &CancellationToken) -> Result<bool, LockError> {
    if self.held {
      return Ok(true);
    }

    let started = tokio::time::Instant::now();
    let mut delay = self.options.poll_interval;
    let mut announced = false;

    loop {
      if cancel.is_cancelled() {
        return Err(LockError::Cancelled);
      }
      if self.try_acquire().await? {
        debug!(holder = %self.holder, "Acquired feed lock");
        return Ok(true);
      }

      let remaining = match self.options.timeout {
        Some(timeout) => match timeout.checked_sub(started.elapsed()) {
          Some(remaining) if !remaining.is_zero() => Some(remaining),
          _ => {
            info!("Timed out waiting for the feed lock");
            return Ok(false);
          }
        },
        None => None,
      };

      if !announced {
        announced = true;
        let holder_message = self.current_message().await.unwrap_or_default();
        if holder_message.is_empty() {
          info!("Waiting to obtain a lock on the feed");
        } else {
          info!(message = %holder_message, "Waiting to obtain a lock on the feed");
        }
      }

      let wait = remaining.map_or(delay, |r| r.min(delay));
      tokio::select! {
        _ = cancel.cancelled() => return Err(LockError::Cancelled),
        _ = tokio::time::sleep(wait) => {}
      }
      delay = (delay * 2).min(self.options.max_poll_interval);
    }
  }

  async fn current_message(&self) -> Option<String> {
    let data = self.backend.read(LOCK_FILE).await.ok()??;
    serde_json::from_slice::<LockMarker>(&data).ok().map(|m| m.message)
  }

  /// Remove the marker if we hold it. Safe to call any number of times.
  pub async fn release(&mut self) -> Result<(), LockError> {
    if !self.held {
      return Ok(());
    }
    self.held = false;

    // Only delete our own marker; a stale takeover may have replaced it.
    if let Some(data) = self.backend.read(LOCK_FILE).await?
      && let Ok(marker) = serde_json::from_slice::<LockMarker>(&data)
      && marker.holder != self.holder
    {
      warn!(holder = %marker.holder, "Lock was taken over by another holder, leaving it in place");
      return Ok(());
    }

    self.backend.delete(LOCK_FILE).await?;
    debug!(holder = %self.holder, "Released feed lock");
    Ok(())
  }

  /// Acquire and wrap the lock in a guard.
  pub async fn acquire_guard(mut self, cancel: &CancellationToken) -> Result<Option<LockGuard>, LockError> {
    if self.acquire(cancel).await? {
      Ok(Some(LockGuard { lock: Some(self) }))
    } else {
      Ok(None)
    }
  }
}

/// Scoped ownership of the feed lock.
///
/// Call `release().await` on every exit path. A guard dropped without release schedules a
/// best-effort release on the current runtime.
#[derive(Debug)]
pub struct LockGuard {
  lock: Option<FeedLock>,
}

impl LockGuard {
  pub fn holder(&self) -> Option<&str> {
    self.lock.as_ref().map(FeedLock::holder)
  }

  pub async fn release(mut self) -> Result<(), LockError> {
    match self.lock.take() {
      Some(mut lock) => lock.release().await,
      None => Ok(()),
    }
  }
}

impl Drop for LockGuard {
  fn drop(&mut self) {
    if let Some(mut lock) = self.lock.take()
      && lock.is_held()
    {
      match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
          handle.spawn(async move {
            if let Err(e) = lock.release().await {
              warn!(err = %e, "Failed to release feed lock on drop");
            }
          });
        }
        Err(_) => warn!(holder = %lock.holder(), "Feed lock dropped outside a runtime; marker left behind"),
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::fs::MemoryBackend;

  fn fast_options(timeout: Option<Duration>) -> LockOptions {
    LockOptions {
      timeout,
      stale_after: Duration::from_secs(3600),
      poll_interval: Duration::from_millis(5),
      max_poll_interval: Duration::from_millis(20),
      message: "test".to_string(),
    }
  }

  fn shared_feed() -> (Arc<MemoryBackend>, FileSystem, FileSystem) {
    let backend = Arc::new(MemoryBackend::new());
    let a = FileSystem::in_memory(backend.clone()).unwrap();
    let b = FileSystem::in_memory(backend.clone()).unwrap();
    (backend, a, b)
  }

  #[tokio::test]
  async fn test_mutual_exclusion() {
    let (_backend, fs_a, fs_b) = shared_feed();
    let cancel = CancellationToken::new();

    let mut first = FeedLock::new(&fs_a, fast_options(Some(Duration::from_millis(50))));
    let mut second = FeedLock::new(&fs_b, fast_options(Some(Duration::from_millis(50))));

    assert!(first.acquire(&cancel).await.unwrap());
    assert!(!second.acquire(&cancel).await.unwrap());

    first.release().await.unwrap();
    assert!(second.acquire(&cancel).await.unwrap());
    second.release().await.unwrap();
  }

  #[tokio::test]
  async fn test_zero_timeout_fails_fast() {
    let (_backend, fs_a, fs_b) = shared_feed();
    let cancel = CancellationToken::new();
    let mut first = FeedLock::new(&fs_a, fast_options(None));
    assert!(first.acquire(&cancel).await.unwrap());

    let mut second = FeedLock::new(&fs_b, fast_options(Some(Duration::ZERO)));
    let started = std::time::Instant::now();
    assert!(!second.acquire(&cancel).await.unwrap());
    assert!(started.elapsed() < Duration::from_secs(1));
  }

  #[tokio::test]
  async fn test_waits_until_released() {
    let (_backend, fs_a, fs_b) = shared_feed();
    let cancel = CancellationToken::new();
    let mut first = FeedLock::new(&fs_a, fast_options(None));
    assert!(first.acquire(&cancel).await.unwrap());

    let mut second = FeedLock::new(&fs_b, fast_options(None));
    let waiter = tokio::spawn(async move {
      let acquired = second.acquire(&CancellationToken::new()).await.unwrap();
      second.release().await.unwrap();
      acquired
    });

    tokio::time::sleep(Duration::from_millis(30)).await;
    first.release().await.unwrap();
    assert!(waiter.await.unwrap());
  }

  #[tokio::test]
  async fn test_stale_marker_is_taken_over() {
    let (backend, fs_a, _) = shared_feed();
    let stale = LockMarker {
      holder: "crashed".to_string(),
      pid: 1,
      host: "elsewhere".to_string(),
      acquired: Utc::now() - chrono::Duration::hours(2),
      expires_after_secs: 60,
      message: String::new(),
    };
    backend
      .create_if_absent(LOCK_FILE, &serde_json::to_vec(&stale).unwrap())
      .await
      .unwrap();

    let mut lock = FeedLock::new(&fs_a, fast_options(Some(Duration::ZERO)));
    assert!(lock.acquire(&CancellationToken::new()).await.unwrap());
    let marker: LockMarker = serde_json::from_slice(&backend.get(LOCK_FILE).unwrap()).unwrap();
    assert_eq!(marker.holder, lock.holder());
  }

  #[tokio::test]
  async fn test_fresh_marker_is_respected() {
    let (backend, fs_a, _) = shared_feed();
    let marker = LockMarker {
      holder: "busy".to_string(),
      pid: 1,
      host: "elsewhere".to_string(),
      acquired: Utc::now(),
      expires_after_secs: 3600,
      message: String::new(),
    };
    backend.write(LOCK_FILE, &serde_json::to_vec(&marker).unwrap()).await.unwrap();

    let mut lock = FeedLock::new(&fs_a, fast_options(Some(Duration::from_millis(20))));
    assert!(!lock.acquire(&CancellationToken::new()).await.unwrap());
    assert!(backend.get(LOCK_FILE).is_some());
  }

  #[tokio::test]
  async fn test_release_is_idempotent_and_safe_without_acquire() {
    let (backend, fs_a, _) = shared_feed();
    let mut lock = FeedLock::new(&fs_a, fast_options(None));
    lock.release().await.unwrap();

    assert!(lock.acquire(&CancellationToken::new()).await.unwrap());
    lock.release().await.unwrap();
    lock.release().await.unwrap();
    assert!(backend.get(LOCK_FILE).is_none());
  }

  #[tokio::test]
  async fn test_cancel_while_waiting() {
    let (_backend, fs_a, fs_b) = shared_feed();
    let mut first = FeedLock::new(&fs_a, fast_options(None));
    assert!(first.acquire(&CancellationToken::new()).await.unwrap());

    let cancel = CancellationToken::new();
    let mut second = FeedLock::new(&fs_b, fast_options(None));
    let waiter_cancel = cancel.clone();
    let waiter = tokio::spawn(async move { second.acquire(&waiter_cancel).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();
    assert!(matches!(waiter.await.unwrap(), Err(LockError::Cancelled)));
  }

  #[tokio::test]
  async fn test_guard_release() {
    let (backend, fs_a, _) = shared_feed();
    let guard = FeedLock::new(&fs_a, fast_options(None))
      .acquire_guard(&CancellationToken::new())
      .await
      .unwrap()
      .unwrap();
    assert!(backend.get(LOCK_FILE).is_some());
    guard.release().await.unwrap();
    assert!(backend.get(LOCK_FILE).is_none());
  }

  #[tokio::test]
  async fn test_guard_drop_releases() {
    let (backend, fs_a, _) = shared_feed();
    {
      let _guard = FeedLock::new(&fs_a, fast_options(None))
        .acquire_guard(&CancellationToken::new())
        .await
        .unwrap()
        .unwrap();
    }
    for _ in 0..50 {
      if backend.get(LOCK_FILE).is_none() {
        break;
      }
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(backend.get(LOCK_FILE).is_none());
  }

  fn stale_marker() -> Vec<u8> {
    let stale = LockMarker {
      holder: "crashed".to_string(),
      pid: 1,
      host: "elsewhere".to_string(),
      acquired: Utc::now() - chrono::Duration::hours(2),
      expires_after_secs: 60,
      message: String::new(),
    };
    serde_json::to_vec(&stale).unwrap()
  }

  #[tokio::test]
  async fn test_two_contenders_take_over_stale_marker_once() {
    let (backend, fs_a, fs_b) = shared_feed();
    backend.create_if_absent(LOCK_FILE, &stale_marker()).await.unwrap();

    let mut first = FeedLock::new(&fs_a, fast_options(Some(Duration::ZERO)));
    let mut second = FeedLock::new(&fs_b, fast_options(Some(Duration::ZERO)));
    let cancel = CancellationToken::new();
    let (a, b) = tokio::join!(first.acquire(&cancel), second.acquire(&cancel));
    let (a, b) = (a.unwrap(), b.unwrap());
    assert!(a ^ b, "exactly one contender must hold the lock (a={a}, b={b})");

    let winner = if a { first.holder() } else { second.holder() };
    let marker: LockMarker = serde_json::from_slice(&backend.get(LOCK_FILE).unwrap()).unwrap();
    assert_eq!(marker.holder, winner);
  }

  /// Replaces the marker right after a successful create, like a contender whose stale check
  /// passed before our delete.
  #[derive(Debug)]
  struct IntrudingBackend {
    inner: MemoryBackend,
  }

  #[async_trait::async_trait]
  impl BlobBackend for IntrudingBackend {
    fn name(&self) -> &str {
      "intruding"
    }

    async fn exists(&self, key: &str) -> crate::fs::Result<bool> {
      self.inner.exists(key).await
    }

    async fn read(&self, key: &str) -> crate::fs::Result<Option<Vec<u8>>> {
      self.inner.read(key).await
    }

    async fn write(&self, key: &str, data: &[u8]) -> crate::fs::Result<()> {
      self.inner.write(key, data).await
    }

    async fn create_if_absent(&self, key: &str, data: &[u8]) -> crate::fs::Result<bool> {
      let created = self.inner.create_if_absent(key, data).await?;
      if created {
        let intruder = LockMarker {
          holder: "intruder".to_string(),
          pid: 2,
          host: "elsewhere".to_string(),
          acquired: Utc::now(),
          expires_after_secs: 3600,
          message: String::new(),
        };
        self.inner.write(key, &serde_json::to_vec(&intruder).unwrap()).await?;
      }
      Ok(created)
    }

    async fn delete(&self, key: &str) -> crate::fs::Result<()> {
      self.inner.delete(key).await
    }

    async fn list(&self) -> crate::fs::Result<Vec<String>> {
      self.inner.list().await
    }

    async fn has_container(&self) -> crate::fs::Result<bool> {
      self.inner.has_container().await
    }

    async fn create_container(&self) -> crate::fs::Result<bool> {
      self.inner.create_container().await
    }

    async fn delete_container(&self) -> crate::fs::Result<bool> {
      self.inner.delete_container().await
    }
  }

  #[tokio::test]
  async fn test_takeover_lost_to_racing_contender_is_not_held() {
    let inner = MemoryBackend::new();
    inner.write(LOCK_FILE, &stale_marker()).await.unwrap();
    let backend = Arc::new(IntrudingBackend { inner });
    let fs = FileSystem::new(backend.clone(), url::Url::parse("memory://feed/").unwrap()).unwrap();

    let mut lock = FeedLock::new(&fs, fast_options(Some(Duration::ZERO)));
    assert!(!lock.acquire(&CancellationToken::new()).await.unwrap());
    assert!(!lock.is_held());

    let marker: LockMarker = serde_json::from_slice(&backend.inner.get(LOCK_FILE).unwrap()).unwrap();
    assert_eq!(marker.holder, "intruder");
  }
}
