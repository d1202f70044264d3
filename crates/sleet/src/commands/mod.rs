//! Feed-level operations.
//!
//! Every mutating command runs inside [`CommandContext::locked`], which holds the feed lock for
//! the command's full duration, rolls back staged changes when the command fails and releases the
//! lock on every path.

pub mod delete;
pub mod destroy;
pub mod feed_settings;
pub mod init;
pub mod push;
pub mod retention;
pub mod source;
pub mod stats;
pub mod validate;

use std::{future::Future, sync::Arc};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
  catalog::CatalogError,
  domain::{config::ConfigError, package::ChangeSet, settings::FeedSettings},
  fs::{FileSystem, FsError},
  lock::{FeedLock, LockError, LockOptions},
  pipeline::{PipelineError, PipelineReport, UpdatePipeline},
  service::{
    ServiceContext, ServiceError, package_index,
    service_index::{self, Incompatibility, ServiceIndex},
  },
};

pub const SETTINGS_FILE: &str = "sleet.settings.json";

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
  #[error("Feed at {0} is not initialized, run init first")]
  Uninitialized(String),
  #[error("Timed out waiting for the feed lock")]
  LockTimeout,
  #[error("Incompatible feed: {0}")]
  Incompatible(#[from] Incompatibility),
  #[error("Invalid package {package}: {reason}")]
  InvalidPackage { package: String, reason: String },
  #[error("Package {0} already exists")]
  PackageExists(String),
  #[error("Package {0} not found")]
  PackageNotFound(String),
  #[error("Invalid argument: {0}")]
  InvalidArgument(String),
  #[error("Cancelled")]
  Cancelled,
  #[error("Config error: {0}")]
  Config(#[from] ConfigError),
  #[error("Storage error: {0}")]
  Storage(#[from] FsError),
  #[error("Lock error: {0}")]
  Lock(LockError),
  #[error("Catalog error: {0}")]
  Catalog(#[from] CatalogError),
  #[error("Service error: {0}")]
  Service(ServiceError),
  #[error("{0}")]
  Pipeline(PipelineError),
}

impl From<LockError> for CommandError {
  fn from(e: LockError) -> Self {
    match e {
      LockError::Cancelled => Self::Cancelled,
      e => Self::Lock(e),
    }
  }
}

impl From<ServiceError> for CommandError {
  fn from(e: ServiceError) -> Self {
    match e {
      ServiceError::Cancelled => Self::Cancelled,
      e => Self::Service(e),
    }
  }
}

impl From<PipelineError> for CommandError {
  fn from(e: PipelineError) -> Self {
    match e {
      PipelineError::Cancelled => Self::Cancelled,
      e => Self::Pipeline(e),
    }
  }
}

impl CommandError {
  pub fn invalid_package(package: impl Into<String>, reason: impl Into<String>) -> Self {
    Self::InvalidPackage {
      package: package.into(),
      reason: reason.into(),
    }
  }

  pub fn invalid_argument(msg: impl Into<String>) -> Self {
    Self::InvalidArgument(msg.into())
  }

  /// Stable error code for logs and machine-readable output.
  pub fn code(&self) -> &'static str {
    match self {
      Self::Uninitialized(_) => "uninitialized",
      Self::LockTimeout => "lock_timeout",
      Self::Incompatible(_) => "incompatible",
      Self::InvalidPackage { .. } => "invalid_package",
      Self::PackageExists(_) => "package_exists",
      Self::PackageNotFound(_) => "package_not_found",
      Self::InvalidArgument(_) => "invalid_argument",
      Self::Cancelled => "cancelled",
      Self::Config(_) => "config",
      Self::Storage(_) => "storage",
      Self::Lock(_) => "lock",
      Self::Catalog(_) => "catalog",
      Self::Service(_) => "service",
      Self::Pipeline(_) => "pipeline",
    }
  }

  /// Process exit code for this error.
  pub fn exit_code(&self) -> i32 {
    match self {
      Self::LockTimeout => 2,
      Self::Uninitialized(_)
      | Self::Incompatible(_)
      | Self::InvalidPackage { .. }
      | Self::PackageExists(_)
      | Self::PackageNotFound(_)
      | Self::InvalidArgument(_) => 3,
      Self::Cancelled => 130,
      _ => 1,
    }
  }
}

/// A feed plus how to lock it and how to stop.
#[derive(Debug, Clone)]
pub struct CommandContext {
  pub fs: Arc<FileSystem>,
  pub lock: LockOptions,
  pub cancel: CancellationToken,
}

impl CommandContext {
  pub fn new(fs: Arc<FileSystem>) -> Self {
    Self {
      fs,
      lock: LockOptions::default(),
      cancel: CancellationToken::new(),
    }
  }

  pub fn with_lock_options(mut self, lock: LockOptions) -> Self {
    self.lock = lock;
    self
  }

  pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
    self.cancel = cancel;
    self
  }

  /// Run `f` while holding the feed lock.
  pub async fn locked<T, F, Fut>(&self, message: &str, f: F) -> Result<T, CommandError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, CommandError>>,
  {
    let lock = FeedLock::new(&self.fs, self.lock.clone().with_message(message));
    let Some(guard) = lock.acquire_guard(&self.cancel).await? else {
      return Err(CommandError::LockTimeout);
    };
    debug!(command = message, "Holding feed lock");

    let result = f().await;
    if result.is_err() {
      self.fs.rollback().await;
    }
    if let Err(e) = guard.release().await {
      warn!(err = %e, "Failed to release feed lock");
    }
    result
  }

  /// Apply a change set through the standard pipeline in one commit.
  pub(crate) async fn run_changes(
    &self,
    settings: FeedSettings,
    changes: ChangeSet,
  ) -> Result<PipelineReport, CommandError> {
    let before = package_index::read_package_set(&self.fs).await?;
    let ctx = ServiceContext::new(self.fs.clone(), settings, before).with_cancel(self.cancel.clone());
    let pipeline = UpdatePipeline::for_feed(Arc::new(ctx))?;
    Ok(pipeline.run(changes).await?)
  }
}

/// Read the service index and refuse feeds this build can't safely modify.
pub async fn ensure_initialized(fs: &FileSystem) -> Result<ServiceIndex, CommandError> {
  let Some(index) = service_index::read_service_index(fs).await? else {
    return Err(CommandError::Uninitialized(fs.root().to_string()));
  };
  index.check_compatible()?;
  Ok(index)
}

/// Feed settings, defaulting when the document is missing.
pub async fn read_settings(fs: &FileSystem) -> Result<FeedSettings, CommandError> {
  let settings: Option<FeedSettings> = fs.get(SETTINGS_FILE)?.read_json().await?;
  Ok(settings.unwrap_or_default())
}

pub async fn write_settings(fs: &FileSystem, settings: &FeedSettings) -> Result<(), CommandError> {
  fs.get(SETTINGS_FILE)?.write_json(settings).await?;
  Ok(())
}
