//! State shared by every service task of one pipeline run.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use super::util::ServiceError;
use crate::{
  domain::{package::PackageIdentity, package_set::PackageSet, settings::FeedSettings},
  fs::FileSystem,
};

/// Commit id and timestamp stamped on every document written by one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitInfo {
  pub id: Uuid,
  pub timestamp: DateTime<Utc>,
}

impl CommitInfo {
  pub fn new() -> Self {
    Self {
      id: Uuid::new_v4(),
      timestamp: Utc::now(),
    }
  }
}

impl Default for CommitInfo {
  fn default() -> Self {
    Self::new()
  }
}

/// Values one service produces for another within the same run.
#[derive(Debug, Default)]
pub struct BatchOutputs {
  details: DashMap<PackageIdentity, Url>,
}

impl BatchOutputs {
  pub fn record_details(&self, identity: PackageIdentity, uri: Url) {
    self.details.insert(identity, uri);
  }

  /// Catalog details URI assigned to a package added in this run.
  pub fn details_uri(&self, identity: &PackageIdentity) -> Option<Url> {
    self.details.get(identity).map(|uri| uri.value().clone())
  }
}

#[derive(Debug)]
pub struct ServiceContext {
  pub fs: Arc<FileSystem>,
  pub settings: FeedSettings,
  pub commit: CommitInfo,
  /// Package set as it was before this run, read once up front.
  pub before: PackageSet,
  pub outputs: BatchOutputs,
  pub cancel: CancellationToken,
}

impl ServiceContext {
  pub fn new(fs: Arc<FileSystem>, settings: FeedSettings, before: PackageSet) -> Self {
    Self {
      fs,
      settings,
      commit: CommitInfo::new(),
      before,
      outputs: BatchOutputs::default(),
      cancel: CancellationToken::new(),
    }
  }

  pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
    self.cancel = cancel;
    self
  }

  pub fn with_commit(mut self, commit: CommitInfo) -> Self {
    self.commit = commit;
    self
  }

  pub fn check_cancelled(&self) -> Result<(), ServiceError> {
    if self.cancel.is_cancelled() {
      return Err(ServiceError::Cancelled);
    }
    Ok(())
  }
}
