//! Derived index services.
//!
//! Every service keeps its own documents consistent with the package set. They share one
//! contract, [`FeedService`], and run concurrently inside the update pipeline, gated only by the
//! dependencies they declare.
//!
//! ## Available Services
//!
//! - [`package_index`] - flat id → versions map
//! - [`flat_container`] - per-id version list and package archives
//! - [`registration`] - per-id paged version listings
//! - [`search`] - single-document search projection
//! - [`autocomplete`] - id list for type-ahead
//! - [`badges`] - latest-version SVG/JSON badges
//! - [`service_index`] - root `index.json`, written by `init`
//!
//! The catalog lives in [`crate::catalog`] and implements the same trait.

pub mod autocomplete;
pub mod badges;
pub mod context;
pub mod flat_container;
pub mod package_index;
pub mod registration;
pub mod search;
pub mod service_index;
pub mod util;

use std::fmt;

use async_trait::async_trait;

pub use self::{
  context::{BatchOutputs, CommitInfo, ServiceContext},
  util::ServiceError,
};
use crate::domain::package::{ChangeSet, PackageIdentity, PackageInput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ServiceKind {
  Catalog,
  PackageIndex,
  FlatContainer,
  Registration,
  Search,
  AutoComplete,
  Badges,
}

impl ServiceKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      ServiceKind::Catalog => "catalog",
      ServiceKind::PackageIndex => "package-index",
      ServiceKind::FlatContainer => "flat-container",
      ServiceKind::Registration => "registration",
      ServiceKind::Search => "search",
      ServiceKind::AutoComplete => "autocomplete",
      ServiceKind::Badges => "badges",
    }
  }
}

impl fmt::Display for ServiceKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// What one service did during a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceOutcome {
  pub added: usize,
  /// Removals that found something to remove.
  pub removed: usize,
}

#[async_trait]
pub trait FeedService: Send + Sync {
  fn kind(&self) -> ServiceKind;

  /// Services whose mutation phase must finish before this one starts its own.
  fn dependencies(&self) -> Vec<ServiceKind> {
    Vec::new()
  }

  /// Read whatever state is needed before waiting on dependencies.
  async fn preload(&self, _changes: &ChangeSet) -> Result<(), ServiceError> {
    Ok(())
  }

  /// Add or update a package. Adding a known identity replaces its entry.
  async fn add_package(&self, input: &PackageInput) -> Result<(), ServiceError>;

  /// Returns false if there was nothing to remove.
  async fn remove_package(&self, identity: &PackageIdentity) -> Result<bool, ServiceError>;

  /// Stage the accumulated documents in the file system.
  async fn save(&self) -> Result<(), ServiceError>;

  /// Mutation phase: removes first, then adds, then save.
  async fn apply(&self, changes: &ChangeSet) -> Result<ServiceOutcome, ServiceError> {
    let mut outcome = ServiceOutcome::default();
    for identity in &changes.removes {
      if self.remove_package(identity).await? {
        outcome.removed += 1;
      }
    }
    for input in &changes.adds {
      self.add_package(input).await?;
      outcome.added += 1;
    }
    self.save().await?;
    Ok(outcome)
  }
}
