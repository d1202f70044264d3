//! Shared helpers for feed flow tests.

use std::sync::Arc;

use serde_json::Value;

use crate::{
  catalog::{self, CatalogEntry},
  commands::{
    CommandContext,
    init::init,
    push::{PushOptions, PushReport, push},
  },
  domain::{package::PackageDescriptor, package_set::PackageSet, settings::FeedSettings, version::NuGetVersion},
  fs::{FileSystem, MemoryBackend},
  service::package_index,
};

/// An initialized in-memory feed.
///
/// Every call to [`TestFeed::ctx`] opens a fresh file system over the same backend, the way
/// separate tool invocations would.
pub struct TestFeed {
  pub backend: Arc<MemoryBackend>,
}

impl TestFeed {
  pub async fn new() -> Self {
    Self::with_settings(&[]).await
  }

  pub async fn with_settings(pairs: &[(&str, &str)]) -> Self {
    let mut settings = FeedSettings::new();
    for (key, value) in pairs {
      settings.set(key, *value);
    }
    let feed = Self::uninitialized();
    init(&feed.ctx(), Some(settings)).await.expect("init feed");
    feed
  }

  pub fn uninitialized() -> Self {
    Self {
      backend: Arc::new(MemoryBackend::new()),
    }
  }

  pub fn fs(&self) -> FileSystem {
    FileSystem::in_memory(self.backend.clone()).expect("open memory feed")
  }

  pub fn ctx(&self) -> CommandContext {
    CommandContext::new(Arc::new(self.fs()))
  }

  pub async fn push(&self, packages: Vec<PackageDescriptor>) -> PushReport {
    push(&self.ctx(), packages, &PushOptions::default()).await.expect("push")
  }

  pub async fn push_with(&self, packages: Vec<PackageDescriptor>, options: &PushOptions) -> PushReport {
    push(&self.ctx(), packages, options).await.expect("push")
  }

  pub async fn package_set(&self) -> PackageSet {
    package_index::read_package_set(&self.fs()).await.expect("read package index")
  }

  pub async fn catalog_entries(&self) -> Vec<CatalogEntry> {
    catalog::entries(&self.fs()).await.expect("read catalog")
  }

  pub fn json(&self, path: &str) -> Value {
    self
      .backend
      .get_json(path)
      .unwrap_or_else(|| panic!("{path} missing from feed"))
  }

  /// Current bytes of every root document, for before/after comparisons.
  pub fn snapshot(&self, paths: &[&str]) -> Vec<Option<Vec<u8>>> {
    paths.iter().map(|p| self.backend.get(p)).collect()
  }
}

pub fn package(id: &str, version: &str) -> PackageDescriptor {
  let mut descriptor = PackageDescriptor::new(id, NuGetVersion::parse(version).expect("valid version"));
  descriptor.description = format!("{id} package");
  descriptor.authors = vec!["tests".to_string()];
  descriptor
}

pub fn versions(set: &PackageSet, id: &str) -> Vec<String> {
  set.versions(id).iter().map(NuGetVersion::to_normalized_string).collect()
}
