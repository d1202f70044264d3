//! `sleet.packageindex.json` - the flat id → versions map.
//!
//! The quick membership test used by commands and by services that need the resulting package
//! set of a run without replaying the catalog.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use super::{FeedService, ServiceContext, ServiceError, ServiceKind};
use crate::{
  domain::{
    package::{ChangeSet, PackageIdentity, PackageInput},
    package_set::PackageSet,
    version::NuGetVersion,
  },
  fs::FileSystem,
};

pub const PACKAGE_INDEX: &str = "sleet.packageindex.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageIndexDocument {
  #[serde(default)]
  pub packages: BTreeMap<String, Vec<NuGetVersion>>,
}

impl From<&PackageSet> for PackageIndexDocument {
  fn from(set: &PackageSet) -> Self {
    Self {
      packages: set
        .by_id()
        .map(|(id, versions)| (id.to_string(), versions.iter().cloned().collect()))
        .collect(),
    }
  }
}

impl From<PackageIndexDocument> for PackageSet {
  fn from(doc: PackageIndexDocument) -> Self {
    doc
      .packages
      .into_iter()
      .flat_map(|(id, versions)| versions.into_iter().map(move |v| PackageIdentity::new(id.clone(), v)))
      .collect()
  }
}

/// Current package set, including anything staged in this file system. Missing means empty.
pub async fn read_package_set(fs: &FileSystem) -> Result<PackageSet, ServiceError> {
  let doc: Option<PackageIndexDocument> = fs.get(PACKAGE_INDEX)?.read_json().await?;
  Ok(doc.map(PackageSet::from).unwrap_or_default())
}

pub async fn write_package_set(fs: &FileSystem, set: &PackageSet) -> Result<(), ServiceError> {
  fs.get(PACKAGE_INDEX)?
    .write_json(&PackageIndexDocument::from(set))
    .await?;
  Ok(())
}

pub struct PackageIndexService {
  ctx: Arc<ServiceContext>,
  packages: Mutex<PackageSet>,
}

impl PackageIndexService {
  pub fn new(ctx: Arc<ServiceContext>) -> Self {
    Self {
      ctx,
      packages: Mutex::new(PackageSet::new()),
    }
  }
}

#[async_trait]
impl FeedService for PackageIndexService {
  fn kind(&self) -> ServiceKind {
    ServiceKind::PackageIndex
  }

  async fn preload(&self, _changes: &ChangeSet) -> Result<(), ServiceError> {
    *self.packages.lock().await = read_package_set(&self.ctx.fs).await?;
    Ok(())
  }

  async fn add_package(&self, input: &PackageInput) -> Result<(), ServiceError> {
    self.packages.lock().await.insert(&input.identity);
    Ok(())
  }

  async fn remove_package(&self, identity: &PackageIdentity) -> Result<bool, ServiceError> {
    Ok(self.packages.lock().await.remove(identity))
  }

  async fn save(&self) -> Result<(), ServiceError> {
    let packages = self.packages.lock().await;
    debug!(packages = packages.len(), ids = packages.id_count(), "Staged package index");
    write_package_set(&self.ctx.fs, &packages).await
  }
}
