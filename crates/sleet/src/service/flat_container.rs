//! Flat container: `flatcontainer/<id>/index.json` and the package archives.
//!
//! Archives are linked from the descriptor's content path, so large files are never loaded into
//! memory before commit.

use std::{
  collections::{BTreeMap, BTreeSet},
  sync::Arc,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{FeedService, ServiceContext, ServiceError, ServiceKind};
use crate::{
  domain::{
    package::{ChangeSet, PackageIdentity, PackageInput},
    version::NuGetVersion,
  },
  fs::FileSystem,
};

pub fn id_index_path(id: &str) -> String {
  format!("flatcontainer/{}/index.json", id.to_lowercase())
}

pub fn nupkg_path(identity: &PackageIdentity) -> String {
  format!(
    "flatcontainer/{}/{}/{}.nupkg",
    identity.lower_id(),
    identity.version.to_path_string(),
    identity.file_stem()
  )
}

/// Lowercase normalized versions, ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatContainerIndex {
  #[serde(default)]
  pub versions: Vec<String>,
}

pub async fn read_versions(fs: &FileSystem, id: &str) -> Result<BTreeSet<NuGetVersion>, ServiceError> {
  let path = id_index_path(id);
  let doc: Option<FlatContainerIndex> = fs.get(&path)?.read_json().await?;
  let mut versions = BTreeSet::new();
  for raw in doc.map(|d| d.versions).unwrap_or_default() {
    let version = NuGetVersion::parse(&raw).map_err(|e| ServiceError::invalid_document(&path, e.to_string()))?;
    versions.insert(version);
  }
  Ok(versions)
}

pub struct FlatContainerService {
  ctx: Arc<ServiceContext>,
  ids: Mutex<BTreeMap<String, BTreeSet<NuGetVersion>>>,
}

impl FlatContainerService {
  pub fn new(ctx: Arc<ServiceContext>) -> Self {
    Self {
      ctx,
      ids: Mutex::new(BTreeMap::new()),
    }
  }
}

#[async_trait]
impl FeedService for FlatContainerService {
  fn kind(&self) -> ServiceKind {
    ServiceKind::FlatContainer
  }

  async fn preload(&self, changes: &ChangeSet) -> Result<(), ServiceError> {
    let mut ids = self.ids.lock().await;
    for id in changes.affected_ids() {
      let versions = read_versions(&self.ctx.fs, &id).await?;
      ids.insert(id, versions);
    }
    Ok(())
  }

  async fn add_package(&self, input: &PackageInput) -> Result<(), ServiceError> {
    let identity = &input.identity;
    match &input.descriptor.content {
      Some(content) => self.ctx.fs.get(&nupkg_path(identity))?.link(content.clone()).await,
      None => warn!(package = %identity, "No package content, archive not published"),
    }
    self
      .ids
      .lock()
      .await
      .entry(identity.lower_id())
      .or_default()
      .insert(identity.version.clone());
    Ok(())
  }

  async fn remove_package(&self, identity: &PackageIdentity) -> Result<bool, ServiceError> {
    let removed = self
      .ids
      .lock()
      .await
      .get_mut(&identity.lower_id())
      .is_some_and(|versions| versions.remove(&identity.version));
    if removed {
      self.ctx.fs.get(&nupkg_path(identity))?.delete().await;
    }
    Ok(removed)
  }

  async fn save(&self) -> Result<(), ServiceError> {
    let ids = self.ids.lock().await;
    for (id, versions) in ids.iter() {
      let file = self.ctx.fs.get(&id_index_path(id))?;
      if versions.is_empty() {
        if file.exists().await? {
          debug!(id = %id, "Removing flat container index");
          file.delete().await;
        }
        continue;
      }
      let doc = FlatContainerIndex {
        versions: versions.iter().map(NuGetVersion::to_path_string).collect(),
      };
      file.write_json(&doc).await?;
    }
    Ok(())
  }
}
