//! Registration - per-id version listings.
//!
//! `registration/<id>/index.json` lists every version with its metadata. Up to
//! `registrationpagesize` versions are inlined in a single page; past that the listing is split
//! into `registration/<id>/page/<lower>/<upper>.json` documents referenced from the index. Each
//! version also gets a leaf document at `registration/<id>/<version>.json`.

use std::{
  collections::{BTreeMap, BTreeSet},
  sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use super::{FeedService, ServiceContext, ServiceError, ServiceKind, flat_container::nupkg_path};
use crate::{
  catalog::PackageMetadata,
  domain::{
    package::{ChangeSet, PackageIdentity, PackageInput},
    version::NuGetVersion,
  },
  fs::FileSystem,
};

pub fn index_path(id: &str) -> String {
  format!("registration/{}/index.json", id.to_lowercase())
}

pub fn leaf_path(identity: &PackageIdentity) -> String {
  format!(
    "registration/{}/{}.json",
    identity.lower_id(),
    identity.version.to_path_string()
  )
}

fn page_path(id: &str, lower: &NuGetVersion, upper: &NuGetVersion) -> String {
  format!(
    "registration/{}/page/{}/{}.json",
    id.to_lowercase(),
    lower.to_path_string(),
    upper.to_path_string()
  )
}

// ============================================================================
// Documents
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationIndex {
  #[serde(rename = "@id")]
  pub id: Url,
  #[serde(rename = "@type")]
  pub kind: Vec<String>,
  pub commit_id: Uuid,
  pub commit_time_stamp: DateTime<Utc>,
  /// Number of pages.
  pub count: usize,
  pub items: Vec<RegistrationPage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationPage {
  #[serde(rename = "@id")]
  pub id: Url,
  #[serde(rename = "@type")]
  pub kind: String,
  pub commit_id: Uuid,
  pub commit_time_stamp: DateTime<Utc>,
  pub count: usize,
  pub lower: NuGetVersion,
  pub upper: NuGetVersion,
  pub parent: Url,
  /// Present when inlined in the index or in a page document, absent in index references.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub items: Option<Vec<RegistrationLeaf>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationLeaf {
  #[serde(rename = "@id")]
  pub id: Url,
  #[serde(rename = "@type")]
  pub kind: String,
  pub commit_id: Uuid,
  pub commit_time_stamp: DateTime<Utc>,
  pub catalog_entry: RegistrationCatalogEntry,
  pub package_content: Url,
  pub registration: Url,
}

impl RegistrationLeaf {
  pub fn version(&self) -> &NuGetVersion {
    &self.catalog_entry.metadata.version
  }

  pub fn listed(&self) -> bool {
    self.catalog_entry.metadata.listed
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationCatalogEntry {
  /// Catalog details document.
  #[serde(rename = "@id")]
  pub id: Url,
  #[serde(rename = "@type")]
  pub kind: String,
  #[serde(flatten)]
  pub metadata: PackageMetadata,
}

/// Standalone `registration/<id>/<version>.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationLeafDocument {
  #[serde(rename = "@id")]
  pub id: Url,
  #[serde(rename = "@type")]
  pub kind: Vec<String>,
  pub catalog_entry: Url,
  pub listed: bool,
  pub package_content: Url,
  pub published: DateTime<Utc>,
  pub registration: Url,
}

impl From<&RegistrationLeaf> for RegistrationLeafDocument {
  fn from(leaf: &RegistrationLeaf) -> Self {
    Self {
      id: leaf.id.clone(),
      kind: vec!["Package".to_string(), "http://schema.nuget.org/catalog#Permalink".to_string()],
      catalog_entry: leaf.catalog_entry.id.clone(),
      listed: leaf.listed(),
      package_content: leaf.package_content.clone(),
      published: leaf.catalog_entry.metadata.published,
      registration: leaf.registration.clone(),
    }
  }
}

// ============================================================================
// Reading
// ============================================================================

#[derive(Debug, Default)]
struct Listing {
  leaves: BTreeMap<NuGetVersion, RegistrationLeaf>,
  /// Page documents the current index references.
  pages: Vec<String>,
}

async fn load_listing(fs: &FileSystem, id: &str) -> Result<Listing, ServiceError> {
  let mut listing = Listing::default();
  let index: Option<RegistrationIndex> = fs.get(&index_path(id))?.read_json().await?;
  let Some(index) = index else {
    return Ok(listing);
  };

  for page in index.items {
    let items = match page.items {
      Some(items) => items,
      None => {
        let key = fs.relative_path(page.id.as_str())?;
        let doc: Option<RegistrationPage> = fs.get(&key)?.read_json().await?;
        let doc = doc.ok_or_else(|| ServiceError::invalid_document(&key, "referenced page is missing"))?;
        listing.pages.push(key);
        doc.items.unwrap_or_default()
      }
    };
    for leaf in items {
      listing.leaves.insert(leaf.version().clone(), leaf);
    }
  }
  Ok(listing)
}

/// Every version of an id, ascending. Empty if the id has no registration.
pub async fn read_leaves(fs: &FileSystem, id: &str) -> Result<Vec<RegistrationLeaf>, ServiceError> {
  Ok(load_listing(fs, id).await?.leaves.into_values().collect())
}

/// Latest listed version, optionally counting prereleases.
pub async fn latest(fs: &FileSystem, id: &str, include_prerelease: bool) -> Result<Option<RegistrationLeaf>, ServiceError> {
  Ok(
    read_leaves(fs, id)
      .await?
      .into_iter()
      .rev()
      .find(|leaf| leaf.listed() && (include_prerelease || !leaf.version().is_prerelease())),
  )
}

// ============================================================================
// Service
// ============================================================================

#[derive(Debug, Default)]
struct IdState {
  listing: Listing,
  added: BTreeSet<NuGetVersion>,
  removed: BTreeSet<NuGetVersion>,
}

pub struct RegistrationService {
  ctx: Arc<ServiceContext>,
  ids: Mutex<BTreeMap<String, IdState>>,
}

impl RegistrationService {
  pub fn new(ctx: Arc<ServiceContext>) -> Self {
    Self {
      ctx,
      ids: Mutex::new(BTreeMap::new()),
    }
  }

  async fn ensure_loaded(&self, ids: &mut BTreeMap<String, IdState>, id: &str) -> Result<(), ServiceError> {
    if !ids.contains_key(id) {
      let listing = load_listing(&self.ctx.fs, id).await?;
      ids.insert(
        id.to_string(),
        IdState {
          listing,
          ..Default::default()
        },
      );
    }
    Ok(())
  }

  fn build_leaf(&self, input: &PackageInput, details: Url) -> Result<RegistrationLeaf, ServiceError> {
    let fs = &self.ctx.fs;
    let identity = &input.identity;
    let content = fs.uri_for(&nupkg_path(identity))?;
    Ok(RegistrationLeaf {
      id: fs.uri_for(&leaf_path(identity))?,
      kind: "Package".to_string(),
      commit_id: self.ctx.commit.id,
      commit_time_stamp: self.ctx.commit.timestamp,
      catalog_entry: RegistrationCatalogEntry {
        id: details,
        kind: "PackageDetails".to_string(),
        metadata: PackageMetadata::from_descriptor(&input.descriptor, content.clone(), self.ctx.commit.timestamp),
      },
      package_content: content,
      registration: fs.uri_for(&index_path(&identity.id))?,
    })
  }

  async fn save_id(&self, id: &str, state: &IdState) -> Result<(), ServiceError> {
    let fs = &self.ctx.fs;
    let commit = self.ctx.commit;
    let index_file = fs.get(&index_path(id))?;

    let leaf_file = |version: &NuGetVersion| fs.get(&leaf_path(&PackageIdentity::new(id, version.clone())));

    if state.listing.leaves.is_empty() {
      debug!(id = %id, "Last version removed, deleting registration");
      if index_file.exists().await? {
        index_file.delete().await;
      }
      for page in &state.listing.pages {
        fs.get(page)?.delete().await;
      }
      for version in &state.removed {
        leaf_file(version)?.delete().await;
      }
      return Ok(());
    }

    let index_uri = index_file.uri().clone();
    let page_size = self.ctx.settings.registration_page_size();
    let leaves: Vec<RegistrationLeaf> = state.listing.leaves.values().cloned().collect();
    let inline = leaves.len() <= page_size;

    let mut pages = Vec::new();
    let mut written = Vec::new();
    for chunk in leaves.chunks(page_size) {
      let (Some(first), Some(last)) = (chunk.first(), chunk.last()) else {
        continue;
      };
      let lower = first.version().clone();
      let upper = last.version().clone();

      let id_uri = if inline {
        let mut uri = index_uri.clone();
        uri.set_fragment(Some(&format!(
          "page/{}/{}",
          lower.to_path_string(),
          upper.to_path_string()
        )));
        uri
      } else {
        fs.uri_for(&page_path(id, &lower, &upper))?
      };

      let mut page = RegistrationPage {
        id: id_uri,
        kind: "catalog:CatalogPage".to_string(),
        commit_id: commit.id,
        commit_time_stamp: commit.timestamp,
        count: chunk.len(),
        lower: lower.clone(),
        upper: upper.clone(),
        parent: index_uri.clone(),
        items: Some(chunk.to_vec()),
      };

      if !inline {
        let path = page_path(id, &lower, &upper);
        fs.get(&path)?.write_json(&page).await?;
        written.push(path);
        page.items = None;
      }
      pages.push(page);
    }

    for stale in state.listing.pages.iter().filter(|p| !written.contains(p)) {
      fs.get(stale)?.delete().await;
    }

    let index = RegistrationIndex {
      id: index_uri,
      kind: vec![
        "catalog:CatalogRoot".to_string(),
        "PackageRegistration".to_string(),
        "catalog:Permalink".to_string(),
      ],
      commit_id: commit.id,
      commit_time_stamp: commit.timestamp,
      count: pages.len(),
      items: pages,
    };
    index_file.write_json(&index).await?;

    for version in state.removed.iter().filter(|v| !state.listing.leaves.contains_key(*v)) {
      leaf_file(version)?.delete().await;
    }
    for version in &state.added {
      if let Some(leaf) = state.listing.leaves.get(version) {
        leaf_file(version)?
          .write_json(&RegistrationLeafDocument::from(leaf))
          .await?;
      }
    }

    debug!(id = %id, versions = leaves.len(), pages = index.count, inline, "Staged registration");
    Ok(())
  }
}

#[async_trait]
impl FeedService for RegistrationService {
  fn kind(&self) -> ServiceKind {
    ServiceKind::Registration
  }

  fn dependencies(&self) -> Vec<ServiceKind> {
    vec![ServiceKind::Catalog]
  }

  async fn preload(&self, changes: &ChangeSet) -> Result<(), ServiceError> {
    let mut ids = self.ids.lock().await;
    for id in changes.affected_ids() {
      self.ensure_loaded(&mut ids, &id).await?;
    }
    Ok(())
  }

  async fn add_package(&self, input: &PackageInput) -> Result<(), ServiceError> {
    let identity = &input.identity;
    let details = self
      .ctx
      .outputs
      .details_uri(identity)
      .ok_or_else(|| ServiceError::MissingDetails(identity.to_string()))?;
    let leaf = self.build_leaf(input, details)?;

    let id = identity.lower_id();
    let mut ids = self.ids.lock().await;
    self.ensure_loaded(&mut ids, &id).await?;
    if let Some(state) = ids.get_mut(&id) {
      state.listing.leaves.insert(identity.version.clone(), leaf);
      state.added.insert(identity.version.clone());
    }
    Ok(())
  }

  async fn remove_package(&self, identity: &PackageIdentity) -> Result<bool, ServiceError> {
    let id = identity.lower_id();
    let mut ids = self.ids.lock().await;
    self.ensure_loaded(&mut ids, &id).await?;
    let Some(state) = ids.get_mut(&id) else {
      return Ok(false);
    };
    let removed = state.listing.leaves.remove(&identity.version).is_some();
    if removed {
      state.added.remove(&identity.version);
      state.removed.insert(identity.version.clone());
    }
    Ok(removed)
  }

  async fn save(&self) -> Result<(), ServiceError> {
    let ids = self.ids.lock().await;
    for (id, state) in ids.iter() {
      if state.added.is_empty() && state.removed.is_empty() {
        continue;
      }
      self.save_id(id, state).await?;
    }
    Ok(())
  }
}
