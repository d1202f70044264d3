//! `search/query` - one document holding a result per id.
//!
//! Affected ids are recomputed from the registration documents staged in the same run, so this
//! service waits for registration.

use std::{
  collections::{BTreeMap, BTreeSet},
  sync::Arc,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

use super::{
  FeedService, ServiceContext, ServiceError, ServiceKind,
  registration::{self, RegistrationLeaf},
  util::JsonLdContext,
};
use crate::{
  domain::package::{ChangeSet, PackageIdentity, PackageInput},
  fs::FileSystem,
};

pub const SEARCH_QUERY: &str = "search/query";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchDocument {
  #[serde(rename = "@context", default)]
  pub context: JsonLdContext,
  pub total_hits: usize,
  #[serde(default)]
  pub data: Vec<SearchResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
  /// Registration index of the id.
  #[serde(rename = "@id")]
  pub id_uri: Url,
  #[serde(rename = "@type")]
  pub kind: String,
  pub registration: Url,
  pub id: String,
  /// Latest listed version, prereleases included.
  pub version: String,
  #[serde(default)]
  pub description: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub summary: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub title: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub icon_url: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub license_url: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub project_url: Option<String>,
  #[serde(default)]
  pub tags: Vec<String>,
  #[serde(default)]
  pub authors: Vec<String>,
  #[serde(default)]
  pub total_downloads: u64,
  pub versions: Vec<SearchVersion>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchVersion {
  pub version: String,
  pub downloads: u64,
  /// Registration leaf.
  #[serde(rename = "@id")]
  pub id: Url,
}

/// Build the result for one id from its registration leaves. None when nothing is listed.
pub fn build_result(leaves: &[RegistrationLeaf]) -> Option<SearchResult> {
  let listed: Vec<&RegistrationLeaf> = leaves.iter().filter(|l| l.listed()).collect();
  let latest = listed.iter().max_by(|a, b| a.version().cmp(b.version()))?;
  let metadata = &latest.catalog_entry.metadata;

  let mut versions: Vec<&RegistrationLeaf> = listed.clone();
  versions.sort_by(|a, b| a.version().cmp(b.version()));

  Some(SearchResult {
    id_uri: latest.registration.clone(),
    kind: "Package".to_string(),
    registration: latest.registration.clone(),
    id: metadata.id.clone(),
    version: metadata.version.to_normalized_string(),
    description: metadata.description.clone(),
    summary: metadata.summary.clone(),
    title: metadata.title.clone(),
    icon_url: metadata.icon_url.clone(),
    license_url: metadata.license_url.clone(),
    project_url: metadata.project_url.clone(),
    tags: metadata.tags.clone(),
    authors: metadata.author_list(),
    total_downloads: 0,
    versions: versions
      .into_iter()
      .map(|leaf| SearchVersion {
        version: leaf.version().to_normalized_string(),
        downloads: 0,
        id: leaf.id.clone(),
      })
      .collect(),
  })
}

pub async fn read_search(fs: &FileSystem) -> Result<SearchDocument, ServiceError> {
  let doc: Option<SearchDocument> = fs.get(SEARCH_QUERY)?.read_json().await?;
  Ok(doc.unwrap_or_default())
}

#[derive(Debug, Default)]
struct SearchState {
  /// Lowercased id → result.
  results: BTreeMap<String, SearchResult>,
  touched: BTreeSet<String>,
}

pub struct SearchService {
  ctx: Arc<ServiceContext>,
  state: Mutex<SearchState>,
}

impl SearchService {
  pub fn new(ctx: Arc<ServiceContext>) -> Self {
    Self {
      ctx,
      state: Mutex::new(SearchState::default()),
    }
  }
}

#[async_trait]
impl FeedService for SearchService {
  fn kind(&self) -> ServiceKind {
    ServiceKind::Search
  }

  fn dependencies(&self) -> Vec<ServiceKind> {
    vec![ServiceKind::Registration]
  }

  async fn preload(&self, _changes: &ChangeSet) -> Result<(), ServiceError> {
    let doc = read_search(&self.ctx.fs).await?;
    let mut state = self.state.lock().await;
    state.results = doc.data.into_iter().map(|r| (r.id.to_lowercase(), r)).collect();
    Ok(())
  }

  async fn add_package(&self, input: &PackageInput) -> Result<(), ServiceError> {
    self.state.lock().await.touched.insert(input.identity.lower_id());
    Ok(())
  }

  async fn remove_package(&self, identity: &PackageIdentity) -> Result<bool, ServiceError> {
    let id = identity.lower_id();
    let mut state = self.state.lock().await;
    let present = state.results.get(&id).is_some_and(|r| {
      r.versions
        .iter()
        .any(|v| v.version.eq_ignore_ascii_case(&identity.version.to_normalized_string()))
    });
    state.touched.insert(id);
    Ok(present)
  }

  async fn save(&self) -> Result<(), ServiceError> {
    let mut state = self.state.lock().await;
    let touched = std::mem::take(&mut state.touched);
    for id in touched {
      let leaves = registration::read_leaves(&self.ctx.fs, &id).await?;
      match build_result(&leaves) {
        Some(result) => {
          state.results.insert(id, result);
        }
        None => {
          state.results.remove(&id);
        }
      }
    }

    let data: Vec<SearchResult> = state.results.values().cloned().collect();
    debug!(ids = data.len(), "Staged search document");
    let doc = SearchDocument {
      context: JsonLdContext::default(),
      total_hits: data.len(),
      data,
    };
    self.ctx.fs.get(SEARCH_QUERY)?.write_json(&doc).await?;
    Ok(())
  }
}
