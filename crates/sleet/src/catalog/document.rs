//! Catalog document shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::domain::{
  package::{DependencyGroup, PackageDescriptor, PackageIdentity},
  version::NuGetVersion,
};

pub const HASH_ALGORITHM: &str = "SHA512";

fn catalog_page_type() -> String {
  "CatalogPage".to_string()
}

/// Operation recorded by one catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CatalogOperation {
  #[serde(rename = "nuget:PackageDetails")]
  Add,
  #[serde(rename = "nuget:PackageDelete")]
  Remove,
}

/// One row of a catalog page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
  /// URI of the details document.
  #[serde(rename = "@id")]
  pub details: Url,
  #[serde(rename = "@type")]
  pub operation: CatalogOperation,
  pub commit_id: Uuid,
  pub commit_time_stamp: DateTime<Utc>,
  #[serde(rename = "nuget:id")]
  pub package_id: String,
  #[serde(rename = "nuget:version")]
  pub version: NuGetVersion,
}

impl CatalogEntry {
  pub fn identity(&self) -> PackageIdentity {
    PackageIdentity::new(self.package_id.clone(), self.version.clone())
  }

  pub(crate) fn sort_key(&self) -> (DateTime<Utc>, &str) {
    (self.commit_time_stamp, self.details.as_str())
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogPageRef {
  #[serde(rename = "@id")]
  pub id: Url,
  #[serde(rename = "@type", default = "catalog_page_type")]
  pub kind: String,
  pub commit_id: Uuid,
  pub commit_time_stamp: DateTime<Utc>,
  pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogPage {
  #[serde(rename = "@id")]
  pub id: Url,
  #[serde(rename = "@type", default = "catalog_page_type")]
  pub kind: String,
  pub commit_id: Uuid,
  pub commit_time_stamp: DateTime<Utc>,
  pub count: usize,
  /// The root catalog index.
  pub parent: Url,
  #[serde(default)]
  pub items: Vec<CatalogEntry>,
}

impl CatalogPage {
  pub fn new(id: Url, parent: Url, commit_id: Uuid, commit_time_stamp: DateTime<Utc>) -> Self {
    Self {
      id,
      kind: catalog_page_type(),
      commit_id,
      commit_time_stamp,
      count: 0,
      parent,
      items: Vec::new(),
    }
  }

  pub fn to_ref(&self) -> CatalogPageRef {
    CatalogPageRef {
      id: self.id.clone(),
      kind: self.kind.clone(),
      commit_id: self.commit_id,
      commit_time_stamp: self.commit_time_stamp,
      count: self.count,
    }
  }
}

/// `catalog/index.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogRoot {
  #[serde(rename = "@id")]
  pub id: Url,
  #[serde(rename = "@type")]
  pub kind: Vec<String>,
  pub commit_id: Uuid,
  pub commit_time_stamp: DateTime<Utc>,
  /// Number of pages.
  pub count: usize,
  /// Number of entries across all pages.
  pub item_count: usize,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_created: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_deleted: Option<DateTime<Utc>>,
  #[serde(default)]
  pub items: Vec<CatalogPageRef>,
}

impl CatalogRoot {
  pub fn empty(id: Url, commit_id: Uuid, commit_time_stamp: DateTime<Utc>) -> Self {
    Self {
      id,
      kind: vec!["CatalogRoot".to_string(), "AppendOnlyCatalog".to_string(), "Permalink".to_string()],
      commit_id,
      commit_time_stamp,
      count: 0,
      item_count: 0,
      last_created: None,
      last_deleted: None,
      items: Vec::new(),
    }
  }
}

/// Package metadata as published in details documents, registration entries and search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageMetadata {
  pub id: String,
  pub version: NuGetVersion,
  #[serde(default)]
  pub authors: String,
  #[serde(default)]
  pub description: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub summary: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub title: Option<String>,
  #[serde(default)]
  pub tags: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub license_url: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub project_url: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub icon_url: Option<String>,
  pub listed: bool,
  pub is_prerelease: bool,
  pub published: DateTime<Utc>,
  pub package_content: Url,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub package_hash: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub package_hash_algorithm: Option<String>,
  #[serde(default)]
  pub dependency_groups: Vec<DependencyGroup>,
}

impl PackageMetadata {
  pub fn from_descriptor(descriptor: &PackageDescriptor, package_content: Url, published: DateTime<Utc>) -> Self {
    Self {
      id: descriptor.id.clone(),
      version: descriptor.version.clone(),
      authors: descriptor.authors.join(", "),
      description: descriptor.description.clone(),
      summary: descriptor.summary.clone(),
      title: descriptor.title.clone(),
      tags: descriptor.tags.clone(),
      license_url: descriptor.license_url.clone(),
      project_url: descriptor.project_url.clone(),
      icon_url: descriptor.icon_url.clone(),
      listed: descriptor.listed,
      is_prerelease: descriptor.version.is_prerelease(),
      published,
      package_content,
      package_hash: descriptor.package_hash.clone(),
      package_hash_algorithm: descriptor.package_hash.as_ref().map(|_| HASH_ALGORITHM.to_string()),
      dependency_groups: descriptor.dependency_groups.clone(),
    }
  }

  pub fn author_list(&self) -> Vec<String> {
    self
      .authors
      .split(',')
      .map(str::trim)
      .filter(|a| !a.is_empty())
      .map(str::to_string)
      .collect()
  }
}

/// Details document for an add, `catalog/data/<uuid>.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageDetails {
  #[serde(rename = "@id")]
  pub id_uri: Url,
  #[serde(rename = "@type")]
  pub kind: Vec<String>,
  pub commit_id: Uuid,
  pub commit_time_stamp: DateTime<Utc>,
  #[serde(flatten)]
  pub metadata: PackageMetadata,
}

impl PackageDetails {
  pub fn new(id_uri: Url, commit_id: Uuid, commit_time_stamp: DateTime<Utc>, metadata: PackageMetadata) -> Self {
    Self {
      id_uri,
      kind: vec!["PackageDetails".to_string(), "catalog:Permalink".to_string()],
      commit_id,
      commit_time_stamp,
      metadata,
    }
  }
}

/// Tombstone for a remove.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageDelete {
  #[serde(rename = "@id")]
  pub id_uri: Url,
  #[serde(rename = "@type")]
  pub kind: Vec<String>,
  pub commit_id: Uuid,
  pub commit_time_stamp: DateTime<Utc>,
  pub id: String,
  pub version: NuGetVersion,
  pub published: DateTime<Utc>,
  #[serde(rename = "sleet:removeReason")]
  pub reason: String,
}

impl PackageDelete {
  pub fn new(
    id_uri: Url,
    identity: &PackageIdentity,
    commit_id: Uuid,
    commit_time_stamp: DateTime<Utc>,
    reason: impl Into<String>,
  ) -> Self {
    Self {
      id_uri,
      kind: vec!["PackageDelete".to_string(), "catalog:Permalink".to_string()],
      commit_id,
      commit_time_stamp,
      id: identity.id.clone(),
      version: identity.version.clone(),
      published: commit_time_stamp,
      reason: reason.into(),
    }
  }
}
