use std::{
  cmp::Ordering,
  collections::HashMap,
  fmt,
  hash::{Hash, Hasher},
  path::{Path, PathBuf},
  sync::Arc,
};

use serde::{Deserialize, Serialize};

use super::version::NuGetVersion;

/// A package id + version pair.
///
/// Ids compare case-insensitively; the original casing is kept for display documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageIdentity {
  pub id: String,
  pub version: NuGetVersion,
}

impl PackageIdentity {
  pub fn new(id: impl Into<String>, version: NuGetVersion) -> Self {
    Self { id: id.into(), version }
  }

  pub fn lower_id(&self) -> String {
    self.id.to_lowercase()
  }

  /// `<id>.<version>` in lowercase, the stem used for per-package file names.
  pub fn file_stem(&self) -> String {
    format!("{}.{}", self.lower_id(), self.version.to_path_string())
  }
}

impl PartialEq for PackageIdentity {
  fn eq(&self, other: &Self) -> bool {
    self.cmp(other) == Ordering::Equal
  }
}

impl Eq for PackageIdentity {}

impl Ord for PackageIdentity {
  fn cmp(&self, other: &Self) -> Ordering {
    self
      .lower_id()
      .cmp(&other.lower_id())
      .then_with(|| self.version.cmp(&other.version))
  }
}

impl PartialOrd for PackageIdentity {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Hash for PackageIdentity {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.lower_id().hash(state);
    self.version.hash(state);
  }
}

impl fmt::Display for PackageIdentity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.id, self.version)
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageDependency {
  pub id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub range: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyGroup {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub target_framework: Option<String>,
  #[serde(default)]
  pub dependencies: Vec<PackageDependency>,
}

fn default_listed() -> bool {
  true
}

/// Structured package metadata, as produced by an archive reader.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageDescriptor {
  pub id: String,
  pub version: NuGetVersion,
  #[serde(default)]
  pub authors: Vec<String>,
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
  #[serde(default = "default_listed")]
  pub listed: bool,
  #[serde(default)]
  pub dependency_groups: Vec<DependencyGroup>,
  /// Entries of the package archive, relative to the archive root.
  #[serde(default)]
  pub files: Vec<String>,
  /// Package archive on local disk, uploaded as-is into the flat container.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub content: Option<PathBuf>,
  /// Hex SHA-512 of the archive. Computed from `content` when absent.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub package_hash: Option<String>,
}

impl PackageDescriptor {
  pub fn new(id: impl Into<String>, version: NuGetVersion) -> Self {
    Self {
      id: id.into(),
      version,
      authors: Vec::new(),
      description: String::new(),
      summary: None,
      title: None,
      tags: Vec::new(),
      license_url: None,
      project_url: None,
      icon_url: None,
      listed: true,
      dependency_groups: Vec::new(),
      files: Vec::new(),
      content: None,
      package_hash: None,
    }
  }

  pub fn identity(&self) -> PackageIdentity {
    PackageIdentity::new(self.id.clone(), self.version.clone())
  }

  /// Resolve a relative `content` path against the directory of the manifest it came from.
  pub fn resolve_content(mut self, base: &Path) -> Self {
    if let Some(content) = &self.content
      && content.is_relative()
    {
      self.content = Some(base.join(content));
    }
    self
  }
}

/// A package queued for addition, shared between every service task of one pipeline run.
#[derive(Debug, Clone)]
pub struct PackageInput {
  pub identity: PackageIdentity,
  pub descriptor: Arc<PackageDescriptor>,
}

impl PackageInput {
  pub fn new(descriptor: PackageDescriptor) -> Self {
    Self {
      identity: descriptor.identity(),
      descriptor: Arc::new(descriptor),
    }
  }
}

pub const DEFAULT_REMOVE_REASON: &str = "Removed";

/// One batch of adds and removes applied by a single pipeline run.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
  pub adds: Vec<PackageInput>,
  pub removes: Vec<PackageIdentity>,
  /// Reasons recorded in catalog tombstones, per removed identity.
  reasons: HashMap<PackageIdentity, String>,
}

impl ChangeSet {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add(&mut self, input: PackageInput) {
    self.adds.push(input);
  }

  /// Queue a removal. A second removal of the same identity is ignored.
  pub fn remove(&mut self, identity: PackageIdentity, reason: impl Into<String>) {
    if self.reasons.contains_key(&identity) {
      return;
    }
    self.reasons.insert(identity.clone(), reason.into());
    self.removes.push(identity);
  }

  pub fn reason_for(&self, identity: &PackageIdentity) -> &str {
    self
      .reasons
      .get(identity)
      .map(String::as_str)
      .unwrap_or(DEFAULT_REMOVE_REASON)
  }

  pub fn is_added(&self, identity: &PackageIdentity) -> bool {
    self.adds.iter().any(|a| &a.identity == identity)
  }

  pub fn is_empty(&self) -> bool {
    self.adds.is_empty() && self.removes.is_empty()
  }

  /// Lowercased ids touched by this batch, sorted and unique.
  pub fn affected_ids(&self) -> Vec<String> {
    let mut ids: Vec<String> = self
      .adds
      .iter()
      .map(|a| a.identity.lower_id())
      .chain(self.removes.iter().map(PackageIdentity::lower_id))
      .collect();
    ids.sort();
    ids.dedup();
    ids
  }
}
