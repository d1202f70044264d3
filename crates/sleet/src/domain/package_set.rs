//! Live package membership, keyed by lowercased id.
//!
//! Each id keeps the casing it was first inserted with, so documents written from the set show
//! the id the way it was published.

use std::collections::{BTreeMap, BTreeSet};

use super::{package::PackageIdentity, version::NuGetVersion};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct IdVersions {
  id: String,
  versions: BTreeSet<NuGetVersion>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageSet {
  packages: BTreeMap<String, IdVersions>,
}

impl PackageSet {
  pub fn new() -> Self {
    Self::default()
  }

  /// Returns true if the identity was not present yet.
  pub fn insert(&mut self, identity: &PackageIdentity) -> bool {
    self
      .packages
      .entry(identity.lower_id())
      .or_insert_with(|| IdVersions {
        id: identity.id.clone(),
        versions: BTreeSet::new(),
      })
      .versions
      .insert(identity.version.clone())
  }

  /// Returns true if the identity was present. Ids with no versions left are dropped.
  pub fn remove(&mut self, identity: &PackageIdentity) -> bool {
    let id = identity.lower_id();
    let Some(entry) = self.packages.get_mut(&id) else {
      return false;
    };
    let removed = entry.versions.remove(&identity.version);
    if entry.versions.is_empty() {
      self.packages.remove(&id);
    }
    removed
  }

  pub fn contains(&self, identity: &PackageIdentity) -> bool {
    self
      .packages
      .get(&identity.lower_id())
      .is_some_and(|entry| entry.versions.contains(&identity.version))
  }

  pub fn contains_id(&self, id: &str) -> bool {
    self.packages.contains_key(&id.to_lowercase())
  }

  /// Versions of an id, ascending.
  pub fn versions(&self, id: &str) -> Vec<NuGetVersion> {
    self
      .packages
      .get(&id.to_lowercase())
      .map(|entry| entry.versions.iter().cloned().collect())
      .unwrap_or_default()
  }

  pub fn latest(&self, id: &str, include_prerelease: bool) -> Option<&NuGetVersion> {
    self
      .packages
      .get(&id.to_lowercase())?
      .versions
      .iter()
      .rev()
      .find(|v| include_prerelease || !v.is_prerelease())
  }

  /// Display ids, sorted case-insensitively.
  pub fn ids(&self) -> impl Iterator<Item = &str> {
    self.packages.values().map(|entry| entry.id.as_str())
  }

  /// Every identity with its display id, sorted by id then version.
  pub fn identities(&self) -> Vec<PackageIdentity> {
    self
      .packages
      .values()
      .flat_map(|entry| {
        entry
          .versions
          .iter()
          .map(|v| PackageIdentity::new(entry.id.clone(), v.clone()))
      })
      .collect()
  }

  /// Number of (id, version) pairs.
  pub fn len(&self) -> usize {
    self.packages.values().map(|entry| entry.versions.len()).sum()
  }

  pub fn id_count(&self) -> usize {
    self.packages.len()
  }

  pub fn is_empty(&self) -> bool {
    self.packages.is_empty()
  }

  /// Display id and versions per id, sorted case-insensitively.
  pub(crate) fn by_id(&self) -> impl Iterator<Item = (&str, &BTreeSet<NuGetVersion>)> {
    self
      .packages
      .values()
      .map(|entry| (entry.id.as_str(), &entry.versions))
  }
}

impl FromIterator<PackageIdentity> for PackageSet {
  fn from_iter<I: IntoIterator<Item = PackageIdentity>>(iter: I) -> Self {
    let mut set = Self::new();
    for identity in iter {
      set.insert(&identity);
    }
    set
  }
}
