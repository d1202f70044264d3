//! Version-count retention.
//!
//! Walks every id's versions newest first and keeps at most `stable_max` stable and
//! `prerelease_max` prerelease versions per id. Pinned identities take up a slot but are never
//! returned for pruning.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::domain::{package::PackageIdentity, settings::RetentionSettings};

#[derive(Debug, Default)]
struct Counters {
  stable: usize,
  /// Keyed by first release label when grouping, otherwise a single bucket.
  prerelease: HashMap<String, usize>,
}

fn prerelease_bucket(identity: &PackageIdentity, policy: &RetentionSettings) -> String {
  if policy.group_by_first_prerelease_label {
    identity
      .version
      .first_release_label()
      .map(str::to_lowercase)
      .unwrap_or_default()
  } else {
    String::new()
  }
}

/// Identities to remove so every id satisfies the policy, oldest first per id.
pub fn packages_to_prune(
  packages: &[PackageIdentity],
  pinned: &HashSet<PackageIdentity>,
  policy: &RetentionSettings,
) -> Vec<PackageIdentity> {
  if policy.stable_max.is_none() && policy.prerelease_max.is_none() {
    return Vec::new();
  }

  let mut sorted: Vec<&PackageIdentity> = packages.iter().collect();
  sorted.sort_by(|a, b| {
    a.lower_id()
      .cmp(&b.lower_id())
      .then_with(|| b.version.cmp(&a.version))
  });
  sorted.dedup();

  let mut prune = Vec::new();
  let mut current_id: Option<String> = None;
  let mut counters = Counters::default();

  for identity in sorted {
    let id = identity.lower_id();
    if current_id.as_deref() != Some(id.as_str()) {
      current_id = Some(id);
      counters = Counters::default();
    }

    let (count, max) = if identity.version.is_prerelease() {
      let slot = counters.prerelease.entry(prerelease_bucket(identity, policy)).or_default();
      *slot += 1;
      (*slot, policy.prerelease_max)
    } else {
      counters.stable += 1;
      (counters.stable, policy.stable_max)
    };

    let Some(max) = max else {
      continue;
    };
    if count > max && !pinned.contains(identity) {
      prune.push(identity.clone());
    }
  }

  prune.sort();
  debug!(
    packages = packages.len(),
    pinned = pinned.len(),
    prune = prune.len(),
    "Computed retention"
  );
  prune
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;
  use crate::domain::version::NuGetVersion;

  fn ident(id: &str, version: &str) -> PackageIdentity {
    PackageIdentity::new(id, NuGetVersion::parse(version).unwrap())
  }

  fn idents(id: &str, versions: &[&str]) -> Vec<PackageIdentity> {
    versions.iter().map(|v| ident(id, v)).collect()
  }

  fn stable(max: usize) -> RetentionSettings {
    RetentionSettings {
      stable_max: Some(max),
      ..Default::default()
    }
  }

  #[test]
  fn test_stable_boundary() {
    let packages = idents("a", &["1.0.0", "2.0.0", "3.0.0", "4.0.0", "5.0.0", "6.0.0"]);
    let prune = packages_to_prune(&packages, &HashSet::new(), &stable(3));
    assert_eq!(prune, idents("a", &["1.0.0", "2.0.0", "3.0.0"]));
  }

  #[test]
  fn test_pinned_takes_slot_without_shadowing_newer() {
    let packages = idents("a", &["1.0.0", "2.0.0", "3.0.0", "4.0.0", "5.0.0", "6.0.0"]);
    let pinned: HashSet<PackageIdentity> = idents("a", &["1.0.0", "2.0.0", "3.0.0"]).into_iter().collect();
    let prune = packages_to_prune(&packages, &pinned, &stable(3));
    assert!(prune.is_empty());

    let pinned: HashSet<PackageIdentity> = [ident("a", "6.0.0")].into_iter().collect();
    let prune = packages_to_prune(&packages, &pinned, &stable(1));
    assert_eq!(prune, idents("a", &["1.0.0", "2.0.0", "3.0.0", "4.0.0", "5.0.0"]));
  }

  #[test]
  fn test_stable_and_prerelease_counted_separately() {
    let packages = idents("a", &["1.0.0", "2.0.0", "2.1.0-beta", "2.1.0-rc", "3.0.0-alpha"]);
    let policy = RetentionSettings {
      stable_max: Some(1),
      prerelease_max: Some(1),
      group_by_first_prerelease_label: false,
    };
    let prune = packages_to_prune(&packages, &HashSet::new(), &policy);
    assert_eq!(prune, idents("a", &["1.0.0", "2.1.0-beta", "2.1.0-rc"]));
  }

  #[test]
  fn test_group_by_first_label() {
    let packages = idents("a", &["1.0.0-beta.1", "1.0.0-beta.2", "1.0.0-rc.1", "1.0.0-rc.2"]);
    let policy = RetentionSettings {
      stable_max: None,
      prerelease_max: Some(1),
      group_by_first_prerelease_label: true,
    };
    let prune = packages_to_prune(&packages, &HashSet::new(), &policy);
    assert_eq!(prune, idents("a", &["1.0.0-beta.1", "1.0.0-rc.1"]));
  }

  #[test]
  fn test_counters_reset_per_id_case_insensitively() {
    let mut packages = idents("A", &["1.0.0", "2.0.0"]);
    packages.extend(idents("a", &["3.0.0"]));
    packages.extend(idents("b", &["1.0.0"]));
    let prune = packages_to_prune(&packages, &HashSet::new(), &stable(2));
    assert_eq!(prune, vec![ident("a", "1.0.0")]);
  }

  #[test]
  fn test_no_limits_prunes_nothing() {
    let packages = idents("a", &["1.0.0", "2.0.0"]);
    assert!(packages_to_prune(&packages, &HashSet::new(), &RetentionSettings::default()).is_empty());
  }
}
