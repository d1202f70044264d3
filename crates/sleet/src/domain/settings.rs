//! Feed settings stored inside the feed (`sleet.settings.json`).
//!
//! A free-form string map. Keys are case-insensitive and stored lowercase; the typed accessors
//! below fall back to defaults when a key is missing or unparseable.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const CATALOG_ENABLED: &str = "catalogenabled";
pub const CATALOG_PAGE_SIZE: &str = "catalogpagesize";
pub const REGISTRATION_PAGE_SIZE: &str = "registrationpagesize";
pub const BADGES_ENABLED: &str = "badgesenabled";
pub const RETENTION_MAX_STABLE: &str = "retentionmaxstableversions";
pub const RETENTION_MAX_PRERELEASE: &str = "retentionmaxprereleaseversions";
pub const RETENTION_GROUP_BY_LABEL: &str = "retentiongroupbyfirstprereleaselabel";

pub const DEFAULT_CATALOG_PAGE_SIZE: usize = 1024;
pub const DEFAULT_REGISTRATION_PAGE_SIZE: usize = 128;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedSettings {
  #[serde(default)]
  feed_settings: BTreeMap<String, String>,
}

impl FeedSettings {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, key: &str) -> Option<&str> {
    self.feed_settings.get(&key.to_lowercase()).map(String::as_str)
  }

  pub fn set(&mut self, key: &str, value: impl Into<String>) {
    self.feed_settings.insert(key.to_lowercase(), value.into());
  }

  /// Returns true if the key was present.
  pub fn unset(&mut self, key: &str) -> bool {
    self.feed_settings.remove(&key.to_lowercase()).is_some()
  }

  pub fn clear(&mut self) {
    self.feed_settings.clear();
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self.feed_settings.iter().map(|(k, v)| (k.as_str(), v.as_str()))
  }

  fn get_bool(&self, key: &str, default: bool) -> bool {
    match self.get(key).map(|v| v.trim().to_ascii_lowercase()) {
      Some(v) if v == "true" => true,
      Some(v) if v == "false" => false,
      _ => default,
    }
  }

  fn get_usize(&self, key: &str) -> Option<usize> {
    self.get(key).and_then(|v| v.trim().parse().ok())
  }

  pub fn catalog_enabled(&self) -> bool {
    self.get_bool(CATALOG_ENABLED, true)
  }

  pub fn catalog_page_size(&self) -> usize {
    self
      .get_usize(CATALOG_PAGE_SIZE)
      .filter(|n| *n > 0)
      .unwrap_or(DEFAULT_CATALOG_PAGE_SIZE)
  }

  pub fn registration_page_size(&self) -> usize {
    self
      .get_usize(REGISTRATION_PAGE_SIZE)
      .filter(|n| *n > 0)
      .unwrap_or(DEFAULT_REGISTRATION_PAGE_SIZE)
  }

  pub fn badges_enabled(&self) -> bool {
    self.get_bool(BADGES_ENABLED, false)
  }

  pub fn retention(&self) -> Option<RetentionSettings> {
    let stable = self.get_usize(RETENTION_MAX_STABLE);
    let prerelease = self.get_usize(RETENTION_MAX_PRERELEASE);
    if stable.is_none() && prerelease.is_none() {
      return None;
    }
    Some(RetentionSettings {
      stable_max: stable,
      prerelease_max: prerelease,
      group_by_first_prerelease_label: self.get_bool(RETENTION_GROUP_BY_LABEL, false),
    })
  }

  pub fn set_retention(&mut self, retention: &RetentionSettings) {
    match retention.stable_max {
      Some(n) => self.set(RETENTION_MAX_STABLE, n.to_string()),
      None => {
        self.unset(RETENTION_MAX_STABLE);
      }
    }
    match retention.prerelease_max {
      Some(n) => self.set(RETENTION_MAX_PRERELEASE, n.to_string()),
      None => {
        self.unset(RETENTION_MAX_PRERELEASE);
      }
    }
    self.set(
      RETENTION_GROUP_BY_LABEL,
      retention.group_by_first_prerelease_label.to_string(),
    );
  }

  pub fn clear_retention(&mut self) {
    self.unset(RETENTION_MAX_STABLE);
    self.unset(RETENTION_MAX_PRERELEASE);
    self.unset(RETENTION_GROUP_BY_LABEL);
  }
}

/// Per-feed version-count policy. `None` means unlimited for that stability bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionSettings {
  pub stable_max: Option<usize>,
  pub prerelease_max: Option<usize>,
  pub group_by_first_prerelease_label: bool,
}
