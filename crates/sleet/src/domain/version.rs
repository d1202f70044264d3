//! NuGet-style package versions.
//!
//! Supports `major.minor.patch[.revision][-label(.label)*][+metadata]`. Ordering follows the
//! package-client rules: numeric parts first, stable above prerelease, then label by label.

use std::{cmp::Ordering, fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
  #[error("Empty version string")]
  Empty,
  #[error("Invalid version '{0}': expected 2 to 4 numeric parts")]
  InvalidParts(String),
  #[error("Invalid version '{0}': bad numeric part '{1}'")]
  InvalidNumber(String, String),
  #[error("Invalid version '{0}': bad release label")]
  InvalidLabel(String),
}

#[derive(Debug, Clone)]
pub struct NuGetVersion {
  major: u64,
  minor: u64,
  patch: u64,
  revision: u64,
  release_labels: Vec<String>,
  metadata: Option<String>,
}

impl NuGetVersion {
  pub fn new(major: u64, minor: u64, patch: u64) -> Self {
    Self {
      major,
      minor,
      patch,
      revision: 0,
      release_labels: Vec::new(),
      metadata: None,
    }
  }

  pub fn parse(input: &str) -> Result<Self, VersionError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
      return Err(VersionError::Empty);
    }

    let (rest, metadata) = match trimmed.split_once('+') {
      Some((rest, meta)) => {
        if meta.is_empty() || !meta.split('.').all(is_valid_label) {
          return Err(VersionError::InvalidLabel(input.to_string()));
        }
        (rest, Some(meta.to_string()))
      }
      None => (trimmed, None),
    };

    let (numbers, labels) = match rest.split_once('-') {
      Some((numbers, labels)) => {
        let labels: Vec<String> = labels.split('.').map(str::to_string).collect();
        if labels.iter().any(|l| !is_valid_label(l)) {
          return Err(VersionError::InvalidLabel(input.to_string()));
        }
        (numbers, labels)
      }
      None => (rest, Vec::new()),
    };

    let parts: Vec<&str> = numbers.split('.').collect();
    if parts.len() < 2 || parts.len() > 4 {
      return Err(VersionError::InvalidParts(input.to_string()));
    }

    let mut values = [0u64; 4];
    for (i, part) in parts.iter().enumerate() {
      if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(VersionError::InvalidNumber(input.to_string(), part.to_string()));
      }
      values[i] = part
        .parse()
        .map_err(|_| VersionError::InvalidNumber(input.to_string(), part.to_string()))?;
    }

    Ok(Self {
      major: values[0],
      minor: values[1],
      patch: values[2],
      revision: values[3],
      release_labels: labels,
      metadata,
    })
  }

  pub fn is_prerelease(&self) -> bool {
    !self.release_labels.is_empty()
  }

  pub fn release_labels(&self) -> &[String] {
    &self.release_labels
  }

  /// First release label, used to group prereleases for retention.
  pub fn first_release_label(&self) -> Option<&str> {
    self.release_labels.first().map(String::as_str)
  }

  pub fn metadata(&self) -> Option<&str> {
    self.metadata.as_deref()
  }

  /// Normalized form: zero revision and build metadata dropped, original label casing kept.
  pub fn to_normalized_string(&self) -> String {
    let mut s = format!("{}.{}.{}", self.major, self.minor, self.patch);
    if self.revision > 0 {
      s.push_str(&format!(".{}", self.revision));
    }
    if self.is_prerelease() {
      s.push('-');
      s.push_str(&self.release_labels.join("."));
    }
    s
  }

  /// Full form including build metadata.
  pub fn to_full_string(&self) -> String {
    match &self.metadata {
      Some(meta) => format!("{}+{}", self.to_normalized_string(), meta),
      None => self.to_normalized_string(),
    }
  }

  /// Lowercase normalized form used inside feed paths.
  pub fn to_path_string(&self) -> String {
    self.to_normalized_string().to_lowercase()
  }
}

fn is_valid_label(label: &str) -> bool {
  !label.is_empty() && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

fn compare_labels(a: &[String], b: &[String]) -> Ordering {
  for (x, y) in a.iter().zip(b.iter()) {
    let ord = compare_label(x, y);
    if ord != Ordering::Equal {
      return ord;
    }
  }
  a.len().cmp(&b.len())
}

fn compare_label(a: &str, b: &str) -> Ordering {
  match (a.parse::<u64>(), b.parse::<u64>()) {
    (Ok(x), Ok(y)) => x.cmp(&y),
    (Ok(_), Err(_)) => Ordering::Less,
    (Err(_), Ok(_)) => Ordering::Greater,
    (Err(_), Err(_)) => a.to_ascii_lowercase().cmp(&b.to_ascii_lowercase()),
  }
}

impl Ord for NuGetVersion {
  fn cmp(&self, other: &Self) -> Ordering {
    (self.major, self.minor, self.patch, self.revision)
      .cmp(&(other.major, other.minor, other.patch, other.revision))
      .then_with(|| match (self.is_prerelease(), other.is_prerelease()) {
        (false, false) => Ordering::Equal,
        (false, true) => Ordering::Greater,
        (true, false) => Ordering::Less,
        (true, true) => compare_labels(&self.release_labels, &other.release_labels),
      })
  }
}

impl PartialOrd for NuGetVersion {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl PartialEq for NuGetVersion {
  fn eq(&self, other: &Self) -> bool {
    self.cmp(other) == Ordering::Equal
  }
}

impl Eq for NuGetVersion {}

impl std::hash::Hash for NuGetVersion {
  fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
    (self.major, self.minor, self.patch, self.revision).hash(state);
    for label in &self.release_labels {
      match label.parse::<u64>() {
        Ok(n) => n.hash(state),
        Err(_) => label.to_ascii_lowercase().hash(state),
      }
    }
  }
}

impl fmt::Display for NuGetVersion {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.to_normalized_string())
  }
}

impl FromStr for NuGetVersion {
  type Err = VersionError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::parse(s)
  }
}

impl Serialize for NuGetVersion {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&self.to_full_string())
  }
}

impl<'de> Deserialize<'de> for NuGetVersion {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let s = String::deserialize(deserializer)?;
    Self::parse(&s).map_err(serde::de::Error::custom)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn v(s: &str) -> NuGetVersion {
    NuGetVersion::parse(s).unwrap()
  }

  #[test]
  fn test_parse_and_normalize() {
    assert_eq!(v("1.0").to_normalized_string(), "1.0.0");
    assert_eq!(v("1.2.3.0").to_normalized_string(), "1.2.3");
    assert_eq!(v("1.2.3.4").to_normalized_string(), "1.2.3.4");
    assert_eq!(v("1.0.0-Beta.2+sha.abc").to_normalized_string(), "1.0.0-Beta.2");
    assert_eq!(v("1.0.0-Beta.2+sha.abc").to_path_string(), "1.0.0-beta.2");
    assert_eq!(v("1.0.0+build").metadata(), Some("build"));
  }

  #[test]
  fn test_parse_rejects_garbage() {
    assert!(NuGetVersion::parse("").is_err());
    assert!(NuGetVersion::parse("1").is_err());
    assert!(NuGetVersion::parse("1.2.3.4.5").is_err());
    assert!(NuGetVersion::parse("1.x.0").is_err());
    assert!(NuGetVersion::parse("1.0.0-").is_err());
    assert!(NuGetVersion::parse("1.0.0-beta..1").is_err());
  }

  #[test]
  fn test_ordering() {
    let mut versions = vec![
      v("1.0.0"),
      v("1.0.0-beta.10"),
      v("1.0.0-alpha"),
      v("1.0.0-beta.2"),
      v("0.9.0"),
      v("1.0.0-beta"),
      v("1.0.0.1"),
      v("1.0.0-rc.1"),
    ];
    versions.sort();
    let ordered: Vec<String> = versions.iter().map(|v| v.to_normalized_string()).collect();
    assert_eq!(
      ordered,
      vec![
        "0.9.0",
        "1.0.0-alpha",
        "1.0.0-beta",
        "1.0.0-beta.2",
        "1.0.0-beta.10",
        "1.0.0-rc.1",
        "1.0.0",
        "1.0.0.1",
      ]
    );
  }

  #[test]
  fn test_equality_ignores_metadata_and_label_case() {
    assert_eq!(v("1.0.0+a"), v("1.0.0+b"));
    assert_eq!(v("1.0.0-BETA"), v("1.0.0-beta"));
    assert_eq!(v("1.0"), v("1.0.0.0"));
  }

  #[test]
  fn test_numeric_labels_sort_before_alpha() {
    assert!(v("1.0.0-1") < v("1.0.0-alpha"));
  }

  #[test]
  fn test_serde_round_trip_uses_full_string() {
    let json = serde_json::to_string(&v("2.0.0-rc+meta")).unwrap();
    assert_eq!(json, "\"2.0.0-rc+meta\"");
  }
}
