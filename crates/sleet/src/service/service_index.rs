//! Root `index.json`: resource endpoints plus tool version markers.
//!
//! Written by `init` and rewritten when feed settings change which resources exist. Every
//! mutating command checks it first so an older tool never writes to a feed it doesn't
//! understand.

use serde::{Deserialize, Serialize};
use serde_json::json;
use url::Url;

use super::{
  ServiceError, autocomplete::AUTOCOMPLETE_QUERY, package_index::PACKAGE_INDEX, search::SEARCH_QUERY,
};
use crate::{
  catalog::CATALOG_INDEX,
  domain::{settings::FeedSettings, version::NuGetVersion},
  fs::{FileSystem, FsError},
};

pub const SERVICE_INDEX: &str = "index.json";

/// Version of this tool, stamped into feeds it writes.
pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Oldest tool version allowed to modify feeds written by this one.
pub const REQUIRED_VERSION: &str = "0.1.0";

/// Capabilities this build understands, as `name:version`.
pub const CAPABILITIES: &[(&str, &str)] = &[("schema", "1.0.0")];

pub const PACKAGE_BASE_ADDRESS: &str = "PackageBaseAddress/3.0.0";
pub const REGISTRATIONS_BASE_URL: &str = "RegistrationsBaseUrl/3.6.0";
pub const SEARCH_QUERY_SERVICE: &str = "SearchQueryService/3.0.0";
pub const SEARCH_AUTOCOMPLETE_SERVICE: &str = "SearchAutocompleteService/3.0.0";
pub const CATALOG_SERVICE: &str = "Catalog/3.0.0";
pub const PACKAGE_INDEX_SCHEMA: &str = "http://schema.sleet.org/schema/PackageIndex/1.0.0";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Incompatibility {
  #[error("Feed requires tool version {required} or newer, this is {current}")]
  RequiresNewer { required: String, current: String },
  #[error("Feed declares unsupported capability '{0}'")]
  UnknownCapability(String),
  #[error("Feed declares an unreadable required version '{0}'")]
  InvalidVersion(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceResource {
  #[serde(rename = "@id")]
  pub id: Url,
  #[serde(rename = "@type")]
  pub kind: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceIndex {
  pub version: String,
  #[serde(default)]
  pub resources: Vec<ServiceResource>,
  #[serde(rename = "@context", default)]
  pub context: serde_json::Value,
  #[serde(rename = "sleet:version", default)]
  pub sleet_version: String,
  #[serde(rename = "sleet:requiredVersion", default, skip_serializing_if = "Option::is_none")]
  pub required_version: Option<String>,
  #[serde(rename = "sleet:capabilities", default)]
  pub capabilities: Vec<String>,
}

fn resource(fs: &FileSystem, path: &str, kind: &str, comment: &str) -> Result<ServiceResource, FsError> {
  let id = fs
    .external_root()
    .join(path)
    .map_err(|_| FsError::InvalidUri(format!("{}{}", fs.external_root(), path)))?;
  Ok(ServiceResource {
    id,
    kind: kind.to_string(),
    comment: comment.to_string(),
  })
}

impl ServiceIndex {
  /// The index this build would write for a feed with these settings.
  pub fn build(fs: &FileSystem, settings: &FeedSettings) -> Result<Self, FsError> {
    let mut resources = vec![
      resource(fs, "flatcontainer/", PACKAGE_BASE_ADDRESS, "Base URL of where package archives are stored")?,
      resource(fs, "registration/", REGISTRATIONS_BASE_URL, "Base URL of package registrations")?,
      resource(fs, SEARCH_QUERY, SEARCH_QUERY_SERVICE, "Query endpoint of the search service")?,
      resource(fs, AUTOCOMPLETE_QUERY, SEARCH_AUTOCOMPLETE_SERVICE, "Autocomplete endpoint")?,
    ];
    if settings.catalog_enabled() {
      resources.push(resource(fs, CATALOG_INDEX, CATALOG_SERVICE, "Index of the feed catalog")?);
    }
    resources.push(resource(fs, PACKAGE_INDEX, PACKAGE_INDEX_SCHEMA, "Index of all packages")?);

    Ok(Self {
      version: "3.0.0".to_string(),
      resources,
      context: json!({
        "@vocab": "http://schema.nuget.org/services#",
        "comment": "http://www.w3.org/2000/01/rdf-schema#comment",
      }),
      sleet_version: TOOL_VERSION.to_string(),
      required_version: Some(REQUIRED_VERSION.to_string()),
      capabilities: CAPABILITIES.iter().map(|(name, v)| format!("{name}:{v}")).collect(),
    })
  }

  pub fn has_resource(&self, kind: &str) -> bool {
    self.resources.iter().any(|r| r.kind == kind)
  }

  /// Fails if the feed was written by a newer tool or declares a capability we don't know.
  pub fn check_compatible(&self) -> Result<(), Incompatibility> {
    if let Some(required) = &self.required_version {
      let required_version =
        NuGetVersion::parse(required).map_err(|_| Incompatibility::InvalidVersion(required.clone()))?;
      let current = NuGetVersion::parse(TOOL_VERSION).map_err(|_| Incompatibility::InvalidVersion(TOOL_VERSION.to_string()))?;
      if required_version > current {
        return Err(Incompatibility::RequiresNewer {
          required: required.clone(),
          current: TOOL_VERSION.to_string(),
        });
      }
    }

    for capability in &self.capabilities {
      if !is_supported(capability) {
        return Err(Incompatibility::UnknownCapability(capability.clone()));
      }
    }
    Ok(())
  }
}

fn is_supported(capability: &str) -> bool {
  let Some((name, version)) = capability.split_once(':') else {
    return false;
  };
  let Ok(version) = NuGetVersion::parse(version) else {
    return false;
  };
  CAPABILITIES.iter().any(|(known, supported)| {
    known.eq_ignore_ascii_case(name) && NuGetVersion::parse(supported).is_ok_and(|supported| version <= supported)
  })
}

pub async fn read_service_index(fs: &FileSystem) -> Result<Option<ServiceIndex>, ServiceError> {
  Ok(fs.get(SERVICE_INDEX)?.read_json().await?)
}

pub async fn write_service_index(fs: &FileSystem, settings: &FeedSettings) -> Result<ServiceIndex, ServiceError> {
  let index = ServiceIndex::build(fs, settings)?;
  fs.get(SERVICE_INDEX)?.write_json(&index).await?;
  Ok(index)
}
