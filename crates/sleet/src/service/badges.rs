//! Version badges under `badges/v/` (stable) and `badges/vpre/` (prerelease included).
//!
//! Only ids whose latest matching version changed in this run are rewritten. An id with no
//! matching version left loses its badges.

use std::{collections::BTreeSet, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use super::{FeedService, ServiceContext, ServiceError, ServiceKind, package_index};
use crate::domain::{
  package::{PackageIdentity, PackageInput},
  version::NuGetVersion,
};

const LABEL: &str = "nuget";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadgeKind {
  Stable,
  Prerelease,
}

impl BadgeKind {
  pub const ALL: [BadgeKind; 2] = [BadgeKind::Stable, BadgeKind::Prerelease];

  fn dir(&self) -> &'static str {
    match self {
      BadgeKind::Stable => "v",
      BadgeKind::Prerelease => "vpre",
    }
  }

  fn include_prerelease(&self) -> bool {
    matches!(self, BadgeKind::Prerelease)
  }
}

pub fn svg_path(kind: BadgeKind, id: &str) -> String {
  format!("badges/{}/{}.svg", kind.dir(), id.to_lowercase())
}

pub fn json_path(kind: BadgeKind, id: &str) -> String {
  format!("badges/{}/{}.json", kind.dir(), id.to_lowercase())
}

/// Shields.io endpoint document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShieldsBadge {
  pub schema_version: u32,
  pub label: String,
  pub message: String,
  pub color: String,
}

fn color(version: &NuGetVersion) -> &'static str {
  if version.is_prerelease() { "yellow" } else { "blue" }
}

impl ShieldsBadge {
  pub fn for_version(version: &NuGetVersion) -> Self {
    Self {
      schema_version: 1,
      label: LABEL.to_string(),
      message: version.to_normalized_string(),
      color: color(version).to_string(),
    }
  }
}

fn text_width(text: &str) -> usize {
  text.chars().count() * 7 + 10
}

fn escape(text: &str) -> String {
  text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Flat two-part badge: label on the left, version on the right.
pub fn render_svg(version: &NuGetVersion) -> String {
  let message = escape(&version.to_normalized_string());
  let fill = match color(version) {
    "yellow" => "#dfb317",
    _ => "#007ec6",
  };
  let left = text_width(LABEL);
  let right = text_width(&message);
  let total = left + right;
  format!(
    r##"<svg xmlns="http://www.w3.org/2000/svg" width="{total}" height="20" role="img" aria-label="{LABEL}: {message}">
  <title>{LABEL}: {message}</title>
  <rect width="{left}" height="20" fill="#555"/>
  <rect x="{left}" width="{right}" height="20" fill="{fill}"/>
  <g fill="#fff" text-anchor="middle" font-family="Verdana,Geneva,DejaVu Sans,sans-serif" font-size="11">
    <text x="{lx}" y="14">{LABEL}</text>
    <text x="{rx}" y="14">{message}</text>
  </g>
</svg>
"##,
    lx = left / 2,
    rx = left + right / 2,
  )
}

pub struct BadgesService {
  ctx: Arc<ServiceContext>,
  touched: Mutex<BTreeSet<String>>,
}

impl BadgesService {
  pub fn new(ctx: Arc<ServiceContext>) -> Self {
    Self {
      ctx,
      touched: Mutex::new(BTreeSet::new()),
    }
  }
}

#[async_trait]
impl FeedService for BadgesService {
  fn kind(&self) -> ServiceKind {
    ServiceKind::Badges
  }

  fn dependencies(&self) -> Vec<ServiceKind> {
    vec![ServiceKind::PackageIndex]
  }

  async fn add_package(&self, input: &PackageInput) -> Result<(), ServiceError> {
    self.touched.lock().await.insert(input.identity.lower_id());
    Ok(())
  }

  async fn remove_package(&self, identity: &PackageIdentity) -> Result<bool, ServiceError> {
    self.touched.lock().await.insert(identity.lower_id());
    Ok(self.ctx.before.contains(identity))
  }

  async fn save(&self) -> Result<(), ServiceError> {
    let after = package_index::read_package_set(&self.ctx.fs).await?;
    let fs = &self.ctx.fs;
    let touched = std::mem::take(&mut *self.touched.lock().await);

    for id in touched {
      for kind in BadgeKind::ALL {
        let old = self.ctx.before.latest(&id, kind.include_prerelease());
        let new = after.latest(&id, kind.include_prerelease());
        if old == new {
          continue;
        }
        let svg = fs.get(&svg_path(kind, &id))?;
        let json = fs.get(&json_path(kind, &id))?;
        match new {
          Some(version) => {
            debug!(id = %id, badge = kind.dir(), version = %version, "Updating badge");
            svg.write(render_svg(version).into_bytes()).await;
            json.write_json(&ShieldsBadge::for_version(version)).await?;
          }
          None => {
            debug!(id = %id, badge = kind.dir(), "Removing badge");
            svg.delete().await;
            json.delete().await;
          }
        }
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    domain::{
      package::{ChangeSet, PackageDescriptor},
      package_set::PackageSet,
      settings::FeedSettings,
    },
    fs::{BlobBackend, FileSystem, MemoryBackend},
  };

  fn ident(id: &str, version: &str) -> PackageIdentity {
    PackageIdentity::new(id, NuGetVersion::parse(version).unwrap())
  }

  #[test]
  fn test_svg_contains_version() {
    let svg = render_svg(&NuGetVersion::parse("1.2.3-beta").unwrap());
    assert!(svg.contains(">1.2.3-beta</text>"));
    assert!(svg.contains("#dfb317"));
  }

  #[tokio::test]
  async fn test_only_changed_latest_is_rewritten() {
    let backend = Arc::new(MemoryBackend::new());
    let fs = Arc::new(FileSystem::in_memory(backend.clone()).unwrap());
    let before: PackageSet = [ident("a", "1.0.0")].into_iter().collect();
    let after: PackageSet = [ident("a", "1.0.0"), ident("a", "2.0.0-beta")].into_iter().collect();
    package_index::write_package_set(&fs, &after).await.unwrap();

    let ctx = Arc::new(ServiceContext::new(fs.clone(), FeedSettings::new(), before));
    let service = BadgesService::new(ctx);
    let mut changes = ChangeSet::new();
    changes.add(PackageInput::new(PackageDescriptor::new("A", NuGetVersion::parse("2.0.0-beta").unwrap())));
    service.apply(&changes).await.unwrap();
    fs.commit().await.unwrap();

    assert!(backend.get("badges/v/a.svg").is_none());
    let pre = backend.get_json("badges/vpre/a.json").unwrap();
    assert_eq!(pre["message"], "2.0.0-beta");
    assert_eq!(pre["schemaVersion"], 1);
  }

  #[tokio::test]
  async fn test_badges_removed_with_last_version() {
    let backend = Arc::new(MemoryBackend::new());
    backend.write("badges/v/a.svg", b"<svg/>").await.unwrap();
    backend.write("badges/v/a.json", b"{}").await.unwrap();
    let fs = Arc::new(FileSystem::in_memory(backend.clone()).unwrap());
    let before: PackageSet = [ident("a", "1.0.0")].into_iter().collect();
    package_index::write_package_set(&fs, &PackageSet::new()).await.unwrap();

    let ctx = Arc::new(ServiceContext::new(fs.clone(), FeedSettings::new(), before));
    let service = BadgesService::new(ctx);
    let mut changes = ChangeSet::new();
    changes.remove(ident("a", "1.0.0"), "gone");
    assert_eq!(service.apply(&changes).await.unwrap().removed, 1);
    fs.commit().await.unwrap();
    assert!(backend.get("badges/v/a.svg").is_none());
    assert!(backend.get("badges/v/a.json").is_none());
  }
}
