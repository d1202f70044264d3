//! Publishing commands (init, push, delete)

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use sleet::{
  commands::{
    delete::{DeleteRequest, delete},
    init::init,
    push::{ExistingPackages, PushOptions, push},
  },
  package::PackageDescriptor,
  settings::FeedSettings,
  version::NuGetVersion,
};
use tracing::info;

use super::{Global, parse_pairs};

/// Initialize the feed
pub async fn cmd_init(global: &Global, pairs: &[String]) -> Result<()> {
  let ctx = global.context()?;
  let settings = if pairs.is_empty() {
    None
  } else {
    let mut settings = FeedSettings::new();
    for (key, value) in parse_pairs(pairs)? {
      settings.set(&key, value);
    }
    Some(settings)
  };

  let report = init(&ctx, settings).await?;
  if report.created.is_empty() && !report.created_container {
    println!("Feed at {} is already initialized", ctx.fs.root());
  } else {
    println!("Initialized feed at {}", ctx.fs.root());
    for path in &report.created {
      println!("  created {path}");
    }
  }
  Ok(())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Manifest {
  Many(Vec<PackageDescriptor>),
  One(Box<PackageDescriptor>),
}

/// Read descriptors from a manifest file, resolving content paths against its directory.
fn load_manifest(path: &Path) -> Result<Vec<PackageDescriptor>> {
  let content = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
  let manifest: Manifest =
    serde_json::from_str(&content).with_context(|| format!("Invalid package manifest {}", path.display()))?;
  let base = path.parent().unwrap_or_else(|| Path::new("."));
  let descriptors = match manifest {
    Manifest::Many(list) => list,
    Manifest::One(one) => vec![*one],
  };
  Ok(descriptors.into_iter().map(|d| d.resolve_content(base)).collect())
}

/// Push packages from manifests
pub async fn cmd_push(global: &Global, manifests: &[PathBuf], skip_existing: bool, force: bool) -> Result<()> {
  let mut packages = Vec::new();
  for manifest in manifests {
    packages.extend(load_manifest(manifest)?);
  }
  info!(count = packages.len(), "Loaded package manifests");

  let options = PushOptions {
    existing: if force {
      ExistingPackages::Replace
    } else if skip_existing {
      ExistingPackages::Skip
    } else {
      ExistingPackages::Fail
    },
    ..Default::default()
  };

  let ctx = global.context()?;
  let report = push(&ctx, packages, &options).await?;

  for identity in &report.pushed {
    let verb = if report.replaced.contains(identity) { "Replaced" } else { "Pushed" };
    println!("{verb} {identity}");
  }
  for identity in &report.skipped {
    println!("Skipped {identity} (already exists)");
  }
  for identity in &report.pruned {
    println!("Pruned {identity}");
  }
  if report.pushed.is_empty() {
    println!("Nothing to push");
  }
  Ok(())
}

/// Delete packages
pub async fn cmd_delete(
  global: &Global,
  id: &str,
  version: Option<&str>,
  reason: Option<String>,
  force: bool,
) -> Result<()> {
  let version = version
    .map(NuGetVersion::parse)
    .transpose()
    .with_context(|| format!("Invalid version for {id}"))?;

  let mut request = DeleteRequest::new(id, version);
  if let Some(reason) = reason {
    request = request.with_reason(reason);
  }
  if force {
    request = request.forced();
  }

  let ctx = global.context()?;
  let report = delete(&ctx, &request).await?;
  if report.removed.is_empty() {
    println!("Nothing matched {id}");
  }
  for identity in &report.removed {
    println!("Deleted {identity}");
  }
  Ok(())
}
