//! Add packages to a feed.
//!
//! Packages are validated before the lock is taken. Under the lock, packages already in the feed
//! are rejected, skipped or replaced, retention limits are applied, and everything lands in one
//! pipeline commit.

use std::{collections::HashSet, path::Path};

use sha2::{Digest, Sha512};
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use super::{CommandContext, CommandError, ensure_initialized, read_settings};
use crate::{
  domain::package::{ChangeSet, PackageDescriptor, PackageIdentity, PackageInput},
  pipeline::PipelineReport,
  retention,
  service::package_index,
};

pub const MAX_ID_LENGTH: usize = 100;
pub const REPLACE_REASON: &str = "Replaced by push";
pub const PRUNE_REASON: &str = "Pruned by retention";

/// What to do with a package whose identity is already in the feed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExistingPackages {
  #[default]
  Fail,
  Skip,
  Replace,
}

#[derive(Debug, Clone, Default)]
pub struct PushOptions {
  pub existing: ExistingPackages,
  /// Identities retention must keep, on top of the packages being pushed.
  pub pinned: HashSet<PackageIdentity>,
}

#[derive(Debug, Clone, Default)]
pub struct PushReport {
  pub pushed: Vec<PackageIdentity>,
  pub skipped: Vec<PackageIdentity>,
  pub replaced: Vec<PackageIdentity>,
  pub pruned: Vec<PackageIdentity>,
  pub pipeline: PipelineReport,
}

// ============================================================================
// Validation
// ============================================================================

fn is_separator(c: char) -> bool {
  matches!(c, '.' | '-' | '_')
}

/// Ids are word characters joined by single `.`, `-` or `_` separators.
pub fn validate_id(id: &str) -> Result<(), String> {
  if id.is_empty() {
    return Err("id is empty".to_string());
  }
  if id.len() > MAX_ID_LENGTH {
    return Err(format!("id is longer than {MAX_ID_LENGTH} characters"));
  }
  if let Some(c) = id.chars().find(|c| !c.is_ascii_alphanumeric() && !is_separator(*c)) {
    return Err(format!("id contains '{c}'"));
  }
  let starts_or_ends = |c: char| c == '.' || c == '-';
  if id.starts_with(starts_or_ends) || id.ends_with(starts_or_ends) {
    return Err("id must start and end with a letter, digit or underscore".to_string());
  }
  if id.contains("..") || id.contains("--") || id.contains(".-") || id.contains("-.") {
    return Err("id contains consecutive separators".to_string());
  }
  Ok(())
}

const RESERVED_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*'];

/// Archive entries must stay inside the archive root.
pub fn validate_entry(entry: &str) -> Result<(), String> {
  let normalized = entry.replace('\\', "/");
  if normalized.is_empty() {
    return Err("empty archive entry".to_string());
  }
  if normalized.starts_with('/') || normalized.as_bytes().get(1) == Some(&b':') {
    return Err(format!("archive entry '{entry}' is absolute"));
  }
  if normalized.split('/').any(|segment| segment == "..") {
    return Err(format!("archive entry '{entry}' escapes the archive root"));
  }
  if normalized.chars().any(|c| c.is_control() || RESERVED_CHARS.contains(&c)) {
    return Err(format!("archive entry '{entry}' contains a reserved character"));
  }
  Ok(())
}

fn is_sha512_hex(hash: &str) -> bool {
  hash.len() == 128 && hash.chars().all(|c| c.is_ascii_hexdigit())
}

/// Hex SHA-512 of a file, streamed.
pub async fn hash_file(path: &Path) -> std::io::Result<String> {
  let mut file = tokio::fs::File::open(path).await?;
  let mut hasher = Sha512::new();
  let mut buf = vec![0u8; 64 * 1024];
  loop {
    let read = file.read(&mut buf).await?;
    if read == 0 {
      break;
    }
    hasher.update(&buf[..read]);
  }
  Ok(hex::encode(hasher.finalize()))
}

/// Check a descriptor and fill in its archive hash.
pub async fn prepare(mut descriptor: PackageDescriptor) -> Result<PackageDescriptor, CommandError> {
  let name = descriptor.identity().to_string();
  let invalid = |reason: String| CommandError::invalid_package(name.clone(), reason);

  validate_id(&descriptor.id).map_err(invalid)?;
  let mut entries = HashSet::new();
  for entry in &descriptor.files {
    validate_entry(entry).map_err(invalid)?;
    if !entries.insert(entry.replace('\\', "/").to_lowercase()) {
      return Err(invalid(format!("archive entry '{entry}' appears twice")));
    }
  }

  if let Some(hash) = &descriptor.package_hash
    && !is_sha512_hex(hash)
  {
    return Err(invalid("package hash is not a hex SHA-512".to_string()));
  }

  if let Some(content) = &descriptor.content {
    let computed = hash_file(content)
      .await
      .map_err(|e| invalid(format!("cannot read {}: {e}", content.display())))?;
    if descriptor
      .package_hash
      .as_deref()
      .is_some_and(|declared| !declared.eq_ignore_ascii_case(&computed))
    {
      return Err(invalid("package hash does not match the archive".to_string()));
    }
    descriptor.package_hash = Some(computed);
  }
  Ok(descriptor)
}

// ============================================================================
// Push
// ============================================================================

pub async fn push(
  ctx: &CommandContext,
  packages: Vec<PackageDescriptor>,
  options: &PushOptions,
) -> Result<PushReport, CommandError> {
  let mut seen = HashSet::new();
  let mut prepared = Vec::with_capacity(packages.len());
  for descriptor in packages {
    let identity = descriptor.identity();
    if !seen.insert(identity.clone()) {
      return Err(CommandError::invalid_package(
        identity.to_string(),
        "listed more than once in this push",
      ));
    }
    prepared.push(prepare(descriptor).await?);
  }

  let fs = &ctx.fs;
  let report = ctx
    .locked("push", || async move {
      ensure_initialized(fs).await?;
      let settings = read_settings(fs).await?;
      let existing = package_index::read_package_set(fs).await?;

      let mut report = PushReport::default();
      let mut changes = ChangeSet::new();
      for descriptor in prepared {
        let identity = descriptor.identity();
        if existing.contains(&identity) {
          match options.existing {
            ExistingPackages::Fail => return Err(CommandError::PackageExists(identity.to_string())),
            ExistingPackages::Skip => {
              info!(package = %identity, "Package already exists, skipping");
              report.skipped.push(identity);
              continue;
            }
            ExistingPackages::Replace => {
              debug!(package = %identity, "Replacing existing package");
              changes.remove(identity.clone(), REPLACE_REASON);
              report.replaced.push(identity.clone());
            }
          }
        }
        report.pushed.push(identity);
        changes.add(PackageInput::new(descriptor));
      }

      if let Some(policy) = settings.retention() {
        let mut after = existing;
        for identity in &report.pushed {
          after.insert(identity);
        }
        let mut pinned = options.pinned.clone();
        pinned.extend(report.pushed.iter().cloned());
        for identity in retention::packages_to_prune(&after.identities(), &pinned, &policy) {
          changes.remove(identity.clone(), PRUNE_REASON);
          report.pruned.push(identity);
        }
      }

      report.pipeline = ctx.run_changes(settings, changes).await?;
      Ok(report)
    })
    .await?;

  info!(
    pushed = report.pushed.len(),
    skipped = report.skipped.len(),
    replaced = report.replaced.len(),
    pruned = report.pruned.len(),
    "Push complete"
  );
  Ok(report)
}
