//! Feed counters. Read-only, no lock.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{CommandContext, CommandError, ensure_initialized};
use crate::{catalog, service::package_index};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedStats {
  pub packages: usize,
  pub ids: usize,
  /// None when the feed has no catalog.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub catalog_pages: Option<usize>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub catalog_entries: Option<usize>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub last_commit: Option<DateTime<Utc>>,
}

pub async fn stats(ctx: &CommandContext) -> Result<FeedStats, CommandError> {
  let fs = &ctx.fs;
  ensure_initialized(fs).await?;
  let packages = package_index::read_package_set(fs).await?;
  let root = catalog::read_root(fs).await?;

  Ok(FeedStats {
    packages: packages.len(),
    ids: packages.id_count(),
    catalog_pages: root.as_ref().map(|r| r.count),
    catalog_entries: root.as_ref().map(|r| r.item_count),
    last_commit: root.as_ref().filter(|r| r.item_count > 0).map(|r| r.commit_time_stamp),
  })
}
