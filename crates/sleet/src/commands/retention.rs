//! Retention limits stored in feed settings, and pruning on demand.

use std::collections::HashSet;

use tracing::info;

use super::{
  CommandContext, CommandError, ensure_initialized, feed_settings::update_settings, push::PRUNE_REASON,
  read_settings,
};
use crate::{
  domain::{
    package::{ChangeSet, PackageIdentity},
    settings::{FeedSettings, RetentionSettings},
  },
  pipeline::PipelineReport,
  retention::packages_to_prune,
  service::package_index,
};

#[derive(Debug, Clone, Default)]
pub struct PruneReport {
  pub pruned: Vec<PackageIdentity>,
  pub pipeline: PipelineReport,
}

pub async fn set(ctx: &CommandContext, policy: RetentionSettings) -> Result<FeedSettings, CommandError> {
  if policy.stable_max.is_none() && policy.prerelease_max.is_none() {
    return Err(CommandError::invalid_argument("give a stable or prerelease limit"));
  }
  if policy.stable_max == Some(0) || policy.prerelease_max == Some(0) {
    return Err(CommandError::invalid_argument("retention limits must be at least 1"));
  }
  update_settings(ctx, "retention set", |settings| {
    settings.set_retention(&policy);
    Ok(())
  })
  .await
}

pub async fn clear(ctx: &CommandContext) -> Result<FeedSettings, CommandError> {
  update_settings(ctx, "retention clear", |settings| {
    settings.clear_retention();
    Ok(())
  })
  .await
}

/// Apply the stored limits now. Does nothing when no limits are configured.
pub async fn prune(ctx: &CommandContext, pinned: &HashSet<PackageIdentity>) -> Result<PruneReport, CommandError> {
  let fs = &ctx.fs;
  ctx
    .locked("retention prune", || async move {
      ensure_initialized(fs).await?;
      let settings = read_settings(fs).await?;
      let Some(policy) = settings.retention() else {
        info!("No retention limits configured");
        return Ok(PruneReport::default());
      };

      let existing = package_index::read_package_set(fs).await?;
      let pruned = packages_to_prune(&existing.identities(), pinned, &policy);
      let mut changes = ChangeSet::new();
      for identity in &pruned {
        changes.remove(identity.clone(), PRUNE_REASON);
      }
      let pipeline = ctx.run_changes(settings, changes).await?;
      info!(pruned = pruned.len(), "Retention applied");
      Ok(PruneReport { pruned, pipeline })
    })
    .await
}
