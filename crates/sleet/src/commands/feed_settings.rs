//! Read and change `sleet.settings.json`.
//!
//! Changing settings also rewrites `index.json`, since some settings decide which resources the
//! feed advertises.

use tracing::info;

use super::{CommandContext, CommandError, ensure_initialized, read_settings, write_settings};
use crate::{
  catalog::{CATALOG_INDEX, CatalogRoot},
  domain::settings::FeedSettings,
  service::{CommitInfo, service_index},
};

/// Current settings. Doesn't take the lock.
pub async fn list(ctx: &CommandContext) -> Result<FeedSettings, CommandError> {
  ensure_initialized(&ctx.fs).await?;
  read_settings(&ctx.fs).await
}

pub async fn get(ctx: &CommandContext, key: &str) -> Result<Option<String>, CommandError> {
  Ok(list(ctx).await?.get(key).map(str::to_string))
}

/// Apply `change` to the stored settings under the lock and commit the result.
pub(crate) async fn update_settings<F>(ctx: &CommandContext, action: &str, change: F) -> Result<FeedSettings, CommandError>
where
  F: FnOnce(&mut FeedSettings) -> Result<(), CommandError>,
{
  let fs = &ctx.fs;
  ctx
    .locked(action, || async move {
      ensure_initialized(fs).await?;
      let mut settings = read_settings(fs).await?;
      change(&mut settings)?;
      write_settings(fs, &settings).await?;
      service_index::write_service_index(fs, &settings).await?;

      if settings.catalog_enabled() {
        let root = fs.get(CATALOG_INDEX)?;
        if !root.exists().await? {
          let commit = CommitInfo::new();
          root
            .write_json(&CatalogRoot::empty(root.uri().clone(), commit.id, commit.timestamp))
            .await?;
        }
      }

      fs.commit().await?;
      info!(action, "Feed settings updated");
      Ok(settings)
    })
    .await
}

pub async fn set(ctx: &CommandContext, pairs: &[(String, String)]) -> Result<FeedSettings, CommandError> {
  if pairs.is_empty() {
    return Err(CommandError::invalid_argument("no settings given"));
  }
  if let Some((key, _)) = pairs.iter().find(|(key, _)| key.trim().is_empty()) {
    return Err(CommandError::invalid_argument(format!("invalid setting key '{key}'")));
  }
  update_settings(ctx, "settings set", |settings| {
    for (key, value) in pairs {
      settings.set(key.trim(), value.clone());
    }
    Ok(())
  })
  .await
}

/// Remove keys. Unknown keys are ignored.
pub async fn unset(ctx: &CommandContext, keys: &[String]) -> Result<FeedSettings, CommandError> {
  update_settings(ctx, "settings unset", |settings| {
    for key in keys {
      settings.unset(key);
    }
    Ok(())
  })
  .await
}

pub async fn clear(ctx: &CommandContext) -> Result<FeedSettings, CommandError> {
  update_settings(ctx, "settings clear", |settings| {
    settings.clear();
    Ok(())
  })
  .await
}
