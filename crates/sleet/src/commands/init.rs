//! Create a feed: container plus every root document that is missing.

use serde::Serialize;
use tracing::{info, warn};

use super::{CommandContext, CommandError, SETTINGS_FILE, read_settings, write_settings};
use crate::{
  catalog::{CATALOG_INDEX, CatalogRoot},
  domain::{package_set::PackageSet, settings::FeedSettings},
  fs::FileSystem,
  service::{
    CommitInfo,
    autocomplete::{AUTOCOMPLETE_QUERY, AutoCompleteDocument},
    package_index::{self, PACKAGE_INDEX},
    search::{SEARCH_QUERY, SearchDocument},
    service_index::{self, SERVICE_INDEX},
  },
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitReport {
  pub created_container: bool,
  /// Root documents written by this run.
  pub created: Vec<String>,
}

async fn write_if_missing<T: Serialize>(
  fs: &FileSystem,
  path: &str,
  value: &T,
  created: &mut Vec<String>,
) -> Result<(), CommandError> {
  let file = fs.get(path)?;
  if !file.exists().await? {
    file.write_json(value).await?;
    created.push(path.to_string());
  }
  Ok(())
}

/// Initialize the feed. Running it again on an initialized feed changes nothing.
///
/// `settings` are only used when the feed has no settings document yet.
pub async fn init(ctx: &CommandContext, settings: Option<FeedSettings>) -> Result<InitReport, CommandError> {
  let fs = &ctx.fs;
  let created_container = fs.create_bucket().await?;

  let created = ctx
    .locked("init", || async move {
      let mut created = Vec::new();
      if let Some(existing) = service_index::read_service_index(fs).await? {
        existing.check_compatible()?;
      }

      let settings_file = fs.get(SETTINGS_FILE)?;
      let settings = if settings_file.exists().await? {
        if settings.is_some() {
          warn!("Feed already has settings, keeping them");
        }
        read_settings(fs).await?
      } else {
        let settings = settings.unwrap_or_default();
        write_settings(fs, &settings).await?;
        created.push(SETTINGS_FILE.to_string());
        settings
      };

      if !fs.get(SERVICE_INDEX)?.exists().await? {
        service_index::write_service_index(fs, &settings).await?;
        created.push(SERVICE_INDEX.to_string());
      }

      if settings.catalog_enabled() {
        let commit = CommitInfo::new();
        let root = CatalogRoot::empty(fs.uri_for(CATALOG_INDEX)?, commit.id, commit.timestamp);
        write_if_missing(fs, CATALOG_INDEX, &root, &mut created).await?;
      }

      if !fs.get(PACKAGE_INDEX)?.exists().await? {
        package_index::write_package_set(fs, &PackageSet::new()).await?;
        created.push(PACKAGE_INDEX.to_string());
      }
      write_if_missing(fs, SEARCH_QUERY, &SearchDocument::default(), &mut created).await?;
      write_if_missing(fs, AUTOCOMPLETE_QUERY, &AutoCompleteDocument::default(), &mut created).await?;

      fs.commit().await?;
      Ok(created)
    })
    .await?;

  let report = InitReport {
    created_container,
    created,
  };
  if report.created.is_empty() {
    info!(root = %fs.root(), "Feed already initialized");
  } else {
    info!(root = %fs.root(), created = report.created.len(), "Initialized feed");
  }
  Ok(report)
}
