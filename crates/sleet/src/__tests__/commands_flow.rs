//! Command-level behaviour: preconditions, locking, settings and maintenance commands.

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use pretty_assertions::assert_eq;
  use tokio_util::sync::CancellationToken;

  use crate::{
    __tests__::helpers::{TestFeed, package, versions},
    catalog::CATALOG_INDEX,
    commands::{
      CommandError, destroy::destroy, feed_settings,
      push::{PushOptions, push},
      stats::stats,
      validate::validate,
    },
    domain::settings::{BADGES_ENABLED, CATALOG_ENABLED},
    fs::BlobBackend,
    lock::{FeedLock, LockOptions},
    service::{
      registration,
      service_index::{CATALOG_SERVICE, SERVICE_INDEX},
    },
  };

  #[tokio::test]
  async fn test_uninitialized_feed_rejected_without_writes() {
    let feed = TestFeed::uninitialized();
    let err = push(&feed.ctx(), vec![package("a", "1.0.0")], &PushOptions::default())
      .await
      .unwrap_err();
    assert!(matches!(err, CommandError::Uninitialized(_)));
    assert!(feed.backend.keys().is_empty());
  }

  #[tokio::test]
  async fn test_newer_feed_is_incompatible() {
    let feed = TestFeed::new().await;
    let mut index = feed.json(SERVICE_INDEX);
    index["sleet:requiredVersion"] = "999.0.0".into();
    feed
      .backend
      .write(SERVICE_INDEX, &serde_json::to_vec(&index).unwrap())
      .await
      .unwrap();

    let err = push(&feed.ctx(), vec![package("a", "1.0.0")], &PushOptions::default())
      .await
      .unwrap_err();
    assert!(matches!(err, CommandError::Incompatible(_)));
    assert!(feed.package_set().await.is_empty());
  }

  #[tokio::test]
  async fn test_lock_held_elsewhere_times_out() {
    let feed = TestFeed::new().await;
    let holder = FeedLock::new(&feed.fs(), LockOptions::default())
      .acquire_guard(&CancellationToken::new())
      .await
      .unwrap()
      .unwrap();

    let ctx = feed
      .ctx()
      .with_lock_options(LockOptions::default().with_timeout(Some(Duration::ZERO)));
    let err = push(&ctx, vec![package("a", "1.0.0")], &PushOptions::default())
      .await
      .unwrap_err();
    assert!(matches!(err, CommandError::LockTimeout));
    assert_eq!(err.exit_code(), 2);

    holder.release().await.unwrap();
    push(&ctx, vec![package("a", "1.0.0")], &PushOptions::default())
      .await
      .unwrap();
  }

  #[tokio::test]
  async fn test_cancel_while_waiting_for_lock() {
    let feed = TestFeed::new().await;
    let holder = FeedLock::new(&feed.fs(), LockOptions::default())
      .acquire_guard(&CancellationToken::new())
      .await
      .unwrap()
      .unwrap();

    let cancel = CancellationToken::new();
    let ctx = feed.ctx().with_cancel(cancel.clone());
    cancel.cancel();
    let err = push(&ctx, vec![package("a", "1.0.0")], &PushOptions::default())
      .await
      .unwrap_err();
    assert!(matches!(err, CommandError::Cancelled));
    holder.release().await.unwrap();
  }

  #[tokio::test]
  async fn test_settings_rewrite_service_index() {
    let feed = TestFeed::new().await;
    let has_catalog = |feed: &TestFeed| {
      feed.json(SERVICE_INDEX)["resources"]
        .as_array()
        .unwrap()
        .iter()
        .any(|r| r["@type"] == CATALOG_SERVICE)
    };
    assert!(has_catalog(&feed));

    let settings = feed_settings::set(&feed.ctx(), &[(CATALOG_ENABLED.to_string(), "false".to_string())])
      .await
      .unwrap();
    assert!(!settings.catalog_enabled());
    assert!(!has_catalog(&feed));
    assert_eq!(
      feed_settings::get(&feed.ctx(), CATALOG_ENABLED).await.unwrap(),
      Some("false".to_string())
    );

    feed_settings::unset(&feed.ctx(), &[CATALOG_ENABLED.to_string()]).await.unwrap();
    assert!(has_catalog(&feed));
    assert!(feed_settings::list(&feed.ctx()).await.unwrap().iter().next().is_none());
  }

  #[tokio::test]
  async fn test_virtual_catalog_points_at_registration() {
    let feed = TestFeed::with_settings(&[(CATALOG_ENABLED, "false")]).await;
    feed.push(vec![package("a", "1.0.0")]).await;

    assert!(feed.backend.get(CATALOG_INDEX).is_none());
    assert!(feed.backend.keys().iter().all(|k| !k.starts_with("catalog/")));
    let leaves = registration::read_leaves(&feed.fs(), "a").await.unwrap();
    assert_eq!(leaves[0].catalog_entry.id, leaves[0].id);
    assert!(validate(&feed.ctx()).await.unwrap().is_valid());
  }

  #[tokio::test]
  async fn test_badges_follow_latest_versions() {
    let feed = TestFeed::with_settings(&[(BADGES_ENABLED, "true")]).await;
    feed.push(vec![package("a", "1.0.0")]).await;
    feed.push(vec![package("a", "2.0.0-beta")]).await;

    assert_eq!(feed.json("badges/v/a.json")["message"], "1.0.0");
    assert_eq!(feed.json("badges/vpre/a.json")["message"], "2.0.0-beta");
  }

  #[tokio::test]
  async fn test_validate_reports_broken_package() {
    let feed = TestFeed::new().await;
    feed.push(vec![package("a", "1.0.0"), package("b", "1.0.0")]).await;
    assert!(validate(&feed.ctx()).await.unwrap().is_valid());

    feed.backend.delete(&registration::index_path("b")).await.unwrap();
    let report = validate(&feed.ctx()).await.unwrap();
    assert_eq!(report.checked, 2);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].package.starts_with("b "));
    assert_eq!(report.failures[0].problems, vec!["missing registration leaf".to_string()]);
  }

  #[tokio::test]
  async fn test_stats_counts() {
    let feed = TestFeed::new().await;
    feed
      .push(vec![package("a", "1.0.0"), package("a", "2.0.0"), package("b", "1.0.0")])
      .await;
    let stats = stats(&feed.ctx()).await.unwrap();
    assert_eq!(stats.packages, 3);
    assert_eq!(stats.ids, 2);
    assert_eq!(stats.catalog_entries, Some(3));
    assert_eq!(stats.catalog_pages, Some(1));
    assert!(stats.last_commit.is_some());
    assert_eq!(versions(&feed.package_set().await, "a"), vec!["1.0.0", "2.0.0"]);
  }

  #[tokio::test]
  async fn test_destroy_removes_everything() {
    let feed = TestFeed::new().await;
    feed.push(vec![package("a", "1.0.0")]).await;

    let report = destroy(&feed.ctx(), false).await.unwrap();
    assert!(report.deleted > 0);
    assert!(feed.backend.keys().is_empty());
    assert!(matches!(stats(&feed.ctx()).await, Err(CommandError::Uninitialized(_))));

    let report = destroy(&feed.ctx(), true).await.unwrap();
    assert!(report.container_deleted);
    assert!(!feed.backend.has_container().await.unwrap());
  }
}
