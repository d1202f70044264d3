//! End-to-end feed behaviour: pushes and deletes through every derived document.

#[cfg(test)]
mod tests {
  use std::{collections::HashSet, io::Write};

  use pretty_assertions::assert_eq;

  use crate::{
    __tests__::helpers::{TestFeed, package, versions},
    catalog::{self, CATALOG_INDEX, CatalogOperation},
    commands::{
      CommandError,
      delete::{DeleteRequest, delete},
      push::{ExistingPackages, PushOptions, push},
      retention,
    },
    domain::{
      package::PackageIdentity,
      settings::{CATALOG_PAGE_SIZE, RetentionSettings},
      version::NuGetVersion,
    },
    pipeline::PipelineError,
    service::{
      autocomplete::{AUTOCOMPLETE_QUERY, read_autocomplete},
      flat_container,
      package_index::PACKAGE_INDEX,
      registration,
      search::{SEARCH_QUERY, read_search},
    },
  };

  fn ident(id: &str, version: &str) -> PackageIdentity {
    PackageIdentity::new(id, NuGetVersion::parse(version).unwrap())
  }

  #[tokio::test]
  async fn test_push_publishes_every_document() {
    let feed = TestFeed::new().await;
    let mut archive = tempfile::NamedTempFile::new().unwrap();
    archive.write_all(b"nupkg bytes").unwrap();
    let mut descriptor = package("Contoso.Utils", "1.2.0");
    descriptor.content = Some(archive.path().to_path_buf());

    let report = feed.push(vec![descriptor]).await;
    assert_eq!(report.pushed, vec![ident("contoso.utils", "1.2.0")]);
    assert!(report.pipeline.summary.written > 0);

    let fs = feed.fs();
    assert_eq!(versions(&feed.package_set().await, "contoso.utils"), vec!["1.2.0"]);
    assert_eq!(registration::read_leaves(&fs, "contoso.utils").await.unwrap().len(), 1);
    assert_eq!(
      feed.backend.get("flatcontainer/contoso.utils/1.2.0/contoso.utils.1.2.0.nupkg"),
      Some(b"nupkg bytes".to_vec())
    );
    assert_eq!(
      flat_container::read_versions(&fs, "contoso.utils").await.unwrap().len(),
      1
    );
    let search = read_search(&fs).await.unwrap();
    assert_eq!(search.data[0].id, "Contoso.Utils");
    assert_eq!(read_autocomplete(&fs).await.unwrap().data, vec!["Contoso.Utils".to_string()]);
    assert_eq!(feed.catalog_entries().await.len(), 1);
    assert!(feed.backend.get(".lock").is_none());
  }

  #[tokio::test]
  async fn test_idempotent_add() {
    let feed = TestFeed::new().await;
    feed.push(vec![package("a", "1.0.0")]).await;

    let replace = PushOptions {
      existing: ExistingPackages::Replace,
      ..Default::default()
    };
    let report = feed.push_with(vec![package("a", "1.0.0")], &replace).await;
    assert_eq!(report.replaced, vec![ident("a", "1.0.0")]);

    assert_eq!(versions(&feed.package_set().await, "a"), vec!["1.0.0"]);
    assert_eq!(registration::read_leaves(&feed.fs(), "a").await.unwrap().len(), 1);
    let entries = feed.catalog_entries().await;
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.operation == CatalogOperation::Add));
  }

  #[tokio::test]
  async fn test_existing_package_fails_or_skips() {
    let feed = TestFeed::new().await;
    feed.push(vec![package("a", "1.0.0")]).await;
    let before = feed.snapshot(&[PACKAGE_INDEX, CATALOG_INDEX, SEARCH_QUERY]);

    let err = push(&feed.ctx(), vec![package("A", "1.0.0")], &PushOptions::default())
      .await
      .unwrap_err();
    assert!(matches!(err, CommandError::PackageExists(_)));
    assert_eq!(err.exit_code(), 3);

    let skip = PushOptions {
      existing: ExistingPackages::Skip,
      ..Default::default()
    };
    let report = feed.push_with(vec![package("a", "1.0.0")], &skip).await;
    assert_eq!(report.skipped.len(), 1);
    assert!(report.pushed.is_empty());
    assert_eq!(feed.snapshot(&[PACKAGE_INDEX, CATALOG_INDEX, SEARCH_QUERY]), before);
  }

  #[tokio::test]
  async fn test_add_remove_round_trip() {
    let feed = TestFeed::new().await;
    feed.push(vec![package("packageA", "1.0.0")]).await;
    delete(&feed.ctx(), &DeleteRequest::new("packageA", Some(NuGetVersion::new(1, 0, 0))))
      .await
      .unwrap();

    let fs = feed.fs();
    assert!(!feed.package_set().await.contains_id("packagea"));
    assert!(read_search(&fs).await.unwrap().data.is_empty());
    assert!(read_autocomplete(&fs).await.unwrap().data.is_empty());
    assert!(registration::read_leaves(&fs, "packagea").await.unwrap().is_empty());
    assert!(feed.backend.get(&registration::index_path("packagea")).is_none());

    let entries = feed.catalog_entries().await;
    let ops: Vec<CatalogOperation> = entries.iter().map(|e| e.operation).collect();
    assert_eq!(ops, vec![CatalogOperation::Add, CatalogOperation::Remove]);
    assert!(entries.iter().all(|e| e.identity() == ident("packagea", "1.0.0")));
  }

  #[tokio::test]
  async fn test_case_insensitive_identity() {
    let feed = TestFeed::new().await;
    feed.push(vec![package("A", "1.0.0")]).await;
    let report = delete(&feed.ctx(), &DeleteRequest::new("a", None)).await.unwrap();
    assert_eq!(report.removed, vec![ident("A", "1.0.0")]);

    let fs = feed.fs();
    assert!(feed.package_set().await.is_empty());
    assert!(read_autocomplete(&fs).await.unwrap().data.is_empty());
    assert!(flat_container::read_versions(&fs, "A").await.unwrap().is_empty());
    assert!(feed.backend.keys().iter().all(|k| !k.starts_with("registration/a/")));
    assert!(catalog::live_packages(&fs).await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_delete_missing_package() {
    let feed = TestFeed::new().await;
    let err = delete(&feed.ctx(), &DeleteRequest::new("nope", None)).await.unwrap_err();
    assert!(matches!(err, CommandError::PackageNotFound(_)));

    let report = delete(&feed.ctx(), &DeleteRequest::new("nope", None).forced())
      .await
      .unwrap();
    assert!(report.removed.is_empty());
  }

  #[tokio::test]
  async fn test_commit_failure_leaves_root_documents_untouched() {
    let feed = TestFeed::new().await;
    feed.push(vec![package("a", "1.0.0")]).await;
    let roots = [PACKAGE_INDEX, CATALOG_INDEX, SEARCH_QUERY, AUTOCOMPLETE_QUERY];
    let before = feed.snapshot(&roots);

    feed.backend.fail_writes_matching("registration/");
    let err = push(&feed.ctx(), vec![package("b", "1.0.0")], &PushOptions::default())
      .await
      .unwrap_err();
    assert!(matches!(err, CommandError::Pipeline(PipelineError::Commit(_))));
    assert_eq!(feed.snapshot(&roots), before);
    assert!(feed.backend.get(".lock").is_none());

    feed.backend.clear_failures();
    feed.push(vec![package("b", "1.0.0")]).await;
    assert_eq!(feed.package_set().await.id_count(), 2);
  }

  #[tokio::test]
  async fn test_failed_page_write_keeps_catalog_readable() {
    let feed = TestFeed::with_settings(&[(CATALOG_PAGE_SIZE, "1")]).await;
    feed.push(vec![package("a", "1.0.0")]).await;
    let before = feed.snapshot(&[CATALOG_INDEX, PACKAGE_INDEX]);

    feed.backend.fail_writes_matching(&catalog::page_path(1));
    let err = push(&feed.ctx(), vec![package("b", "1.0.0")], &PushOptions::default())
      .await
      .unwrap_err();
    assert!(matches!(err, CommandError::Pipeline(PipelineError::Commit(_))));
    assert_eq!(feed.snapshot(&[CATALOG_INDEX, PACKAGE_INDEX]), before);
    assert_eq!(feed.json(CATALOG_INDEX)["count"], 1);
    assert_eq!(feed.catalog_entries().await.len(), 1);

    feed.backend.clear_failures();
    feed.push(vec![package("b", "1.0.0")]).await;
    assert_eq!(feed.json(CATALOG_INDEX)["count"], 2);
    assert_eq!(feed.catalog_entries().await.len(), 2);
  }

  #[tokio::test]
  async fn test_catalog_paging_one_entry_per_page() {
    let feed = TestFeed::with_settings(&[(CATALOG_PAGE_SIZE, "1")]).await;
    feed.push(vec![package("a", "1.0.0"), package("b", "1.0.0")]).await;

    let root = feed.json(CATALOG_INDEX);
    assert_eq!(root["count"], 2);
    for page in 0..2 {
      let page = feed.json(&catalog::page_path(page));
      assert_eq!(page["items"].as_array().unwrap().len(), 1);
    }
  }

  #[tokio::test]
  async fn test_retention_boundary_on_push() {
    let feed = TestFeed::new().await;
    retention::set(
      &feed.ctx(),
      RetentionSettings {
        stable_max: Some(3),
        ..Default::default()
      },
    )
    .await
    .unwrap();

    for major in 1..=6 {
      feed.push(vec![package("a", &format!("{major}.0.0"))]).await;
    }
    assert_eq!(versions(&feed.package_set().await, "a"), vec!["4.0.0", "5.0.0", "6.0.0"]);
    let removed: Vec<String> = feed
      .catalog_entries()
      .await
      .iter()
      .filter(|e| e.operation == CatalogOperation::Remove)
      .map(|e| e.version.to_normalized_string())
      .collect();
    assert_eq!(removed, vec!["1.0.0", "2.0.0", "3.0.0"]);
  }

  #[tokio::test]
  async fn test_pruned_entries_keep_published_casing() {
    let feed = TestFeed::new().await;
    retention::set(
      &feed.ctx(),
      RetentionSettings {
        stable_max: Some(1),
        ..Default::default()
      },
    )
    .await
    .unwrap();

    feed.push(vec![package("Contoso.Utils", "1.0.0")]).await;
    let report = feed.push(vec![package("Contoso.Utils", "2.0.0")]).await;
    assert_eq!(report.pruned.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(), vec!["Contoso.Utils"]);

    let removes: Vec<String> = feed
      .catalog_entries()
      .await
      .iter()
      .filter(|e| e.operation == CatalogOperation::Remove)
      .map(|e| e.package_id.clone())
      .collect();
    assert_eq!(removes, vec!["Contoso.Utils".to_string()]);
    assert_eq!(feed.package_set().await.ids().collect::<Vec<_>>(), vec!["Contoso.Utils"]);
  }

  #[tokio::test]
  async fn test_pinned_versions_do_not_cascade() {
    let feed = TestFeed::new().await;
    let all: Vec<_> = (1..=6).map(|m| package("a", &format!("{m}.0.0"))).collect();
    feed.push(all).await;
    retention::set(
      &feed.ctx(),
      RetentionSettings {
        stable_max: Some(3),
        ..Default::default()
      },
    )
    .await
    .unwrap();

    let pinned: HashSet<PackageIdentity> = ["1.0.0", "2.0.0", "3.0.0"].iter().map(|v| ident("a", v)).collect();
    let report = retention::prune(&feed.ctx(), &pinned).await.unwrap();
    assert!(report.pruned.is_empty());
    assert_eq!(feed.package_set().await.len(), 6);

    let report = retention::prune(&feed.ctx(), &HashSet::new()).await.unwrap();
    assert_eq!(report.pruned.len(), 3);
    assert_eq!(versions(&feed.package_set().await, "a"), vec!["4.0.0", "5.0.0", "6.0.0"]);
  }
}
