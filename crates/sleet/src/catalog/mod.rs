//! Catalog - the append-only change log.
//!
//! Every add and remove becomes one entry pointing at a freshly created details document.
//! Entries are grouped into pages of at most `catalogpagesize` items, referenced from the root
//! `catalog/index.json`. Replaying all pages and keeping the last operation per identity gives
//! the live package set.
//!
//! With `catalogenabled=false` the catalog runs in virtual mode: entries are computed for the
//! current run only and details URIs point at registration leaves, nothing is persisted.

mod document;

use std::{
  collections::{HashMap, HashSet},
  sync::Arc,
};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

pub use self::document::{
  CatalogEntry, CatalogOperation, CatalogPage, CatalogPageRef, CatalogRoot, HASH_ALGORITHM, PackageDelete,
  PackageDetails, PackageMetadata,
};
use crate::{
  domain::{
    package::{ChangeSet, DEFAULT_REMOVE_REASON, PackageIdentity, PackageInput},
    package_set::PackageSet,
  },
  fs::{FileSystem, FsError},
  service::{FeedService, ServiceContext, ServiceError, ServiceKind, flat_container, registration},
};

pub const CATALOG_INDEX: &str = "catalog/index.json";

pub fn page_path(index: usize) -> String {
  format!("catalog/page.{index}.json")
}

pub fn details_path(id: Uuid) -> String {
  format!("catalog/data/{id}.json")
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
  #[error("Storage error: {0}")]
  Storage(#[from] FsError),
  #[error("Catalog page {0} is referenced from the index but missing")]
  MissingPage(String),
}

// ============================================================================
// Replay
// ============================================================================

pub async fn read_root(fs: &FileSystem) -> Result<Option<CatalogRoot>, CatalogError> {
  Ok(fs.get(CATALOG_INDEX)?.read_json().await?)
}

async fn read_page(fs: &FileSystem, page_ref: &CatalogPageRef) -> Result<CatalogPage, CatalogError> {
  fs.get(page_ref.id.as_str())?
    .read_json()
    .await?
    .ok_or_else(|| CatalogError::MissingPage(page_ref.id.to_string()))
}

/// Every entry in log order. Empty when the catalog doesn't exist.
pub async fn entries(fs: &FileSystem) -> Result<Vec<CatalogEntry>, CatalogError> {
  let Some(root) = read_root(fs).await? else {
    return Ok(Vec::new());
  };
  let mut entries = Vec::new();
  for page_ref in &root.items {
    entries.extend(read_page(fs, page_ref).await?.items);
  }
  Ok(entries)
}

/// Reduce entries to the identities whose latest operation is an add.
pub fn reduce_live(entries: &[CatalogEntry]) -> PackageSet {
  let mut last: HashMap<PackageIdentity, CatalogOperation> = HashMap::new();
  for entry in entries {
    last.insert(entry.identity(), entry.operation);
  }
  last
    .into_iter()
    .filter(|(_, op)| *op == CatalogOperation::Add)
    .map(|(identity, _)| identity)
    .collect()
}

pub async fn live_packages(fs: &FileSystem) -> Result<PackageSet, CatalogError> {
  Ok(reduce_live(&entries(fs).await?))
}

/// Entries of one id, case-insensitive, in log order.
pub async fn history(fs: &FileSystem, id: &str) -> Result<Vec<CatalogEntry>, CatalogError> {
  let id = id.to_lowercase();
  Ok(
    entries(fs)
      .await?
      .into_iter()
      .filter(|e| e.package_id.to_lowercase() == id)
      .collect(),
  )
}

// ============================================================================
// Service
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogMode {
  Durable,
  Virtual,
}

#[derive(Debug, Default)]
struct CatalogState {
  root: Option<CatalogRoot>,
  pending: Vec<CatalogEntry>,
  reasons: HashMap<PackageIdentity, String>,
  /// Identities removed and re-added in this run; only the add is recorded.
  replaced: HashSet<PackageIdentity>,
}

pub struct CatalogService {
  ctx: Arc<ServiceContext>,
  mode: CatalogMode,
  state: Mutex<CatalogState>,
}

impl CatalogService {
  pub fn new(ctx: Arc<ServiceContext>) -> Self {
    let mode = if ctx.settings.catalog_enabled() {
      CatalogMode::Durable
    } else {
      CatalogMode::Virtual
    };
    Self {
      ctx,
      mode,
      state: Mutex::new(CatalogState::default()),
    }
  }

  pub fn mode(&self) -> CatalogMode {
    self.mode
  }

  /// Entries produced so far in this run.
  pub async fn pending_entries(&self) -> Vec<CatalogEntry> {
    self.state.lock().await.pending.clone()
  }

  fn entry(&self, identity: &PackageIdentity, details: Url, operation: CatalogOperation) -> CatalogEntry {
    CatalogEntry {
      details,
      operation,
      commit_id: self.ctx.commit.id,
      commit_time_stamp: self.ctx.commit.timestamp,
      package_id: identity.id.clone(),
      version: identity.version.clone(),
    }
  }

  async fn append(&self, state: &mut CatalogState) -> Result<(), ServiceError> {
    let fs = &self.ctx.fs;
    let commit = self.ctx.commit;
    let page_size = self.ctx.settings.catalog_page_size();
    let root_uri = fs.uri_for(CATALOG_INDEX)?;

    let mut root = match state.root.take() {
      Some(root) => root,
      None => CatalogRoot::empty(root_uri.clone(), commit.id, commit.timestamp),
    };

    let mut entries = std::mem::take(&mut state.pending);
    entries.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    let added = entries.iter().any(|e| e.operation == CatalogOperation::Add);
    let removed = entries.iter().any(|e| e.operation == CatalogOperation::Remove);
    let total = entries.len();

    let (mut index, mut page) = match root.items.last() {
      Some(last) => (root.items.len() - 1, read_page(fs, last).await?),
      None => (0, CatalogPage::new(fs.uri_for(&page_path(0))?, root_uri.clone(), commit.id, commit.timestamp)),
    };

    let mut pages = Vec::new();
    for entry in entries {
      if page.items.len() >= page_size {
        pages.push((index, page));
        index += 1;
        page = CatalogPage::new(
          fs.uri_for(&page_path(index))?,
          root_uri.clone(),
          commit.id,
          commit.timestamp,
        );
      }
      page.items.push(entry);
    }
    pages.push((index, page));

    for (index, mut page) in pages {
      page.items.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
      page.count = page.items.len();
      page.commit_id = commit.id;
      page.commit_time_stamp = commit.timestamp;
      fs.get(&page_path(index))?.write_json(&page).await?;
      debug!(page = index, count = page.count, "Staged catalog page");

      let page_ref = page.to_ref();
      match root.items.get_mut(index) {
        Some(existing) => *existing = page_ref,
        None => root.items.push(page_ref),
      }
    }

    root.commit_id = commit.id;
    root.commit_time_stamp = commit.timestamp;
    root.count = root.items.len();
    root.item_count = root.item_count.saturating_add(total);
    if added {
      root.last_created = Some(commit.timestamp);
    }
    if removed {
      root.last_deleted = Some(commit.timestamp);
    }
    fs.get(CATALOG_INDEX)?.write_json(&root).await?;
    info!(entries = total, pages = root.count, "Appended catalog entries");
    state.root = Some(root);
    Ok(())
  }
}

#[async_trait]
impl FeedService for CatalogService {
  fn kind(&self) -> ServiceKind {
    ServiceKind::Catalog
  }

  async fn preload(&self, changes: &ChangeSet) -> Result<(), ServiceError> {
    let mut state = self.state.lock().await;
    for identity in &changes.removes {
      state
        .reasons
        .insert(identity.clone(), changes.reason_for(identity).to_string());
      if changes.is_added(identity) {
        state.replaced.insert(identity.clone());
      }
    }
    if self.mode == CatalogMode::Durable {
      state.root = read_root(&self.ctx.fs).await?;
    }
    Ok(())
  }

  async fn add_package(&self, input: &PackageInput) -> Result<(), ServiceError> {
    let fs = &self.ctx.fs;
    let identity = &input.identity;

    let details = match self.mode {
      CatalogMode::Durable => {
        let path = details_path(Uuid::new_v4());
        let uri = fs.uri_for(&path)?;
        let content = fs.uri_for(&flat_container::nupkg_path(identity))?;
        let metadata = PackageMetadata::from_descriptor(&input.descriptor, content, self.ctx.commit.timestamp);
        let doc = PackageDetails::new(uri.clone(), self.ctx.commit.id, self.ctx.commit.timestamp, metadata);
        fs.get(&path)?.write_json(&doc).await?;
        uri
      }
      CatalogMode::Virtual => fs.uri_for(&registration::leaf_path(identity))?,
    };

    debug!(package = %identity, details = %details, "Catalog add");
    self.ctx.outputs.record_details(identity.clone(), details.clone());
    let entry = self.entry(identity, details, CatalogOperation::Add);
    self.state.lock().await.pending.push(entry);
    Ok(())
  }

  async fn remove_package(&self, identity: &PackageIdentity) -> Result<bool, ServiceError> {
    if !self.ctx.before.contains(identity) {
      return Ok(false);
    }

    let mut state = self.state.lock().await;
    if state.replaced.contains(identity) {
      debug!(package = %identity, "Replaced in this run, tombstone skipped");
      return Ok(true);
    }

    let fs = &self.ctx.fs;
    let details = match self.mode {
      CatalogMode::Durable => {
        let path = details_path(Uuid::new_v4());
        let uri = fs.uri_for(&path)?;
        let reason = state
          .reasons
          .get(identity)
          .cloned()
          .unwrap_or_else(|| DEFAULT_REMOVE_REASON.to_string());
        let doc = PackageDelete::new(uri.clone(), identity, self.ctx.commit.id, self.ctx.commit.timestamp, reason);
        fs.get(&path)?.write_json(&doc).await?;
        uri
      }
      CatalogMode::Virtual => fs.uri_for(&registration::leaf_path(identity))?,
    };

    debug!(package = %identity, details = %details, "Catalog remove");
    let entry = self.entry(identity, details, CatalogOperation::Remove);
    state.pending.push(entry);
    Ok(true)
  }

  async fn save(&self) -> Result<(), ServiceError> {
    let mut state = self.state.lock().await;
    if state.pending.is_empty() {
      return Ok(());
    }
    match self.mode {
      CatalogMode::Durable => self.append(&mut state).await,
      CatalogMode::Virtual => {
        debug!(entries = state.pending.len(), "Virtual catalog, nothing persisted");
        Ok(())
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;
  use crate::{
    domain::{
      package::PackageDescriptor,
      settings::{CATALOG_ENABLED, CATALOG_PAGE_SIZE, FeedSettings},
      version::NuGetVersion,
    },
    fs::{BlobBackend, MemoryBackend},
  };

  fn input(id: &str, version: &str) -> PackageInput {
    PackageInput::new(PackageDescriptor::new(id, NuGetVersion::parse(version).unwrap()))
  }

  fn context(fs: &Arc<FileSystem>, settings: FeedSettings, before: PackageSet) -> Arc<ServiceContext> {
    Arc::new(ServiceContext::new(fs.clone(), settings, before))
  }

  async fn run(service: &CatalogService, changes: &ChangeSet) {
    service.preload(changes).await.unwrap();
    service.apply(changes).await.unwrap();
  }

  #[tokio::test]
  async fn test_add_writes_details_and_page() {
    let backend = Arc::new(MemoryBackend::new());
    let fs = Arc::new(FileSystem::in_memory(backend.clone()).unwrap());
    let ctx = context(&fs, FeedSettings::new(), PackageSet::new());
    let service = CatalogService::new(ctx.clone());

    let mut changes = ChangeSet::new();
    changes.add(input("A", "1.0.0"));
    run(&service, &changes).await;
    fs.commit().await.unwrap();

    let entries = entries(&fs).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].operation, CatalogOperation::Add);
    let details = ctx.outputs.details_uri(&changes.adds[0].identity).unwrap();
    assert_eq!(entries[0].details, details);

    let key = fs.relative_path(details.as_str()).unwrap();
    let doc = backend.get_json(&key).unwrap();
    assert_eq!(doc["id"], "A");
    assert!(backend.get_json("catalog/page.0.json").is_some());
    let root = backend.get_json(CATALOG_INDEX).unwrap();
    assert_eq!(root["count"], 1);
    assert_eq!(root["itemCount"], 1);
    assert!(root.get("lastDeleted").is_none());
  }

  #[tokio::test]
  async fn test_corrupt_root_counts_are_not_trusted() {
    let backend = Arc::new(MemoryBackend::new());
    let fs = FileSystem::in_memory(backend.clone()).unwrap();
    let mut root = CatalogRoot::empty(fs.uri_for(CATALOG_INDEX).unwrap(), Uuid::new_v4(), chrono::Utc::now());
    root.item_count = usize::MAX;
    backend
      .write(CATALOG_INDEX, &serde_json::to_vec(&root).unwrap())
      .await
      .unwrap();
    assert!(entries(&fs).await.unwrap().is_empty());

    root.items.push(CatalogPageRef {
      id: fs.uri_for(&page_path(0)).unwrap(),
      kind: "CatalogPage".to_string(),
      commit_id: root.commit_id,
      commit_time_stamp: root.commit_time_stamp,
      count: usize::MAX,
    });
    backend
      .write(CATALOG_INDEX, &serde_json::to_vec(&root).unwrap())
      .await
      .unwrap();
    let fs = FileSystem::in_memory(backend).unwrap();
    assert!(matches!(entries(&fs).await, Err(CatalogError::MissingPage(_))));
  }

  #[tokio::test]
  async fn test_pages_fill_then_overflow() {
    let backend = Arc::new(MemoryBackend::new());
    let fs = Arc::new(FileSystem::in_memory(backend.clone()).unwrap());
    let mut settings = FeedSettings::new();
    settings.set(CATALOG_PAGE_SIZE, "2");

    let mut first = ChangeSet::new();
    first.add(input("a", "1.0.0"));
    run(&CatalogService::new(context(&fs, settings.clone(), PackageSet::new())), &first).await;
    fs.commit().await.unwrap();

    let mut second = ChangeSet::new();
    second.add(input("b", "1.0.0"));
    second.add(input("c", "1.0.0"));
    second.add(input("d", "1.0.0"));
    run(&CatalogService::new(context(&fs, settings, PackageSet::new())), &second).await;
    fs.commit().await.unwrap();

    let root = read_root(&fs).await.unwrap().unwrap();
    assert_eq!(root.count, 2);
    assert_eq!(root.item_count, 4);
    assert_eq!(root.items.iter().map(|p| p.count).collect::<Vec<_>>(), vec![2, 2]);
    assert_eq!(live_packages(&fs).await.unwrap().len(), 4);
  }

  #[tokio::test]
  async fn test_remove_only_records_live_packages() {
    let backend = Arc::new(MemoryBackend::new());
    let fs = Arc::new(FileSystem::in_memory(backend.clone()).unwrap());
    let live = input("a", "1.0.0").identity;
    let before: PackageSet = [live.clone()].into_iter().collect();
    let service = CatalogService::new(context(&fs, FeedSettings::new(), before));

    let mut changes = ChangeSet::new();
    changes.remove(PackageIdentity::new("A", NuGetVersion::new(1, 0, 0)), "cleanup");
    changes.remove(PackageIdentity::new("b", NuGetVersion::new(1, 0, 0)), "cleanup");
    service.preload(&changes).await.unwrap();
    let outcome = service.apply(&changes).await.unwrap();
    assert_eq!(outcome.removed, 1);
    fs.commit().await.unwrap();

    let history = history(&fs, "a").await.unwrap();
    assert_eq!(history.len(), 1);
    let key = fs.relative_path(history[0].details.as_str()).unwrap();
    assert_eq!(backend.get_json(&key).unwrap()["sleet:removeReason"], "cleanup");
  }

  #[tokio::test]
  async fn test_replace_in_one_run_records_single_entry() {
    let backend = Arc::new(MemoryBackend::new());
    let fs = Arc::new(FileSystem::in_memory(backend).unwrap());
    let pkg = input("a", "1.0.0");
    let before: PackageSet = [pkg.identity.clone()].into_iter().collect();
    let service = CatalogService::new(context(&fs, FeedSettings::new(), before));

    let mut changes = ChangeSet::new();
    changes.remove(pkg.identity.clone(), "replaced");
    changes.add(pkg);
    run(&service, &changes).await;

    let pending = service.pending_entries().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].operation, CatalogOperation::Add);
  }

  #[tokio::test]
  async fn test_virtual_mode_persists_nothing() {
    let backend = Arc::new(MemoryBackend::new());
    let fs = Arc::new(FileSystem::in_memory(backend.clone()).unwrap());
    let mut settings = FeedSettings::new();
    settings.set(CATALOG_ENABLED, "false");
    let ctx = context(&fs, settings, PackageSet::new());
    let service = CatalogService::new(ctx.clone());
    assert_eq!(service.mode(), CatalogMode::Virtual);

    let mut changes = ChangeSet::new();
    changes.add(input("A", "1.0.0"));
    run(&service, &changes).await;

    assert!(fs.dirty_paths().await.is_empty());
    let details = ctx.outputs.details_uri(&changes.adds[0].identity).unwrap();
    assert_eq!(details.as_str(), "memory://feed/registration/a/1.0.0.json");
    assert_eq!(service.pending_entries().await.len(), 1);
  }

  #[test]
  fn test_reduce_keeps_last_operation() {
    let uri = Url::parse("memory://feed/x.json").unwrap();
    let make = |version: &str, operation| CatalogEntry {
      details: uri.clone(),
      operation,
      commit_id: Uuid::nil(),
      commit_time_stamp: chrono::Utc::now(),
      package_id: "A".to_string(),
      version: NuGetVersion::parse(version).unwrap(),
    };
    let entries = vec![
      make("1.0.0", CatalogOperation::Add),
      make("2.0.0", CatalogOperation::Add),
      make("1.0.0", CatalogOperation::Remove),
      make("3.0.0", CatalogOperation::Remove),
    ];
    let live = reduce_live(&entries);
    assert_eq!(live.versions("a"), vec![NuGetVersion::new(2, 0, 0)]);
  }
}
