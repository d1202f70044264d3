//! `autocomplete/query` - every id, case-insensitively unique, in alphabetical order.

use std::{
  collections::{BTreeMap, BTreeSet, HashMap},
  sync::Arc,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use super::{FeedService, ServiceContext, ServiceError, ServiceKind, package_index, util::JsonLdContext};
use crate::{
  domain::package::{ChangeSet, PackageIdentity, PackageInput},
  fs::FileSystem,
};

pub const AUTOCOMPLETE_QUERY: &str = "autocomplete/query";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoCompleteDocument {
  #[serde(rename = "@context", default)]
  pub context: JsonLdContext,
  pub total_hits: usize,
  #[serde(default)]
  pub data: Vec<String>,
}

pub async fn read_autocomplete(fs: &FileSystem) -> Result<AutoCompleteDocument, ServiceError> {
  let doc: Option<AutoCompleteDocument> = fs.get(AUTOCOMPLETE_QUERY)?.read_json().await?;
  Ok(doc.unwrap_or_default())
}

#[derive(Debug, Default)]
struct AutoCompleteState {
  /// Lowercased id → display casing.
  ids: BTreeMap<String, String>,
  touched: BTreeSet<String>,
  /// Casing of ids added in this run.
  display: HashMap<String, String>,
}

pub struct AutoCompleteService {
  ctx: Arc<ServiceContext>,
  state: Mutex<AutoCompleteState>,
}

impl AutoCompleteService {
  pub fn new(ctx: Arc<ServiceContext>) -> Self {
    Self {
      ctx,
      state: Mutex::new(AutoCompleteState::default()),
    }
  }
}

#[async_trait]
impl FeedService for AutoCompleteService {
  fn kind(&self) -> ServiceKind {
    ServiceKind::AutoComplete
  }

  fn dependencies(&self) -> Vec<ServiceKind> {
    vec![ServiceKind::PackageIndex]
  }

  async fn preload(&self, _changes: &ChangeSet) -> Result<(), ServiceError> {
    let doc = read_autocomplete(&self.ctx.fs).await?;
    self.state.lock().await.ids = doc.data.into_iter().map(|id| (id.to_lowercase(), id)).collect();
    Ok(())
  }

  async fn add_package(&self, input: &PackageInput) -> Result<(), ServiceError> {
    let id = input.identity.lower_id();
    let mut state = self.state.lock().await;
    state.display.insert(id.clone(), input.identity.id.clone());
    state.touched.insert(id);
    Ok(())
  }

  async fn remove_package(&self, identity: &PackageIdentity) -> Result<bool, ServiceError> {
    let id = identity.lower_id();
    let mut state = self.state.lock().await;
    let present = state.ids.contains_key(&id);
    state.touched.insert(id);
    Ok(present)
  }

  async fn save(&self) -> Result<(), ServiceError> {
    // The package index has already staged the resulting package set.
    let after = package_index::read_package_set(&self.ctx.fs).await?;
    let mut state = self.state.lock().await;
    let touched = std::mem::take(&mut state.touched);
    for id in touched {
      if after.contains_id(&id) {
        let display = state.display.get(&id).cloned();
        let entry = state.ids.entry(id.clone()).or_insert_with(|| id.clone());
        if let Some(display) = display {
          *entry = display;
        }
      } else {
        state.ids.remove(&id);
      }
    }

    let data: Vec<String> = state.ids.values().cloned().collect();
    debug!(ids = data.len(), "Staged autocomplete document");
    let doc = AutoCompleteDocument {
      context: JsonLdContext::default(),
      total_hits: data.len(),
      data,
    };
    self.ctx.fs.get(AUTOCOMPLETE_QUERY)?.write_json(&doc).await?;
    Ok(())
  }
}
