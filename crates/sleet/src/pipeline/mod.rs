//! Update pipeline - applies one change set to every service, then commits once.
//!
//! Each service runs as its own task: preload, wait for declared dependencies, apply, signal.
//! Completion is published on a `watch` channel per service; the signal is sent from a drop
//! guard so a failing or panicking task still releases its dependents (as failed).
//!
//! Any service failure skips the commit and rolls back staged changes, so the feed stays at its
//! last committed state.

use std::{
  collections::{BTreeMap, HashMap, HashSet},
  sync::Arc,
  time::Instant,
};

use tokio::{sync::watch, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
  catalog::CatalogService,
  domain::package::ChangeSet,
  fs::{CommitSummary, FsError},
  service::{
    CommitInfo, FeedService, ServiceContext, ServiceError, ServiceKind, ServiceOutcome,
    autocomplete::AutoCompleteService, badges::BadgesService, flat_container::FlatContainerService,
    package_index::PackageIndexService, registration::RegistrationService, search::SearchService,
  },
};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
  #[error("Service {0} registered twice")]
  DuplicateService(ServiceKind),
  #[error("Service {0} depends on {1}, which is not part of the pipeline")]
  MissingDependency(ServiceKind, ServiceKind),
  #[error("Service dependency cycle among {0:?}")]
  Cycle(Vec<ServiceKind>),
  #[error("{kind} failed: {source}")]
  Service {
    kind: ServiceKind,
    #[source]
    source: ServiceError,
  },
  #[error("Service task panicked: {0}")]
  TaskPanicked(String),
  #[error("Cancelled before commit")]
  Cancelled,
  #[error("Commit failed: {0}")]
  Commit(#[from] FsError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
  Pending,
  Succeeded,
  Failed,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
  pub commit: CommitInfo,
  pub added: usize,
  pub removed: usize,
  pub outcomes: BTreeMap<ServiceKind, ServiceOutcome>,
  pub summary: CommitSummary,
}

/// Publishes the final state of a task when dropped. Defaults to failed.
struct DoneSignal {
  tx: Arc<watch::Sender<TaskState>>,
  state: TaskState,
}

impl DoneSignal {
  fn new(tx: Arc<watch::Sender<TaskState>>) -> Self {
    Self {
      tx,
      state: TaskState::Failed,
    }
  }

  fn succeed(&mut self) {
    self.state = TaskState::Succeeded;
  }
}

impl Drop for DoneSignal {
  fn drop(&mut self) {
    self.tx.send_replace(self.state);
  }
}

/// Order services so every one comes after its dependencies. Ties keep registration order.
fn topological_order(services: &[Arc<dyn FeedService>]) -> Result<Vec<usize>, PipelineError> {
  let kinds: Vec<ServiceKind> = services.iter().map(|s| s.kind()).collect();
  let mut known = HashSet::new();
  for kind in &kinds {
    if !known.insert(*kind) {
      return Err(PipelineError::DuplicateService(*kind));
    }
  }

  let deps: Vec<Vec<ServiceKind>> = services.iter().map(|s| s.dependencies()).collect();
  for (kind, deps) in kinds.iter().zip(&deps) {
    if let Some(missing) = deps.iter().find(|d| !known.contains(*d)) {
      return Err(PipelineError::MissingDependency(*kind, *missing));
    }
  }

  let mut done: HashSet<ServiceKind> = HashSet::new();
  let mut order = Vec::with_capacity(services.len());
  while order.len() < services.len() {
    let ready: Vec<usize> = (0..services.len())
      .filter(|&i| !done.contains(&kinds[i]) && deps[i].iter().all(|d| done.contains(d)))
      .collect();
    if ready.is_empty() {
      let stuck = kinds.iter().filter(|k| !done.contains(*k)).copied().collect();
      return Err(PipelineError::Cycle(stuck));
    }
    for i in ready {
      done.insert(kinds[i]);
      order.push(i);
    }
  }
  Ok(order)
}

async fn run_task(
  service: &dyn FeedService,
  changes: &ChangeSet,
  upstream: Vec<(ServiceKind, watch::Receiver<TaskState>)>,
  cancel: &CancellationToken,
) -> Result<ServiceOutcome, ServiceError> {
  let kind = service.kind();
  service.preload(changes).await?;

  for (dep, mut rx) in upstream {
    let wait = async move { rx.wait_for(|s| *s != TaskState::Pending).await.map(|s| *s) };
    let state = tokio::select! {
      state = wait => state.unwrap_or(TaskState::Failed),
      _ = cancel.cancelled() => return Err(ServiceError::Cancelled),
    };
    if state != TaskState::Succeeded {
      debug!(service = %kind, dependency = %dep, "Dependency failed, skipping");
      return Err(ServiceError::DependencyFailed(dep));
    }
  }

  if cancel.is_cancelled() {
    return Err(ServiceError::Cancelled);
  }

  let started = Instant::now();
  let outcome = service.apply(changes).await?;
  debug!(
    service = %kind,
    added = outcome.added,
    removed = outcome.removed,
    elapsed_ms = started.elapsed().as_millis() as u64,
    "Service applied"
  );
  Ok(outcome)
}

pub struct UpdatePipeline {
  ctx: Arc<ServiceContext>,
  /// Topologically ordered.
  services: Vec<Arc<dyn FeedService>>,
}

impl std::fmt::Debug for UpdatePipeline {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("UpdatePipeline").field("services", &self.order()).finish()
  }
}

impl UpdatePipeline {
  /// Build a pipeline, rejecting duplicate services, unknown dependencies and cycles.
  pub fn new(ctx: Arc<ServiceContext>, services: Vec<Arc<dyn FeedService>>) -> Result<Self, PipelineError> {
    let order = topological_order(&services)?;
    let services = order.into_iter().map(|i| Arc::clone(&services[i])).collect();
    Ok(Self { ctx, services })
  }

  /// The standard service set for a feed's settings.
  pub fn for_feed(ctx: Arc<ServiceContext>) -> Result<Self, PipelineError> {
    let mut services: Vec<Arc<dyn FeedService>> = vec![
      Arc::new(CatalogService::new(ctx.clone())),
      Arc::new(PackageIndexService::new(ctx.clone())),
      Arc::new(FlatContainerService::new(ctx.clone())),
      Arc::new(RegistrationService::new(ctx.clone())),
      Arc::new(SearchService::new(ctx.clone())),
      Arc::new(AutoCompleteService::new(ctx.clone())),
    ];
    if ctx.settings.badges_enabled() {
      services.push(Arc::new(BadgesService::new(ctx.clone())));
    }
    Self::new(ctx, services)
  }

  pub fn order(&self) -> Vec<ServiceKind> {
    self.services.iter().map(|s| s.kind()).collect()
  }

  pub fn context(&self) -> &Arc<ServiceContext> {
    &self.ctx
  }

  /// Apply the change set through every service and commit once.
  pub async fn run(&self, changes: ChangeSet) -> Result<PipelineReport, PipelineError> {
    let mut report = PipelineReport {
      commit: self.ctx.commit,
      added: changes.adds.len(),
      removed: changes.removes.len(),
      ..Default::default()
    };
    if changes.is_empty() {
      debug!("Empty change set, nothing to apply");
      return Ok(report);
    }

    info!(
      commit = %self.ctx.commit.id,
      adds = report.added,
      removes = report.removed,
      services = self.services.len(),
      "Running update pipeline"
    );

    let changes = Arc::new(changes);
    let signals: HashMap<ServiceKind, Arc<watch::Sender<TaskState>>> = self
      .services
      .iter()
      .map(|s| (s.kind(), Arc::new(watch::channel(TaskState::Pending).0)))
      .collect();

    let mut tasks = JoinSet::new();
    for service in &self.services {
      let kind = service.kind();
      let Some(signal) = signals.get(&kind).cloned() else {
        continue;
      };
      let upstream: Vec<(ServiceKind, watch::Receiver<TaskState>)> = service
        .dependencies()
        .into_iter()
        .filter_map(|dep| signals.get(&dep).map(|tx| (dep, tx.subscribe())))
        .collect();
      let service = Arc::clone(service);
      let changes = Arc::clone(&changes);
      let cancel = self.ctx.cancel.clone();

      tasks.spawn(async move {
        let mut done = DoneSignal::new(signal);
        let result = run_task(service.as_ref(), &changes, upstream, &cancel).await;
        if result.is_ok() {
          done.succeed();
        }
        (kind, result)
      });
    }

    let mut failures: Vec<(ServiceKind, ServiceError)> = Vec::new();
    let mut panicked = None;
    while let Some(joined) = tasks.join_next().await {
      match joined {
        Ok((kind, Ok(outcome))) => {
          report.outcomes.insert(kind, outcome);
        }
        Ok((kind, Err(e))) => {
          if e.is_secondary() {
            warn!(service = %kind, err = %e, "Service skipped");
          } else {
            error!(service = %kind, err = %e, "Service failed");
          }
          failures.push((kind, e));
        }
        Err(e) => {
          error!(err = %e, "Service task panicked");
          panicked = Some(e.to_string());
        }
      }
    }
    drop(signals);

    if let Some(message) = panicked {
      self.ctx.fs.rollback().await;
      return Err(PipelineError::TaskPanicked(message));
    }
    if !failures.is_empty() {
      self.ctx.fs.rollback().await;
      let primary = failures.iter().position(|(_, e)| !e.is_secondary()).unwrap_or(0);
      let (kind, source) = failures.swap_remove(primary);
      if matches!(source, ServiceError::Cancelled) {
        return Err(PipelineError::Cancelled);
      }
      return Err(PipelineError::Service { kind, source });
    }
    if self.ctx.cancel.is_cancelled() {
      self.ctx.fs.rollback().await;
      return Err(PipelineError::Cancelled);
    }

    report.summary = self.ctx.fs.commit().await?;
    info!(
      commit = %self.ctx.commit.id,
      written = report.summary.written,
      deleted = report.summary.deleted,
      "Update pipeline committed"
    );
    Ok(report)
  }
}
