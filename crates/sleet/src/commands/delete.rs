//! Remove one version or every version of an id.

use tracing::info;

use super::{CommandContext, CommandError, ensure_initialized, read_settings};
use crate::{
  domain::{
    package::{ChangeSet, DEFAULT_REMOVE_REASON, PackageIdentity},
    version::NuGetVersion,
  },
  pipeline::PipelineReport,
  service::package_index,
};

#[derive(Debug, Clone)]
pub struct DeleteRequest {
  pub id: String,
  /// None deletes every version.
  pub version: Option<NuGetVersion>,
  pub reason: String,
  /// Succeed when nothing matches.
  pub force: bool,
}

impl DeleteRequest {
  pub fn new(id: impl Into<String>, version: Option<NuGetVersion>) -> Self {
    Self {
      id: id.into(),
      version,
      reason: DEFAULT_REMOVE_REASON.to_string(),
      force: false,
    }
  }

  pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
    self.reason = reason.into();
    self
  }

  pub fn forced(mut self) -> Self {
    self.force = true;
    self
  }

  fn describe(&self) -> String {
    match &self.version {
      Some(v) => format!("{} {}", self.id, v),
      None => self.id.clone(),
    }
  }
}

#[derive(Debug, Clone, Default)]
pub struct DeleteReport {
  pub removed: Vec<PackageIdentity>,
  pub pipeline: PipelineReport,
}

pub async fn delete(ctx: &CommandContext, request: &DeleteRequest) -> Result<DeleteReport, CommandError> {
  let fs = &ctx.fs;
  ctx
    .locked("delete", || async move {
      ensure_initialized(fs).await?;
      let settings = read_settings(fs).await?;
      let existing = package_index::read_package_set(fs).await?;

      let targets: Vec<PackageIdentity> = match &request.version {
        Some(version) => {
          let identity = PackageIdentity::new(request.id.clone(), version.clone());
          if existing.contains(&identity) { vec![identity] } else { Vec::new() }
        }
        None => existing
          .versions(&request.id)
          .into_iter()
          .map(|v| PackageIdentity::new(request.id.clone(), v))
          .collect(),
      };

      if targets.is_empty() {
        if request.force {
          info!(package = %request.describe(), "Nothing to delete");
          return Ok(DeleteReport::default());
        }
        return Err(CommandError::PackageNotFound(request.describe()));
      }

      let mut changes = ChangeSet::new();
      for identity in &targets {
        changes.remove(identity.clone(), request.reason.clone());
      }
      let pipeline = ctx.run_changes(settings, changes).await?;
      info!(package = %request.describe(), removed = targets.len(), "Deleted");
      Ok(DeleteReport {
        removed: targets,
        pipeline,
      })
    })
    .await
}
