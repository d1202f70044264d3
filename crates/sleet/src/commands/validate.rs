//! Cross-check the derived documents against the package index.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use tracing::{info, warn};

use super::{CommandContext, CommandError, ensure_initialized, read_settings};
use crate::{
  catalog,
  domain::package::PackageIdentity,
  service::{autocomplete, flat_container, package_index, registration},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageFailure {
  pub package: String,
  pub problems: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
  pub checked: usize,
  pub failures: Vec<PackageFailure>,
}

impl ValidationReport {
  pub fn is_valid(&self) -> bool {
    self.failures.is_empty()
  }
}

pub async fn validate(ctx: &CommandContext) -> Result<ValidationReport, CommandError> {
  let fs = &ctx.fs;
  ctx
    .locked("validate", || async move {
      ensure_initialized(fs).await?;
      let settings = read_settings(fs).await?;
      let packages = package_index::read_package_set(fs).await?;
      let autocomplete: HashSet<String> = autocomplete::read_autocomplete(fs)
        .await?
        .data
        .iter()
        .map(|id| id.to_lowercase())
        .collect();

      let mut problems: BTreeMap<PackageIdentity, Vec<String>> = BTreeMap::new();
      for id in packages.ids() {
        if ctx.cancel.is_cancelled() {
          return Err(CommandError::Cancelled);
        }
        let leaves = registration::read_leaves(fs, id).await?;
        let flat = flat_container::read_versions(fs, id).await?;
        for version in packages.versions(id) {
          let identity = PackageIdentity::new(id, version.clone());
          let mut found = Vec::new();
          if !leaves.iter().any(|leaf| leaf.version() == &version) {
            found.push("missing registration leaf".to_string());
          }
          if !flat.contains(&version) {
            found.push("missing from flat container index".to_string());
          }
          if !autocomplete.contains(&id.to_lowercase()) {
            found.push("id missing from autocomplete".to_string());
          }
          if !found.is_empty() {
            problems.entry(identity).or_default().extend(found);
          }
        }
      }

      if settings.catalog_enabled() {
        let live = catalog::live_packages(fs).await?;
        for identity in packages.identities() {
          if !live.contains(&identity) {
            problems.entry(identity).or_default().push("not live in catalog".to_string());
          }
        }
        for identity in live.identities() {
          if !packages.contains(&identity) {
            problems
              .entry(identity)
              .or_default()
              .push("in catalog but not in package index".to_string());
          }
        }
      }

      let failures: Vec<PackageFailure> = problems
        .into_iter()
        .map(|(identity, problems)| PackageFailure {
          package: identity.to_string(),
          problems,
        })
        .collect();
      for failure in &failures {
        warn!(package = %failure.package, problems = ?failure.problems, "Package failed validation");
      }
      let report = ValidationReport {
        checked: packages.len(),
        failures,
      };
      info!(checked = report.checked, failed = report.failures.len(), "Validation finished");
      Ok(report)
    })
    .await
}
