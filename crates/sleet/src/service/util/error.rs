//! Error type shared by every derived service.

use crate::{catalog::CatalogError, fs::FsError, service::ServiceKind};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
  /// Reading or staging a document failed.
  #[error("Storage error: {0}")]
  Storage(#[from] FsError),
  #[error("Catalog error: {0}")]
  Catalog(#[from] CatalogError),
  /// A feed document exists but doesn't have the expected shape.
  #[error("Invalid document {path}: {message}")]
  InvalidDocument { path: String, message: String },
  /// The catalog did not assign a details URI for a package it should have seen.
  #[error("No catalog details recorded for {0}")]
  MissingDetails(String),
  /// An upstream service failed, so this one never ran its mutation phase.
  #[error("Skipped because {0} failed")]
  DependencyFailed(ServiceKind),
  #[error("Cancelled")]
  Cancelled,
  #[error("Internal error: {0}")]
  Internal(String),
}

impl ServiceError {
  pub fn invalid_document(path: impl Into<String>, message: impl Into<String>) -> Self {
    Self::InvalidDocument {
      path: path.into(),
      message: message.into(),
    }
  }

  pub fn internal(msg: impl Into<String>) -> Self {
    Self::Internal(msg.into())
  }

  /// True for errors caused by another failure rather than by this service itself.
  pub fn is_secondary(&self) -> bool {
    matches!(self, Self::DependencyFailed(_) | Self::Cancelled)
  }
}
