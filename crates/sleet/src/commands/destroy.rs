//! Delete every feed file.

use tracing::info;

use super::{CommandContext, CommandError};
use crate::lock::LOCK_FILE;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DestroyReport {
  pub deleted: usize,
  pub container_deleted: bool,
}

/// Remove all files, and optionally the container itself. A feed with no container is a no-op.
pub async fn destroy(ctx: &CommandContext, delete_container: bool) -> Result<DestroyReport, CommandError> {
  let fs = &ctx.fs;
  if !fs.has_bucket().await? {
    info!(root = %fs.root(), "Nothing to destroy");
    return Ok(DestroyReport::default());
  }

  let deleted = ctx
    .locked("destroy", || async move {
      let mut deleted = 0;
      for file in fs.list_files().await? {
        if file.path() == LOCK_FILE {
          continue;
        }
        file.delete().await;
        deleted += 1;
      }
      fs.commit().await?;
      Ok(deleted)
    })
    .await?;

  let container_deleted = delete_container && fs.delete_bucket().await?;
  info!(root = %fs.root(), deleted, container_deleted, "Feed destroyed");
  Ok(DestroyReport {
    deleted,
    container_deleted,
  })
}
