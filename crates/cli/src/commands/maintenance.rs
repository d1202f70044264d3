//! Maintenance commands (stats, validate, destroy)

use anyhow::{Result, bail};
use sleet::commands::{destroy::destroy, stats::stats, validate::validate};

use super::Global;

/// Show feed counters
pub async fn cmd_stats(global: &Global, json: bool) -> Result<()> {
  let ctx = global.context()?;
  let stats = stats(&ctx).await?;

  if json {
    println!("{}", serde_json::to_string_pretty(&stats)?);
    return Ok(());
  }

  println!("Feed Statistics");
  println!("===============\n");
  println!("Root:           {}", ctx.fs.root());
  println!("Packages:       {}", stats.packages);
  println!("Ids:            {}", stats.ids);
  match (stats.catalog_pages, stats.catalog_entries) {
    (Some(pages), Some(entries)) => println!("Catalog:        {entries} entries in {pages} pages"),
    _ => println!("Catalog:        disabled"),
  }
  if let Some(last) = stats.last_commit {
    println!("Last commit:    {}", last.to_rfc3339());
  }
  Ok(())
}

/// Validate the feed
pub async fn cmd_validate(global: &Global, json: bool) -> Result<()> {
  let ctx = global.context()?;
  let report = validate(&ctx).await?;

  if json {
    println!("{}", serde_json::to_string_pretty(&report)?);
  } else {
    for failure in &report.failures {
      println!("{}", failure.package);
      for problem in &failure.problems {
        println!("  - {problem}");
      }
    }
    println!(
      "Checked {} packages, {} failed",
      report.checked,
      report.failures.len()
    );
  }

  if !report.is_valid() {
    bail!("feed validation failed for {} packages", report.failures.len());
  }
  Ok(())
}

/// Delete every feed file
pub async fn cmd_destroy(global: &Global, container: bool) -> Result<()> {
  let ctx = global.context()?;
  let report = destroy(&ctx, container).await?;
  println!("Deleted {} files from {}", report.deleted, ctx.fs.root());
  if report.container_deleted {
    println!("Deleted the container");
  }
  Ok(())
}
