//! Feed settings and retention commands

use std::collections::HashSet;

use anyhow::Result;
use sleet::{
  commands::{feed_settings, retention},
  settings::{FeedSettings, RetentionSettings},
};

use super::{Global, parse_pairs};

fn print_settings(settings: &FeedSettings) {
  let mut any = false;
  for (key, value) in settings.iter() {
    any = true;
    println!("{key} = {value}");
  }
  if !any {
    println!("No settings (defaults apply)");
  }
}

pub async fn cmd_settings_get(global: &Global, key: &str) -> Result<()> {
  let ctx = global.context()?;
  match feed_settings::get(&ctx, key).await? {
    Some(value) => println!("{value}"),
    None => println!("{key} is not set"),
  }
  Ok(())
}

pub async fn cmd_settings_set(global: &Global, pairs: &[String]) -> Result<()> {
  let pairs = parse_pairs(pairs)?;
  let ctx = global.context()?;
  let settings = feed_settings::set(&ctx, &pairs).await?;
  print_settings(&settings);
  Ok(())
}

pub async fn cmd_settings_unset(global: &Global, keys: &[String]) -> Result<()> {
  let ctx = global.context()?;
  let settings = feed_settings::unset(&ctx, keys).await?;
  print_settings(&settings);
  Ok(())
}

pub async fn cmd_settings_list(global: &Global, json: bool) -> Result<()> {
  let ctx = global.context()?;
  let settings = feed_settings::list(&ctx).await?;
  if json {
    println!("{}", serde_json::to_string_pretty(&settings)?);
  } else {
    print_settings(&settings);
  }
  Ok(())
}

pub async fn cmd_settings_clear(global: &Global) -> Result<()> {
  let ctx = global.context()?;
  feed_settings::clear(&ctx).await?;
  println!("Cleared all feed settings");
  Ok(())
}

pub async fn cmd_retention_set(
  global: &Global,
  stable: Option<usize>,
  prerelease: Option<usize>,
  group_by_label: bool,
) -> Result<()> {
  let policy = RetentionSettings {
    stable_max: stable,
    prerelease_max: prerelease,
    group_by_first_prerelease_label: group_by_label,
  };
  let ctx = global.context()?;
  retention::set(&ctx, policy).await?;

  let show = |limit: Option<usize>| limit.map_or_else(|| "unlimited".to_string(), |n| n.to_string());
  println!("Retention: stable {}, prerelease {}", show(stable), show(prerelease));
  if group_by_label {
    println!("Prerelease versions are counted per first label");
  }
  Ok(())
}

pub async fn cmd_retention_clear(global: &Global) -> Result<()> {
  let ctx = global.context()?;
  retention::clear(&ctx).await?;
  println!("Retention limits removed");
  Ok(())
}

pub async fn cmd_retention_prune(global: &Global) -> Result<()> {
  let ctx = global.context()?;
  let report = retention::prune(&ctx, &HashSet::new()).await?;
  if report.pruned.is_empty() {
    println!("Nothing to prune");
  }
  for identity in &report.pruned {
    println!("Pruned {identity}");
  }
  Ok(())
}
