// src/commands/prune.rs
//! Prune command: garbage-collect the pool

use super::load_config;
use anyhow::Result;
use debrepo::RepoLock;
use debrepo::publish::referenced_pool_files;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::info;

/// Remove archives that no retained generation of any suite references
///
/// Generations kept for clients mid-download hold on to their archives
/// until they are themselves pruned. Archives added to the pool but not yet published are unreferenced too,
/// so this is only safe after every suite has been updated.
pub fn cmd_prune(config_path: &Path, dry_run: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let _lock = RepoLock::try_acquire(&config.root)?;

    let mut referenced = BTreeSet::new();
    for suite in &config.suites {
        let files = referenced_pool_files(&config.root, &suite.name)?;
        info!("{} references {} archives", suite.name, files.len());
        referenced.extend(files);
    }

    let report = config.pool().prune(&referenced, dry_run)?;
    let verb = if report.dry_run { "Would remove" } else { "Removed" };
    for path in &report.removed {
        println!("{} {}", verb, path);
    }
    println!(
        "{} {} archives ({} bytes)",
        verb,
        report.removed.len(),
        report.bytes_freed
    );

    Ok(())
}
