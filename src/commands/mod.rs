// src/commands/mod.rs
//! Command handlers for the debrepo CLI

mod config;
mod prune;
mod scan;
mod update;
mod verify;

pub use config::cmd_show_config;
pub use prune::cmd_prune;
pub use scan::cmd_scan;
pub use update::cmd_update;
pub use verify::cmd_verify;

use anyhow::{Context, Result};
use debrepo::{RepoConfig, SuiteConfig};
use std::path::Path;

/// Load and validate the repository configuration
pub(crate) fn load_config(path: &Path) -> Result<RepoConfig> {
    let config = RepoConfig::load(path)?;
    tracing::debug!(
        "Loaded {} ({} suites, root {})",
        path.display(),
        config.suites.len(),
        config.root.display()
    );
    Ok(config)
}

/// The named suite, or every configured suite
pub(crate) fn selected_suites<'a>(
    config: &'a RepoConfig,
    suite: Option<&str>,
) -> Result<Vec<&'a SuiteConfig>> {
    match suite {
        Some(name) => Ok(vec![
            config
                .suite(name)
                .with_context(|| format!("unknown suite '{}'", name))?,
        ]),
        None => Ok(config.suites.iter().collect()),
    }
}
