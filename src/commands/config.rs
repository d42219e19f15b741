// src/commands/config.rs
//! Show-config command

use super::load_config;
use anyhow::{Context, Result};
use std::path::Path;

/// Print the configuration with every default filled in
pub fn cmd_show_config(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let text = toml::to_string_pretty(&config).context("Failed to serialize configuration")?;
    print!("{}", text);
    Ok(())
}
