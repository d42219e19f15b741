// src/commands/scan.rs
//! Scan command: dry run of the scanner

use super::{load_config, selected_suites};
use anyhow::Result;
use debrepo::Scanner;
use std::path::Path;

/// Scan the pool and print what would be indexed
pub fn cmd_scan(config_path: &Path, suite: Option<String>) -> Result<()> {
    let config = load_config(config_path)?;
    let scanner = Scanner::new(config.pool()).multiversion(config.multiversion);

    let mut components: Vec<String> = selected_suites(&config, suite.as_deref())?
        .into_iter()
        .flat_map(|s| s.components.iter().cloned())
        .collect();
    components.sort();
    components.dedup();

    let report = scanner.scan(&components)?;

    for record in &report.records {
        println!(
            "{}/{} {} {} ({} bytes)",
            record.component, record.name, record.version, record.architecture, record.size
        );
    }
    for warning in &report.warnings {
        println!("warning: {}", warning);
    }
    println!(
        "{} records, {} superseded, {} unreadable archives",
        report.records.len(),
        report.superseded,
        report.warnings.len()
    );

    Ok(())
}
