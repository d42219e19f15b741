// src/commands/update.rs
//! Update command: ingest archives and republish suites

use super::{load_config, selected_suites};
use anyhow::Result;
use debrepo::{RunReport, UpdateDriver, UpdateRequest};
use std::path::{Path, PathBuf};
use tracing::info;

/// Add archives to the pool and republish the selected suites
///
/// Stops at the first failed suite. The failure is returned as a
/// [`debrepo::RunFailure`] so `main` can turn its reason into an exit code.
pub fn cmd_update(
    config_path: &Path,
    suite: Option<String>,
    component: Option<String>,
    archives: Vec<PathBuf>,
) -> Result<()> {
    let config = load_config(config_path)?;
    let keyring = config.keyring();
    let driver = UpdateDriver::new(&config, &keyring);

    let reports = match suite {
        Some(name) => {
            let suite = selected_suites(&config, Some(&name))?[0];
            info!("Updating suite {}", suite.name);
            vec![driver.run(&UpdateRequest {
                suite: suite.name.clone(),
                component,
                archives,
            })?]
        }
        None => {
            info!("Updating {} suites", config.suites.len());
            driver.run_all(&archives)?
        }
    };
    for report in &reports {
        print_report(report);
    }

    Ok(())
}

fn print_report(report: &RunReport) {
    println!(
        "{}: published version {} ({} packages, {} index files)",
        report.suite, report.version, report.records, report.index_files
    );
    for path in &report.added {
        println!("  added {}", path);
    }
    if !report.already_present.is_empty() {
        println!("  {} archives already in the pool", report.already_present.len());
    }
    for warning in &report.warnings {
        println!("  skipped {}", warning);
    }
    println!("  generation {}", report.generation.display());
}
