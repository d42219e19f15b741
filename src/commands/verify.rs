// src/commands/verify.rs
//! Verify command: client-side check of the published tree

use super::{load_config, selected_suites};
use anyhow::Result;
use debrepo::ReleaseSigner;
use debrepo::publish::verify_published;
use std::path::Path;

/// Verify signatures and checksums of the published suites
pub fn cmd_verify(config_path: &Path, suite: Option<String>) -> Result<()> {
    let config = load_config(config_path)?;
    let keyring = config.keyring();
    let cert = ReleaseSigner::resolve(&keyring, &config.signing.identity)?.public_cert();

    for suite in selected_suites(&config, suite.as_deref())? {
        let report = verify_published(&config.root, &suite.name, &cert)?;
        println!(
            "{}: version {} OK ({} files, {} checksums)",
            report.suite, report.version, report.files, report.entries
        );
    }

    Ok(())
}
