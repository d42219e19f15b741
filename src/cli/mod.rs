// src/cli/mod.rs
//! CLI definitions for debrepo
//!
//! This module contains the command-line interface definitions using clap.
//! The command implementations are in the `commands` module.
//!
//! - `update` - Add archives to the pool and republish suites
//! - `scan` - Report what the pool would index, without publishing
//! - `verify` - Check a published suite against its signatures and checksums
//! - `prune` - Delete pool archives no published suite references
//! - `show-config` - Print the effective configuration

use clap::{Parser, Subcommand};
use debrepo::DEFAULT_CONFIG_FILE;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "debrepo")]
#[command(author = "debrepo Contributors")]
#[command(version)]
#[command(about = "Build, sign and publish APT repositories", long_about = None)]
pub struct Cli {
    /// Path to the repository configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Log at debug level (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Add archives to the pool and republish (all suites by default)
    Update {
        /// Only update this suite
        #[arg(short, long)]
        suite: Option<String>,

        /// Component new archives go into (the suite's first by default)
        #[arg(long, requires = "suite")]
        component: Option<String>,

        /// .deb archives to add before publishing
        archives: Vec<PathBuf>,
    },

    /// Scan the pool and report records and warnings without publishing
    Scan {
        /// Only scan the components of this suite
        #[arg(short, long)]
        suite: Option<String>,
    },

    /// Verify published suites against their signatures and checksums
    Verify {
        /// Only verify this suite
        #[arg(short, long)]
        suite: Option<String>,
    },

    /// Remove pool archives that no published suite references
    Prune {
        /// Show what would be removed without deleting anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the effective configuration as TOML
    ShowConfig,
}
