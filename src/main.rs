// src/main.rs

use anyhow::Result;
use clap::{CommandFactory, Parser};
use debrepo::{Error, FailureReason, RunFailure};
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Commands};

fn main() {
    let cli = Cli::parse();

    // Initialize tracing subscriber for logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(exit_code(&e));
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Some(Commands::Update {
            suite,
            component,
            archives,
        }) => commands::cmd_update(&cli.config, suite, component, archives),
        Some(Commands::Scan { suite }) => commands::cmd_scan(&cli.config, suite),
        Some(Commands::Verify { suite }) => commands::cmd_verify(&cli.config, suite),
        Some(Commands::Prune { dry_run }) => commands::cmd_prune(&cli.config, dry_run),
        Some(Commands::ShowConfig) => commands::cmd_show_config(&cli.config),
        None => {
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
    }
}

/// Failed update runs carry their reason; other errors are classified
/// the same way
fn exit_code(error: &anyhow::Error) -> i32 {
    if let Some(failure) = error.downcast_ref::<RunFailure>() {
        return failure.reason.exit_code();
    }
    error
        .downcast_ref::<Error>()
        .map(|e| FailureReason::from_error(e, 0).exit_code())
        .unwrap_or(1)
}
