// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: restrict to one suite
fn suite_arg(help: &'static str) -> Arg {
    Arg::new("suite")
        .short('s')
        .long("suite")
        .value_name("SUITE")
        .help(help)
}

fn build_cli() -> Command {
    Command::new("debrepo")
        .version(env!("CARGO_PKG_VERSION"))
        .author("debrepo Contributors")
        .about("Build, sign and publish APT repositories")
        .subcommand_required(false)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("PATH")
                .default_value("debrepo.toml")
                .global(true)
                .help("Path to the repository configuration file"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .global(true)
                .help("Log at debug level (overridden by RUST_LOG)"),
        )
        .subcommand(
            Command::new("update")
                .about("Add archives to the pool and republish (all suites by default)")
                .arg(suite_arg("Only update this suite"))
                .arg(
                    Arg::new("component")
                        .long("component")
                        .requires("suite")
                        .help("Component new archives go into (the suite's first by default)"),
                )
                .arg(
                    Arg::new("archives")
                        .num_args(0..)
                        .help(".deb archives to add before publishing"),
                ),
        )
        .subcommand(
            Command::new("scan")
                .about("Scan the pool and report records and warnings without publishing")
                .arg(suite_arg("Only scan the components of this suite")),
        )
        .subcommand(
            Command::new("verify")
                .about("Verify published suites against their signatures and checksums")
                .arg(suite_arg("Only verify this suite")),
        )
        .subcommand(
            Command::new("prune")
                .about("Remove pool archives that no published suite references")
                .arg(
                    Arg::new("dry_run")
                        .long("dry-run")
                        .action(ArgAction::SetTrue)
                        .help("Show what would be removed without deleting anything"),
                ),
        )
        .subcommand(Command::new("show-config").about("Print the effective configuration as TOML"))
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();

    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("debrepo.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
