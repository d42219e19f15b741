// src/lib.rs

//! debrepo: signed, multi-architecture APT repositories
//!
//! Turns a pool of `.deb` archives into the `dists/` tree apt clients
//! consume, and keeps it current as packages are added.
//!
//! # Architecture
//!
//! - Pool: content-checked store of archives under `pool/<component>/`
//! - Scanner: reads control metadata and digests of every pooled archive
//! - Index builder: one `Packages` index per (component, architecture),
//!   plus its compressed representations
//! - Release assembler: `Release` with checksum tables over every index file
//! - Signer: `Release.gpg` and `InRelease` with an OpenPGP key
//! - Publisher: stages a whole suite generation and switches to it atomically
//! - Update driver: runs the steps above under a repository lock

pub mod compression;
pub mod config;
pub mod driver;
mod error;
pub mod hash;
pub mod index;
pub mod lock;
pub mod packages;
pub mod pool;
pub mod publish;
pub mod release;
pub mod scanner;
pub mod signing;
pub mod version;

pub use compression::CompressionFormat;
pub use config::{RepoConfig, SuiteConfig, DEFAULT_CONFIG_FILE};
pub use driver::{FailureReason, RunFailure, RunReport, RunState, UpdateDriver, UpdateRequest};
pub use error::{Error, Result};
pub use hash::{Hash, HashAlgorithm, MultiDigest};
pub use index::{AllPolicy, IndexBuilder, IndexFile};
pub use lock::RepoLock;
pub use packages::{Architecture, DebPackage, PackageRecord};
pub use pool::{IngestOutcome, Pool};
pub use publish::{Publisher, SuiteSnapshot};
pub use release::{ReleaseAssembler, ReleaseManifest};
pub use scanner::{ScanReport, ScanWarning, Scanner};
pub use signing::{KeyProvider, KeyringDir, MemoryKeyring, ReleaseSigner};
pub use version::DebVersion;
