// src/config.rs
//! Repository configuration
//!
//! Read from a TOML file (`debrepo.toml` by default):
//!
//! ```toml
//! root = "/srv/apt"
//! origin = "Example"
//! label = "Example"
//! description = "Example packages"
//! compression = ["gzip", "xz"]
//! digests = ["md5", "sha1", "sha256"]
//! multiversion = true
//! all_policy = "fan-out"
//! valid_for_days = 14
//! keep_generations = 2
//!
//! [signing]
//! identity = "Example Archive"
//! keyring = "/etc/debrepo/keys"
//!
//! [[suites]]
//! name = "stable"
//! codename = "bookworm"
//! components = ["main"]
//! architectures = ["amd64", "arm64"]
//! ```
//!
//! Relative `root` and `keyring` paths are resolved against the directory
//! holding the configuration file.

use crate::compression::CompressionFormat;
use crate::error::{Error, Result};
use crate::hash::HashAlgorithm;
use crate::index::AllPolicy;
use crate::packages::Architecture;
use crate::pool::Pool;
use crate::release::SuiteMetadata;
use crate::signing::KeyringDir;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "debrepo.toml";

/// Top-level repository configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoConfig {
    /// Root of the published tree (holds `dists/` and `pool/`)
    pub root: PathBuf,

    pub origin: String,

    /// Defaults to `origin` when empty
    #[serde(default)]
    pub label: String,

    #[serde(default)]
    pub description: String,

    /// Compressed encodings published next to each uncompressed index
    #[serde(default = "default_compression")]
    pub compression: Vec<CompressionFormat>,

    /// Release checksum algorithms (at least two)
    #[serde(default = "default_digests")]
    pub digests: Vec<HashAlgorithm>,

    /// Keep every version of a package rather than only the newest
    #[serde(default = "default_true")]
    pub multiversion: bool,

    #[serde(default)]
    pub all_policy: AllPolicy,

    /// Emit `Valid-Until` this many days after `Date`
    #[serde(default)]
    pub valid_for_days: Option<u32>,

    /// Superseded generations of each suite kept on disk after a publish
    #[serde(default = "default_keep_generations")]
    pub keep_generations: usize,

    #[serde(default = "default_file_mode")]
    pub file_mode: u32,

    #[serde(default = "default_dir_mode")]
    pub dir_mode: u32,

    pub signing: SigningSection,

    pub suites: Vec<SuiteConfig>,
}

/// Signing key lookup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningSection {
    /// User ID substring, fingerprint or key ID of the signing key
    pub identity: String,
    /// Directory (or single file) of secret keys
    pub keyring: PathBuf,
}

/// One suite of the repository
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteConfig {
    pub name: String,

    /// Defaults to the suite name when empty
    #[serde(default)]
    pub codename: String,

    pub components: Vec<String>,

    pub architectures: Vec<Architecture>,

    /// Overrides the repository description for this suite
    #[serde(default)]
    pub description: Option<String>,

    /// `Version` becomes `<prefix>.<generation>`
    #[serde(default)]
    pub version_prefix: Option<String>,
}

impl SuiteConfig {
    pub fn codename(&self) -> &str {
        if self.codename.is_empty() {
            &self.name
        } else {
            &self.codename
        }
    }
}

fn default_compression() -> Vec<CompressionFormat> {
    vec![CompressionFormat::Gzip, CompressionFormat::Xz]
}

fn default_digests() -> Vec<HashAlgorithm> {
    vec![HashAlgorithm::Md5, HashAlgorithm::Sha1, HashAlgorithm::Sha256]
}

fn default_true() -> bool {
    true
}

fn default_keep_generations() -> usize {
    2
}

fn default_file_mode() -> u32 {
    0o644
}

fn default_dir_mode() -> u32 {
    0o755
}

impl RepoConfig {
    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let mut config = Self::parse(&content)?;

        if let Some(base) = path.parent() {
            if config.root.is_relative() {
                config.root = base.join(&config.root);
            }
            if config.signing.keyring.is_relative() {
                config.signing.keyring = base.join(&config.signing.keyring);
            }
        }
        Ok(config)
    }

    /// Parse and validate configuration text
    pub fn parse(content: &str) -> Result<Self> {
        let config: RepoConfig = toml::from_str(content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(Error::ConfigError(msg));

        if self.origin.trim().is_empty() {
            return invalid("origin must not be empty".to_string());
        }
        if self.signing.identity.trim().is_empty() {
            return invalid("signing.identity must not be empty".to_string());
        }

        let digests: HashSet<HashAlgorithm> = self.digests.iter().copied().collect();
        if digests.len() < 2 {
            return invalid(format!(
                "at least two digest algorithms are required, got {}",
                digests.len()
            ));
        }

        if self.file_mode > 0o777 || self.dir_mode > 0o777 {
            return invalid(format!(
                "file_mode {:o} / dir_mode {:o} are not permission bits",
                self.file_mode, self.dir_mode
            ));
        }

        if self.suites.is_empty() {
            return invalid("at least one suite must be configured".to_string());
        }

        let mut names = HashSet::new();
        for suite in &self.suites {
            if !is_path_segment(&suite.name) {
                return invalid(format!("invalid suite name '{}'", suite.name));
            }
            if !names.insert(suite.name.as_str()) {
                return invalid(format!("suite '{}' is configured twice", suite.name));
            }
            if suite.components.is_empty() {
                return invalid(format!("suite '{}' has no components", suite.name));
            }
            if let Some(component) = suite.components.iter().find(|c| !is_path_segment(c)) {
                return invalid(format!(
                    "suite '{}' has invalid component '{}'",
                    suite.name, component
                ));
            }
            if suite.architectures.is_empty() {
                return invalid(format!("suite '{}' has no architectures", suite.name));
            }
            if suite.architectures.contains(&Architecture::All) {
                return invalid(format!(
                    "suite '{}' lists 'all'; architecture-independent packages are placed by all_policy",
                    suite.name
                ));
            }
        }

        Ok(())
    }

    /// Look up a suite by name
    pub fn suite(&self, name: &str) -> Result<&SuiteConfig> {
        self.suites
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| Error::ConfigError(format!("suite '{}' is not configured", name)))
    }

    pub fn label(&self) -> &str {
        if self.label.is_empty() {
            &self.origin
        } else {
            &self.label
        }
    }

    pub fn pool(&self) -> Pool {
        Pool::new(&self.root).with_modes(self.file_mode, self.dir_mode)
    }

    pub fn keyring(&self) -> KeyringDir {
        KeyringDir::new(&self.signing.keyring)
    }

    /// Release header fields for a suite
    pub fn suite_metadata(&self, suite: &SuiteConfig) -> SuiteMetadata {
        let mut architectures: Vec<String> =
            suite.architectures.iter().map(|a| a.to_string()).collect();
        if self.all_policy == AllPolicy::Dedicated {
            architectures.push(Architecture::All.to_string());
        }

        SuiteMetadata {
            origin: self.origin.clone(),
            label: self.label().to_string(),
            suite: suite.name.clone(),
            codename: suite.codename().to_string(),
            architectures,
            components: suite.components.clone(),
            description: suite
                .description
                .clone()
                .unwrap_or_else(|| self.description.clone()),
            version_prefix: suite.version_prefix.clone(),
            valid_for_days: self.valid_for_days,
        }
    }
}

/// Non-empty, no separators, not hidden
fn is_path_segment(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\'])
        && !name.contains(char::is_whitespace)
}
