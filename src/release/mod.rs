// src/release/mod.rs
//! Release manifest assembly and parsing
//!
//! A Release file describes one suite snapshot: a header of `Key: Value`
//! fields followed by one checksum block per digest algorithm. Every index
//! representation (uncompressed and each compressed encoding) is listed in
//! every block, in path order:
//!
//! ```text
//! SHA256:
//!  9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08             1024 main/binary-amd64/Packages
//! ```

use crate::error::{Error, Result};
use crate::hash::{self, HashAlgorithm, MultiDigest};
use crate::index::IndexFile;
use crate::packages::control;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rayon::prelude::*;
use std::fmt::Write as _;
use tracing::debug;

/// Release file name
pub const RELEASE_FILE: &str = "Release";

/// `Date` / `Valid-Until` format (RFC 2822, numeric zone)
pub const DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S %z";

/// Width the size column is right-justified to
pub const SIZE_WIDTH: usize = 16;

/// One line of a checksum block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumEntry {
    pub digest: String,
    pub size: u64,
    /// Path relative to `dists/<suite>`
    pub path: String,
}

/// All entries for one digest algorithm
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumBlock {
    pub algorithm: HashAlgorithm,
    pub entries: Vec<ChecksumEntry>,
}

/// Static description of a suite, taken from configuration
#[derive(Debug, Clone, Default)]
pub struct SuiteMetadata {
    pub origin: String,
    pub label: String,
    pub suite: String,
    pub codename: String,
    pub architectures: Vec<String>,
    pub components: Vec<String>,
    pub description: String,
    /// Prepended to the generation counter as `<prefix>.<n>`
    pub version_prefix: Option<String>,
    /// Emit `Valid-Until` this many days after `Date`
    pub valid_for_days: Option<u32>,
}

/// A parsed or assembled Release manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseManifest {
    pub origin: String,
    pub label: String,
    pub suite: String,
    pub codename: String,
    pub version: String,
    pub date: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
    pub architectures: Vec<String>,
    pub components: Vec<String>,
    pub description: String,
    pub checksums: Vec<ChecksumBlock>,
}

impl ReleaseManifest {
    /// Render the manifest text
    pub fn render(&self) -> String {
        let mut out = String::new();
        let mut field = |name: &str, value: &str| {
            if !value.is_empty() {
                let _ = writeln!(out, "{}: {}", name, value);
            }
        };

        field("Origin", &self.origin);
        field("Label", &self.label);
        field("Suite", &self.suite);
        field("Codename", &self.codename);
        field("Version", &self.version);
        field("Date", &format_date(&self.date));
        if let Some(ref valid_until) = self.valid_until {
            field("Valid-Until", &format_date(valid_until));
        }
        field("Architectures", &self.architectures.join(" "));
        field("Components", &self.components.join(" "));
        field("Description", &self.description);

        for block in &self.checksums {
            let _ = writeln!(out, "{}:", block.algorithm.release_field());
            for entry in &block.entries {
                let _ = writeln!(
                    out,
                    " {} {:>width$} {}",
                    entry.digest,
                    entry.size,
                    entry.path,
                    width = SIZE_WIDTH
                );
            }
        }

        out
    }

    /// Parse a Release document
    pub fn parse(text: &str) -> Result<Self> {
        let paragraph = control::ControlParagraph::parse(text)?;
        let required = |name: &str| {
            paragraph
                .get(name)
                .map(str::to_string)
                .ok_or_else(|| Error::ParseError(format!("Release has no {} field", name)))
        };
        let optional = |name: &str| paragraph.get(name).unwrap_or_default().to_string();
        let words = |name: &str| -> Vec<String> {
            paragraph
                .get(name)
                .map(|v| v.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default()
        };

        let date = parse_date(&required("Date")?)?;
        let valid_until = paragraph.get("Valid-Until").map(parse_date).transpose()?;

        let mut checksums = Vec::new();
        for field in paragraph.fields() {
            let Some(algorithm) = HashAlgorithm::from_release_field(&field.name) else {
                continue;
            };
            let mut entries = Vec::new();
            for line in field.value.lines().map(str::trim).filter(|l| !l.is_empty()) {
                let parts: Vec<&str> = line.split_whitespace().collect();
                let [digest, size, path] = parts[..] else {
                    return Err(Error::ParseError(format!(
                        "Malformed {} line '{}'",
                        field.name, line
                    )));
                };
                let size = size.parse::<u64>().map_err(|e| {
                    Error::ParseError(format!("Bad size in {} line '{}': {}", field.name, line, e))
                })?;
                entries.push(ChecksumEntry {
                    digest: digest.to_lowercase(),
                    size,
                    path: path.to_string(),
                });
            }
            checksums.push(ChecksumBlock { algorithm, entries });
        }

        Ok(Self {
            origin: optional("Origin"),
            label: optional("Label"),
            suite: required("Suite")?,
            codename: optional("Codename"),
            version: optional("Version"),
            date,
            valid_until,
            architectures: words("Architectures"),
            components: words("Components"),
            description: optional("Description"),
            checksums,
        })
    }

    /// Checksum block for one algorithm
    pub fn block(&self, algorithm: HashAlgorithm) -> Option<&ChecksumBlock> {
        self.checksums.iter().find(|b| b.algorithm == algorithm)
    }

    /// The strongest digest block present
    pub fn strongest_block(&self) -> Option<&ChecksumBlock> {
        self.checksums.iter().max_by_key(|b| b.algorithm)
    }

    /// Generation counter carried in `Version`
    pub fn generation(&self) -> u64 {
        self.version
            .rsplit('.')
            .next()
            .and_then(|n| n.parse().ok())
            .unwrap_or(0)
    }
}

pub fn format_date(date: &DateTime<Utc>) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Parse a `Date`-style field, normalizing to UTC
pub fn parse_date(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_str(value.trim(), DATE_FORMAT)
        .or_else(|_| DateTime::parse_from_rfc2822(value.trim()))
        .map(|d| d.with_timezone(&Utc))
        .or_else(|_| {
            // apt-ftparchive writes a literal "UTC" zone
            chrono::NaiveDateTime::parse_from_str(value.trim(), "%a, %d %b %Y %H:%M:%S UTC")
                .map(|naive| Utc.from_utc_datetime(&naive))
        })
        .map_err(|e| Error::ParseError(format!("Invalid date '{}': {}", value, e)))
}

/// Builds Release manifests from rendered index files
#[derive(Debug, Clone)]
pub struct ReleaseAssembler {
    digests: Vec<HashAlgorithm>,
}

impl ReleaseAssembler {
    /// Blocks are always emitted in MD5Sum, SHA1, SHA256, SHA512 order
    pub fn new(digests: &[HashAlgorithm]) -> Self {
        let mut digests = digests.to_vec();
        digests.sort();
        digests.dedup();
        Self { digests }
    }

    /// Digest and size of every file, one block per algorithm
    pub fn checksum_table(&self, files: &[IndexFile]) -> Vec<ChecksumBlock> {
        let mut files: Vec<&IndexFile> = files.iter().collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));

        let digests: Vec<MultiDigest> = files
            .par_iter()
            .map(|f| hash::multi_hash_bytes(&self.digests, &f.content))
            .collect();

        self.digests
            .iter()
            .map(|algorithm| ChecksumBlock {
                algorithm: *algorithm,
                entries: files
                    .iter()
                    .zip(&digests)
                    .filter_map(|(file, digest)| {
                        digest.get(*algorithm).map(|h| ChecksumEntry {
                            digest: h.value.clone(),
                            size: digest.size,
                            path: file.path.clone(),
                        })
                    })
                    .collect(),
            })
            .collect()
    }

    /// Assemble the manifest for a suite
    ///
    /// `previous` is the currently published manifest, if any. Its
    /// generation counter is kept when the checksum table is unchanged and
    /// advanced by one otherwise.
    pub fn assemble(
        &self,
        meta: &SuiteMetadata,
        files: &[IndexFile],
        previous: Option<&ReleaseManifest>,
        now: DateTime<Utc>,
    ) -> ReleaseManifest {
        let checksums = self.checksum_table(files);
        let generation = next_generation(previous, &checksums);
        let version = match meta.version_prefix.as_deref() {
            Some(prefix) if !prefix.is_empty() => format!("{}.{}", prefix, generation),
            _ => generation.to_string(),
        };

        // Release dates carry whole seconds only
        let date = Utc
            .timestamp_opt(now.timestamp(), 0)
            .single()
            .unwrap_or(now);
        let valid_until = meta
            .valid_for_days
            .map(|days| date + Duration::days(i64::from(days)));

        debug!(
            "Assembled Release for {} version {} ({} files)",
            meta.suite,
            version,
            files.len()
        );

        ReleaseManifest {
            origin: meta.origin.clone(),
            label: meta.label.clone(),
            suite: meta.suite.clone(),
            codename: meta.codename.clone(),
            version,
            date,
            valid_until,
            architectures: meta.architectures.clone(),
            components: meta.components.clone(),
            description: meta.description.clone(),
            checksums,
        }
    }
}

fn next_generation(previous: Option<&ReleaseManifest>, checksums: &[ChecksumBlock]) -> u64 {
    match previous {
        Some(prev) if prev.checksums == checksums => prev.generation().max(1),
        Some(prev) => prev.generation() + 1,
        None => 1,
    }
}
