// src/scanner.rs

//! Package scanner
//!
//! Walks `pool/<component>` and turns every `.deb` into a [`PackageRecord`].
//! A file that cannot be read or parsed is reported as a [`ScanWarning`] and
//! skipped; it never stops the rest of the pool from being indexed.
//!
//! Two records sharing (name, version, architecture) mean the pool itself is
//! inconsistent, which fails the scan with [`Error::DuplicatePackage`].

use crate::error::{Error, Result};
use crate::hash;
use crate::packages::{Architecture, DebPackage, PackageRecord, RecordKey, RECORD_DIGESTS};
use crate::pool::{self, Pool};
use rayon::prelude::*;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// An archive that was skipped during a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanWarning {
    pub path: PathBuf,
    pub message: String,
}

impl fmt::Display for ScanWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.message)
    }
}

/// Outcome of scanning a set of components
#[derive(Debug, Default)]
pub struct ScanReport {
    pub records: Vec<PackageRecord>,
    pub warnings: Vec<ScanWarning>,
    /// Records dropped because a newer version shares their name and architecture
    pub superseded: usize,
}

/// Scanner configuration
#[derive(Debug, Clone)]
pub struct Scanner {
    pool: Pool,
    multiversion: bool,
}

impl Scanner {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            multiversion: true,
        }
    }

    /// Keep every version of a package (`true`) or only the newest per architecture
    pub fn multiversion(mut self, enabled: bool) -> Self {
        self.multiversion = enabled;
        self
    }

    /// Lazily scan one component, one item per archive found
    pub fn scan_component<'a>(
        &'a self,
        component: &'a str,
    ) -> impl Iterator<Item = std::result::Result<PackageRecord, ScanWarning>> + 'a {
        self.archive_paths(component)
            .map(move |item| item.and_then(|path| self.scan_archive(component, &path)))
    }

    /// Archives under one component, in file name order
    fn archive_paths<'a>(
        &'a self,
        component: &'a str,
    ) -> impl Iterator<Item = std::result::Result<PathBuf, ScanWarning>> + Send + 'a {
        WalkDir::new(self.pool.component_dir(component))
            .sort_by_file_name()
            .into_iter()
            .filter_map(move |entry| match entry {
                Ok(entry) if entry.file_type().is_file() && pool::is_archive(entry.path()) => {
                    Some(Ok(entry.into_path()))
                }
                Ok(_) => None,
                // A missing component directory just means no packages yet
                Err(e) if e.depth() == 0 && is_not_found(&e) => {
                    debug!("Component {} has no pool directory", component);
                    None
                }
                Err(e) => Some(Err(ScanWarning {
                    path: e.path().map(Path::to_path_buf).unwrap_or_default(),
                    message: e.to_string(),
                })),
            })
    }

    /// Scan every listed component, parsing archives in parallel
    ///
    /// Walks the same archives as [`Scanner::scan_component`]. Records come
    /// back sorted by pool path and warnings by file path.
    pub fn scan(&self, components: &[String]) -> Result<ScanReport> {
        let results: Vec<_> = components
            .iter()
            .flat_map(|component| {
                self.archive_paths(component)
                    .map(move |item| (component.as_str(), item))
            })
            .par_bridge()
            .map(|(component, item)| item.and_then(|path| self.scan_archive(component, &path)))
            .collect();

        let mut records = Vec::with_capacity(results.len());
        let mut warnings = Vec::new();
        for result in results {
            match result {
                Ok(record) => records.push(record),
                Err(warning) => {
                    warn!("Skipping {}", warning);
                    warnings.push(warning);
                }
            }
        }
        records.sort_by(|a, b| a.filename.cmp(&b.filename));
        warnings.sort_by(|a, b| a.path.cmp(&b.path));

        check_duplicates(&records)?;

        let mut superseded = 0;
        if !self.multiversion {
            let before = records.len();
            records = keep_newest(records);
            superseded = before - records.len();
        }

        info!(
            "Scanned {} archives ({} skipped, {} superseded)",
            records.len(),
            warnings.len(),
            superseded
        );

        Ok(ScanReport {
            records,
            warnings,
            superseded,
        })
    }

    fn scan_archive(
        &self,
        component: &str,
        path: &Path,
    ) -> std::result::Result<PackageRecord, ScanWarning> {
        let warning = |e: Error| ScanWarning {
            path: path.to_path_buf(),
            message: e.to_string(),
        };

        let deb = DebPackage::parse(path).map_err(warning)?;
        let digests = hash::multi_hash_file(&RECORD_DIGESTS, path)
            .map_err(|e| warning(Error::Io(e)))?;
        let filename = path
            .strip_prefix(self.pool.root())
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .map_err(|_| warning(Error::IoError("archive is outside the repository root".into())))?;

        let record =
            PackageRecord::from_control(deb.control, component, filename, digests).map_err(warning)?;
        debug!(
            "Scanned {} {} ({})",
            record.name, record.version, record.architecture
        );
        Ok(record)
    }
}

fn is_not_found(e: &walkdir::Error) -> bool {
    e.io_error()
        .is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound)
}

/// Fail if two records share (name, version, architecture)
fn check_duplicates(records: &[PackageRecord]) -> Result<()> {
    let mut seen: HashMap<RecordKey, &str> = HashMap::with_capacity(records.len());
    for record in records {
        if let Some(first) = seen.insert(record.key(), &record.filename) {
            return Err(Error::DuplicatePackage {
                name: record.name.clone(),
                version: record.version.to_string(),
                architecture: record.architecture.to_string(),
                first: first.to_string(),
                second: record.filename.clone(),
            });
        }
    }
    Ok(())
}

/// Collapse records to the newest version per (name, architecture)
fn keep_newest(records: Vec<PackageRecord>) -> Vec<PackageRecord> {
    let mut newest: HashMap<(String, Architecture), PackageRecord> = HashMap::new();
    for record in records {
        let slot = (record.name.clone(), record.architecture);
        let existing_newer = newest
            .get(&slot)
            .is_some_and(|current| current.version >= record.version);
        if existing_newer {
            debug!(
                "Dropping {} {} ({}): a newer version is indexed",
                record.name, record.version, record.architecture
            );
            continue;
        }
        if let Some(old) = newest.insert(slot, record) {
            debug!(
                "Dropping {} {} ({}): superseded",
                old.name, old.version, old.architecture
            );
        }
    }
    let mut kept: Vec<PackageRecord> = newest.into_values().collect();
    kept.sort_by(|a, b| a.filename.cmp(&b.filename));
    kept
}
