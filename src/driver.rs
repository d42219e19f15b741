// src/driver.rs

//! Incremental update driver
//!
//! One run takes a suite from the current pool to a newly published
//! generation:
//!
//! ```text
//! Idle -> PackagesStaged -> Scanned -> Indexed -> Assembled -> Signed -> Published -> Idle
//! ```
//!
//! Any step may end the run in `Failed`. The signing key is resolved right
//! after the scan, before anything is rendered, and nothing under `dists/`
//! is touched before the publish step, which is itself all-or-nothing. A
//! failed run therefore always leaves the previously published suite
//! intact. Runs are idempotent: re-running on an unchanged pool republishes
//! identical indexes and keeps the Release `Version`.

use crate::config::{RepoConfig, SuiteConfig};
use crate::error::Error;
use crate::index::IndexBuilder;
use crate::lock::RepoLock;
use crate::pool::IngestOutcome;
use crate::publish::{self, Publisher, SuiteSnapshot};
use crate::release::ReleaseAssembler;
use crate::scanner::{ScanWarning, Scanner};
use crate::signing::{KeyProvider, ReleaseSigner};
use chrono::Utc;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, warn};

/// Progress of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    PackagesStaged,
    Scanned,
    Indexed,
    Assembled,
    Signed,
    Published,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::PackagesStaged => "packages-staged",
            Self::Scanned => "scanned",
            Self::Indexed => "indexed",
            Self::Assembled => "assembled",
            Self::Signed => "signed",
            Self::Published => "published",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Machine-readable cause of a failed run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// No secret key matches the configured identity
    NoSigningKey,
    /// More than one secret key matches the configured identity
    AmbiguousSigningKey,
    SigningFailed,
    /// Staging or publishing hit a filesystem error
    PublishIo,
    /// Reading the pool or building the suite failed before signing
    Scan,
    /// The pool holds conflicting or duplicate archives
    PoolCorruption { corrupt_archives: usize },
    /// Another run holds the repository lock
    RepositoryLocked,
    Configuration,
    /// Staged output did not match its own manifest or signatures
    Integrity,
}

impl FailureReason {
    /// Classify a pipeline error
    pub fn from_error(error: &Error, corrupt_archives: usize) -> Self {
        match error {
            Error::NoSigningKey(_) => Self::NoSigningKey,
            Error::AmbiguousSigningKey { .. } => Self::AmbiguousSigningKey,
            Error::SigningFailed(_) => Self::SigningFailed,
            Error::PoolConflict(_) | Error::DuplicatePackage { .. } => {
                Self::PoolCorruption { corrupt_archives }
            }
            Error::RepositoryLocked(_) => Self::RepositoryLocked,
            Error::ConfigError(_) | Error::NotFoundError(_) => Self::Configuration,
            Error::ChecksumMismatch { .. } | Error::VerificationFailed(_) => Self::Integrity,
            Error::ParseError(_) | Error::InvalidArchive { .. } => Self::Scan,
            Error::Io(_) | Error::IoError(_) | Error::PublishFailed(_) => Self::PublishIo,
        }
    }

    /// Classify an error raised while a run was in `state`
    ///
    /// Filesystem errors count as publish failures only once the release
    /// is signed; before that they come from the pool or the index build.
    pub fn during(error: &Error, state: RunState, corrupt_archives: usize) -> Self {
        match Self::from_error(error, corrupt_archives) {
            Self::PublishIo if state != RunState::Signed => Self::Scan,
            reason => reason,
        }
    }

    /// Process exit code reported by the command line
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration => 2,
            Self::NoSigningKey => 3,
            Self::AmbiguousSigningKey => 4,
            Self::SigningFailed => 5,
            Self::PublishIo => 6,
            Self::PoolCorruption { .. } => 7,
            Self::RepositoryLocked => 8,
            Self::Integrity => 9,
            Self::Scan => 10,
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSigningKey => f.write_str("no signing key found"),
            Self::AmbiguousSigningKey => f.write_str("signing key is ambiguous"),
            Self::SigningFailed => f.write_str("signing failed"),
            Self::PublishIo => f.write_str("publish I/O error"),
            Self::PoolCorruption { corrupt_archives } => write!(
                f,
                "pool corruption ({} corrupt archives)",
                corrupt_archives
            ),
            Self::RepositoryLocked => f.write_str("repository locked"),
            Self::Configuration => f.write_str("configuration error"),
            Self::Integrity => f.write_str("integrity check failed"),
            Self::Scan => f.write_str("scan failed"),
        }
    }
}

/// A failed run
#[derive(Debug, Error)]
#[error("update of suite '{suite}' failed after {reached} ({reason}): {error}")]
pub struct RunFailure {
    pub suite: String,
    pub reason: FailureReason,
    /// Last state completed before the failure
    pub reached: RunState,
    #[source]
    pub error: Error,
    /// Per-archive warnings collected before the failure
    pub warnings: Vec<ScanWarning>,
}

/// What to run
#[derive(Debug, Clone, Default)]
pub struct UpdateRequest {
    pub suite: String,
    /// Component new archives are added to (the suite's first by default)
    pub component: Option<String>,
    /// New archives to add to the pool before indexing
    pub archives: Vec<PathBuf>,
}

/// A successful run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub suite: String,
    /// Release `Version` now published
    pub version: String,
    /// Archives copied into the pool
    pub added: Vec<String>,
    /// Archives that were already in the pool
    pub already_present: Vec<String>,
    /// Records indexed
    pub records: usize,
    /// Index files published (every representation)
    pub index_files: usize,
    pub warnings: Vec<ScanWarning>,
    pub generation: PathBuf,
    /// Every state the run passed through, in order
    pub transitions: Vec<RunState>,
}

/// Runs updates against one repository
pub struct UpdateDriver<'a> {
    config: &'a RepoConfig,
    keys: &'a dyn KeyProvider,
}

/// Mutable bookkeeping of a single run
struct Run {
    suite: String,
    state: RunState,
    transitions: Vec<RunState>,
    warnings: Vec<ScanWarning>,
}

impl Run {
    fn new(suite: &str) -> Self {
        Self {
            suite: suite.to_string(),
            state: RunState::Idle,
            transitions: vec![RunState::Idle],
            warnings: Vec::new(),
        }
    }

    fn advance(&mut self, state: RunState) {
        info!("{}: {} -> {}", self.suite, self.state, state);
        self.state = state;
        self.transitions.push(state);
    }

    fn fail(&mut self, error: Error) -> RunFailure {
        let reason = FailureReason::during(&error, self.state, self.warnings.len());
        warn!("{}: {} -> failed: {}", self.suite, self.state, error);
        let reached = self.state;
        self.state = RunState::Failed;
        self.transitions.push(RunState::Failed);
        RunFailure {
            suite: self.suite.clone(),
            reason,
            reached,
            error,
            warnings: std::mem::take(&mut self.warnings),
        }
    }
}

impl<'a> UpdateDriver<'a> {
    pub fn new(config: &'a RepoConfig, keys: &'a dyn KeyProvider) -> Self {
        Self { config, keys }
    }

    /// Run every configured suite in order, stopping at the first failure
    pub fn run_all(&self, archives: &[PathBuf]) -> Result<Vec<RunReport>, RunFailure> {
        let mut reports = Vec::with_capacity(self.config.suites.len());
        for suite in &self.config.suites {
            reports.push(self.run(&UpdateRequest {
                suite: suite.name.clone(),
                component: None,
                archives: archives.to_vec(),
            })?);
        }
        Ok(reports)
    }

    /// Run one suite from staging new archives to publishing
    pub fn run(&self, request: &UpdateRequest) -> Result<RunReport, RunFailure> {
        let mut run = Run::new(&request.suite);

        let suite = self
            .config
            .suite(&request.suite)
            .map_err(|e| run.fail(e))?;
        let _lock = RepoLock::try_acquire(&self.config.root).map_err(|e| run.fail(e))?;

        // Idle -> PackagesStaged
        let (added, already_present) = self.stage_archives(suite, request, &mut run)?;
        run.advance(RunState::PackagesStaged);

        // PackagesStaged -> Scanned
        let scanner = Scanner::new(self.config.pool()).multiversion(self.config.multiversion);
        let report = scanner
            .scan(&suite.components)
            .map_err(|e| run.fail(e))?;
        run.warnings.extend(report.warnings);
        run.advance(RunState::Scanned);

        let signer = ReleaseSigner::resolve(self.keys, &self.config.signing.identity)
            .map_err(|e| run.fail(e))?;

        // Scanned -> Indexed
        let builder = IndexBuilder::new(self.config.all_policy, &self.config.compression);
        let files = builder
            .build_suite(&report.records, &suite.components, &suite.architectures)
            .map_err(|e| run.fail(e))?;
        run.advance(RunState::Indexed);

        // Indexed -> Assembled
        let previous = publish::published_release(&self.config.root, &suite.name);
        let manifest = ReleaseAssembler::new(&self.config.digests).assemble(
            &self.config.suite_metadata(suite),
            &files,
            previous.as_ref(),
            Utc::now(),
        );
        run.advance(RunState::Assembled);

        // Assembled -> Signed
        let signed = signer
            .sign(manifest.render().as_bytes())
            .map_err(|e| run.fail(e))?;
        run.advance(RunState::Signed);

        // Signed -> Published
        let snapshot = SuiteSnapshot {
            suite: suite.name.clone(),
            files,
            manifest,
            signed,
        };
        let publisher = Publisher::new(&self.config.root)
            .with_modes(self.config.file_mode, self.config.dir_mode)
            .keep_generations(self.config.keep_generations);
        let published = publisher
            .publish(&snapshot, &signer.public_cert())
            .map_err(|e| run.fail(e))?;
        run.advance(RunState::Published);
        run.advance(RunState::Idle);

        if !run.warnings.is_empty() {
            warn!(
                "{}: published with {} skipped archives",
                suite.name,
                run.warnings.len()
            );
            for warning in &run.warnings {
                warn!("  {}", warning);
            }
        }

        Ok(RunReport {
            suite: suite.name.clone(),
            version: snapshot.manifest.version,
            added,
            already_present,
            records: report.records.len(),
            index_files: snapshot.files.len(),
            warnings: run.warnings,
            generation: published.generation,
            transitions: run.transitions,
        })
    }

    /// Copy requested archives into the pool
    ///
    /// An archive that cannot be parsed is skipped with a warning; a pool
    /// conflict fails the run.
    fn stage_archives(
        &self,
        suite: &SuiteConfig,
        request: &UpdateRequest,
        run: &mut Run,
    ) -> Result<(Vec<String>, Vec<String>), RunFailure> {
        let component = match request.component.as_deref() {
            Some(c) if suite.components.iter().any(|sc| sc == c) => c,
            Some(c) => {
                return Err(run.fail(Error::ConfigError(format!(
                    "component '{}' is not part of suite '{}'",
                    c, suite.name
                ))));
            }
            None => suite.components.first().map(String::as_str).ok_or_else(|| {
                run.fail(Error::ConfigError(format!(
                    "suite '{}' has no components",
                    suite.name
                )))
            })?,
        };

        let pool = self.config.pool();
        let mut added = Vec::new();
        let mut already_present = Vec::new();

        for archive in &request.archives {
            match pool.ingest(archive, component) {
                Ok(IngestOutcome::Added(path)) => added.push(path),
                Ok(IngestOutcome::AlreadyPresent(path)) => already_present.push(path),
                Err(e @ Error::InvalidArchive { .. }) | Err(e @ Error::ParseError(_)) => {
                    let warning = ScanWarning {
                        path: archive.clone(),
                        message: e.to_string(),
                    };
                    warn!("Not adding {}", warning);
                    run.warnings.push(warning);
                }
                Err(e) => return Err(run.fail(e)),
            }
        }

        Ok((added, already_present))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_classification() {
        assert_eq!(
            FailureReason::from_error(&Error::NoSigningKey("x".into()), 0),
            FailureReason::NoSigningKey
        );
        assert_eq!(
            FailureReason::from_error(&Error::PoolConflict("p".into()), 3),
            FailureReason::PoolCorruption { corrupt_archives: 3 }
        );
        assert_eq!(
            FailureReason::from_error(
                &Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full")),
                0
            ),
            FailureReason::PublishIo
        );
        assert_eq!(
            FailureReason::from_error(&Error::ParseError("bad stanza".into()), 0),
            FailureReason::Scan
        );
    }

    #[test]
    fn test_io_failure_before_signing_is_a_scan_failure() {
        let io = || Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        for state in [RunState::Idle, RunState::PackagesStaged, RunState::Scanned, RunState::Indexed] {
            assert_eq!(FailureReason::during(&io(), state, 0), FailureReason::Scan);
        }
        assert_eq!(
            FailureReason::during(&io(), RunState::Signed, 0),
            FailureReason::PublishIo
        );
        assert_eq!(
            FailureReason::during(&Error::NoSigningKey("x".into()), RunState::Scanned, 0),
            FailureReason::NoSigningKey
        );

        let mut run = Run::new("stable");
        run.advance(RunState::PackagesStaged);
        assert_eq!(run.fail(io()).reason, FailureReason::Scan);
    }

    #[test]
    fn test_exit_codes_are_distinct() {
        let reasons = [
            FailureReason::NoSigningKey,
            FailureReason::AmbiguousSigningKey,
            FailureReason::SigningFailed,
            FailureReason::PublishIo,
            FailureReason::PoolCorruption { corrupt_archives: 0 },
            FailureReason::RepositoryLocked,
            FailureReason::Configuration,
            FailureReason::Integrity,
            FailureReason::Scan,
        ];
        let mut codes: Vec<i32> = reasons.iter().map(FailureReason::exit_code).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), reasons.len());
        assert!(!codes.contains(&0) && !codes.contains(&1));
    }

    #[test]
    fn test_run_bookkeeping() {
        let mut run = Run::new("stable");
        run.advance(RunState::PackagesStaged);
        run.advance(RunState::Scanned);
        let failure = run.fail(Error::NoSigningKey("Example".into()));
        assert_eq!(failure.reached, RunState::Scanned);
        assert_eq!(failure.reason, FailureReason::NoSigningKey);
        assert_eq!(run.transitions.last(), Some(&RunState::Failed));
    }
}
