// src/publish/mod.rs

//! Publishing suites into the served tree
//!
//! Each publish builds a complete generation of `dists/<suite>` in a
//! staging directory, checks it, and only then makes it visible:
//!
//! ```text
//! <root>/
//!   dists/<suite> -> ../.generations/<suite>/<generation>
//!   .generations/<suite>/
//!     .staging-XXXXXX/        being written
//!     20261018T120000Z-1a2b3c4d/
//!     20261017T080000Z-9f8e7d6c/   kept for clients mid-download
//!   pool/...
//! ```
//!
//! The switch is a single `rename(2)` of a fresh symlink over
//! `dists/<suite>`, so a client sees either the old generation or the new
//! one in full, never a Release whose checksums point at files that are not
//! there yet. An interrupted publish leaves only a stale staging directory,
//! which the next publish removes.

use crate::error::{Error, Result};
use crate::hash::{self, HashAlgorithm, MultiDigest};
use crate::index::{self, IndexFile, PACKAGES_FILE};
use crate::release::{ReleaseManifest, RELEASE_FILE};
use crate::signing::{self, SignedRelease, DETACHED_SIGNATURE_FILE, INLINE_SIGNED_FILE};
use chrono::Utc;
use rayon::prelude::*;
use sequoia_openpgp::Cert;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Served suites live under `<root>/dists`
pub const DISTS_DIR: &str = "dists";

/// Generations of each suite live under `<root>/.generations/<suite>`
pub const GENERATIONS_DIR: &str = ".generations";

const STAGING_PREFIX: &str = ".staging-";

/// Everything that makes up one generation of a suite
#[derive(Debug, Clone)]
pub struct SuiteSnapshot {
    pub suite: String,
    pub files: Vec<IndexFile>,
    pub manifest: ReleaseManifest,
    pub signed: SignedRelease,
}

/// Outcome of a successful publish
#[derive(Debug, Clone)]
pub struct PublishReport {
    /// Directory of the generation now served
    pub generation: PathBuf,
    /// Superseded generations deleted after the switch
    pub removed_generations: Vec<PathBuf>,
}

/// Outcome of verifying a published suite
#[derive(Debug, Clone)]
pub struct VerifyReport {
    pub suite: String,
    pub version: String,
    /// Files checked against the checksum table
    pub files: usize,
    /// Checksum entries checked (files times algorithms)
    pub entries: usize,
}

/// Writes suite generations into a repository root
#[derive(Debug, Clone)]
pub struct Publisher {
    root: PathBuf,
    file_mode: u32,
    dir_mode: u32,
    keep_generations: usize,
}

impl Publisher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            file_mode: 0o644,
            dir_mode: 0o755,
            keep_generations: 2,
        }
    }

    pub fn with_modes(mut self, file_mode: u32, dir_mode: u32) -> Self {
        self.file_mode = file_mode;
        self.dir_mode = dir_mode;
        self
    }

    pub fn keep_generations(mut self, keep: usize) -> Self {
        self.keep_generations = keep;
        self
    }

    /// `<root>/dists/<suite>`
    pub fn suite_dir(&self, suite: &str) -> PathBuf {
        suite_dir(&self.root, suite)
    }

    fn generations_dir(&self, suite: &str) -> PathBuf {
        self.root.join(GENERATIONS_DIR).join(suite)
    }

    /// Stage, check and switch to a new generation of a suite
    ///
    /// `cert` is the public certificate of the signing key; the staged
    /// signatures must verify against it before anything is switched.
    pub fn publish(&self, snapshot: &SuiteSnapshot, cert: &Cert) -> Result<PublishReport> {
        let generations = self.generations_dir(&snapshot.suite);
        self.create_dir(&generations)?;
        self.remove_stale_staging(&generations)?;

        // Removed on drop unless renamed into place first
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&generations)?;
        fs::set_permissions(staging.path(), fs::Permissions::from_mode(self.dir_mode))?;
        self.stage(staging.path(), snapshot)?;
        verify_generation(staging.path(), &snapshot.manifest, cert)?;

        let name = format!(
            "{}-{}",
            Utc::now().format("%Y%m%dT%H%M%SZ"),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        let generation = generations.join(&name);
        fs::rename(staging.path(), &generation).map_err(|e| {
            Error::PublishFailed(format!("Failed to finalize generation {}: {}", name, e))
        })?;

        self.switch_to(&snapshot.suite, &name)?;
        info!(
            "Published {} version {} ({})",
            snapshot.suite,
            snapshot.manifest.version,
            generation.display()
        );

        let removed_generations = self.prune_generations(&snapshot.suite, &name)?;

        Ok(PublishReport {
            generation,
            removed_generations,
        })
    }

    fn stage(&self, staging: &Path, snapshot: &SuiteSnapshot) -> Result<()> {
        let rendered = snapshot.manifest.render();
        if rendered.as_bytes() != snapshot.signed.release.as_slice() {
            return Err(Error::ChecksumMismatch {
                path: RELEASE_FILE.to_string(),
                expected: hash::sha256(rendered.as_bytes()),
                actual: hash::sha256(&snapshot.signed.release),
            });
        }

        self.create_dir(staging)?;
        for file in &snapshot.files {
            self.write_file(&staging.join(&file.path), &file.content)?;
        }
        self.write_file(&staging.join(RELEASE_FILE), &snapshot.signed.release)?;
        self.write_file(&staging.join(DETACHED_SIGNATURE_FILE), &snapshot.signed.detached)?;
        self.write_file(&staging.join(INLINE_SIGNED_FILE), &snapshot.signed.inline)?;

        debug!(
            "Staged {} index files in {}",
            snapshot.files.len(),
            staging.display()
        );
        Ok(())
    }

    /// Point `dists/<suite>` at a generation
    fn switch_to(&self, suite: &str, generation: &str) -> Result<()> {
        let dists = self.root.join(DISTS_DIR);
        self.create_dir(&dists)?;

        let link = dists.join(suite);
        let target = Path::new("..")
            .join(GENERATIONS_DIR)
            .join(suite)
            .join(generation);
        let temp_link = dists.join(format!(".{}.{}.swap", suite, uuid::Uuid::new_v4().simple()));

        std::os::unix::fs::symlink(&target, &temp_link)
            .map_err(|e| Error::PublishFailed(format!("Failed to create symlink: {}", e)))?;

        // A real directory (a tree written by other tools) cannot be replaced
        // by rename; move it into the generations so it is retained and pruned
        if let Ok(meta) = fs::symlink_metadata(&link)
            && meta.file_type().is_dir()
        {
            let aside = self
                .generations_dir(suite)
                .join(format!("{}-previous", Utc::now().format("%Y%m%dT%H%M%SZ")));
            warn!(
                "{} is a plain directory; moving it to {}",
                link.display(),
                aside.display()
            );
            if let Err(e) = fs::rename(&link, &aside) {
                let _ = fs::remove_file(&temp_link);
                return Err(Error::PublishFailed(format!(
                    "Failed to move {} aside: {}",
                    link.display(),
                    e
                )));
            }
        }

        if let Err(e) = fs::rename(&temp_link, &link) {
            let _ = fs::remove_file(&temp_link);
            return Err(Error::PublishFailed(format!(
                "Failed to switch {}: {}",
                link.display(),
                e
            )));
        }

        sync_dir(&dists);
        Ok(())
    }

    fn prune_generations(&self, suite: &str, current: &str) -> Result<Vec<PathBuf>> {
        let mut names = generation_names(&self.generations_dir(suite))?;
        names.retain(|n| n != current);
        names.sort_by(|a, b| b.cmp(a));

        let mut removed = Vec::new();
        for name in names.into_iter().skip(self.keep_generations) {
            let path = self.generations_dir(suite).join(&name);
            match fs::remove_dir_all(&path) {
                Ok(()) => {
                    debug!("Removed old generation {}", path.display());
                    removed.push(path);
                }
                Err(e) => warn!("Could not remove old generation {}: {}", path.display(), e),
            }
        }
        Ok(removed)
    }

    fn remove_stale_staging(&self, generations: &Path) -> Result<()> {
        for entry in fs::read_dir(generations)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().starts_with(STAGING_PREFIX) {
                warn!("Removing stale staging directory {}", entry.path().display());
                fs::remove_dir_all(entry.path())?;
            }
        }
        Ok(())
    }

    fn create_dir(&self, dir: &Path) -> Result<()> {
        if dir.is_dir() {
            return Ok(());
        }
        if let Some(parent) = dir.parent() {
            self.create_dir(parent)?;
        }
        fs::create_dir(dir).or_else(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                Ok(())
            } else {
                Err(e)
            }
        })?;
        fs::set_permissions(dir, fs::Permissions::from_mode(self.dir_mode))?;
        Ok(())
    }

    fn write_file(&self, path: &Path, content: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            self.create_dir(parent)?;
        }
        let mut file = File::create(path)?;
        file.write_all(content)?;
        file.sync_all()?;
        fs::set_permissions(path, fs::Permissions::from_mode(self.file_mode))?;
        Ok(())
    }
}

/// `<root>/dists/<suite>`
pub fn suite_dir(root: &Path, suite: &str) -> PathBuf {
    root.join(DISTS_DIR).join(suite)
}

fn generation_names(dir: &Path) -> Result<Vec<String>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if entry.file_type()?.is_dir() && !name.starts_with('.') {
            names.push(name);
        }
    }
    Ok(names)
}

fn sync_dir(dir: &Path) {
    // Not every filesystem supports fsync on directories
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}

/// Check a generation directory against its manifest and signatures
///
/// Every checksum entry must match the file on disk, `Release.gpg` must be
/// a valid signature of `Release`, and `InRelease` must verify and embed
/// `Release` byte for byte.
pub fn verify_generation(dir: &Path, manifest: &ReleaseManifest, cert: &Cert) -> Result<usize> {
    let release = fs::read(dir.join(RELEASE_FILE))?;
    let detached = fs::read(dir.join(DETACHED_SIGNATURE_FILE))?;
    let inline = fs::read(dir.join(INLINE_SIGNED_FILE))?;

    signing::verify_detached(cert, &release, &detached)?;
    let embedded = signing::verify_inline(cert, &inline)?;
    if embedded != release {
        return Err(Error::ChecksumMismatch {
            path: INLINE_SIGNED_FILE.to_string(),
            expected: hash::sha256(&release),
            actual: hash::sha256(&embedded),
        });
    }

    verify_checksums(dir, manifest)
}

fn verify_checksums(dir: &Path, manifest: &ReleaseManifest) -> Result<usize> {
    let algorithms: Vec<HashAlgorithm> = manifest.checksums.iter().map(|b| b.algorithm).collect();
    let paths: BTreeSet<&str> = manifest
        .checksums
        .iter()
        .flat_map(|b| b.entries.iter().map(|e| e.path.as_str()))
        .collect();

    let digests: BTreeMap<&str, Option<MultiDigest>> = paths
        .par_iter()
        .map(|path| (*path, hash::multi_hash_file(&algorithms, &dir.join(path)).ok()))
        .collect();

    let mut checked = 0;
    for block in &manifest.checksums {
        for entry in &block.entries {
            let actual = digests.get(entry.path.as_str()).and_then(Option::as_ref);
            let Some(actual) = actual else {
                return Err(Error::ChecksumMismatch {
                    path: entry.path.clone(),
                    expected: entry.digest.clone(),
                    actual: "missing".to_string(),
                });
            };
            let actual_digest = actual
                .get(block.algorithm)
                .map(|h| h.value.as_str())
                .unwrap_or_default();
            if actual.size != entry.size || actual_digest != entry.digest {
                return Err(Error::ChecksumMismatch {
                    path: entry.path.clone(),
                    expected: format!("{} {} bytes", entry.digest, entry.size),
                    actual: format!("{} {} bytes", actual_digest, actual.size),
                });
            }
            checked += 1;
        }
    }

    debug!("Verified {} checksum entries in {}", checked, dir.display());
    Ok(checked)
}

/// The Release currently served for a suite, if any
///
/// An unreadable Release is logged and treated as absent so a damaged
/// suite can be republished.
pub fn published_release(root: &Path, suite: &str) -> Option<ReleaseManifest> {
    let path = suite_dir(root, suite).join(RELEASE_FILE);
    let text = fs::read_to_string(&path).ok()?;
    match ReleaseManifest::parse(&text) {
        Ok(manifest) => Some(manifest),
        Err(e) => {
            warn!("Ignoring unreadable {}: {}", path.display(), e);
            None
        }
    }
}

/// Verify the suite currently served under `root`
pub fn verify_published(root: &Path, suite: &str, cert: &Cert) -> Result<VerifyReport> {
    let dir = suite_dir(root, suite);
    let release_path = dir.join(RELEASE_FILE);
    let text = fs::read_to_string(&release_path).map_err(|e| {
        Error::NotFoundError(format!("{}: {}", release_path.display(), e))
    })?;
    let manifest = ReleaseManifest::parse(&text)?;

    let entries = verify_generation(&dir, &manifest, cert)?;
    let files = manifest
        .strongest_block()
        .map(|b| b.entries.len())
        .unwrap_or_default();

    info!(
        "{} version {}: {} files, {} checksum entries verified",
        suite, manifest.version, files, entries
    );

    Ok(VerifyReport {
        suite: suite.to_string(),
        version: manifest.version,
        files,
        entries,
    })
}

/// Pool paths referenced by any retained generation of a suite
///
/// Superseded generations stay on disk for clients mid-download, so the
/// archives their indexes list still count as referenced.
pub fn referenced_pool_files(root: &Path, suite: &str) -> Result<BTreeSet<String>> {
    let generations = root.join(GENERATIONS_DIR).join(suite);
    let mut dirs: Vec<PathBuf> = generation_names(&generations)?
        .into_iter()
        .map(|name| generations.join(name))
        .collect();
    // A plain directory served from before the first switch
    let served = suite_dir(root, suite);
    if fs::symlink_metadata(&served).is_ok_and(|m| m.file_type().is_dir()) {
        dirs.push(served);
    }

    let mut referenced = BTreeSet::new();
    for dir in &dirs {
        collect_references(dir, &mut referenced)?;
    }
    debug!(
        "{}: {} pool files referenced by {} generations",
        suite,
        referenced.len(),
        dirs.len()
    );
    Ok(referenced)
}

fn collect_references(dir: &Path, referenced: &mut BTreeSet<String>) -> Result<()> {
    let Ok(text) = fs::read_to_string(dir.join(RELEASE_FILE)) else {
        return Ok(());
    };
    let manifest = ReleaseManifest::parse(&text)?;
    let Some(block) = manifest.strongest_block() else {
        return Ok(());
    };

    for entry in &block.entries {
        if !entry.path.ends_with(&format!("/{}", PACKAGES_FILE)) {
            continue;
        }
        let content = fs::read(dir.join(&entry.path))?;
        for stanza in index::parse_index(&content)? {
            if let Some(filename) = stanza.get("Filename") {
                referenced.insert(filename.to_string());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::release::{ReleaseAssembler, SuiteMetadata};
    use crate::signing::{MemoryKeyring, ReleaseSigner};
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn snapshot(signer: &ReleaseSigner, content: &[u8]) -> SuiteSnapshot {
        let files = vec![IndexFile {
            path: "main/binary-amd64/Packages".to_string(),
            content: content.to_vec(),
        }];
        let meta = SuiteMetadata {
            origin: "Test".to_string(),
            suite: "stable".to_string(),
            architectures: vec!["amd64".to_string()],
            components: vec!["main".to_string()],
            ..Default::default()
        };
        let manifest = ReleaseAssembler::new(&[HashAlgorithm::Md5, HashAlgorithm::Sha256])
            .assemble(
                &meta,
                &files,
                None,
                Utc.with_ymd_and_hms(2026, 10, 18, 0, 0, 0).unwrap(),
            );
        let signed = signer.sign(manifest.render().as_bytes()).unwrap();
        SuiteSnapshot {
            suite: "stable".to_string(),
            files,
            manifest,
            signed,
        }
    }

    fn signer() -> ReleaseSigner {
        let cert = MemoryKeyring::generate("Test <test@example.org>").unwrap();
        ReleaseSigner::from_cert(cert).unwrap()
    }

    #[test]
    fn test_publish_and_verify() {
        let dir = TempDir::new().unwrap();
        let signer = signer();
        let publisher = Publisher::new(dir.path());

        let report = publisher
            .publish(&snapshot(&signer, b"Package: a\n"), &signer.public_cert())
            .unwrap();
        assert!(report.generation.is_dir());

        let link = dir.path().join("dists/stable");
        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(
            fs::read(link.join("main/binary-amd64/Packages")).unwrap(),
            b"Package: a\n"
        );
        let mode = fs::metadata(link.join("Release")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);

        let verified = verify_published(dir.path(), "stable", &signer.public_cert()).unwrap();
        assert_eq!(verified.files, 1);
        assert_eq!(verified.entries, 2);
    }

    #[test]
    fn test_generations_are_pruned() {
        let dir = TempDir::new().unwrap();
        let signer = signer();
        let publisher = Publisher::new(dir.path()).keep_generations(1);

        for n in 0..4 {
            let content = format!("Package: a{}\n", n);
            publisher
                .publish(&snapshot(&signer, content.as_bytes()), &signer.public_cert())
                .unwrap();
        }

        let names = generation_names(&dir.path().join(".generations/stable")).unwrap();
        assert_eq!(names.len(), 2);
        assert_eq!(
            fs::read(dir.path().join("dists/stable/main/binary-amd64/Packages")).unwrap(),
            b"Package: a3\n"
        );
    }

    #[test]
    fn test_mismatched_release_is_refused() {
        let dir = TempDir::new().unwrap();
        let signer = signer();
        let mut snap = snapshot(&signer, b"Package: a\n");
        snap.files[0].content = b"Package: b\n".to_vec();

        let result = Publisher::new(dir.path()).publish(&snap, &signer.public_cert());
        assert!(matches!(result, Err(Error::ChecksumMismatch { .. })));
        assert!(!dir.path().join("dists/stable").exists());
        assert!(generation_names(&dir.path().join(".generations/stable"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_foreign_key_is_refused() {
        let dir = TempDir::new().unwrap();
        let signer = signer();
        let other = MemoryKeyring::generate("Other <o@example.org>").unwrap();

        let result = Publisher::new(dir.path()).publish(&snapshot(&signer, b"x\n"), &other);
        assert!(matches!(result, Err(Error::VerificationFailed(_))));
        assert!(!dir.path().join("dists/stable").exists());
    }

    #[test]
    fn test_plain_directory_is_replaced() {
        let dir = TempDir::new().unwrap();
        let legacy = dir.path().join("dists/stable");
        fs::create_dir_all(&legacy).unwrap();
        fs::write(legacy.join("Release"), b"old").unwrap();

        let signer = signer();
        Publisher::new(dir.path())
            .publish(&snapshot(&signer, b"Package: a\n"), &signer.public_cert())
            .unwrap();

        assert!(fs::symlink_metadata(&legacy).unwrap().file_type().is_symlink());
        assert_eq!(
            generation_names(&dir.path().join(".generations/stable")).unwrap().len(),
            2
        );
    }

    #[test]
    fn test_stale_staging_is_removed() {
        let dir = TempDir::new().unwrap();
        let signer = signer();
        let publisher = Publisher::new(dir.path());
        publisher
            .publish(&snapshot(&signer, b"Package: a\n"), &signer.public_cert())
            .unwrap();

        // Left behind by a publish that never finished
        let stale = dir.path().join(".generations/stable/.staging-abc123");
        fs::create_dir_all(stale.join("main/binary-amd64")).unwrap();
        fs::write(stale.join("main/binary-amd64/Packages"), b"Package: half\n").unwrap();
        assert_eq!(
            fs::read(dir.path().join("dists/stable/main/binary-amd64/Packages")).unwrap(),
            b"Package: a\n"
        );

        publisher
            .publish(&snapshot(&signer, b"Package: b\n"), &signer.public_cert())
            .unwrap();
        assert!(!stale.exists());
        assert_eq!(
            fs::read(dir.path().join("dists/stable/main/binary-amd64/Packages")).unwrap(),
            b"Package: b\n"
        );
        verify_published(dir.path(), "stable", &signer.public_cert()).unwrap();
    }

    #[test]
    fn test_referenced_pool_files() {
        let dir = TempDir::new().unwrap();
        let signer = signer();
        let both = b"Package: a\nFilename: pool/main/a/a/a_1_all.deb\n\nPackage: b\nFilename: pool/main/b/b/b_1_all.deb\n";
        let only_a = b"Package: a\nFilename: pool/main/a/a/a_1_all.deb\n";
        let publisher = Publisher::new(dir.path()).keep_generations(1);
        publisher
            .publish(&snapshot(&signer, both), &signer.public_cert())
            .unwrap();

        let referenced = referenced_pool_files(dir.path(), "stable").unwrap();
        assert_eq!(referenced.len(), 2);
        assert!(referenced.contains("pool/main/a/a/a_1_all.deb"));
        assert!(referenced_pool_files(dir.path(), "testing").unwrap().is_empty());

        // The retained predecessor still lists b
        publisher
            .publish(&snapshot(&signer, only_a), &signer.public_cert())
            .unwrap();
        assert_eq!(referenced_pool_files(dir.path(), "stable").unwrap().len(), 2);

        // Once it is pruned only a is left
        Publisher::new(dir.path())
            .keep_generations(0)
            .publish(&snapshot(&signer, only_a), &signer.public_cert())
            .unwrap();
        assert_eq!(
            referenced_pool_files(dir.path(), "stable").unwrap(),
            BTreeSet::from(["pool/main/a/a/a_1_all.deb".to_string()])
        );
    }
}
