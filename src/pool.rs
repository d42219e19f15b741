// src/pool.rs

//! Package pool: the on-disk home of every archive the repository serves
//!
//! Archives live at `pool/<component>/<prefix>/<source>/<file>`, where
//! `<prefix>` is the first letter of the source package name, or the first
//! four characters for `lib*` sources. The pool is append-only: adding an
//! archive that is already present is a no-op, and adding different bytes
//! under an existing name is refused. Removal only happens through
//! [`Pool::prune`], which callers must invoke explicitly.

use crate::error::{Error, Result};
use crate::hash::{self, HashAlgorithm};
use crate::packages::{validate_package_name, DebPackage, PackageRecord, RECORD_DIGESTS};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Name of the pool directory under the repository root
pub const POOL_DIR: &str = "pool";

/// Result of adding one archive to the pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The archive was copied into the pool at this root-relative path
    Added(String),
    /// An identical archive was already present at this path
    AlreadyPresent(String),
}

/// Archives removed (or that would be removed) by a prune
#[derive(Debug, Default)]
pub struct PruneReport {
    pub removed: Vec<String>,
    pub bytes_freed: u64,
    pub dry_run: bool,
}

/// The package pool under a repository root
#[derive(Debug, Clone)]
pub struct Pool {
    root: PathBuf,
    file_mode: u32,
    dir_mode: u32,
}

/// Directory prefix for a source package name
pub fn pool_prefix(source: &str) -> String {
    if source.starts_with("lib") && source.len() > 3 {
        source.chars().take(4).collect()
    } else {
        source.chars().take(1).collect()
    }
}

impl Pool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            file_mode: 0o644,
            dir_mode: 0o755,
        }
    }

    /// Permission bits applied to ingested archives and created directories
    pub fn with_modes(mut self, file_mode: u32, dir_mode: u32) -> Self {
        self.file_mode = file_mode;
        self.dir_mode = dir_mode;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pool_dir(&self) -> PathBuf {
        self.root.join(POOL_DIR)
    }

    pub fn component_dir(&self, component: &str) -> PathBuf {
        self.pool_dir().join(component)
    }

    /// Root-relative path an archive is stored under
    pub fn relative_path(component: &str, source: &str, file_name: &str) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            POOL_DIR,
            component,
            pool_prefix(source),
            source,
            file_name
        )
    }

    /// Copy an archive into the pool
    ///
    /// The archive is parsed first, so nothing unreadable ever enters the
    /// pool. The file is named `<package>_<version>_<arch>.deb` (epoch
    /// dropped) regardless of its original name.
    pub fn ingest(&self, archive: &Path, component: &str) -> Result<IngestOutcome> {
        let deb = DebPackage::parse(archive)?;
        let digests = hash::multi_hash_file(&RECORD_DIGESTS, archive)?;

        let source = deb
            .control
            .get("Source")
            .and_then(|s| s.split_whitespace().next())
            .map(str::to_string);
        // Name, version and source become path segments below
        let invalid = |e: Error| match e {
            Error::ParseError(reason) => Error::InvalidArchive {
                path: archive.display().to_string(),
                reason,
            },
            other => other,
        };
        let record = PackageRecord::from_control(deb.control, component, String::new(), digests)
            .map_err(invalid)?;
        let source = source.unwrap_or_else(|| record.name.clone());
        validate_package_name(&source).map_err(invalid)?;

        let file_name = format!(
            "{}_{}_{}.deb",
            record.name,
            record.version.without_epoch(),
            record.architecture
        );
        let relative = Self::relative_path(component, &source, &file_name);
        let target = self.root.join(&relative);

        if target.exists() {
            let expected = record.sha256().map(|h| h.as_str()).unwrap_or_default();
            return match hash::verify_file(&target, expected, HashAlgorithm::Sha256) {
                Ok(()) => {
                    debug!("{} already in pool", relative);
                    Ok(IngestOutcome::AlreadyPresent(relative))
                }
                Err(e) => {
                    debug!("{}: {}", relative, e);
                    Err(Error::PoolConflict(relative))
                }
            };
        }

        let parent = target
            .parent()
            .ok_or_else(|| Error::IoError(format!("Pool path {} has no parent", relative)))?;
        self.create_dirs(parent)?;

        // Write to a temp name in the same directory, then rename into place
        let temp_path = parent.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));
        let copy_result = (|| -> Result<()> {
            let data = fs::read(archive)?;
            let mut file = File::create(&temp_path)?;
            file.write_all(&data)?;
            file.sync_all()?;
            fs::set_permissions(&temp_path, fs::Permissions::from_mode(self.file_mode))?;
            fs::rename(&temp_path, &target)?;
            Ok(())
        })();
        if let Err(e) = copy_result {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }

        info!("Added {} to pool", relative);
        Ok(IngestOutcome::Added(relative))
    }

    /// Every archive in the pool, as sorted root-relative paths
    pub fn archives(&self) -> Result<Vec<String>> {
        let pool_dir = self.pool_dir();
        if !pool_dir.exists() {
            return Ok(Vec::new());
        }

        let mut found = Vec::new();
        for entry in WalkDir::new(&pool_dir).sort_by_file_name() {
            let entry = entry.map_err(|e| Error::IoError(format!("Failed to walk pool: {}", e)))?;
            if !entry.file_type().is_file() || !is_archive(entry.path()) {
                continue;
            }
            found.push(self.relative_to_root(entry.path())?);
        }
        Ok(found)
    }

    /// Remove archives no published index references
    ///
    /// `referenced` holds root-relative paths (the `Filename` fields of the
    /// published indexes). Directories left empty are removed as well.
    pub fn prune(&self, referenced: &BTreeSet<String>, dry_run: bool) -> Result<PruneReport> {
        let mut report = PruneReport {
            dry_run,
            ..Default::default()
        };

        for relative in self.archives()? {
            if referenced.contains(&relative) {
                continue;
            }
            let path = self.root.join(&relative);
            let size = fs::metadata(&path)?.len();
            if dry_run {
                info!("Would remove unreferenced {}", relative);
            } else {
                fs::remove_file(&path)?;
                info!("Removed unreferenced {}", relative);
            }
            report.bytes_freed += size;
            report.removed.push(relative);
        }

        if !dry_run {
            self.remove_empty_dirs()?;
        }

        Ok(report)
    }

    fn remove_empty_dirs(&self) -> Result<()> {
        let pool_dir = self.pool_dir();
        if !pool_dir.exists() {
            return Ok(());
        }
        // contents_first visits children before their parent
        for entry in WalkDir::new(&pool_dir).min_depth(1).contents_first(true) {
            let entry = entry.map_err(|e| Error::IoError(format!("Failed to walk pool: {}", e)))?;
            if entry.file_type().is_dir() {
                let is_empty = fs::read_dir(entry.path())?.next().is_none();
                if is_empty {
                    if let Err(e) = fs::remove_dir(entry.path()) {
                        warn!("Could not remove {}: {}", entry.path().display(), e);
                    }
                }
            }
        }
        Ok(())
    }

    fn create_dirs(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        // Only directories inside the pool get their mode adjusted
        let mut current = Some(dir);
        while let Some(d) = current {
            if !d.starts_with(self.pool_dir()) {
                break;
            }
            fs::set_permissions(d, fs::Permissions::from_mode(self.dir_mode))?;
            current = d.parent();
        }
        Ok(())
    }

    fn relative_to_root(&self, path: &Path) -> Result<String> {
        let relative = path.strip_prefix(&self.root).map_err(|_| {
            Error::IoError(format!(
                "{} is outside {}",
                path.display(),
                self.root.display()
            ))
        })?;
        Ok(relative.to_string_lossy().replace('\\', "/"))
    }
}

/// Whether a path names a binary package archive
pub fn is_archive(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "deb")
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use tempfile::TempDir;

    fn write_deb(path: &Path, control: &str, payload: &[u8]) {
        let encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
        let mut tar = tar::Builder::new(encoder);
        let mut header = tar::Header::new_gnu();
        header.set_size(control.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        tar.append_data(&mut header, "./control", control.as_bytes())
            .unwrap();
        let control_tar = tar.into_inner().unwrap().finish().unwrap();

        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut ar = ar::Builder::new(File::create(path).unwrap());
        for (name, data) in [
            ("debian-binary", &b"2.0\n"[..]),
            ("control.tar.gz", &control_tar[..]),
            ("data.tar.gz", payload),
        ] {
            ar.append(&ar::Header::new(name.as_bytes().to_vec(), data.len() as u64), data)
                .unwrap();
        }
    }

    const CONTROL: &str = "Package: libfoo1\nSource: libfoo (1.2-1)\nVersion: 1:1.2-1\nArchitecture: amd64\n";

    #[test]
    fn test_ingest_places_by_source() {
        let dir = TempDir::new().unwrap();
        let incoming = dir.path().join("in/libfoo1.deb");
        write_deb(&incoming, CONTROL, b"payload");

        let pool = Pool::new(dir.path().join("repo")).with_modes(0o640, 0o750);
        let outcome = pool.ingest(&incoming, "main").unwrap();
        let expected = "pool/main/libf/libfoo/libfoo1_1.2-1_amd64.deb";
        assert_eq!(outcome, IngestOutcome::Added(expected.to_string()));

        let stored = dir.path().join("repo").join(expected);
        assert_eq!(fs::read(&stored).unwrap(), fs::read(&incoming).unwrap());
        assert_eq!(fs::metadata(&stored).unwrap().permissions().mode() & 0o777, 0o640);
        assert_eq!(pool.archives().unwrap(), [expected]);

        assert_eq!(
            pool.ingest(&incoming, "main").unwrap(),
            IngestOutcome::AlreadyPresent(expected.to_string())
        );
    }

    #[test]
    fn test_ingest_refuses_different_content() {
        let dir = TempDir::new().unwrap();
        let first = dir.path().join("in/a.deb");
        let second = dir.path().join("in/b.deb");
        write_deb(&first, CONTROL, b"one");
        write_deb(&second, CONTROL, b"two");

        let pool = Pool::new(dir.path().join("repo"));
        pool.ingest(&first, "main").unwrap();
        assert!(matches!(
            pool.ingest(&second, "main"),
            Err(Error::PoolConflict(_))
        ));
        assert_eq!(pool.archives().unwrap().len(), 1);
    }

    #[test]
    fn test_ingest_rejects_invalid_archive() {
        let dir = TempDir::new().unwrap();
        let junk = dir.path().join("junk.deb");
        fs::write(&junk, b"junk").unwrap();

        let pool = Pool::new(dir.path().join("repo"));
        assert!(matches!(
            pool.ingest(&junk, "main"),
            Err(Error::InvalidArchive { .. })
        ));
        assert!(!pool.pool_dir().exists());
    }

    #[test]
    fn test_ingest_rejects_unsafe_path_fields() {
        let dir = TempDir::new().unwrap();
        let pool = Pool::new(dir.path().join("repo"));

        let controls = [
            "Package: pkg\nSource: ../../../outside\nVersion: 1.0\nArchitecture: amd64\n",
            "Package: pkg\nVersion: 1.0/x\nArchitecture: amd64\n",
            "Package: .pkg\nVersion: 1.0\nArchitecture: amd64\n",
            "Package: pkg\nSource: a/b (1.0)\nVersion: 1.0\nArchitecture: amd64\n",
        ];
        for (n, control) in controls.iter().enumerate() {
            let incoming = dir.path().join(format!("in/{}.deb", n));
            write_deb(&incoming, control, b"payload");
            assert!(
                matches!(pool.ingest(&incoming, "main"), Err(Error::InvalidArchive { .. })),
                "{}",
                control
            );
        }

        assert!(!pool.pool_dir().exists());
        assert!(!dir.path().join("outside").exists());
        assert!(pool.archives().unwrap().is_empty());
    }

    #[test]
    fn test_pool_prefix() {
        assert_eq!(pool_prefix("hello"), "h");
        assert_eq!(pool_prefix("libfoo"), "libf");
        assert_eq!(pool_prefix("lib"), "l");
    }

    #[test]
    fn test_relative_path() {
        assert_eq!(
            Pool::relative_path("main", "libssl", "libssl3_3.0_amd64.deb"),
            "pool/main/libs/libssl/libssl3_3.0_amd64.deb"
        );
    }

    #[test]
    fn test_archives_empty_pool() {
        let dir = TempDir::new().unwrap();
        let pool = Pool::new(dir.path());
        assert!(pool.archives().unwrap().is_empty());
    }

    #[test]
    fn test_prune_keeps_referenced() {
        let dir = TempDir::new().unwrap();
        let pool = Pool::new(dir.path());
        let keep = "pool/main/a/a/a_1_all.deb";
        let drop = "pool/main/b/b/b_1_all.deb";
        for rel in [keep, drop] {
            let path = dir.path().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, b"x").unwrap();
        }

        let referenced: BTreeSet<String> = [keep.to_string()].into_iter().collect();

        let report = pool.prune(&referenced, true).unwrap();
        assert_eq!(report.removed, vec![drop.to_string()]);
        assert!(dir.path().join(drop).exists());

        let report = pool.prune(&referenced, false).unwrap();
        assert_eq!(report.bytes_freed, 1);
        assert!(!dir.path().join(drop).exists());
        assert!(!dir.path().join("pool/main/b").exists());
        assert!(dir.path().join(keep).exists());
    }
}
