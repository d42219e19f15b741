// src/lock.rs

//! Exclusive lock over a repository root
//!
//! Every run that writes to a repository holds `<root>/.lock` with
//! `flock(LOCK_EX)` until it finishes. A second run against the same root
//! fails immediately with [`Error::RepositoryLocked`] instead of waiting.

use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Lock file name under the repository root
pub const LOCK_FILE: &str = ".lock";

/// Held repository lock, released on drop
pub struct RepoLock {
    file: File,
    path: PathBuf,
}

impl RepoLock {
    /// Take the lock without blocking
    pub fn try_acquire(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)?;
        let path = root.join(LOCK_FILE);

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!("Acquired repository lock at {}", path.display());
                Ok(Self { file, path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                Err(Error::RepositoryLocked(path.display().to_string()))
            }
            Err(e) => Err(Error::IoError(format!(
                "Failed to lock {}: {}",
                path.display(),
                e
            ))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RepoLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        debug!("Released repository lock at {}", self.path.display());
    }
}
