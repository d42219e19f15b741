// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use debrepo::publish::DISTS_DIR;
use debrepo::{
    MemoryKeyring, RepoConfig, RunFailure, RunReport, UpdateDriver, UpdateRequest,
};
use flate2::write::GzEncoder;
use sequoia_openpgp::Cert;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const IDENTITY: &str = "Test Archive <archive@example.org>";

/// Control file for a small binary package
pub fn control(name: &str, version: &str, arch: &str) -> String {
    format!(
        "Package: {name}\n\
         Version: {version}\n\
         Architecture: {arch}\n\
         Maintainer: Test Maintainer <maint@example.org>\n\
         Section: utils\n\
         Priority: optional\n\
         Depends: libc6 (>= 2.36)\n\
         Description: test package {name}\n \
         Longer description of {name}.\n"
    )
}

fn control_tar_gz(control: &str) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    let mut header = tar::Header::new_gnu();
    header.set_size(control.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0);
    header.set_cksum();
    builder
        .append_data(&mut header, "./control", control.as_bytes())
        .unwrap();
    builder.into_inner().unwrap().finish().unwrap()
}

fn write_ar(path: &Path, members: &[(&str, &[u8])]) {
    let mut builder = ar::Builder::new(File::create(path).unwrap());
    for (name, data) in members {
        let header = ar::Header::new(name.as_bytes().to_vec(), data.len() as u64);
        builder.append(&header, *data).unwrap();
    }
}

/// Total ar size of the given member lengths, including padding
fn ar_size(lengths: &[usize]) -> usize {
    8 + lengths.iter().map(|len| 60 + len + len % 2).sum::<usize>()
}

/// Write a `.deb` with the given control file
///
/// With `size`, the `data.tar.gz` member is padded so the archive is
/// exactly that many bytes.
pub fn write_deb(path: &Path, control: &str, size: Option<usize>) -> PathBuf {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let control_member = control_tar_gz(control);
    let data_len = match size {
        Some(target) => {
            let base = ar_size(&[4, control_member.len(), 0]);
            assert!(target >= base && (target - base) % 2 == 0, "cannot pad to {}", target);
            target - base
        }
        None => 20,
    };
    let data = vec![0u8; data_len];

    write_ar(
        path,
        &[
            ("debian-binary", b"2.0\n"),
            ("control.tar.gz", &control_member),
            ("data.tar.gz", &data),
        ],
    );
    path.to_path_buf()
}

/// A temporary repository with an in-memory signing key
pub struct TestRepo {
    pub dir: TempDir,
    pub config: RepoConfig,
    pub keys: MemoryKeyring,
    pub cert: Cert,
}

impl TestRepo {
    /// Repository with suite `stable`, component `main`, amd64 + arm64
    ///
    /// `settings` are extra top-level TOML keys.
    pub fn new(settings: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let text = format!(
            r#"
root = "{root}"
origin = "Test"
label = "Test Archive"
description = "Packages for tests"
{settings}

[signing]
identity = "archive@example.org"
keyring = "{keyring}"

[[suites]]
name = "stable"
codename = "bookworm"
components = ["main"]
architectures = ["amd64", "arm64"]
"#,
            root = dir.path().join("public").display(),
            keyring = dir.path().join("keys").display(),
            settings = settings,
        );
        let config = RepoConfig::parse(&text).unwrap();
        let cert = MemoryKeyring::generate(IDENTITY).unwrap();
        let keys = MemoryKeyring::new(vec![cert.clone()]);
        let cert = cert.strip_secret_key_material();

        Self {
            dir,
            config,
            keys,
            cert,
        }
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    pub fn suite_dir(&self) -> PathBuf {
        self.root().join(DISTS_DIR).join("stable")
    }

    /// Path of a file in the served `stable` suite
    pub fn dists_file(&self, relative: &str) -> PathBuf {
        self.suite_dir().join(relative)
    }

    pub fn read_dists(&self, relative: &str) -> Vec<u8> {
        fs::read(self.dists_file(relative)).unwrap()
    }

    /// Build an incoming archive outside the repository
    pub fn incoming(&self, name: &str, version: &str, arch: &str) -> PathBuf {
        let path = self
            .dir
            .path()
            .join("incoming")
            .join(format!("{}_{}_{}.deb", name, version, arch));
        write_deb(&path, &control(name, version, arch), None)
    }

    pub fn incoming_sized(&self, name: &str, version: &str, arch: &str, size: usize) -> PathBuf {
        let path = self
            .dir
            .path()
            .join("incoming")
            .join(format!("{}_{}_{}.deb", name, version, arch));
        write_deb(&path, &control(name, version, arch), Some(size))
    }

    pub fn update_with(&self, keys: &MemoryKeyring, archives: &[PathBuf]) -> Result<RunReport, RunFailure> {
        UpdateDriver::new(&self.config, keys).run(&UpdateRequest {
            suite: "stable".to_string(),
            component: None,
            archives: archives.to_vec(),
        })
    }

    pub fn update(&self, archives: &[PathBuf]) -> Result<RunReport, RunFailure> {
        self.update_with(&self.keys, archives)
    }
}

/// Drop the `Date:` and `Valid-Until:` lines of a Release document
pub fn without_dates(release: &[u8]) -> String {
    String::from_utf8_lossy(release)
        .lines()
        .filter(|l| !l.starts_with("Date:") && !l.starts_with("Valid-Until:"))
        .collect::<Vec<_>>()
        .join("\n")
}
