// src/hash.rs

//! Digest algorithms for archive records and Release checksum tables
//!
//! apt clients differ in which digests they trust, so a Release manifest
//! carries one block per configured algorithm:
//!
//! | Algorithm | Release field | Packages field |
//! |-----------|---------------|----------------|
//! | MD5       | `MD5Sum`      | `MD5sum`       |
//! | SHA-1     | `SHA1`        | `SHA1`         |
//! | SHA-256   | `SHA256`      | `SHA256`       |
//! | SHA-512   | `SHA512`      | `SHA512`       |

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::io::{self, Read};
use std::path::Path;

/// Digest algorithm selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// MD5, kept only for legacy clients
    Md5,
    /// SHA-1, kept only for legacy clients
    Sha1,
    /// SHA-256, the digest modern apt actually checks
    Sha256,
    /// SHA-512
    Sha512,
}

impl HashAlgorithm {
    /// All supported algorithms, in Release block order
    pub const ALL: [HashAlgorithm; 4] = [Self::Md5, Self::Sha1, Self::Sha256, Self::Sha512];

    /// Get the algorithm name as a string
    #[inline]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }

    /// Name of the checksum block in a Release manifest
    pub const fn release_field(&self) -> &'static str {
        match self {
            Self::Md5 => "MD5Sum",
            Self::Sha1 => "SHA1",
            Self::Sha256 => "SHA256",
            Self::Sha512 => "SHA512",
        }
    }

    /// Name of the per-package field in a Packages stanza
    pub const fn packages_field(&self) -> &'static str {
        match self {
            Self::Md5 => "MD5sum",
            Self::Sha1 => "SHA1",
            Self::Sha256 => "SHA256",
            Self::Sha512 => "SHA512",
        }
    }

    /// Look up an algorithm by its Release block name
    pub fn from_release_field(field: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.release_field() == field)
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A digest value with its algorithm
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Hash {
    /// The algorithm used
    pub algorithm: HashAlgorithm,
    /// The digest as a lowercase hex string
    pub value: String,
}

impl Hash {
    /// Get the digest as a hex string
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

/// Incremental hasher over any supported algorithm
pub struct Hasher {
    algorithm: HashAlgorithm,
    state: HasherState,
}

enum HasherState {
    Md5(Md5),
    Sha1(Sha1),
    Sha256(Sha256),
    Sha512(Sha512),
}

impl Hasher {
    /// Create a new hasher with the specified algorithm
    pub fn new(algorithm: HashAlgorithm) -> Self {
        let state = match algorithm {
            HashAlgorithm::Md5 => HasherState::Md5(Md5::new()),
            HashAlgorithm::Sha1 => HasherState::Sha1(Sha1::new()),
            HashAlgorithm::Sha256 => HasherState::Sha256(Sha256::new()),
            HashAlgorithm::Sha512 => HasherState::Sha512(Sha512::new()),
        };
        Self { algorithm, state }
    }

    /// Update the hasher with more data
    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            HasherState::Md5(h) => h.update(data),
            HasherState::Sha1(h) => h.update(data),
            HasherState::Sha256(h) => h.update(data),
            HasherState::Sha512(h) => h.update(data),
        }
    }

    /// Finalize and return the digest
    pub fn finalize(self) -> Hash {
        let value = match self.state {
            HasherState::Md5(h) => hex::encode(h.finalize()),
            HasherState::Sha1(h) => hex::encode(h.finalize()),
            HasherState::Sha256(h) => hex::encode(h.finalize()),
            HasherState::Sha512(h) => hex::encode(h.finalize()),
        };
        Hash {
            algorithm: self.algorithm,
            value,
        }
    }
}

/// Compute the digest of a byte slice
pub fn hash_bytes(algorithm: HashAlgorithm, data: &[u8]) -> Hash {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data);
    hasher.finalize()
}

/// Compute the digest of everything a reader yields
pub fn hash_reader<R: Read>(algorithm: HashAlgorithm, reader: &mut R) -> io::Result<Hash> {
    let mut hasher = Hasher::new(algorithm);
    let mut buffer = [0u8; 8192];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize())
}

/// Several digests of one file, computed in a single pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiDigest {
    /// Total bytes read
    pub size: u64,
    /// One digest per requested algorithm, in request order
    pub digests: Vec<Hash>,
}

impl MultiDigest {
    /// Digest for one algorithm, if it was requested
    pub fn get(&self, algorithm: HashAlgorithm) -> Option<&Hash> {
        self.digests.iter().find(|h| h.algorithm == algorithm)
    }
}

/// Compute several digests of a reader in one pass
pub fn multi_hash_reader<R: Read>(
    algorithms: &[HashAlgorithm],
    reader: &mut R,
) -> io::Result<MultiDigest> {
    let mut hashers: Vec<Hasher> = algorithms.iter().map(|a| Hasher::new(*a)).collect();
    let mut buffer = [0u8; 65536];
    let mut size = 0u64;

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        size += n as u64;
        for hasher in &mut hashers {
            hasher.update(&buffer[..n]);
        }
    }

    Ok(MultiDigest {
        size,
        digests: hashers.into_iter().map(Hasher::finalize).collect(),
    })
}

/// Compute several digests of a byte slice
pub fn multi_hash_bytes(algorithms: &[HashAlgorithm], data: &[u8]) -> MultiDigest {
    MultiDigest {
        size: data.len() as u64,
        digests: algorithms.iter().map(|a| hash_bytes(*a, data)).collect(),
    }
}

/// Compute several digests of a file, streaming its content
pub fn multi_hash_file(algorithms: &[HashAlgorithm], path: &Path) -> io::Result<MultiDigest> {
    let mut file = std::fs::File::open(path)?;
    multi_hash_reader(algorithms, &mut file)
}

/// Compute SHA-256 (convenience function)
#[inline]
pub fn sha256(data: &[u8]) -> String {
    hash_bytes(HashAlgorithm::Sha256, data).value
}

/// Verification result error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyError {
    pub expected: String,
    pub actual: String,
    pub algorithm: HashAlgorithm,
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} mismatch: expected {}, got {}",
            self.algorithm, self.expected, self.actual
        )
    }
}

impl std::error::Error for VerifyError {}

/// Verify a file matches an expected digest
///
/// Streams the file content to avoid loading it entirely into memory.
pub fn verify_file(path: &Path, expected: &str, algorithm: HashAlgorithm) -> Result<(), VerifyError> {
    let mut file = std::fs::File::open(path).map_err(|_| VerifyError {
        expected: expected.to_string(),
        actual: "<file read error>".to_string(),
        algorithm,
    })?;

    let actual = hash_reader(algorithm, &mut file).map_err(|_| VerifyError {
        expected: expected.to_string(),
        actual: "<hash read error>".to_string(),
        algorithm,
    })?;

    if actual.value == expected.to_lowercase() {
        Ok(())
    } else {
        Err(VerifyError {
            expected: expected.to_string(),
            actual: actual.value,
            algorithm,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digests() {
        let data = b"hello world";
        assert_eq!(
            hash_bytes(HashAlgorithm::Md5, data).value,
            "5eb63bbbe01eeed093cb22bb8f5acdc3"
        );
        assert_eq!(
            hash_bytes(HashAlgorithm::Sha1, data).value,
            "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed"
        );
        assert_eq!(
            hash_bytes(HashAlgorithm::Sha256, data).value,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(hash_bytes(HashAlgorithm::Sha512, data).value.len(), 128);
    }

    #[test]
    fn test_hasher_incremental() {
        let full = hash_bytes(HashAlgorithm::Sha256, b"Hello, World!");

        let mut hasher = Hasher::new(HashAlgorithm::Sha256);
        hasher.update(b"Hello, ");
        hasher.update(b"World!");

        assert_eq!(full, hasher.finalize());
    }

    #[test]
    fn test_release_field_roundtrip() {
        for algo in HashAlgorithm::ALL {
            assert_eq!(HashAlgorithm::from_release_field(algo.release_field()), Some(algo));
        }
        assert_eq!(HashAlgorithm::Md5.packages_field(), "MD5sum");
        assert_eq!(HashAlgorithm::from_release_field("Foo"), None);
    }

    #[test]
    fn test_multi_hash_matches_single() {
        let data = vec![7u8; 200_000];
        let algos = [HashAlgorithm::Md5, HashAlgorithm::Sha256];
        let multi = multi_hash_reader(&algos, &mut std::io::Cursor::new(&data)).unwrap();

        assert_eq!(multi.size, 200_000);
        assert_eq!(multi.get(HashAlgorithm::Md5), Some(&hash_bytes(HashAlgorithm::Md5, &data)));
        assert_eq!(multi.get(HashAlgorithm::Sha256).unwrap().value, sha256(&data));
        assert!(multi.get(HashAlgorithm::Sha1).is_none());
        assert_eq!(multi, multi_hash_bytes(&algos, &data));
    }

    #[test]
    fn test_verify_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"hello world").unwrap();

        let good = "B94D27B9934D3E08A52E52D7DA7DABFAC484EFE37A5380EE9088F7ACE2EFCDE9";
        assert!(verify_file(&path, good, HashAlgorithm::Sha256).is_ok());

        let err = verify_file(&path, &"0".repeat(64), HashAlgorithm::Sha256).unwrap_err();
        assert_eq!(err.actual, sha256(b"hello world"));
    }
}
