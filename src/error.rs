// src/error.rs

//! Error types for the repository pipeline
//!
//! Per-archive scan problems are not errors of the run; they are collected
//! as warnings by the scanner. Everything here aborts the current run.

use std::io;
use thiserror::Error;

/// Errors produced by the indexing, signing and publishing pipeline
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Not found: {0}")]
    NotFoundError(String),

    #[error("Invalid package archive {path}: {reason}")]
    InvalidArchive { path: String, reason: String },

    #[error("Pool conflict: {0} already exists with different content")]
    PoolConflict(String),

    #[error("Duplicate package {name} {version} ({architecture}) in {first} and {second}")]
    DuplicatePackage {
        name: String,
        version: String,
        architecture: String,
        first: String,
        second: String,
    },

    #[error("No secret signing key matches '{0}'")]
    NoSigningKey(String),

    #[error("Signing identity '{identity}' is ambiguous: {count} secret keys match")]
    AmbiguousSigningKey { identity: String, count: usize },

    #[error("Signing failed: {0}")]
    SigningFailed(String),

    #[error("Signature verification failed: {0}")]
    VerificationFailed(String),

    #[error("Checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("Repository is locked by another run: {0}")]
    RepositoryLocked(String),

    #[error("Publish failed: {0}")]
    PublishFailed(String),
}

/// Result alias used across the library
pub type Result<T> = std::result::Result<T, Error>;

impl From<crate::compression::CompressionError> for Error {
    fn from(e: crate::compression::CompressionError) -> Self {
        Error::ParseError(e.to_string())
    }
}
