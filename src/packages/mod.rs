// src/packages/mod.rs

//! Debian binary package support
//!
//! `deb` reads the control metadata out of an archive, `control` models the
//! RFC822-style paragraphs it contains, and `record` turns a paragraph plus
//! the archive's digests into the record the index is built from.

pub mod control;
pub mod deb;
pub mod record;

pub use control::{ControlField, ControlParagraph};
pub use deb::DebPackage;
pub use record::{validate_package_name, Architecture, PackageRecord, RecordKey, RECORD_DIGESTS};
