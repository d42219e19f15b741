// src/packages/record.rs

//! Parsed package records and target architectures

use crate::error::{Error, Result};
use crate::hash::{Hash, HashAlgorithm, MultiDigest};
use crate::packages::control::ControlParagraph;
use crate::version::DebVersion;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Digests recorded for every archive in its index stanza
pub const RECORD_DIGESTS: [HashAlgorithm; 3] =
    [HashAlgorithm::Md5, HashAlgorithm::Sha1, HashAlgorithm::Sha256];

/// Control fields the index computes itself and never passes through
const COMPUTED_FIELDS: [&str; 6] = ["Filename", "Size", "MD5sum", "SHA1", "SHA256", "SHA512"];

/// Target architecture of a binary package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Architecture {
    Amd64,
    Arm64,
    Armhf,
    Armel,
    I386,
    Ppc64el,
    S390x,
    Riscv64,
    Mips64el,
    /// Architecture-independent packages
    All,
}

impl Architecture {
    /// Every concrete (non-`all`) architecture
    pub const CONCRETE: [Architecture; 9] = [
        Self::Amd64,
        Self::Arm64,
        Self::Armhf,
        Self::Armel,
        Self::I386,
        Self::Ppc64el,
        Self::S390x,
        Self::Riscv64,
        Self::Mips64el,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Amd64 => "amd64",
            Self::Arm64 => "arm64",
            Self::Armhf => "armhf",
            Self::Armel => "armel",
            Self::I386 => "i386",
            Self::Ppc64el => "ppc64el",
            Self::S390x => "s390x",
            Self::Riscv64 => "riscv64",
            Self::Mips64el => "mips64el",
            Self::All => "all",
        }
    }

    #[inline]
    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Architecture {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::CONCRETE
            .into_iter()
            .chain(std::iter::once(Self::All))
            .find(|a| a.as_str() == s)
            .ok_or_else(|| Error::ParseError(format!("Unknown architecture '{}'", s)))
    }
}

impl TryFrom<String> for Architecture {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Architecture> for String {
    fn from(arch: Architecture) -> Self {
        arch.as_str().to_string()
    }
}

/// Check a binary or source package name
///
/// Names are lowercase alphanumerics plus `+`, `-` and `.`, starting with an
/// alphanumeric, as dpkg accepts them. A valid name is always a single
/// plain path segment.
pub fn validate_package_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        && chars.all(|c| {
            c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '+' | '-' | '.')
        })
        && !name.contains("..");
    if valid {
        Ok(())
    } else {
        Err(Error::ParseError(format!("Invalid package name '{}'", name)))
    }
}

/// Identity of a record: no two records in one scan may share it
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub name: String,
    pub version: String,
    pub architecture: Architecture,
}

/// One scanned package archive
#[derive(Debug, Clone)]
pub struct PackageRecord {
    pub name: String,
    pub version: DebVersion,
    pub architecture: Architecture,
    /// Pool component the archive lives in
    pub component: String,
    /// Path relative to the repository root (`pool/main/h/hello/...`)
    pub filename: String,
    /// Archive size in bytes
    pub size: u64,
    /// Digests of the raw archive bytes
    pub digests: MultiDigest,
    /// Remaining control fields, passed through verbatim
    pub control: ControlParagraph,
}

impl PackageRecord {
    /// Build a record from an archive's control paragraph
    ///
    /// `Package`, `Version` and `Architecture` are lifted out of the
    /// paragraph; computed fields are dropped so the index owns them.
    pub fn from_control(
        mut control: ControlParagraph,
        component: &str,
        filename: String,
        digests: MultiDigest,
    ) -> Result<Self> {
        let name = control
            .remove("Package")
            .ok_or_else(|| Error::ParseError("control file has no Package field".to_string()))?;
        let version = control
            .remove("Version")
            .ok_or_else(|| Error::ParseError("control file has no Version field".to_string()))?;
        let architecture = control.remove("Architecture").ok_or_else(|| {
            Error::ParseError("control file has no Architecture field".to_string())
        })?;

        validate_package_name(&name)?;

        for field in COMPUTED_FIELDS {
            control.remove(field);
        }

        for algo in RECORD_DIGESTS {
            if digests.get(algo).is_none() {
                return Err(Error::ParseError(format!(
                    "record for {} is missing its {} digest",
                    name, algo
                )));
            }
        }

        Ok(Self {
            version: DebVersion::parse(&version)?,
            architecture: architecture.trim().parse()?,
            name,
            component: component.to_string(),
            filename,
            size: digests.size,
            digests,
            control,
        })
    }

    pub fn key(&self) -> RecordKey {
        RecordKey {
            name: self.name.clone(),
            version: self.version.to_string(),
            architecture: self.architecture,
        }
    }

    /// SHA-256 of the archive bytes
    pub fn sha256(&self) -> Option<&Hash> {
        self.digests.get(HashAlgorithm::Sha256)
    }

    /// Render the index stanza for this record
    pub fn to_stanza(&self) -> ControlParagraph {
        let mut stanza = ControlParagraph::new();
        stanza.set("Package", self.name.as_str());
        stanza.set("Version", self.version.to_string());
        stanza.set("Architecture", self.architecture.as_str());
        for field in self.control.fields() {
            stanza.set(&field.name, field.value.as_str());
        }
        stanza.set("Filename", self.filename.as_str());
        stanza.set("Size", self.size.to_string());
        for algo in RECORD_DIGESTS {
            if let Some(hash) = self.digests.get(algo) {
                stanza.set(algo.packages_field(), hash.as_str());
            }
        }
        stanza
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::multi_hash_bytes;

    fn control(text: &str) -> ControlParagraph {
        ControlParagraph::parse(text).unwrap()
    }

    #[test]
    fn test_architecture_parse() {
        assert_eq!("amd64".parse::<Architecture>().unwrap(), Architecture::Amd64);
        assert_eq!("all".parse::<Architecture>().unwrap(), Architecture::All);
        assert!("x86_64".parse::<Architecture>().is_err());
        assert!(!Architecture::CONCRETE.contains(&Architecture::All));
    }

    #[test]
    fn test_record_from_control() {
        let digests = multi_hash_bytes(&RECORD_DIGESTS, b"archive bytes");
        let record = PackageRecord::from_control(
            control(
                "Package: hello\nVersion: 1.0-1\nArchitecture: all\nMaintainer: A <a@b>\nSize: 99\n",
            ),
            "main",
            "pool/main/h/hello/hello_1.0-1_all.deb".to_string(),
            digests,
        )
        .unwrap();

        assert_eq!(record.name, "hello");
        assert_eq!(record.architecture, Architecture::All);
        assert_eq!(record.size, 13);
        assert!(record.control.get("Size").is_none());
        assert_eq!(record.control.get("Maintainer"), Some("A <a@b>"));
    }

    #[test]
    fn test_record_requires_identity_fields() {
        let digests = multi_hash_bytes(&RECORD_DIGESTS, b"x");
        let missing_arch = PackageRecord::from_control(
            control("Package: hello\nVersion: 1.0\n"),
            "main",
            "x.deb".to_string(),
            digests.clone(),
        );
        assert!(missing_arch.is_err());

        let bad_arch = PackageRecord::from_control(
            control("Package: hello\nVersion: 1.0\nArchitecture: sparc\n"),
            "main",
            "x.deb".to_string(),
            digests,
        );
        assert!(bad_arch.is_err());
    }

    #[test]
    fn test_package_name_rules() {
        for name in ["hello", "libstdc++6", "python3.12", "g", "0ad"] {
            assert!(validate_package_name(name).is_ok(), "{}", name);
        }
        for name in ["", "Hello", ".hidden", "-dash", "../../etc", "a/b", "a\\b", "a..b", "a b"] {
            assert!(validate_package_name(name).is_err(), "{}", name);
        }

        let bad_name = PackageRecord::from_control(
            control("Package: ../evil\nVersion: 1.0\nArchitecture: amd64\n"),
            "main",
            "x.deb".to_string(),
            multi_hash_bytes(&RECORD_DIGESTS, b"abc"),
        );
        assert!(matches!(bad_name, Err(Error::ParseError(_))));
    }

    #[test]
    fn test_stanza_field_order() {
        let digests = multi_hash_bytes(&RECORD_DIGESTS, b"abc");
        let record = PackageRecord::from_control(
            control("Architecture: amd64\nPackage: p\nDepends: q\nVersion: 2\n"),
            "main",
            "pool/main/p/p/p_2_amd64.deb".to_string(),
            digests,
        )
        .unwrap();

        let names: Vec<String> = record.to_stanza().fields().map(|f| f.name.clone()).collect();
        assert_eq!(
            names,
            ["Package", "Version", "Architecture", "Depends", "Filename", "Size", "MD5sum", "SHA1", "SHA256"]
        );
    }
}
