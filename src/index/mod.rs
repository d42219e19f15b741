// src/index/mod.rs
//! Per-architecture `Packages` index generation
//!
//! One index is rendered per (component, architecture) pair of a suite and
//! published at `<component>/binary-<arch>/Packages`, followed by one file
//! per configured compression codec holding the identical bytes.
//!
//! Stanzas are sorted by package name, then Debian version order, then
//! architecture, then pool path, so unchanged input always renders the same
//! bytes.

use crate::compression::{self, CompressionFormat};
use crate::error::Result;
use crate::packages::{Architecture, ControlParagraph, PackageRecord, control};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Uncompressed index file name
pub const PACKAGES_FILE: &str = "Packages";

/// Where `Architecture: all` packages are listed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AllPolicy {
    /// Every per-architecture index carries the `all` stanzas
    #[default]
    FanOut,
    /// `all` stanzas go only to a dedicated `binary-all` index
    Dedicated,
}

impl fmt::Display for AllPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FanOut => f.write_str("fan-out"),
            Self::Dedicated => f.write_str("dedicated"),
        }
    }
}

/// The stanzas of one (component, architecture) index
#[derive(Debug, Clone)]
pub struct ArchitectureIndex {
    pub component: String,
    pub architecture: Architecture,
    pub stanzas: Vec<ControlParagraph>,
}

impl ArchitectureIndex {
    /// Directory of this index relative to `dists/<suite>`
    pub fn directory(&self) -> String {
        index_directory(&self.component, self.architecture)
    }

    /// Render the uncompressed document: stanzas separated by a blank line
    pub fn render(&self) -> Vec<u8> {
        self.stanzas
            .iter()
            .map(ControlParagraph::to_string)
            .collect::<Vec<_>>()
            .join("\n")
            .into_bytes()
    }
}

/// A rendered file, relative to `dists/<suite>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexFile {
    pub path: String,
    pub content: Vec<u8>,
}

/// `<component>/binary-<arch>`
pub fn index_directory(component: &str, architecture: Architecture) -> String {
    format!("{}/binary-{}", component, architecture)
}

/// Renders `Packages` indexes for a suite
#[derive(Debug, Clone)]
pub struct IndexBuilder {
    policy: AllPolicy,
    compression: Vec<CompressionFormat>,
}

impl IndexBuilder {
    pub fn new(policy: AllPolicy, compression: &[CompressionFormat]) -> Self {
        let mut compression: Vec<CompressionFormat> = compression
            .iter()
            .copied()
            .filter(|c| *c != CompressionFormat::None)
            .collect();
        compression.sort();
        compression.dedup();
        Self {
            policy,
            compression,
        }
    }

    /// Architectures that get an index of their own under this policy
    pub fn index_architectures(&self, architectures: &[Architecture]) -> Vec<Architecture> {
        let mut archs: Vec<Architecture> =
            architectures.iter().copied().filter(|a| !a.is_all()).collect();
        if self.policy == AllPolicy::Dedicated {
            archs.push(Architecture::All);
        }
        archs
    }

    /// Whether a record belongs in the given index
    pub fn includes(&self, record: &PackageRecord, component: &str, architecture: Architecture) -> bool {
        if record.component != component {
            return false;
        }
        if record.architecture == architecture {
            return true;
        }
        record.architecture.is_all() && self.policy == AllPolicy::FanOut
    }

    /// Select and order the stanzas for one (component, architecture) index
    pub fn build_index(
        &self,
        records: &[PackageRecord],
        component: &str,
        architecture: Architecture,
    ) -> ArchitectureIndex {
        let mut selected: Vec<&PackageRecord> = records
            .iter()
            .filter(|r| self.includes(r, component, architecture))
            .collect();

        selected.sort_by(|a, b| {
            a.name
                .cmp(&b.name)
                .then_with(|| a.version.cmp(&b.version))
                .then_with(|| a.architecture.cmp(&b.architecture))
                .then_with(|| a.filename.cmp(&b.filename))
        });

        debug!(
            "{} stanzas for {}",
            selected.len(),
            index_directory(component, architecture)
        );

        ArchitectureIndex {
            component: component.to_string(),
            architecture,
            stanzas: selected.into_iter().map(PackageRecord::to_stanza).collect(),
        }
    }

    /// Render every index of a suite, uncompressed plus each codec
    ///
    /// Indexes are independent of each other and rendered in parallel; the
    /// returned files are sorted by path.
    pub fn build_suite(
        &self,
        records: &[PackageRecord],
        components: &[String],
        architectures: &[Architecture],
    ) -> Result<Vec<IndexFile>> {
        let targets: Vec<(&str, Architecture)> = components
            .iter()
            .flat_map(|c| {
                self.index_architectures(architectures)
                    .into_iter()
                    .map(move |a| (c.as_str(), a))
            })
            .collect();

        let rendered: Vec<Vec<IndexFile>> = targets
            .par_iter()
            .map(|(component, arch)| {
                let index = self.build_index(records, component, *arch);
                self.render_files(&index)
            })
            .collect::<Result<_>>()?;

        let mut files: Vec<IndexFile> = rendered.into_iter().flatten().collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    /// The uncompressed document and its compressed encodings
    pub fn render_files(&self, index: &ArchitectureIndex) -> Result<Vec<IndexFile>> {
        let base = format!("{}/{}", index.directory(), PACKAGES_FILE);
        let plain = index.render();

        let mut files = Vec::with_capacity(1 + self.compression.len());
        for format in &self.compression {
            files.push(IndexFile {
                path: format!("{}{}", base, format.extension()),
                content: compression::compress(&plain, *format)?,
            });
        }
        files.insert(
            0,
            IndexFile {
                path: base,
                content: plain,
            },
        );
        Ok(files)
    }
}

/// Parse a `Packages` document, plain or compressed, back into stanzas
pub fn parse_index(content: &[u8]) -> Result<Vec<ControlParagraph>> {
    let plain = compression::decompress_auto(content)?;
    let text = String::from_utf8_lossy(&plain);
    control::parse_paragraphs(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::multi_hash_bytes;
    use crate::packages::RECORD_DIGESTS;

    fn record(name: &str, version: &str, arch: &str) -> PackageRecord {
        let control = ControlParagraph::parse(&format!(
            "Package: {}\nVersion: {}\nArchitecture: {}\nDescription: test\n",
            name, version, arch
        ))
        .unwrap();
        PackageRecord::from_control(
            control,
            "main",
            format!("pool/main/{0}/{0}/{0}_{1}_{2}.deb", name, version, arch),
            multi_hash_bytes(&RECORD_DIGESTS, name.as_bytes()),
        )
        .unwrap()
    }

    fn names(index: &ArchitectureIndex) -> Vec<String> {
        index
            .stanzas
            .iter()
            .map(|s| format!("{} {}", s.get("Package").unwrap(), s.get("Version").unwrap()))
            .collect()
    }

    #[test]
    fn test_fan_out_includes_all() {
        let records = vec![record("pkg-a", "1.0", "amd64"), record("pkg-b", "2.0", "all")];
        let builder = IndexBuilder::new(AllPolicy::FanOut, &[CompressionFormat::Gzip]);

        let amd64 = builder.build_index(&records, "main", Architecture::Amd64);
        let arm64 = builder.build_index(&records, "main", Architecture::Arm64);
        assert_eq!(names(&amd64), ["pkg-a 1.0", "pkg-b 2.0"]);
        assert_eq!(names(&arm64), ["pkg-b 2.0"]);
    }

    #[test]
    fn test_dedicated_all_index() {
        let records = vec![record("pkg-a", "1.0", "amd64"), record("pkg-b", "2.0", "all")];
        let builder = IndexBuilder::new(AllPolicy::Dedicated, &[]);

        assert_eq!(
            builder.index_architectures(&[Architecture::Amd64]),
            [Architecture::Amd64, Architecture::All]
        );
        let amd64 = builder.build_index(&records, "main", Architecture::Amd64);
        let all = builder.build_index(&records, "main", Architecture::All);
        assert_eq!(names(&amd64), ["pkg-a 1.0"]);
        assert_eq!(names(&all), ["pkg-b 2.0"]);
    }

    #[test]
    fn test_stanza_order_uses_debian_versions() {
        let records = vec![
            record("zed", "1.0", "amd64"),
            record("alpha", "1.10", "amd64"),
            record("alpha", "1.9", "amd64"),
            record("alpha", "1.9~rc1", "amd64"),
        ];
        let builder = IndexBuilder::new(AllPolicy::FanOut, &[]);
        let index = builder.build_index(&records, "main", Architecture::Amd64);
        assert_eq!(
            names(&index),
            ["alpha 1.9~rc1", "alpha 1.9", "alpha 1.10", "zed 1.0"]
        );
    }

    #[test]
    fn test_other_components_excluded() {
        let mut contrib = record("c", "1", "amd64");
        contrib.component = "contrib".to_string();
        let builder = IndexBuilder::new(AllPolicy::FanOut, &[]);
        let index = builder.build_index(&[contrib], "main", Architecture::Amd64);
        assert!(index.stanzas.is_empty());
        assert!(index.render().is_empty());
    }

    #[test]
    fn test_build_suite_files() {
        let records = vec![record("pkg-a", "1.0", "amd64"), record("pkg-b", "2.0", "all")];
        let builder = IndexBuilder::new(
            AllPolicy::FanOut,
            &[CompressionFormat::Xz, CompressionFormat::Gzip],
        );
        let files = builder
            .build_suite(
                &records,
                &["main".to_string()],
                &[Architecture::Amd64, Architecture::Arm64],
            )
            .unwrap();

        let paths: Vec<_> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(
            paths,
            [
                "main/binary-amd64/Packages",
                "main/binary-amd64/Packages.gz",
                "main/binary-amd64/Packages.xz",
                "main/binary-arm64/Packages",
                "main/binary-arm64/Packages.gz",
                "main/binary-arm64/Packages.xz",
            ]
        );

        for pair in files.chunks(3) {
            assert_eq!(
                compression::decompress(&pair[1].content, CompressionFormat::Gzip).unwrap(),
                pair[0].content
            );
            assert_eq!(
                compression::decompress(&pair[2].content, CompressionFormat::Xz).unwrap(),
                pair[0].content
            );
        }
    }

    #[test]
    fn test_render_parses_back() {
        let records = vec![record("a", "1", "amd64"), record("b", "1", "amd64")];
        let builder = IndexBuilder::new(AllPolicy::FanOut, &[]);
        let index = builder.build_index(&records, "main", Architecture::Amd64);
        let rendered = index.render();
        assert!(String::from_utf8_lossy(&rendered).contains("\n\nPackage: b\n"));

        let stanzas = parse_index(&rendered).unwrap();
        assert_eq!(stanzas, index.stanzas);

        let gz = compression::compress(&rendered, CompressionFormat::Gzip).unwrap();
        assert_eq!(parse_index(&gz).unwrap(), index.stanzas);
        assert!(parse_index(b"").unwrap().is_empty());
    }
}
