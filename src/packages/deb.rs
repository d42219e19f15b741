// src/packages/deb.rs

//! Debian binary package (.deb) reader
//!
//! A .deb is an ar archive whose members are, in order:
//! - `debian-binary`: format version, "2.0\n"
//! - `control.tar[.gz|.xz|.zst]`: package metadata and scripts
//! - `data.tar[.gz|.xz|.zst|.bz2]`: file contents (never read here)
//!
//! Only the control member is decoded; indexing needs nothing else.

use crate::compression::{self, CompressionFormat};
use crate::error::{Error, Result};
use crate::packages::control::ControlParagraph;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tar::Archive;
use tracing::debug;

/// Upper bound on a decoded control file; anything larger is not a real package
const MAX_CONTROL_SIZE: u64 = 4 * 1024 * 1024;

/// Upper bound on the compressed control member
const MAX_CONTROL_MEMBER_SIZE: u64 = 64 * 1024 * 1024;

/// Metadata read from a .deb archive
#[derive(Debug, Clone)]
pub struct DebPackage {
    /// Format version from `debian-binary`
    pub format_version: String,
    /// The `control` file from the control member
    pub control: ControlParagraph,
}

impl DebPackage {
    /// Read the control metadata of a .deb archive
    pub fn parse(path: &Path) -> Result<Self> {
        let invalid = |reason: String| Error::InvalidArchive {
            path: path.display().to_string(),
            reason,
        };

        let file = File::open(path)?;
        let mut archive = ar::Archive::new(file);

        let mut format_version: Option<String> = None;
        let mut control: Option<ControlParagraph> = None;

        while let Some(entry) = archive.next_entry() {
            let mut entry = entry.map_err(|e| invalid(format!("bad ar member: {}", e)))?;
            let name = String::from_utf8_lossy(entry.header().identifier())
                .trim_end_matches('/')
                .to_string();

            if format_version.is_none() {
                if name != "debian-binary" {
                    return Err(invalid(format!(
                        "first member is '{}', expected 'debian-binary'",
                        name
                    )));
                }
                let mut content = String::new();
                entry
                    .by_ref()
                    .take(64)
                    .read_to_string(&mut content)
                    .map_err(|e| invalid(format!("unreadable debian-binary: {}", e)))?;
                let version = content.trim().to_string();
                if !version.starts_with("2.") {
                    return Err(invalid(format!("unsupported format version '{}'", version)));
                }
                format_version = Some(version);
                continue;
            }

            if name.starts_with("control.tar") {
                if entry.header().size() > MAX_CONTROL_MEMBER_SIZE {
                    return Err(invalid(format!("{} is implausibly large", name)));
                }
                let mut data = Vec::new();
                entry
                    .read_to_end(&mut data)
                    .map_err(|e| invalid(format!("unreadable {}: {}", name, e)))?;
                let text = read_control_member(&name, &data).map_err(|e| invalid(e.to_string()))?;
                let paragraph =
                    ControlParagraph::parse(&text).map_err(|e| invalid(e.to_string()))?;
                control = Some(paragraph);
                break;
            }
        }

        let format_version = format_version.ok_or_else(|| invalid("empty ar archive".to_string()))?;
        let control = control.ok_or_else(|| invalid("no control.tar member".to_string()))?;

        debug!(
            "Read {} control fields from {}",
            control.len(),
            path.display()
        );

        Ok(Self {
            format_version,
            control,
        })
    }
}

/// Decode a control.tar member and return the text of its `control` file
fn read_control_member(member_name: &str, data: &[u8]) -> Result<String> {
    let format = CompressionFormat::from_extension(member_name);
    let decoder = compression::create_decoder(data, format)?;
    let mut archive = Archive::new(decoder);

    for entry in archive
        .entries()
        .map_err(|e| Error::ParseError(format!("bad {}: {}", member_name, e)))?
    {
        let mut entry = entry.map_err(|e| Error::ParseError(format!("bad tar entry: {}", e)))?;
        let entry_path = entry
            .path()
            .map_err(|e| Error::ParseError(format!("bad tar path: {}", e)))?
            .to_string_lossy()
            .to_string();

        if entry_path.trim_start_matches("./") != "control" {
            continue;
        }

        let mut text = String::new();
        entry
            .by_ref()
            .take(MAX_CONTROL_SIZE)
            .read_to_string(&mut text)
            .map_err(|e| Error::ParseError(format!("control file is not UTF-8 text: {}", e)))?;
        return Ok(text);
    }

    Err(Error::ParseError(format!("{} has no control file", member_name)))
}
