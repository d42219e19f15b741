// src/version/mod.rs

//! Debian package version parsing and ordering
//!
//! Versions have the form `[epoch:]upstream[-revision]` and are ordered the
//! way dpkg orders them: epochs numerically, then upstream and revision with
//! the alternating non-digit/digit comparison where `~` sorts before
//! everything (even the end of the string) and letters sort before other
//! characters.

use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A parsed Debian version with epoch, upstream, and revision components
#[derive(Debug, Clone)]
pub struct DebVersion {
    pub epoch: u64,
    pub upstream: String,
    pub revision: Option<String>,
}

impl DebVersion {
    /// Parse a Debian version string
    ///
    /// Examples:
    /// - "1.2.3" → epoch=0, upstream="1.2.3", revision=None
    /// - "2:1.2.3" → epoch=2, upstream="1.2.3", revision=None
    /// - "1.2.3-4ubuntu1" → epoch=0, upstream="1.2.3", revision=Some("4ubuntu1")
    /// - "1:2.3-4-5" → epoch=1, upstream="2.3-4", revision=Some("5")
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::ParseError("Empty version string".to_string()));
        }
        if let Some(c) = s
            .chars()
            .find(|&c| !c.is_ascii_alphanumeric() && !matches!(c, '.' | '+' | '~' | ':' | '-'))
        {
            return Err(Error::ParseError(format!(
                "Version '{}' contains invalid character '{}'",
                s, c
            )));
        }

        let (epoch, rest) = match s.split_once(':') {
            Some((e, r)) => {
                let epoch = e.parse::<u64>().map_err(|err| {
                    Error::ParseError(format!("Invalid epoch in version '{}': {}", s, err))
                })?;
                (epoch, r)
            }
            None => (0, s),
        };

        // The revision is everything after the last hyphen
        let (upstream, revision) = match rest.rsplit_once('-') {
            Some((u, r)) => (u.to_string(), Some(r.to_string())),
            None => (rest.to_string(), None),
        };

        if upstream.is_empty() {
            return Err(Error::ParseError(format!(
                "Empty upstream version in '{}'",
                s
            )));
        }
        if !upstream.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(Error::ParseError(format!(
                "Upstream version in '{}' must start with a digit",
                s
            )));
        }
        if revision.as_deref() == Some("") {
            return Err(Error::ParseError(format!("Empty revision in '{}'", s)));
        }

        Ok(Self {
            epoch,
            upstream,
            revision,
        })
    }

    /// Version as it appears in archive file names (epoch dropped)
    pub fn without_epoch(&self) -> String {
        match self.revision {
            Some(ref revision) => format!("{}-{}", self.upstream, revision),
            None => self.upstream.clone(),
        }
    }
}

/// Sort weight of a single character in the non-digit part
fn char_order(c: Option<u8>) -> i32 {
    match c {
        Some(b'~') => -1,
        None => 0,
        Some(c) if c.is_ascii_alphabetic() => c as i32,
        Some(c) => c as i32 + 256,
    }
}

/// dpkg's `verrevcmp`
fn compare_fragment(a: &str, b: &str) -> Ordering {
    let a = a.as_bytes();
    let b = b.as_bytes();
    let (mut i, mut j) = (0, 0);

    while i < a.len() || j < b.len() {
        // Non-digit prefix
        while (i < a.len() && !a[i].is_ascii_digit()) || (j < b.len() && !b[j].is_ascii_digit()) {
            let ac = char_order(a.get(i).copied().filter(|c| !c.is_ascii_digit()));
            let bc = char_order(b.get(j).copied().filter(|c| !c.is_ascii_digit()));
            if ac != bc {
                return ac.cmp(&bc);
            }
            if i < a.len() && !a[i].is_ascii_digit() {
                i += 1;
            }
            if j < b.len() && !b[j].is_ascii_digit() {
                j += 1;
            }
        }

        // Numeric run, ignoring leading zeros
        while i < a.len() && a[i] == b'0' {
            i += 1;
        }
        while j < b.len() && b[j] == b'0' {
            j += 1;
        }

        let mut first_diff = Ordering::Equal;
        while i < a.len() && a[i].is_ascii_digit() && j < b.len() && b[j].is_ascii_digit() {
            if first_diff == Ordering::Equal {
                first_diff = a[i].cmp(&b[j]);
            }
            i += 1;
            j += 1;
        }
        if i < a.len() && a[i].is_ascii_digit() {
            return Ordering::Greater;
        }
        if j < b.len() && b[j].is_ascii_digit() {
            return Ordering::Less;
        }
        if first_diff != Ordering::Equal {
            return first_diff;
        }
    }

    Ordering::Equal
}

impl Ord for DebVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| compare_fragment(&self.upstream, &other.upstream))
            .then_with(|| {
                compare_fragment(
                    self.revision.as_deref().unwrap_or(""),
                    other.revision.as_deref().unwrap_or(""),
                )
            })
    }
}

impl PartialOrd for DebVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// "1.0" and "1.00" compare equal under dpkg rules but are distinct strings;
// equality follows ordering so sorting and deduplication agree.
impl PartialEq for DebVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for DebVersion {}

impl fmt::Display for DebVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch > 0 {
            write!(f, "{}:", self.epoch)?;
        }
        write!(f, "{}", self.upstream)?;
        if let Some(ref revision) = self.revision {
            write!(f, "-{}", revision)?;
        }
        Ok(())
    }
}

impl FromStr for DebVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> DebVersion {
        DebVersion::parse(s).unwrap()
    }

    #[test]
    fn test_parse_components() {
        let ver = v("1:2.3-4-5");
        assert_eq!(ver.epoch, 1);
        assert_eq!(ver.upstream, "2.3-4");
        assert_eq!(ver.revision.as_deref(), Some("5"));

        let ver = v("1.2.3");
        assert_eq!(ver.epoch, 0);
        assert_eq!(ver.revision, None);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(DebVersion::parse("").is_err());
        assert!(DebVersion::parse("x:1.0").is_err());
        assert!(DebVersion::parse("abc").is_err());
        assert!(DebVersion::parse("1.0-").is_err());
        assert!(DebVersion::parse("1.0 2").is_err());
        assert!(DebVersion::parse("1.0/x").is_err());
        assert!(DebVersion::parse("1.0_1").is_err());
    }

    #[test]
    fn test_epoch_wins() {
        assert!(v("1:0.1") > v("9.9"));
    }

    #[test]
    fn test_numeric_ordering() {
        assert!(v("1.10") > v("1.9"));
        assert!(v("1.0-2") < v("1.0-10"));
        assert_eq!(v("1.0").cmp(&v("1.00")), Ordering::Equal);
    }

    #[test]
    fn test_tilde_sorts_first() {
        assert!(v("1.0~rc1") < v("1.0"));
        assert!(v("1.0~~") < v("1.0~"));
        assert!(v("1.0~rc1") < v("1.0~rc2"));
    }

    #[test]
    fn test_letters_before_symbols() {
        assert!(v("1.0a") < v("1.0+"));
        assert!(v("1.0") < v("1.0a"));
        assert!(v("1.0+b1") > v("1.0"));
    }

    #[test]
    fn test_missing_revision_is_lowest() {
        assert!(v("1.0") < v("1.0-1"));
        assert!(v("1.0-0") == v("1.0"));
    }

    #[test]
    fn test_display_roundtrip() {
        for s in ["1.2.3", "2:1.2.3-4ubuntu1", "0.9~beta-1"] {
            assert_eq!(v(s).to_string(), s);
        }
        assert_eq!(v("2:1.2.3-4").without_epoch(), "1.2.3-4");
    }
}
