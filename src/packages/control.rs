// src/packages/control.rs

//! Debian control paragraphs
//!
//! A paragraph is an ordered list of `Field: value` entries; continuation
//! lines start with a space or tab. Field names compare case-insensitively
//! but keep their original spelling and order, so fields read from a
//! package can be passed through to an index unchanged.

use crate::error::{Error, Result};
use std::fmt;

/// One `Field: value` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlField {
    pub name: String,
    /// Value with continuation lines joined by `\n` (leading space kept)
    pub value: String,
}

/// An ordered control paragraph
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlParagraph {
    fields: Vec<ControlField>,
}

impl ControlParagraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a field value by case-insensitive name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
            .map(|f| f.value.as_str())
    }

    /// Set a field, replacing an existing one in place or appending
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.fields.iter_mut().find(|f| f.name.eq_ignore_ascii_case(name)) {
            Some(field) => field.value = value,
            None => self.fields.push(ControlField {
                name: name.to_string(),
                value,
            }),
        }
    }

    /// Remove a field, returning its value
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let pos = self
            .fields
            .iter()
            .position(|f| f.name.eq_ignore_ascii_case(name))?;
        Some(self.fields.remove(pos).value)
    }

    pub fn fields(&self) -> impl Iterator<Item = &ControlField> {
        self.fields.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Parse a single paragraph; blank lines before or after are ignored
    pub fn parse(text: &str) -> Result<Self> {
        let mut paragraphs = parse_paragraphs(text)?;
        match paragraphs.len() {
            0 => Err(Error::ParseError("Empty control paragraph".to_string())),
            1 => Ok(paragraphs.remove(0)),
            n => Err(Error::ParseError(format!(
                "Expected one control paragraph, found {}",
                n
            ))),
        }
    }
}

impl fmt::Display for ControlParagraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for field in &self.fields {
            if field.value.starts_with('\n') {
                writeln!(f, "{}:{}", field.name, field.value)?;
            } else {
                writeln!(f, "{}: {}", field.name, field.value)?;
            }
        }
        Ok(())
    }
}

/// Parse a document of blank-line separated paragraphs
pub fn parse_paragraphs(text: &str) -> Result<Vec<ControlParagraph>> {
    let mut paragraphs = Vec::new();
    let mut current = ControlParagraph::new();

    for (lineno, raw) in text.lines().enumerate() {
        let line = raw.trim_end();

        if line.is_empty() {
            if !current.is_empty() {
                paragraphs.push(std::mem::take(&mut current));
            }
            continue;
        }

        if line.starts_with('#') {
            continue;
        }

        if line.starts_with(' ') || line.starts_with('\t') {
            let last = current.fields.last_mut().ok_or_else(|| {
                Error::ParseError(format!(
                    "Continuation line {} has no field to continue",
                    lineno + 1
                ))
            })?;
            last.value.push('\n');
            last.value.push_str(line);
            continue;
        }

        let (name, value) = line.split_once(':').ok_or_else(|| {
            Error::ParseError(format!("Line {} is not a 'Field: value' pair", lineno + 1))
        })?;
        let name = name.trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(Error::ParseError(format!(
                "Invalid field name '{}' on line {}",
                name,
                lineno + 1
            )));
        }
        if current.get(name).is_some() {
            return Err(Error::ParseError(format!(
                "Duplicate field '{}' on line {}",
                name,
                lineno + 1
            )));
        }

        current.fields.push(ControlField {
            name: name.to_string(),
            value: value.trim().to_string(),
        });
    }

    if !current.is_empty() {
        paragraphs.push(current);
    }

    Ok(paragraphs)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTROL: &str = "Package: hello\n\
Version: 2.10-3\n\
Architecture: amd64\n\
Depends: libc6 (>= 2.34)\n\
Description: example package\n \
 It prints a greeting.\n \
 .\n \
 Second paragraph.\n";

    #[test]
    fn test_parse_keeps_order_and_continuations() {
        let para = ControlParagraph::parse(CONTROL).unwrap();
        let names: Vec<_> = para.fields().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["Package", "Version", "Architecture", "Depends", "Description"]);
        assert_eq!(para.get("package"), Some("hello"));
        assert!(para.get("Description").unwrap().contains("\n It prints"));
    }

    #[test]
    fn test_display_reproduces_input() {
        let para = ControlParagraph::parse(CONTROL).unwrap();
        assert_eq!(para.to_string(), CONTROL);
    }

    #[test]
    fn test_set_and_remove() {
        let mut para = ControlParagraph::parse("Package: a\nVersion: 1\n").unwrap();
        para.set("version", "2");
        para.set("Size", "10");
        assert_eq!(para.to_string(), "Package: a\nVersion: 2\nSize: 10\n");
        assert_eq!(para.remove("PACKAGE").as_deref(), Some("a"));
        assert_eq!(para.len(), 2);
    }

    #[test]
    fn test_multiple_paragraphs() {
        let paras = parse_paragraphs("\n\nPackage: a\n\n\nPackage: b\nVersion: 1\n").unwrap();
        assert_eq!(paras.len(), 2);
        assert_eq!(paras[1].get("Version"), Some("1"));
        assert!(ControlParagraph::parse("Package: a\n\nPackage: b\n").is_err());
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(parse_paragraphs(" orphan continuation\n").is_err());
        assert!(parse_paragraphs("no colon here\n").is_err());
        assert!(parse_paragraphs("Package: a\nPackage: b\n").is_err());
        assert!(ControlParagraph::parse("\n\n").is_err());
    }

    #[test]
    fn test_empty_first_line_value() {
        let text = "Package: a\nConffiles:\n /etc/a.conf 0123\n";
        let para = ControlParagraph::parse(text).unwrap();
        assert_eq!(para.get("Conffiles"), Some("\n /etc/a.conf 0123"));
        assert_eq!(para.to_string(), text);
    }
}
