// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The JAR manifest grammar.
//!
//! `Name: Value` attributes in CRLF-terminated sections separated by
//! blank lines; lines wrap at 70 bytes with continuation lines starting
//! with a single space. Attribute names compare case-insensitively and
//! keep insertion order.
//!
//! Signature-file digests are defined over the exact bytes of a manifest
//! section, so parsing preserves each section's raw bytes; they stay
//! valid until the section is mutated, after which the section renders
//! canonically.

use crate::error::JarSignError;

const LINE_WIDTH: usize = 70;

/// One manifest section: the main section or a named per-entry section.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Section {
    /// `None` for the main section, the `Name:` value otherwise.
    name: Option<String>,
    attributes: Vec<(String, String)>,
    /// Exact bytes this section was parsed from, including the
    /// terminating blank line. Cleared on mutation.
    raw: Option<Vec<u8>>,
}

impl Section {
    pub fn main() -> Self {
        Self {
            name: None,
            attributes: Vec::new(),
            raw: None,
        }
    }

    pub fn entry(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            attributes: Vec::new(),
            raw: None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Sets an attribute, replacing an existing one of the same name.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.raw = None;
        let name = name.into();
        let value = value.into();
        match self
            .attributes
            .iter()
            .position(|(key, _)| key.eq_ignore_ascii_case(&name))
        {
            Some(index) => self.attributes[index].1 = value,
            None => self.attributes.push((name, value)),
        }
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.attributes.len();
        self.attributes
            .retain(|(key, _)| !key.eq_ignore_ascii_case(name));
        if self.attributes.len() != before {
            self.raw = None;
            true
        } else {
            false
        }
    }

    /// Drops every `*-Digest` and `*-Digest-Manifest` attribute,
    /// preserving the rest in order.
    pub fn remove_digest_attributes(&mut self) -> bool {
        let before = self.attributes.len();
        self.attributes.retain(|(key, _)| {
            let key = key.to_ascii_lowercase();
            !(key.ends_with("-digest") || key.ends_with("-digest-manifest"))
        });
        if self.attributes.len() != before {
            self.raw = None;
            true
        } else {
            false
        }
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// The section's bytes: the parse-time bytes when untouched, the
    /// canonical rendition otherwise. Always ends with the blank-line
    /// separator.
    pub fn to_bytes(&self) -> Vec<u8> {
        if let Some(raw) = &self.raw {
            return raw.clone();
        }
        let mut out = Vec::new();
        if let Some(name) = &self.name {
            write_attribute(&mut out, "Name", name);
        }
        for (key, value) in &self.attributes {
            write_attribute(&mut out, key, value);
        }
        out.extend_from_slice(b"\r\n");
        out
    }
}

fn write_attribute(out: &mut Vec<u8>, name: &str, value: &str) {
    let line = format!("{}: {}", name, value);
    let bytes = line.as_bytes();
    let mut written = 0;
    let mut first = true;
    while written < bytes.len() {
        let width = if first { LINE_WIDTH } else { LINE_WIDTH - 1 };
        let chunk = (bytes.len() - written).min(width);
        if !first {
            out.push(b' ');
        }
        out.extend_from_slice(&bytes[written..written + chunk]);
        out.extend_from_slice(b"\r\n");
        written += chunk;
        first = false;
    }
}

/// A parsed manifest or signature file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Manifest {
    main: Section,
    entries: Vec<Section>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            main: Section::main(),
            entries: Vec::new(),
        }
    }
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(data: &[u8]) -> Result<Self, JarSignError> {
        let mut sections = split_sections(data);
        if sections.is_empty() {
            return Ok(Self::new());
        }
        let main_chunk = sections.remove(0);
        let main = parse_section(&main_chunk, true)?;
        let entries = sections
            .iter()
            .map(|chunk| parse_section(chunk, false))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { main, entries })
    }

    pub fn main(&self) -> &Section {
        &self.main
    }

    pub fn main_mut(&mut self) -> &mut Section {
        &mut self.main
    }

    pub fn entries(&self) -> impl Iterator<Item = &Section> {
        self.entries.iter()
    }

    pub fn entry(&self, name: &str) -> Option<&Section> {
        self.entries
            .iter()
            .find(|section| section.name() == Some(name))
    }

    /// The per-entry section, created in place if absent.
    pub fn entry_mut(&mut self, name: &str) -> &mut Section {
        let index = match self
            .entries
            .iter()
            .position(|section| section.name() == Some(name))
        {
            Some(index) => index,
            None => {
                self.entries.push(Section::entry(name));
                self.entries.len() - 1
            }
        };
        &mut self.entries[index]
    }

    pub fn remove_entry(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries
            .retain(|section| section.name() != Some(name));
        self.entries.len() != before
    }

    /// Drops emptied entry sections.
    pub fn prune_empty_entries(&mut self) {
        self.entries.retain(|section| !section.is_empty());
    }

    /// Bytes of the main attribute section, the input to the
    /// `-Digest-Manifest-Main-Attributes` attribute.
    pub fn main_bytes(&self) -> Vec<u8> {
        self.main.to_bytes()
    }

    /// Bytes of one entry's section, the input to its signature-file
    /// digest.
    pub fn entry_bytes(&self, name: &str) -> Option<Vec<u8>> {
        self.entry(name).map(Section::to_bytes)
    }

    /// The complete file: the main section followed by every entry
    /// section.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.main.to_bytes();
        for section in &self.entries {
            out.extend_from_slice(&section.to_bytes());
        }
        out
    }
}

/// Splits a manifest into per-section byte chunks, each including its
/// terminating blank line.
fn split_sections(data: &[u8]) -> Vec<Vec<u8>> {
    let mut sections = Vec::new();
    let mut current = Vec::new();

    for line in LineIter::new(data) {
        let is_blank = line.content.is_empty();
        if is_blank && current.is_empty() {
            // Leading or duplicated separators carry no section.
            continue;
        }
        current.extend_from_slice(line.raw);
        if is_blank {
            sections.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        // The final section is not required to end with a blank line on
        // disk; its canonical bytes are.
        if current.last() != Some(&b'\n') {
            current.extend_from_slice(b"\r\n");
        }
        current.extend_from_slice(b"\r\n");
        sections.push(current);
    }
    sections
}

struct Line<'a> {
    /// Bytes including the line terminator.
    raw: &'a [u8],
    /// Bytes without the terminator.
    content: &'a [u8],
}

struct LineIter<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> LineIter<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }
}

impl<'a> Iterator for LineIter<'a> {
    type Item = Line<'a>;

    fn next(&mut self) -> Option<Line<'a>> {
        if self.pos >= self.data.len() {
            return None;
        }
        let start = self.pos;
        let mut end = start;
        while end < self.data.len() && self.data[end] != b'\n' {
            end += 1;
        }
        let raw_end = (end + 1).min(self.data.len());
        let mut content_end = end;
        if content_end > start && self.data[content_end - 1] == b'\r' {
            content_end -= 1;
        }
        self.pos = raw_end;
        Some(Line {
            raw: &self.data[start..raw_end],
            content: &self.data[start..content_end],
        })
    }
}

fn parse_section(chunk: &[u8], main: bool) -> Result<Section, JarSignError> {
    let mut attributes: Vec<(String, String)> = Vec::new();

    for line in LineIter::new(chunk) {
        let content = line.content;
        if content.is_empty() {
            break;
        }
        if content[0] == b' ' {
            // Continuation of the previous attribute value.
            let tail = std::str::from_utf8(&content[1..])
                .map_err(|_| JarSignError::Manifest("attribute value is not UTF-8".into()))?;
            match attributes.last_mut() {
                Some((_, value)) => value.push_str(tail),
                None => {
                    return Err(JarSignError::Manifest(
                        "continuation line without an attribute".into(),
                    ))
                }
            }
            continue;
        }
        let text = std::str::from_utf8(content)
            .map_err(|_| JarSignError::Manifest("attribute line is not UTF-8".into()))?;
        let (name, value) = text.split_once(':').ok_or_else(|| {
            JarSignError::Manifest(format!("attribute line without a colon: {:?}", text))
        })?;
        let value = value.strip_prefix(' ').unwrap_or(value);
        attributes.push((name.to_owned(), value.to_owned()));
    }

    let name = if main {
        None
    } else {
        let position = attributes
            .iter()
            .position(|(key, _)| key.eq_ignore_ascii_case("Name"))
            .ok_or_else(|| JarSignError::Manifest("entry section without a Name".into()))?;
        Some(attributes.remove(position).1)
    };

    Ok(Section {
        name,
        attributes,
        raw: Some(chunk.to_vec()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &[u8] = b"Manifest-Version: 1.0\r\n\
        Created-By: test\r\n\
        \r\n\
        Name: a.class\r\n\
        SHA-256-Digest: AAAA\r\n\
        \r\n\
        Name: dir/b.txt\r\n\
        SHA-256-Digest: BBBB\r\n\
        Other-Attribute: keep me\r\n\
        \r\n";

    #[test]
    fn parse_and_lookup() {
        let manifest = Manifest::parse(SAMPLE).unwrap();
        assert_eq!(manifest.main().get("Manifest-Version"), Some("1.0"));
        assert_eq!(manifest.main().get("manifest-version"), Some("1.0"));
        assert_eq!(manifest.entries().count(), 2);
        assert_eq!(
            manifest.entry("a.class").unwrap().get("SHA-256-Digest"),
            Some("AAAA")
        );
    }

    #[test]
    fn untouched_sections_round_trip_bytes() {
        let manifest = Manifest::parse(SAMPLE).unwrap();
        assert_eq!(manifest.to_bytes(), SAMPLE);
        // Per-section bytes are splices of the input.
        let entry = manifest.entry_bytes("a.class").unwrap();
        assert!(SAMPLE
            .windows(entry.len())
            .any(|window| window == entry.as_slice()));
    }

    #[test]
    fn digest_attribute_stripping() {
        let mut manifest = Manifest::parse(SAMPLE).unwrap();
        for index in ["a.class", "dir/b.txt"] {
            manifest
                .entry_mut(index)
                .remove_digest_attributes();
        }
        manifest.prune_empty_entries();

        assert!(manifest.entry("a.class").is_none());
        let keeper = manifest.entry("dir/b.txt").unwrap();
        assert_eq!(keeper.get("Other-Attribute"), Some("keep me"));
        assert!(keeper.get("SHA-256-Digest").is_none());
    }

    #[test]
    fn long_values_wrap_with_continuations() {
        let mut section = Section::entry("x");
        let value = "v".repeat(200);
        section.set("SHA-256-Digest", value.clone());
        let bytes = section.to_bytes();

        for line in LineIter::new(&bytes) {
            assert!(line.content.len() <= LINE_WIDTH);
        }

        // And it parses back to the same value.
        let mut chunk = bytes.clone();
        chunk.splice(0..0, b"Name: x\r\n".iter().copied());
        let back = parse_section(&chunk, false).unwrap();
        assert_eq!(back.get("SHA-256-Digest"), Some(value.as_str()));
    }

    #[test]
    fn mutation_invalidates_raw_bytes() {
        let mut manifest = Manifest::parse(SAMPLE).unwrap();
        let before = manifest.entry_bytes("dir/b.txt").unwrap();
        manifest.entry_mut("dir/b.txt").set("SHA-256-Digest", "CCCC");
        let after = manifest.entry_bytes("dir/b.txt").unwrap();
        assert_ne!(before, after);
        assert!(String::from_utf8_lossy(&after).contains("CCCC"));
    }

    #[test]
    fn lf_only_input_is_accepted() {
        let lf = b"Manifest-Version: 1.0\n\nName: x\nSHA-256-Digest: ZZ\n\n";
        let manifest = Manifest::parse(lf).unwrap();
        assert_eq!(manifest.entries().count(), 1);
        assert_eq!(manifest.entry("x").unwrap().get("SHA-256-Digest"), Some("ZZ"));
    }

    #[test]
    fn section_name_wraps_into_continuation() {
        let name = format!("very/long/path/{}.class", "n".repeat(120));
        let mut manifest = Manifest::new();
        manifest.main_mut().set("Manifest-Version", "1.0");
        manifest.entry_mut(&name).set("SHA-256-Digest", "QQ");

        let bytes = manifest.to_bytes();
        let back = Manifest::parse(&bytes).unwrap();
        assert!(back.entry(&name).is_some());
    }
}
