//! Content normalization and fingerprinting.
//!
//! Two templates are duplicates when the request section of each, with
//! comment lines dropped and every whitespace character removed, hashes to
//! the same MD5 digest. Everything before the request section (id, info
//! block, severity) is ignored, so templates that differ only in metadata
//! still collapse to one.

use std::fmt;
use std::fs;
use std::path::Path;

use md5::{Digest, Md5};

use crate::error::{IoContext, Result};

/// Extension of template documents, without the dot.
pub const TEMPLATE_EXT: &str = "yaml";

/// Tokens that introduce the request section of a template.
pub const REQUEST_MARKERS: [&str; 2] = ["requests:", "http:"];

/// Extract the canonical fragment used as dedup key material.
///
/// The text after the earliest request marker is kept (the whole document
/// when no marker is present). Lines (ended by LF, CRLF or a lone CR) whose
/// trimmed form starts with `#` are dropped and the rest are joined with no separator.
pub fn extract_fragment(content: &str) -> String {
    let body = REQUEST_MARKERS
        .iter()
        .filter_map(|marker| content.find(marker).map(|at| (at, marker.len())))
        .min_by_key(|&(at, _)| at)
        .map(|(at, len)| &content[at + len..])
        .unwrap_or(content);

    // CR, LF and CRLF all end a line
    body.split(|c| c == '\n' || c == '\r')
        .filter(|line| !line.trim().starts_with('#'))
        .collect()
}

/// Whitespace-insensitive 128-bit content digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Fingerprint([u8; 16]);

impl Fingerprint {
    pub fn of_fragment(fragment: &str) -> Self {
        let compact: String = fragment.chars().filter(|c| !c.is_whitespace()).collect();

        let mut hasher = Md5::new();
        hasher.update(compact.as_bytes());
        let digest = hasher.finalize();

        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest);
        Fingerprint(bytes)
    }

    pub fn of_document(content: &str) -> Self {
        Self::of_fragment(&extract_fragment(content))
    }

    /// Read a template from disk and fingerprint it.
    pub fn of_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).at(path)?;
        Ok(Self::of_document(&content))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Name of the file this fingerprint is stored under after dedup.
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.to_hex(), TEMPLATE_EXT)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_fragment_after_requests() {
        let doc = "id: x\ninfo:\n  name: x\nrequests:\n  - method: GET\n";
        assert_eq!(extract_fragment(doc), "  - method: GET");
    }

    #[test]
    fn test_extract_fragment_after_http() {
        let doc = "id: x\nhttp:\n  - method: POST\n    path: /login\n";
        assert_eq!(extract_fragment(doc), "  - method: POST    path: /login");
    }

    #[test]
    fn test_extract_fragment_without_marker_keeps_everything() {
        let doc = "id: x\ndns:\n  - name: example\n";
        assert_eq!(extract_fragment(doc), "id: xdns:  - name: example");
    }

    #[test]
    fn test_extract_fragment_earliest_marker_wins() {
        // requests: first
        let doc = "requests:\n  a: 1\nhttp:\n  b: 2\n";
        assert_eq!(extract_fragment(doc), "  a: 1http:  b: 2");

        // http: first, even though requests: is also present
        let doc = "http:\n  b: 2\nrequests:\n  a: 1\n";
        assert_eq!(extract_fragment(doc), "  b: 2requests:  a: 1");
    }

    #[test]
    fn test_extract_fragment_strips_comments_anywhere() {
        let doc = "requests:\n# leading\n  - method: GET\n    # indented comment\n  path: /\n#";
        assert_eq!(extract_fragment(doc), "  - method: GET  path: /");
    }

    #[test]
    fn test_extract_fragment_handles_cr_line_endings() {
        let lf = "requests:\n# comment\n  - method: GET\n";
        let cr = "requests:\r# comment\r  - method: GET\r";
        let crlf = "requests:\r\n# comment\r\n  - method: GET\r\n";
        assert_eq!(extract_fragment(cr), "  - method: GET");
        assert_eq!(extract_fragment(crlf), "  - method: GET");
        assert_eq!(Fingerprint::of_document(lf), Fingerprint::of_document(cr));
        assert_eq!(Fingerprint::of_document(lf), Fingerprint::of_document(crlf));
    }

    #[test]
    fn test_comment_before_marker_is_irrelevant() {
        let a = "# header\nid: a\nrequests:\n  - method: GET\n";
        let b = "id: b\nrequests:\n  - method: GET\n";
        assert_eq!(Fingerprint::of_document(a), Fingerprint::of_document(b));
    }

    #[test]
    fn test_fingerprint_ignores_whitespace_layout() {
        let a = "requests:\n  - method: GET\n    path:\n      - \"{{BaseURL}}/admin\"\n";
        let b = "requests:\n\n\n\t- method:   GET\r\n    path:\n\n      -     \"{{BaseURL}}/admin\"";
        assert_eq!(Fingerprint::of_document(a), Fingerprint::of_document(b));
    }

    #[test]
    fn test_fingerprint_detects_content_change() {
        let a = "requests:\n  - method: GET\n";
        let b = "requests:\n  - method: POST\n";
        assert_ne!(Fingerprint::of_document(a), Fingerprint::of_document(b));
    }

    #[test]
    fn test_fingerprint_is_md5_of_compacted_fragment() {
        // md5("") and md5("abc") are well known
        assert_eq!(Fingerprint::of_fragment("").to_hex(), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(Fingerprint::of_fragment(" a\tb\nc ").to_hex(), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn test_file_name_shape() {
        let name = Fingerprint::of_fragment("x").file_name();
        assert_eq!(name.len(), 32 + ".yaml".len());
        assert!(name.ends_with(".yaml"));
        assert!(name[..32].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_of_file_reports_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.yaml");
        let err = Fingerprint::of_file(&missing).unwrap_err();
        assert!(err.to_string().contains("nope.yaml"));
    }
}
