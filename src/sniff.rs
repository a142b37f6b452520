//! Content sniffing from leading bytes.
//!
//! Used after an execution failure to check whether the source really is
//! what its declared mimetype says. A mismatch lets the service retry once
//! with a transformer for the detected type. Only the first
//! [`SNIFF_BYTES`] are looked at.

use crate::content::ContentReader;
use once_cell::sync::Lazy;
use regex::bytes::Regex;
use std::io::Read;

/// Bytes read from the source for detection.
pub const SNIFF_BYTES: usize = 8 * 1024;

static HTML_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(<!doctype\s+html|<html)").unwrap());

/// Guesses a mimetype from leading bytes.
pub trait MimetypeDetector: Send + Sync {
    fn detect(&self, head: &[u8]) -> Option<String>;
}

/// Magic-number detector for the common document and image formats.
#[derive(Debug, Default, Clone, Copy)]
pub struct MagicDetector;

impl MimetypeDetector for MagicDetector {
    fn detect(&self, head: &[u8]) -> Option<String> {
        let found = if head.starts_with(b"%PDF") {
            "application/pdf"
        } else if head.starts_with(b"PK\x03\x04") {
            zip_flavour(head)
        } else if head.starts_with(b"{\\rtf") {
            "application/rtf"
        } else if head.starts_with(b"\x89PNG\r\n\x1a\n") {
            "image/png"
        } else if head.starts_with(&[0xFF, 0xD8, 0xFF]) {
            "image/jpeg"
        } else if head.starts_with(b"GIF87a") || head.starts_with(b"GIF89a") {
            "image/gif"
        } else if HTML_RE.is_match(head) {
            "text/html"
        } else if head.starts_with(b"<?xml") {
            "application/xml"
        } else if looks_like_json(head) {
            "application/json"
        } else if looks_like_text(head) {
            "text/plain"
        } else {
            return None;
        };
        Some(found.to_string())
    }
}

/// OOXML packages are zips whose first entries live under a
/// format-specific directory.
fn zip_flavour(head: &[u8]) -> &'static str {
    if contains(head, b"word/") {
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
    } else if contains(head, b"xl/") {
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
    } else if contains(head, b"ppt/") {
        "application/vnd.openxmlformats-officedocument.presentationml.presentation"
    } else {
        "application/zip"
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn looks_like_json(head: &[u8]) -> bool {
    matches!(
        head.iter().find(|b| !b.is_ascii_whitespace()),
        Some(b'{') | Some(b'[')
    ) && looks_like_text(head)
}

/// UTF-8 without NULs. A multi-byte sequence cut at the end of the window
/// still counts.
fn looks_like_text(head: &[u8]) -> bool {
    if head.is_empty() || head.contains(&0) {
        return false;
    }
    match std::str::from_utf8(head) {
        Ok(_) => true,
        Err(e) => e.error_len().is_none() && head.len() - e.valid_up_to() < 4,
    }
}

/// Read up to [`SNIFF_BYTES`] from a fresh copy of `reader` and detect.
/// `None` when the content cannot be read or is not recognised.
pub fn sniff(reader: &dyn ContentReader, detector: &dyn MimetypeDetector) -> Option<String> {
    let mut fresh = reader.fresh().ok()?;
    let mut head = Vec::with_capacity(SNIFF_BYTES);
    let read = fresh
        .open()
        .and_then(|r| r.take(SNIFF_BYTES as u64).read_to_end(&mut head));
    fresh.close();
    read.ok()?;
    detector.detect(&head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::MemoryReader;

    fn detect(bytes: &[u8]) -> Option<String> {
        MagicDetector.detect(bytes)
    }

    #[test]
    fn recognises_documents() {
        assert_eq!(detect(b"%PDF-1.7\n...").as_deref(), Some("application/pdf"));
        assert_eq!(detect(b"{\\rtf1\\ansi hello}").as_deref(), Some("application/rtf"));
        assert_eq!(detect(b"  <!DOCTYPE html><html></html>").as_deref(), Some("text/html"));
        assert_eq!(detect(b"<HTML><body/></HTML>").as_deref(), Some("text/html"));
        assert_eq!(detect(b"<?xml version=\"1.0\"?><a/>").as_deref(), Some("application/xml"));
        assert_eq!(detect(b"\n  {\"a\": 1}").as_deref(), Some("application/json"));
        assert_eq!(detect(b"plain words").as_deref(), Some("text/plain"));
    }

    #[test]
    fn recognises_images() {
        assert_eq!(detect(b"\x89PNG\r\n\x1a\n\0\0").as_deref(), Some("image/png"));
        assert_eq!(detect(&[0xFF, 0xD8, 0xFF, 0xE0, 0, 0]).as_deref(), Some("image/jpeg"));
        assert_eq!(detect(b"GIF89a\x01\0").as_deref(), Some("image/gif"));
    }

    #[test]
    fn distinguishes_zip_flavours() {
        let mut docx = b"PK\x03\x04\x14\0\0\0".to_vec();
        docx.extend_from_slice(b"word/document.xml");
        assert_eq!(
            detect(&docx).as_deref(),
            Some("application/vnd.openxmlformats-officedocument.wordprocessingml.document")
        );
        assert_eq!(detect(b"PK\x03\x04\x14\0\0\0data.bin").as_deref(), Some("application/zip"));
    }

    #[test]
    fn binary_noise_is_unknown() {
        assert_eq!(detect(&[0x00, 0x01, 0x02, 0xFE]), None);
        assert_eq!(detect(b""), None);
    }

    #[test]
    fn truncated_utf8_still_counts_as_text() {
        let mut bytes = "héllo".as_bytes().to_vec();
        bytes.push(0xC3);
        assert_eq!(detect(&bytes).as_deref(), Some("text/plain"));
    }

    #[test]
    fn sniff_reads_a_fresh_copy() {
        let reader = MemoryReader::new(b"%PDF-1.4 body".to_vec(), "text/plain");
        assert_eq!(sniff(&reader, &MagicDetector).as_deref(), Some("application/pdf"));
        assert!(!reader.is_open());
    }
}
