//! Small built-in payloads, one per mimetype, for the test transform.
//!
//! Each payload is a minimal but valid document of its type, so a real
//! transformer can open it.

use crate::content::MemoryReader;

const PDF: &[u8] = b"%PDF-1.4
1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj
2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj
3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 200 200] /Contents 4 0 R >> endobj
4 0 obj << /Length 35 >> stream
BT /F1 12 Tf 20 100 Td (Sample) Tj ET
endstream endobj
trailer << /Root 1 0 R >>
%%EOF
";

const PNG_1X1: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4,
    0x89, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0xF8, 0xCF, 0xC0, 0xF0,
    0x1F, 0x00, 0x05, 0x00, 0x01, 0xFF, 0x89, 0x99, 0x3D, 0x1D, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45,
    0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

const GIF_1X1: &[u8] = b"GIF89a\x01\x00\x01\x00\x80\x00\x00\x00\x00\x00\xff\xff\xff!\xf9\x04\x01\x00\x00\x00\x00,\x00\x00\x00\x00\x01\x00\x01\x00\x00\x02\x02D\x01\x00;";

// end-of-central-directory record only
const EMPTY_ZIP: &[u8] = b"PK\x05\x06\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00";

static SAMPLES: &[(&str, &[u8])] = &[
    ("text/plain", b"The quick brown fox jumps over the lazy dog.\n"),
    (
        "text/html",
        b"<!DOCTYPE html>\n<html><head><title>Sample</title></head><body><p>The quick brown fox.</p></body></html>\n",
    ),
    ("application/xml", b"<?xml version=\"1.0\"?>\n<sample><text>The quick brown fox.</text></sample>\n"),
    ("text/xml", b"<?xml version=\"1.0\"?>\n<sample><text>The quick brown fox.</text></sample>\n"),
    ("text/csv", b"name,colour\nfox,brown\ndog,lazy\n"),
    ("text/markdown", b"# Sample\n\nThe *quick* brown fox.\n"),
    ("application/json", b"{\"sample\": \"The quick brown fox.\"}\n"),
    ("application/rtf", b"{\\rtf1\\ansi\\deff0 {\\fonttbl {\\f0 Times;}} The quick brown fox.\\par}\n"),
    ("application/pdf", PDF),
    ("image/png", PNG_1X1),
    ("image/gif", GIF_1X1),
    ("application/zip", EMPTY_ZIP),
];

/// The sample payload for `mimetype`, if one is built in.
pub fn sample(mimetype: &str) -> Option<&'static [u8]> {
    SAMPLES
        .iter()
        .find(|(m, _)| *m == mimetype)
        .map(|(_, data)| *data)
}

/// Mimetypes with a built-in sample, in a stable order.
pub fn sample_mimetypes() -> Vec<&'static str> {
    SAMPLES.iter().map(|(m, _)| *m).collect()
}

/// A reader over the sample for `mimetype`.
pub fn sample_reader(mimetype: &str) -> Option<MemoryReader> {
    sample(mimetype).map(|data| MemoryReader::new(data.to_vec(), mimetype))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ContentReader;
    use crate::sniff::{MagicDetector, MimetypeDetector};

    #[test]
    fn samples_sniff_as_their_own_type() {
        for m in ["text/plain", "text/html", "application/xml", "application/json", "application/rtf", "application/pdf", "image/png", "image/gif"] {
            let data = sample(m).unwrap();
            assert_eq!(MagicDetector.detect(data).as_deref(), Some(m), "sample for {m}");
        }
    }

    #[test]
    fn unknown_mimetype_has_no_sample() {
        assert!(sample("application/x-nothing").is_none());
        assert!(sample_reader("application/x-nothing").is_none());
    }

    #[test]
    fn reader_carries_the_mimetype() {
        let r = sample_reader("text/csv").unwrap();
        assert_eq!(r.mimetype(), Some("text/csv"));
        assert!(r.size() > 0);
        assert_eq!(sample_mimetypes().len(), SAMPLES.len());
    }
}
