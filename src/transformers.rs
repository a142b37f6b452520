//! Reference leaf transformers.
//!
//! Real deployments plug in adapters for office suites, PDF libraries and
//! external commands. These two need nothing but the bytes and are useful
//! as pipeline glue and as defaults in tests and the CLI.

use crate::content::{copy_content, ContentReader, ContentWriter};
use crate::error::TransformError;
use crate::options::TransformationOptions;
use crate::transformer::Transformer;
use std::io::Read;

/// Copies bytes unchanged when source and target are the same non-text
/// mimetype. Text-to-text is left to transformers that know encodings.
#[derive(Debug, Default)]
pub struct BinaryPassThroughTransformer;

impl BinaryPassThroughTransformer {
    pub const NAME: &'static str = "BinaryPassThrough";
}

impl Transformer for BinaryPassThroughTransformer {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn is_transformable(&self, source: &str, target: &str, _options: &TransformationOptions) -> bool {
        source == target && !source.starts_with("text/")
    }

    fn transform(
        &self,
        reader: &mut dyn ContentReader,
        writer: &mut dyn ContentWriter,
        _options: &TransformationOptions,
    ) -> Result<(), TransformError> {
        copy_content(reader, writer)?;
        Ok(())
    }
}

/// Decodes text-like sources as UTF-8 (lossy) and writes `text/plain`.
#[derive(Debug, Default)]
pub struct StringExtractingTransformer;

impl StringExtractingTransformer {
    pub const NAME: &'static str = "StringExtracting";

    fn is_text_like(mimetype: &str) -> bool {
        mimetype.starts_with("text/") || mimetype == "application/json" || mimetype == "application/xml"
    }
}

impl Transformer for StringExtractingTransformer {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn is_transformable(&self, source: &str, target: &str, _options: &TransformationOptions) -> bool {
        target == "text/plain" && Self::is_text_like(source)
    }

    fn transform(
        &self,
        reader: &mut dyn ContentReader,
        writer: &mut dyn ContentWriter,
        _options: &TransformationOptions,
    ) -> Result<(), TransformError> {
        let mut raw = Vec::new();
        let read = reader.open().and_then(|r| r.read_to_end(&mut raw));
        reader.close();
        read?;
        let text = String::from_utf8_lossy(&raw);
        writer.write_all(text.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{MemoryReader, MemoryWriter};

    #[test]
    fn pass_through_only_for_same_binary_type() {
        let t = BinaryPassThroughTransformer;
        let o = TransformationOptions::new();
        assert!(t.is_transformable("application/pdf", "application/pdf", &o));
        assert!(!t.is_transformable("text/plain", "text/plain", &o));
        assert!(!t.is_transformable("application/pdf", "image/png", &o));
    }

    #[test]
    fn pass_through_copies_bytes() {
        let mut r = MemoryReader::new(vec![0u8, 1, 2, 255], "application/octet-stream");
        let mut w = MemoryWriter::new("application/octet-stream");
        let out = w.buffer();
        BinaryPassThroughTransformer
            .transform(&mut r, &mut w, &TransformationOptions::new())
            .unwrap();
        assert_eq!(out.contents(), vec![0u8, 1, 2, 255]);
        assert!(!r.is_open() && !w.is_open());
    }

    #[test]
    fn string_extraction_replaces_invalid_utf8() {
        let mut r = MemoryReader::new(b"ok \xFF done".to_vec(), "text/html");
        let mut w = MemoryWriter::new("text/plain");
        let out = w.buffer();
        StringExtractingTransformer
            .transform(&mut r, &mut w, &TransformationOptions::new())
            .unwrap();
        assert_eq!(out.to_string_lossy(), "ok \u{FFFD} done");
    }

    #[test]
    fn string_extraction_targets_plain_text_only() {
        let t = StringExtractingTransformer;
        let o = TransformationOptions::new();
        assert!(t.is_transformable("application/json", "text/plain", &o));
        assert!(t.is_transformable("text/csv", "text/plain", &o));
        assert!(!t.is_transformable("application/pdf", "text/plain", &o));
        assert!(!t.is_transformable("text/html", "application/pdf", &o));
    }
}
