//! The contract every leaf transformer adapter implements.
//!
//! Adapters wrap whatever actually converts bytes: an office suite bridge, a
//! text extraction library, an external command. The engine only needs to
//! ask whether a pair is possible and to run the conversion. Everything else
//! (limits, statistics, ranking, composition) is layered on top by
//! [`crate::Capability`] and the executor.

use crate::content::{ContentReader, ContentWriter};
use crate::error::TransformError;
use crate::options::{TransformationKey, TransformationOptions};

/// A leaf transformer.
///
/// `transform` is blocking. It runs on tokio's blocking pool, so it may do
/// synchronous file or process I/O freely. It should open and close the
/// reader and writer it is given; the executor logs a warning and closes
/// them itself when it does not.
///
/// `options.limits` holds the resolved limits for the call, so page-limited
/// transformers read `options.limits.page_limit()` from there.
pub trait Transformer: Send + Sync {
    /// Unique, stable name. Used as the property key segment.
    fn name(&self) -> &str;

    /// Whether this transformer can convert `source` to `target` at all.
    fn is_transformable(&self, source: &str, target: &str, options: &TransformationOptions) -> bool;

    fn transform(
        &self,
        reader: &mut dyn ContentReader,
        writer: &mut dyn ContentWriter,
        options: &TransformationOptions,
    ) -> Result<(), TransformError>;

    /// Whether `pageLimit` is honoured for this pair. When it is, a
    /// configured `pageLimit` suppresses `maxPages`.
    fn is_page_limit_supported(&self, _source: &str, _target: &str, _options: &TransformationOptions) -> bool {
        false
    }

    /// Whether the transformer ignores cooperative limits and must be run
    /// under a hard deadline.
    fn needs_interruption(&self) -> bool {
        false
    }

    /// Pairs this transformer is *the* converter for. They get the explicit
    /// priority band unless a priority is configured.
    fn explicit_transformations(&self) -> Vec<TransformationKey> {
        Vec::new()
    }

    fn is_explicit(&self, source: &str, target: &str) -> bool {
        self.explicit_transformations()
            .iter()
            .any(|k| k.matches(source, target))
    }
}
