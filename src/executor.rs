//! The envelope around every capability invocation.
//!
//! ```text
//!  mimetypes set? ──► supported & fits? ──► resolve limits ──► arm reader/writer
//!        │                   │                                      │
//!   MissingMimetype     Unsupported (no stats)                      ▼
//!                                               run (leaf, pipeline or failover)
//!                                                                   │
//!                       Ok ──► record time      Err ──► record error, wrap in Failed
//!                                                                   │
//!                                               reader/writer left open? warn
//! ```
//!
//! Nesting is explicit: composites call [`TransformExecutor::execute`] again
//! with [`CallContext::nested`], which is how the tracker knows whether an
//! observation also counts towards the transformer and system summaries.
//! The executor itself is synchronous; the async service drives it from the
//! blocking pool.

use crate::capability::Capability;
use crate::content::{CancelFlag, ContentReader, ContentWriter, FileWriter};
use crate::error::TransformError;
use crate::options::TransformationOptions;
use crate::progress::Listener;
use crate::registry::TransformerRegistry;
use mimetype_catalog::MimetypeCatalog;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

// ── Call context ─────────────────────────────────────────────────────────

/// Per-call state threaded through nested invocations.
#[derive(Clone)]
pub struct CallContext<'a> {
    executor: &'a TransformExecutor,
    depth: u32,
    rerouted: bool,
    cancel: CancelFlag,
}

impl<'a> CallContext<'a> {
    pub fn top_level(executor: &'a TransformExecutor, cancel: CancelFlag) -> Self {
        Self {
            executor,
            depth: 0,
            rerouted: false,
            cancel,
        }
    }

    /// The context for a reroute attempt; a rerouted call never reroutes again.
    pub fn rerouted(mut self) -> Self {
        self.rerouted = true;
        self
    }

    /// The context for a part of a composite.
    pub fn nested(&self) -> CallContext<'a> {
        CallContext {
            executor: self.executor,
            depth: self.depth + 1,
            rerouted: self.rerouted,
            cancel: self.cancel.clone(),
        }
    }

    pub fn executor(&self) -> &'a TransformExecutor {
        self.executor
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn is_top_level(&self) -> bool {
        self.depth == 0
    }

    pub fn is_rerouted(&self) -> bool {
        self.rerouted
    }

    pub fn cancel(&self) -> &CancelFlag {
        &self.cancel
    }
}

// ── Executor ─────────────────────────────────────────────────────────────

pub struct TransformExecutor {
    registry: TransformerRegistry,
    catalog: Arc<MimetypeCatalog>,
    listener: Listener,
}

impl TransformExecutor {
    pub fn new(registry: TransformerRegistry, catalog: Arc<MimetypeCatalog>, listener: Listener) -> Self {
        Self {
            registry,
            catalog,
            listener,
        }
    }

    pub fn registry(&self) -> &TransformerRegistry {
        &self.registry
    }

    pub fn catalog(&self) -> &MimetypeCatalog {
        &self.catalog
    }

    pub fn listener(&self) -> &Listener {
        &self.listener
    }

    /// A temp file writer for an intermediate artifact, named with the
    /// mimetype's extension when the catalog knows one.
    pub fn temp_writer(&self, mimetype: &str) -> Result<FileWriter, TransformError> {
        let extension = self.catalog.extension_for_mimetype(mimetype);
        let dir = self.registry.config().temp_dir.as_deref();
        Ok(FileWriter::temp(mimetype, dir, extension)?)
    }

    /// Time recorded for a failed attempt: the configured `errorTime` when
    /// positive, the real elapsed time otherwise.
    pub fn error_penalty_ms(&self, transformer: &str, elapsed_ms: u64) -> u64 {
        let configured = self
            .registry
            .properties()
            .error_time_ms(Some(transformer), self.registry.config());
        if configured > 0 {
            configured as u64
        } else {
            elapsed_ms
        }
    }

    /// Record a failure observed outside [`Self::execute`], e.g. a deadline
    /// expiry in the service.
    pub fn record_failure(&self, transformer: &str, source: &str, target: &str, elapsed_ms: u64, top_level: bool) {
        let penalty = self.error_penalty_ms(transformer, elapsed_ms);
        self.registry
            .tracker()
            .record_error(transformer, source, target, penalty, top_level);
    }

    /// Run `capability` once, with limits, statistics and leak checks.
    pub fn execute(
        &self,
        capability: &Capability,
        reader: &mut dyn ContentReader,
        writer: &mut dyn ContentWriter,
        options: &TransformationOptions,
        ctx: &CallContext<'_>,
    ) -> Result<(), TransformError> {
        let source = reader
            .mimetype()
            .ok_or(TransformError::MissingMimetype { role: "source" })?
            .to_string();
        let target = writer
            .mimetype()
            .ok_or(TransformError::MissingMimetype { role: "target" })?
            .to_string();
        let size = reader.size();
        let name = capability.name();
        let registry = &self.registry;

        if !capability.is_supported(&source, &target, options, registry)
            || !capability.fits(&source, size, &target, options, registry)
        {
            debug!(transformer = name, size, "{source} -> {target} not feasible");
            self.listener.on_unsupported(&source, size, &target, Some(name));
            return Err(TransformError::Unsupported {
                source_mimetype: source,
                target_mimetype: target,
                size,
                transformer: Some(name.to_string()),
            });
        }

        let limits = capability.limits(&source, &target, options, registry);
        reader.set_limits(&limits, ctx.cancel().clone());
        writer.set_cancel(ctx.cancel().clone());

        self.listener.on_attempt_start(name, &source, &target, ctx.depth());
        let start = Instant::now();
        let result = match capability {
            Capability::Simple(t) => {
                let effective = TransformationOptions {
                    limits,
                    ..options.clone()
                };
                t.transform(reader, writer, &effective)
            }
            // parts resolve their own limits from the caller's options
            Capability::Pipeline(p) => p.run(reader, writer, options, ctx),
            Capability::Failover(f) => f.run(reader, writer, options, ctx),
        };
        let elapsed_ms = start.elapsed().as_millis() as u64;
        let top_level = ctx.is_top_level();

        let outcome = match result {
            Ok(()) if ctx.cancel().is_cancelled() => Err(TransformError::Cancelled),
            Ok(()) => {
                registry
                    .tracker()
                    .record_time(name, &source, &target, elapsed_ms, top_level);
                self.listener
                    .on_success(name, &source, &target, elapsed_ms, ctx.depth());
                debug!(transformer = name, elapsed_ms, depth = ctx.depth(), "{source} -> {target} done");
                Ok(())
            }
            Err(e) if e.is_unsupported() => Err(e),
            Err(_) if ctx.cancel().is_cancelled() => Err(TransformError::Cancelled),
            Err(e) => {
                self.record_failure(name, &source, &target, elapsed_ms, top_level);
                self.listener
                    .on_failure(name, &source, &target, &e.to_string(), ctx.depth());
                warn!(
                    transformer = name,
                    elapsed_ms,
                    depth = ctx.depth(),
                    error = %e,
                    "{source} -> {target} failed"
                );
                Err(TransformError::Failed {
                    transformer: name.to_string(),
                    source_mimetype: source,
                    target_mimetype: target,
                    reader: reader.describe(),
                    writer: writer.describe(),
                    source: Box::new(e),
                })
            }
        };

        self.check_closed(name, reader, writer, ctx);
        outcome
    }

    /// Leaks are logged, never fatal. Only the outermost call closes what
    /// was left open; composites deal with their own intermediates.
    fn check_closed(
        &self,
        name: &str,
        reader: &mut dyn ContentReader,
        writer: &mut dyn ContentWriter,
        ctx: &CallContext<'_>,
    ) {
        if reader.is_open() {
            warn!(transformer = name, reader = %reader.describe(), "Transformer left its reader open");
            if ctx.is_top_level() {
                reader.close();
            }
        }
        if writer.is_open() {
            warn!(transformer = name, writer = %writer.describe(), "Transformer left its writer open");
            if ctx.is_top_level() {
                if let Err(e) = writer.close() {
                    warn!(transformer = name, error = %e, "Closing a leaked writer failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::content::{copy_content, MemoryReader, MemoryWriter};
    use crate::progress::NoopListener;
    use crate::properties::TransformerProperties;
    use crate::stats::StatsKey;
    use crate::transformer::Transformer;
    use mimetype_catalog::default_catalog;
    use std::io::{Read, Write};

    struct Echo;

    impl Transformer for Echo {
        fn name(&self) -> &str {
            "copy"
        }

        fn is_transformable(&self, source: &str, _t: &str, _o: &TransformationOptions) -> bool {
            source == "text/plain"
        }

        fn transform(
            &self,
            reader: &mut dyn ContentReader,
            writer: &mut dyn ContentWriter,
            _o: &TransformationOptions,
        ) -> Result<(), TransformError> {
            copy_content(reader, writer).map(|_| ())
        }
    }

    struct Broken;

    impl Transformer for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn is_transformable(&self, _s: &str, _t: &str, _o: &TransformationOptions) -> bool {
            true
        }

        fn transform(
            &self,
            _r: &mut dyn ContentReader,
            _w: &mut dyn ContentWriter,
            _o: &TransformationOptions,
        ) -> Result<(), TransformError> {
            Err(TransformError::transformer("broken", "corrupt input"))
        }
    }

    /// Reads a little and walks away without closing anything.
    struct Leaky;

    impl Transformer for Leaky {
        fn name(&self) -> &str {
            "leaky"
        }

        fn is_transformable(&self, _s: &str, _t: &str, _o: &TransformationOptions) -> bool {
            true
        }

        fn transform(
            &self,
            reader: &mut dyn ContentReader,
            writer: &mut dyn ContentWriter,
            _o: &TransformationOptions,
        ) -> Result<(), TransformError> {
            let mut buf = [0u8; 2];
            reader.open()?.read_exact(&mut buf)?;
            writer.open()?.write_all(&buf)?;
            Ok(())
        }
    }

    fn executor(pairs: &[(&str, &str)]) -> TransformExecutor {
        let config = Arc::new(EngineConfig::default());
        let props = TransformerProperties::from_pairs(&config.prefix, pairs.iter().copied(), default_catalog()).unwrap();
        let registry = TransformerRegistry::new(config, Arc::new(props));
        TransformExecutor::new(registry, Arc::new(default_catalog().clone()), Arc::new(NoopListener))
    }

    #[test]
    fn success_records_time_with_fan_out() {
        let ex = executor(&[]);
        let cap = Capability::simple(Echo);
        let mut r = MemoryReader::new(b"hello".to_vec(), "text/plain");
        let mut w = MemoryWriter::new("text/html");
        let out = w.buffer();
        let ctx = CallContext::top_level(&ex, CancelFlag::new());
        ex.execute(&cap, &mut r, &mut w, &TransformationOptions::new(), &ctx).unwrap();
        assert_eq!(out.to_string_lossy(), "hello");
        let tracker = ex.registry().tracker();
        assert!(tracker.get(&StatsKey::pair("copy", "text/plain", "text/html")).is_some());
        assert!(tracker.get(&StatsKey::summary("copy")).is_some());
        assert!(tracker.get(&StatsKey::system()).is_some());
    }

    #[test]
    fn nested_success_records_only_the_pair() {
        let ex = executor(&[]);
        let cap = Capability::simple(Echo);
        let mut r = MemoryReader::new(b"x".to_vec(), "text/plain");
        let mut w = MemoryWriter::new("text/html");
        let top = CallContext::top_level(&ex, CancelFlag::new());
        ex.execute(&cap, &mut r, &mut w, &TransformationOptions::new(), &top.nested())
            .unwrap();
        assert_eq!(ex.registry().tracker().len(), 1);
    }

    #[test]
    fn unsupported_leaves_statistics_untouched() {
        let ex = executor(&[]);
        let cap = Capability::simple(Echo);
        let mut r = MemoryReader::new(b"x".to_vec(), "image/png");
        let mut w = MemoryWriter::new("text/html");
        let ctx = CallContext::top_level(&ex, CancelFlag::new());
        let err = ex
            .execute(&cap, &mut r, &mut w, &TransformationOptions::new(), &ctx)
            .unwrap_err();
        assert!(err.is_unsupported());
        assert!(ex.registry().tracker().is_empty());
    }

    #[test]
    fn missing_mimetype_is_reported_by_role() {
        let ex = executor(&[]);
        let cap = Capability::simple(Echo);
        let mut r = MemoryReader::untyped(b"x".to_vec());
        let mut w = MemoryWriter::new("text/html");
        let ctx = CallContext::top_level(&ex, CancelFlag::new());
        let err = ex
            .execute(&cap, &mut r, &mut w, &TransformationOptions::new(), &ctx)
            .unwrap_err();
        assert!(matches!(err, TransformError::MissingMimetype { role: "source" }));
    }

    #[test]
    fn failure_counts_one_error_with_penalty() {
        let ex = executor(&[("content.transformer.broken.errorTime", "777")]);
        let cap = Capability::simple(Broken);
        let mut r = MemoryReader::new(b"x".to_vec(), "text/plain");
        let mut w = MemoryWriter::new("text/html");
        let ctx = CallContext::top_level(&ex, CancelFlag::new());
        let err = ex
            .execute(&cap, &mut r, &mut w, &TransformationOptions::new(), &ctx)
            .unwrap_err();
        assert!(matches!(err, TransformError::Failed { ref transformer, .. } if transformer == "broken"));
        assert_eq!(err.root_cause().to_string(), "broken: corrupt input");
        let record = ex
            .registry()
            .tracker()
            .get(&StatsKey::pair("broken", "text/plain", "text/html"))
            .unwrap();
        assert_eq!(record.error_count(), 1);
        assert_eq!(record.average_ms(), 777.0);
    }

    #[test]
    fn non_positive_error_time_records_elapsed() {
        let ex = executor(&[("content.transformer.broken.errorTime", "0")]);
        assert_eq!(ex.error_penalty_ms("broken", 42), 42);
        assert_eq!(ex.error_penalty_ms("other", 42), 120_000);
    }

    #[test]
    fn cancelled_calls_skip_statistics() {
        let ex = executor(&[]);
        let cap = Capability::simple(Broken);
        let mut r = MemoryReader::new(b"x".to_vec(), "text/plain");
        let mut w = MemoryWriter::new("text/html");
        let cancel = CancelFlag::new();
        cancel.cancel();
        let ctx = CallContext::top_level(&ex, cancel);
        let err = ex
            .execute(&cap, &mut r, &mut w, &TransformationOptions::new(), &ctx)
            .unwrap_err();
        assert!(matches!(err, TransformError::Cancelled));
        assert!(ex.registry().tracker().is_empty());
    }

    #[test]
    fn leaked_streams_are_closed_at_top_level() {
        let ex = executor(&[]);
        let cap = Capability::simple(Leaky);
        let mut r = MemoryReader::new(b"abcdef".to_vec(), "text/plain");
        let mut w = MemoryWriter::new("text/html");
        let out = w.buffer();
        let ctx = CallContext::top_level(&ex, CancelFlag::new());
        ex.execute(&cap, &mut r, &mut w, &TransformationOptions::new(), &ctx).unwrap();
        assert!(!r.is_open());
        assert!(!w.is_open());
        assert_eq!(out.to_string_lossy(), "ab");
    }

    #[test]
    fn temp_writer_uses_catalog_extension() {
        let ex = executor(&[]);
        let w = ex.temp_writer("application/pdf").unwrap();
        assert_eq!(w.path().extension().and_then(|e| e.to_str()), Some("pdf"));
        assert!(w.is_temp());
    }
}
