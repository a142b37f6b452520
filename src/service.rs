//! The top-level entry point: select, execute, report.
//!
//! ## Flow
//!
//! ```text
//! transform(reader, writer)
//!  │
//!  ├─ 1. Select    rank feasible selectable capabilities, take the best
//!  ├─ 2. Execute   on the blocking pool; under a hard deadline when the
//!  │               capability needs interruption
//!  ├─ 3. Reroute   execution failed and the source sniffs as another
//!  │               type: retry once with the best transformer for it
//!  └─ 4. Report    transformer used, timings, bytes written
//! ```
//!
//! Transformers are blocking, so every invocation runs inside
//! `spawn_blocking`. The deadline is `timeoutMs` plus the configured margin.
//! On expiry the call's [`CancelFlag`] is raised (the worker's next read or
//! write fails and releases its streams), a timeout is recorded against the
//! transformer, and [`TransformError::Timeout`] is returned without waiting
//! for the worker.

use crate::assembly::{build_composites, register_leaves};
use crate::capability::Capability;
use crate::config::EngineConfig;
use crate::content::{CancelFlag, ContentReader, ContentWriter};
use crate::error::{ConfigError, ErrorKind, TransformError};
use crate::executor::{CallContext, TransformExecutor};
use crate::options::{TransformationOptions, TransformationRequest};
use crate::progress::{Listener, NoopListener};
use crate::properties::TransformerProperties;
use crate::registry::TransformerRegistry;
use crate::selector::RankedCandidate;
use crate::sniff::{sniff, MagicDetector, MimetypeDetector};
use crate::stats::PerformanceTracker;
use crate::transformer::Transformer;
use mimetype_catalog::{default_catalog, MimetypeCatalog};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

// ── Report ───────────────────────────────────────────────────────────────

/// What a successful [`TransformService::transform`] did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformReport {
    /// The capability that produced the output.
    pub transformer: String,
    /// Source mimetype the output was produced from; the sniffed one after
    /// a reroute.
    pub source_mimetype: String,
    pub target_mimetype: String,
    /// Wall-clock time of the whole call, reroute included.
    pub elapsed_ms: u64,
    /// The capability that failed first, when the call was rerouted.
    pub rerouted_from: Option<String>,
    /// Bytes in the destination, `-1` when the writer cannot tell.
    pub bytes_written: i64,
}

// ── Builder ──────────────────────────────────────────────────────────────

/// Builder for [`TransformService`].
///
/// ```rust
/// use edgequake_transform::{TransformService, StringExtractingTransformer};
///
/// let service = TransformService::builder()
///     .transformer(StringExtractingTransformer)
///     .build()
///     .unwrap();
/// assert_eq!(service.registry().len(), 1);
/// ```
#[derive(Default)]
pub struct TransformServiceBuilder {
    config: Option<EngineConfig>,
    properties: Option<TransformerProperties>,
    transformers: Vec<Arc<dyn Transformer>>,
    capabilities: Vec<(Capability, bool)>,
    listener: Option<Listener>,
    detector: Option<Arc<dyn MimetypeDetector>>,
    catalog: Option<Arc<MimetypeCatalog>>,
}

impl TransformServiceBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Transformer properties; leaf availability and composite
    /// declarations are taken from here.
    pub fn properties(mut self, properties: TransformerProperties) -> Self {
        self.properties = Some(properties);
        self
    }

    pub fn transformer(mut self, transformer: impl Transformer + 'static) -> Self {
        self.transformers.push(Arc::new(transformer));
        self
    }

    pub fn transformer_arc(mut self, transformer: Arc<dyn Transformer>) -> Self {
        self.transformers.push(transformer);
        self
    }

    /// A ready-made capability, typically a composite built in code.
    /// Registered after the leaves and before declared composites.
    pub fn capability(mut self, capability: Capability, available: bool) -> Self {
        self.capabilities.push((capability, available));
        self
    }

    pub fn listener(mut self, listener: Listener) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn detector(mut self, detector: Arc<dyn MimetypeDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn catalog(mut self, catalog: Arc<MimetypeCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Register everything and assemble declared composites. Every problem
    /// is reported in one [`ConfigError`].
    pub fn build(self) -> Result<TransformService, ConfigError> {
        let config = Arc::new(self.config.unwrap_or_default());
        let properties = self
            .properties
            .unwrap_or_else(|| TransformerProperties::empty(&config.prefix));
        if properties.prefix() != config.prefix {
            return Err(ConfigError::Invalid(format!(
                "properties use prefix '{}' but the engine expects '{}'",
                properties.prefix(),
                config.prefix
            )));
        }

        let registry = TransformerRegistry::new(config, Arc::new(properties));
        let mut errors = Vec::new();
        if let Err(e) = register_leaves(&registry, self.transformers) {
            errors.push(e);
        }
        for (capability, available) in self.capabilities {
            if let Err(e) = registry.register(capability, available) {
                errors.push(e);
            }
        }
        let report = build_composites(&registry);
        errors.extend(report.errors);
        ConfigError::aggregate(errors)?;

        info!(
            transformers = registry.len(),
            selectable = registry.selectable().len(),
            composites = report.registered.len(),
            "Transform service ready"
        );
        let executor = TransformExecutor::new(
            registry,
            self.catalog
                .unwrap_or_else(|| Arc::new(default_catalog().clone())),
            self.listener.unwrap_or_else(|| Arc::new(NoopListener)),
        );
        Ok(TransformService {
            executor: Arc::new(executor),
            detector: self.detector.unwrap_or_else(|| Arc::new(MagicDetector)),
            declared: Arc::new(Mutex::new(report.registered)),
        })
    }
}

// ── Service ──────────────────────────────────────────────────────────────

/// One finished (or abandoned) invocation on the blocking pool.
struct Attempt {
    result: Result<(), TransformError>,
    /// Sniffed source type, filled in only when a reroute may follow.
    sniffed: Option<String>,
    reader: Box<dyn ContentReader>,
    writer: Box<dyn ContentWriter>,
}

/// Selects and runs transformers. Cheap to clone; clones share the
/// registry and statistics.
#[derive(Clone)]
pub struct TransformService {
    executor: Arc<TransformExecutor>,
    detector: Arc<dyn MimetypeDetector>,
    /// Composites created from properties, replaced on reconfiguration.
    declared: Arc<Mutex<Vec<String>>>,
}

impl fmt::Debug for TransformService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformService")
            .field("capabilities", &self.registry().len())
            .field("declared", &*self.declared.lock())
            .finish_non_exhaustive()
    }
}

impl TransformService {
    pub fn builder() -> TransformServiceBuilder {
        TransformServiceBuilder::default()
    }

    // ── Accessors ────────────────────────────────────────────────────────

    pub fn executor(&self) -> &TransformExecutor {
        &self.executor
    }

    pub fn registry(&self) -> &TransformerRegistry {
        self.executor.registry()
    }

    pub fn config(&self) -> &EngineConfig {
        self.registry().config()
    }

    pub fn tracker(&self) -> &PerformanceTracker {
        self.registry().tracker()
    }

    // ── Selection ────────────────────────────────────────────────────────

    pub fn ranked_candidates(&self, request: &TransformationRequest) -> Vec<RankedCandidate> {
        self.registry().ranked_candidates(request)
    }

    pub fn best_candidate(&self, request: &TransformationRequest) -> Option<Arc<Capability>> {
        self.registry().best_candidate(request)
    }

    /// Whether any selectable capability can take the request.
    pub fn is_transformable(&self, request: &TransformationRequest) -> bool {
        self.best_candidate(request).is_some()
    }

    // ── Transformation ───────────────────────────────────────────────────

    /// Transform with the best feasible capability.
    pub async fn transform(
        &self,
        reader: Box<dyn ContentReader>,
        writer: Box<dyn ContentWriter>,
        options: TransformationOptions,
    ) -> Result<TransformReport, TransformError> {
        let (source, target) = mimetypes(reader.as_ref(), writer.as_ref())?;
        let request = TransformationRequest::new(&source, reader.size(), &target).with_options(options.clone());
        let ranked = self.ranked_candidates(&request);
        let Some(best) = ranked.first() else {
            debug!(request = %request, "No feasible transformer");
            self.executor
                .listener()
                .on_unsupported(&source, request.source_size, &target, None);
            return Err(TransformError::Unsupported {
                source_mimetype: source,
                target_mimetype: target,
                size: request.source_size,
                transformer: None,
            });
        };
        debug!(
            request = %request,
            transformer = best.name(),
            candidates = ranked.len(),
            "Selected transformer"
        );
        self.executor
            .listener()
            .on_selected(&source, &target, best.name(), ranked.len());
        let capability = Arc::clone(&best.capability);
        self.run(capability, reader, writer, options).await
    }

    /// Transform with the named capability, selectable or not.
    pub async fn transform_with(
        &self,
        name: &str,
        reader: Box<dyn ContentReader>,
        writer: Box<dyn ContentWriter>,
        options: TransformationOptions,
    ) -> Result<TransformReport, TransformError> {
        let capability = self.registry().resolve_by_name(name)?;
        self.run(capability, reader, writer, options).await
    }

    /// Synchronous wrapper around [`Self::transform`].
    ///
    /// Creates a temporary tokio runtime internally; do not call it from
    /// inside one.
    pub fn transform_sync(
        &self,
        reader: Box<dyn ContentReader>,
        writer: Box<dyn ContentWriter>,
        options: TransformationOptions,
    ) -> Result<TransformReport, TransformError> {
        tokio::runtime::Runtime::new()
            .map_err(|e| TransformError::Internal(format!("Failed to create tokio runtime: {}", e)))?
            .block_on(self.transform(reader, writer, options))
    }

    async fn run(
        &self,
        capability: Arc<Capability>,
        reader: Box<dyn ContentReader>,
        writer: Box<dyn ContentWriter>,
        options: TransformationOptions,
    ) -> Result<TransformReport, TransformError> {
        let started = Instant::now();
        let (source, target) = mimetypes(reader.as_ref(), writer.as_ref())?;
        let attempt = self
            .attempt(Arc::clone(&capability), reader, writer, &options, false)
            .await?;

        match attempt.result {
            Ok(()) => {
                let report = TransformReport {
                    transformer: capability.name().to_string(),
                    source_mimetype: source,
                    target_mimetype: target,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    rerouted_from: None,
                    bytes_written: attempt.writer.size(),
                };
                info!(
                    transformer = %report.transformer,
                    elapsed_ms = report.elapsed_ms,
                    bytes = report.bytes_written,
                    "{} -> {} done",
                    report.source_mimetype,
                    report.target_mimetype
                );
                Ok(report)
            }
            Err(e) => {
                if let Some(detected) = attempt.sniffed.filter(|d| *d != source) {
                    let rerouted = self
                        .reroute(&capability, &detected, attempt.reader, attempt.writer, &options)
                        .await;
                    if let Some(mut report) = rerouted {
                        report.elapsed_ms = started.elapsed().as_millis() as u64;
                        return Ok(report);
                    }
                }
                Err(e)
            }
        }
    }

    /// One top-level invocation on the blocking pool, with the deadline
    /// when one applies.
    async fn attempt(
        &self,
        capability: Arc<Capability>,
        reader: Box<dyn ContentReader>,
        writer: Box<dyn ContentWriter>,
        options: &TransformationOptions,
        rerouted: bool,
    ) -> Result<Attempt, TransformError> {
        let (source, target) = mimetypes(reader.as_ref(), writer.as_ref())?;
        let timeout_ms = capability
            .limits(&source, &target, options, self.registry())
            .timeout_ms();
        let deadline = (capability.needs_interruption() && timeout_ms > 0)
            .then(|| Duration::from_millis(timeout_ms as u64 + self.config().timeout_margin_ms));
        let reader_desc = reader.describe();
        let writer_desc = writer.describe();

        let cancel = CancelFlag::new();
        let started = Instant::now();
        let task = {
            let executor = Arc::clone(&self.executor);
            let detector = Arc::clone(&self.detector);
            let capability = Arc::clone(&capability);
            let options = options.clone();
            let cancel = cancel.clone();
            let mut reader = reader;
            let mut writer = writer;
            tokio::task::spawn_blocking(move || {
                let mut ctx = CallContext::top_level(&executor, cancel);
                if rerouted {
                    ctx = ctx.rerouted();
                }
                let result = executor.execute(&capability, reader.as_mut(), writer.as_mut(), &options, &ctx);
                let sniffed = match &result {
                    Err(e) if wants_reroute(e, &ctx) => sniff(reader.as_ref(), detector.as_ref()),
                    _ => None,
                };
                Attempt {
                    result,
                    sniffed,
                    reader,
                    writer,
                }
            })
        };

        let joined = match deadline {
            None => task.await,
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    cancel.cancel();
                    let elapsed_ms = started.elapsed().as_millis() as u64;
                    let name = capability.name();
                    self.executor
                        .record_failure(name, &source, &target, elapsed_ms, true);
                    self.executor
                        .listener()
                        .on_failure(name, &source, &target, "deadline exceeded", 0);
                    warn!(
                        transformer = name,
                        timeout_ms,
                        elapsed_ms,
                        "{source} -> {target} exceeded its deadline, abandoning the worker"
                    );
                    return Err(TransformError::Timeout {
                        transformer: name.to_string(),
                        timeout_ms: timeout_ms as u64,
                        reader: reader_desc,
                        writer: writer_desc,
                    });
                }
            },
        };
        let attempt =
            joined.map_err(|e| TransformError::Internal(format!("Transform task failed: {}", e)))?;
        if let Some(detected) = &attempt.sniffed {
            debug!(claimed = %source, detected = %detected, "Sniffed failed source");
        }
        Ok(attempt)
    }

    /// Retry once with the best other capability for the sniffed type, on a
    /// fresh reader relabelled with it. `None` when no reroute happened or
    /// it failed; the caller then reports the original error.
    async fn reroute(
        &self,
        failed: &Capability,
        detected: &str,
        reader: Box<dyn ContentReader>,
        writer: Box<dyn ContentWriter>,
        options: &TransformationOptions,
    ) -> Option<TransformReport> {
        let mut fresh = match reader.fresh() {
            Ok(r) => r,
            Err(e) => {
                debug!(error = %e, "Cannot reread the source, not rerouting");
                return None;
            }
        };
        fresh.set_mimetype(detected);
        let target = writer.mimetype()?.to_string();
        let request = TransformationRequest::new(detected, fresh.size(), &target).with_options(options.clone());
        let Some(alternative) = self
            .registry()
            .ranked_where(&request, |c| c.name() != failed.name())
            .into_iter()
            .next()
        else {
            debug!(request = %request, "Nothing can take the sniffed type");
            return None;
        };

        info!(
            from = failed.name(),
            to = alternative.name(),
            "Source sniffed as {detected}, rerouting"
        );
        match self
            .attempt(Arc::clone(&alternative), fresh, writer, options, true)
            .await
        {
            Ok(Attempt {
                result: Ok(()),
                writer,
                ..
            }) => Some(TransformReport {
                transformer: alternative.name().to_string(),
                source_mimetype: detected.to_string(),
                target_mimetype: target,
                elapsed_ms: 0,
                rerouted_from: Some(failed.name().to_string()),
                bytes_written: writer.size(),
            }),
            Ok(Attempt { result: Err(e), .. }) | Err(e) => {
                warn!(transformer = alternative.name(), error = %e, "Reroute failed");
                None
            }
        }
    }

    // ── Reconfiguration ──────────────────────────────────────────────────

    /// Swap in new properties: drop the composites the old ones declared,
    /// refresh leaf availability, clear cached limits and assemble the new
    /// composites. Statistics of surviving capabilities are kept.
    pub fn reconfigure(&self, properties: TransformerProperties) -> Result<Vec<String>, ConfigError> {
        if properties.prefix() != self.config().prefix {
            return Err(ConfigError::Invalid(format!(
                "properties use prefix '{}' but the engine expects '{}'",
                properties.prefix(),
                self.config().prefix
            )));
        }
        let registry = self.registry();
        let mut declared = self.declared.lock();
        // dependents first, so nothing is left pointing at a removed name
        for name in declared.drain(..).rev() {
            registry.unregister(&name);
        }
        registry.resolver().reconfigure(Arc::new(properties));

        let props = registry.properties();
        for capability in registry.all() {
            if !capability.is_composite() {
                let available = props.available(capability.name()).unwrap_or(true);
                registry.set_available(capability.name(), available);
            }
        }

        let report = build_composites(registry);
        *declared = report.registered.clone();
        report.into_result()
    }
}

fn mimetypes(reader: &dyn ContentReader, writer: &dyn ContentWriter) -> Result<(String, String), TransformError> {
    let source = reader
        .mimetype()
        .ok_or(TransformError::MissingMimetype { role: "source" })?;
    let target = writer
        .mimetype()
        .ok_or(TransformError::MissingMimetype { role: "target" })?;
    Ok((source.to_string(), target.to_string()))
}

/// Execution failures of a first attempt may be rerouted; cancellations,
/// unsupported requests and second attempts may not.
fn wants_reroute(error: &TransformError, ctx: &CallContext<'_>) -> bool {
    error.kind() == ErrorKind::Execution
        && !matches!(error, TransformError::Cancelled)
        && !ctx.cancel().is_cancelled()
        && !ctx.is_rerouted()
        && ctx.executor().registry().config().reroute_on_mismatch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{MemoryReader, MemoryWriter};
    use crate::transformers::{BinaryPassThroughTransformer, StringExtractingTransformer};

    fn service() -> TransformService {
        TransformService::builder()
            .transformer(StringExtractingTransformer)
            .transformer(BinaryPassThroughTransformer)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn transforms_with_the_only_capable_transformer() {
        let s = service();
        let w = MemoryWriter::new("text/plain");
        let out = w.buffer();
        let report = s
            .transform(
                Box::new(MemoryReader::new(b"<p>hi</p>".to_vec(), "text/html")),
                Box::new(w),
                TransformationOptions::new(),
            )
            .await
            .unwrap();
        assert_eq!(report.transformer, StringExtractingTransformer::NAME);
        assert_eq!(report.bytes_written, 9);
        assert_eq!(out.to_string_lossy(), "<p>hi</p>");
        assert!(report.rerouted_from.is_none());
    }

    #[tokio::test]
    async fn unsupported_request_is_an_error() {
        let s = service();
        let err = s
            .transform(
                Box::new(MemoryReader::new(b"x".to_vec(), "image/png")),
                Box::new(MemoryWriter::new("text/html")),
                TransformationOptions::new(),
            )
            .await
            .unwrap_err();
        assert!(err.is_unsupported());
        assert!(s.tracker().is_empty());
    }

    #[tokio::test]
    async fn forced_unknown_name_is_not_found() {
        let s = service();
        let err = s
            .transform_with(
                "missing",
                Box::new(MemoryReader::new(b"x".to_vec(), "text/plain")),
                Box::new(MemoryWriter::new("text/plain")),
                TransformationOptions::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn sync_wrapper_runs_its_own_runtime() {
        let s = service();
        let report = s
            .transform_sync(
                Box::new(MemoryReader::new(vec![1u8, 2, 3], "application/pdf")),
                Box::new(MemoryWriter::new("application/pdf")),
                TransformationOptions::new(),
            )
            .unwrap();
        assert_eq!(report.transformer, BinaryPassThroughTransformer::NAME);
    }

    #[test]
    fn mismatched_prefix_is_rejected() {
        let err = TransformService::builder()
            .properties(TransformerProperties::empty("other.prefix"))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
