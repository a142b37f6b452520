//! Effective limits for one (transformer, source, target, use) tuple.
//!
//! Layers, least specific first. Each later layer's set fields replace the
//! earlier ones, through the pair-clearing setters of
//! [`TransformationLimits`]:
//!
//! 0. [`EngineConfig::base_limits`] (everything `-1`, default timeout)
//! 1. `default.<limit>`
//! 2. `default.<limit>.use.<use>`
//! 3. `default.<pair>.<limit>`
//! 4. `default.<pair>.<limit>.use.<use>`
//! 5. `<name>.<limit>`
//! 6. `<name>.<limit>.use.<use>`
//! 7. `<name>.<pair>.<limit>`
//! 8. `<name>.<pair>.<limit>.use.<use>`
//!
//! Within a pair layer, wildcard patterns merge as `*.*`, `*.<t>`, `<s>.*`,
//! `<s>.<t>`. The caller's request limits are applied last by
//! [`LimitResolver::resolve_for_request`].
//!
//! Results are cached per tuple. The cache is dropped wholesale when the
//! properties are replaced.

use crate::config::EngineConfig;
use crate::limits::{LimitProperty, TransformationLimits};
use crate::options::TransformationOptions;
use crate::properties::TransformerProperties;
use dashmap::DashMap;
use mimetype_catalog::ANY;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ResolveKey {
    transformer: Option<String>,
    source: String,
    target: String,
    use_context: Option<String>,
    page_limited: bool,
}

/// Merges the configured limit layers and caches the result.
#[derive(Debug)]
pub struct LimitResolver {
    config: Arc<EngineConfig>,
    properties: RwLock<Arc<TransformerProperties>>,
    cache: DashMap<ResolveKey, TransformationLimits>,
}

impl LimitResolver {
    pub fn new(config: Arc<EngineConfig>, properties: Arc<TransformerProperties>) -> Self {
        Self {
            config,
            properties: RwLock::new(properties),
            cache: DashMap::new(),
        }
    }

    /// The properties currently in force.
    pub fn properties(&self) -> Arc<TransformerProperties> {
        self.properties.read().clone()
    }

    /// Swap in new properties and forget every cached resolution.
    pub fn reconfigure(&self, properties: Arc<TransformerProperties>) {
        *self.properties.write() = properties;
        self.cache.clear();
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    /// Fully populated limits for the tuple. `transformer == None` resolves
    /// the system-wide layers only. `page_limited` is whether the
    /// transformer supports page-based limiting for this pair.
    pub fn resolve(
        &self,
        transformer: Option<&str>,
        source: &str,
        target: &str,
        use_context: Option<&str>,
        page_limited: bool,
    ) -> TransformationLimits {
        let key = ResolveKey {
            transformer: transformer.map(str::to_string),
            source: source.to_string(),
            target: target.to_string(),
            use_context: use_context.map(str::to_string),
            page_limited,
        };
        if let Some(hit) = self.cache.get(&key) {
            return *hit;
        }
        let limits = self.compute(transformer, source, target, use_context, page_limited);
        trace!(
            transformer = transformer.unwrap_or("<system>"),
            source,
            target,
            use_context = use_context.unwrap_or(ANY),
            limits = %limits,
            "Resolved limits"
        );
        self.cache.insert(key, limits);
        limits
    }

    /// [`Self::resolve`] followed by the request-level override layer.
    pub fn resolve_for_request(
        &self,
        transformer: Option<&str>,
        source: &str,
        target: &str,
        options: &TransformationOptions,
        page_limited: bool,
    ) -> TransformationLimits {
        self.resolve(transformer, source, target, options.use_context(), page_limited)
            .overlaid(&options.limits)
    }

    fn compute(
        &self,
        transformer: Option<&str>,
        source: &str,
        target: &str,
        use_context: Option<&str>,
        page_limited: bool,
    ) -> TransformationLimits {
        let props = self.properties();
        let mut layers: Vec<TransformationLimits> = Vec::with_capacity(8);
        let pair = Some((source, target));
        let mut push_layers = |settings: Option<&crate::properties::TransformerSettings>| {
            if let Some(s) = settings {
                layers.push(s.limits_for(None, None));
                if use_context.is_some() {
                    layers.push(s.limits_for(None, use_context));
                }
                layers.push(s.limits_for(pair, None));
                if use_context.is_some() {
                    layers.push(s.limits_for(pair, use_context));
                }
            }
        };
        push_layers(props.system());
        if let Some(name) = transformer {
            push_layers(props.settings(name));
        }

        let mut merged = self.config.base_limits();
        let mut page_limit = None;
        for layer in &layers {
            if layer.is_set(LimitProperty::PageLimit) && layer.page_limit() > 0 {
                page_limit = Some(layer.page_limit());
            }
            merged.overlay(layer);
        }
        if page_limited {
            if let Some(pl) = page_limit {
                merged.set_page_limit(pl);
                merged.suppress_max_pages();
            }
        }
        merged.resolved()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mimetype_catalog::MimetypeCatalog;

    const TXT: &str = "text/plain";
    const HTML: &str = "text/html";
    const PDF: &str = "application/pdf";

    fn resolver(pairs: &[(&str, &str)]) -> LimitResolver {
        let props = TransformerProperties::from_pairs(
            "content.transformer",
            pairs.iter().copied(),
            &MimetypeCatalog::builtin(),
        )
        .unwrap();
        LimitResolver::new(Arc::new(EngineConfig::default()), Arc::new(props))
    }

    #[test]
    fn empty_properties_give_base_limits() {
        let r = resolver(&[]);
        let l = r.resolve(Some("X"), TXT, HTML, None, false);
        assert!(l.is_resolved());
        assert_eq!(l.max_source_size_kbytes(), -1);
        assert_eq!(l.timeout_ms(), 120_000);
    }

    #[test]
    fn system_default_then_transformer_pair_override() {
        let r = resolver(&[
            ("content.transformer.default.maxSourceSizeKBytes", "100"),
            ("content.transformer.X.mimetypes.text/plain.text/html.maxSourceSizeKBytes", "200"),
        ]);
        assert_eq!(r.resolve(Some("X"), TXT, HTML, None, false).max_source_size_kbytes(), 200);
        assert_eq!(r.resolve(Some("X"), TXT, PDF, None, false).max_source_size_kbytes(), 100);
        assert_eq!(r.resolve(Some("Y"), TXT, HTML, None, false).max_source_size_kbytes(), 100);
        assert_eq!(r.resolve(None, ANY, ANY, None, false).max_source_size_kbytes(), 100);
    }

    #[test]
    fn use_layers_sit_between_levels() {
        let r = resolver(&[
            ("content.transformer.default.timeoutMs", "1000"),
            ("content.transformer.default.timeoutMs.use.index", "2000"),
            ("content.transformer.X.extensions.txt.pdf.timeoutMs", "3000"),
            ("content.transformer.X.extensions.txt.pdf.timeoutMs.use.index", "4000"),
        ]);
        assert_eq!(r.resolve(Some("Y"), TXT, PDF, None, false).timeout_ms(), 1000);
        assert_eq!(r.resolve(Some("Y"), TXT, PDF, Some("index"), false).timeout_ms(), 2000);
        assert_eq!(r.resolve(Some("X"), TXT, PDF, None, false).timeout_ms(), 3000);
        assert_eq!(r.resolve(Some("X"), TXT, PDF, Some("index"), false).timeout_ms(), 4000);
        assert_eq!(r.resolve(Some("X"), TXT, PDF, Some("preview"), false).timeout_ms(), 3000);
    }

    #[test]
    fn more_specific_layer_clears_pair_partner() {
        let r = resolver(&[
            ("content.transformer.default.maxSourceSizeKBytes", "100"),
            ("content.transformer.X.readLimitKBytes", "20"),
        ]);
        let l = r.resolve(Some("X"), TXT, PDF, None, false);
        assert_eq!(l.max_source_size_kbytes(), -1);
        assert_eq!(l.read_limit_kbytes(), 20);
    }

    #[test]
    fn page_limit_suppresses_max_pages_for_page_limited_transformers() {
        let r = resolver(&[
            ("content.transformer.default.pageLimit", "1"),
            ("content.transformer.X.maxPages", "10"),
        ]);
        let plain = r.resolve(Some("X"), PDF, "image/png", None, false);
        assert_eq!(plain.max_pages(), 10);
        assert_eq!(plain.page_limit(), -1);

        let paged = r.resolve(Some("X"), PDF, "image/png", None, true);
        assert_eq!(paged.max_pages(), -1);
        assert_eq!(paged.page_limit(), 1);
    }

    #[test]
    fn request_override_replaces_set_fields() {
        let r = resolver(&[("content.transformer.default.maxSourceSizeKBytes", "100")]);
        let mut req = TransformationLimits::new();
        req.set_timeout_ms(5);
        let options = TransformationOptions::new().with_limits(req);
        let l = r.resolve_for_request(Some("X"), TXT, PDF, &options, false);
        assert_eq!(l.timeout_ms(), 5);
        assert_eq!(l.max_source_size_kbytes(), 100);
    }

    #[test]
    fn reconfigure_clears_cache() {
        let r = resolver(&[("content.transformer.default.maxPages", "4")]);
        assert_eq!(r.resolve(None, ANY, ANY, None, false).max_pages(), 4);
        assert_eq!(r.cached_entries(), 1);
        r.reconfigure(Arc::new(TransformerProperties::empty("content.transformer")));
        assert_eq!(r.cached_entries(), 0);
        assert_eq!(r.resolve(None, ANY, ANY, None, false).max_pages(), -1);
    }
}
