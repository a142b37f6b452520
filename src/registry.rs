//! The population of registered capabilities.
//!
//! Two sets behind one coarse lock: `all` (everything, usable as a composite
//! part or by name) and `selectable` (returned by ranking). Registration is
//! rare, selection is frequent, so queries copy the `Arc`s out and release
//! the lock before running any feasibility check. Feasibility of a dynamic
//! pipeline stage queries the registry again, so the lock must never be held
//! across one.

use crate::capability::Capability;
use crate::config::EngineConfig;
use crate::error::{ConfigError, TransformError};
use crate::options::TransformationRequest;
use crate::properties::TransformerProperties;
use crate::resolver::LimitResolver;
use crate::selector::{RankedCandidate, SelectionPolicy};
use crate::stats::PerformanceTracker;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Default)]
struct Entries {
    all: Vec<Arc<Capability>>,
    selectable: Vec<Arc<Capability>>,
}

impl Entries {
    fn position(&self, name: &str) -> Option<usize> {
        self.all.iter().position(|c| c.name() == name)
    }
}

#[derive(Debug)]
pub struct TransformerRegistry {
    config: Arc<EngineConfig>,
    resolver: Arc<LimitResolver>,
    tracker: Arc<PerformanceTracker>,
    policy: SelectionPolicy,
    entries: Mutex<Entries>,
}

impl TransformerRegistry {
    pub fn new(config: Arc<EngineConfig>, properties: Arc<TransformerProperties>) -> Self {
        let resolver = Arc::new(LimitResolver::new(config.clone(), properties));
        Self::with_parts(config, resolver, Arc::new(PerformanceTracker::new()))
    }

    /// Build around an existing resolver and tracker, e.g. to share
    /// statistics between registries.
    pub fn with_parts(
        config: Arc<EngineConfig>,
        resolver: Arc<LimitResolver>,
        tracker: Arc<PerformanceTracker>,
    ) -> Self {
        let policy = SelectionPolicy::new(config.clone(), resolver.clone(), tracker.clone());
        Self {
            config,
            resolver,
            tracker,
            policy,
            entries: Mutex::new(Entries::default()),
        }
    }

    // ── Accessors ────────────────────────────────────────────────────────

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn properties(&self) -> Arc<TransformerProperties> {
        self.resolver.properties()
    }

    pub fn resolver(&self) -> &LimitResolver {
        &self.resolver
    }

    pub fn tracker(&self) -> &PerformanceTracker {
        &self.tracker
    }

    pub fn policy(&self) -> &SelectionPolicy {
        &self.policy
    }

    // ── Population ───────────────────────────────────────────────────────

    /// Add a capability. `available == false` registers it component-only:
    /// usable inside composites and by name, never returned by ranking.
    pub fn register(&self, capability: Capability, available: bool) -> Result<Arc<Capability>, ConfigError> {
        let capability = Arc::new(capability);
        let mut entries = self.entries.lock();
        if entries.position(capability.name()).is_some() {
            return Err(ConfigError::DuplicateName {
                name: capability.name().to_string(),
            });
        }
        entries.all.push(capability.clone());
        if available {
            entries.selectable.push(capability.clone());
        }
        info!(
            transformer = capability.name(),
            kind = %capability.kind(),
            available,
            "Registered transformer"
        );
        Ok(capability)
    }

    /// Remove a capability from both sets. Composite statistics go with it.
    pub fn unregister(&self, name: &str) -> Option<Arc<Capability>> {
        let removed = {
            let mut entries = self.entries.lock();
            let i = entries.position(name)?;
            entries.selectable.retain(|c| c.name() != name);
            entries.all.remove(i)
        };
        if removed.is_composite() {
            self.tracker.remove_transformer(name);
        }
        info!(transformer = name, "Unregistered transformer");
        Some(removed)
    }

    /// Move a registered capability in or out of the selectable set,
    /// keeping registration order. Returns `false` for unknown names.
    pub fn set_available(&self, name: &str, available: bool) -> bool {
        let mut entries = self.entries.lock();
        let Some(i) = entries.position(name) else {
            return false;
        };
        let capability = entries.all[i].clone();
        entries.selectable.retain(|c| c.name() != name);
        if available {
            let order: Vec<Arc<Capability>> = entries
                .all
                .iter()
                .filter(|c| Arc::ptr_eq(*c, &capability) || entries.selectable.iter().any(|s| Arc::ptr_eq(s, *c)))
                .cloned()
                .collect();
            entries.selectable = order;
        }
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.lock().position(name).is_some()
    }

    pub fn is_available(&self, name: &str) -> bool {
        self.entries.lock().selectable.iter().any(|c| c.name() == name)
    }

    /// Exact-name lookup over every registered capability.
    pub fn resolve_by_name(&self, name: &str) -> Result<Arc<Capability>, TransformError> {
        let entries = self.entries.lock();
        entries
            .position(name)
            .map(|i| entries.all[i].clone())
            .ok_or_else(|| TransformError::NotFound { name: name.to_string() })
    }

    /// Snapshot of every registered capability, in registration order.
    pub fn all(&self) -> Vec<Arc<Capability>> {
        self.entries.lock().all.clone()
    }

    /// Snapshot of the selectable capabilities, in registration order.
    pub fn selectable(&self) -> Vec<Arc<Capability>> {
        self.entries.lock().selectable.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ── Selection ────────────────────────────────────────────────────────

    /// Feasible selectable candidates, best first. Never an error: an empty
    /// list means nothing can do it.
    pub fn ranked_candidates(&self, request: &TransformationRequest) -> Vec<RankedCandidate> {
        self.rank_filtered(request, |_| true)
    }

    /// [`Self::ranked_candidates`] restricted by `keep`, applied before any
    /// feasibility check.
    pub fn ranked_where(
        &self,
        request: &TransformationRequest,
        keep: impl Fn(&Capability) -> bool,
    ) -> Vec<Arc<Capability>> {
        self.rank_filtered(request, keep)
            .into_iter()
            .map(|r| r.capability)
            .collect()
    }

    pub fn best_candidate(&self, request: &TransformationRequest) -> Option<Arc<Capability>> {
        self.ranked_candidates(request)
            .into_iter()
            .next()
            .map(|r| r.capability)
    }

    fn rank_filtered(
        &self,
        request: &TransformationRequest,
        keep: impl Fn(&Capability) -> bool,
    ) -> Vec<RankedCandidate> {
        let source = request.source_mimetype.as_str();
        let target = request.target_mimetype.as_str();
        let options = &request.options;
        let feasible: Vec<Arc<Capability>> = self
            .selectable()
            .into_iter()
            .filter(|c| keep(&**c))
            .filter(|c| {
                if !c.is_supported(source, target, options, self) {
                    debug!(transformer = c.name(), "{source} -> {target} unsupported");
                    return false;
                }
                if !c.fits(source, request.source_size, target, options, self) {
                    debug!(
                        transformer = c.name(),
                        size = request.source_size,
                        "{source} -> {target} too big"
                    );
                    return false;
                }
                true
            })
            .collect();
        self.policy.rank(feasible, source, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{ContentReader, ContentWriter};
    use crate::options::TransformationOptions;
    use crate::transformer::Transformer;
    use mimetype_catalog::default_catalog;

    struct Fake(&'static str, &'static str);

    impl Transformer for Fake {
        fn name(&self) -> &str {
            self.0
        }

        fn is_transformable(&self, source: &str, _t: &str, _o: &TransformationOptions) -> bool {
            source == self.1
        }

        fn transform(
            &self,
            _r: &mut dyn ContentReader,
            _w: &mut dyn ContentWriter,
            _o: &TransformationOptions,
        ) -> Result<(), TransformError> {
            Ok(())
        }
    }

    fn registry(pairs: &[(&str, &str)]) -> TransformerRegistry {
        let config = Arc::new(EngineConfig::default());
        let props = TransformerProperties::from_pairs(&config.prefix, pairs.iter().copied(), default_catalog()).unwrap();
        TransformerRegistry::new(config, Arc::new(props))
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let r = registry(&[]);
        r.register(Capability::simple(Fake("a", "text/plain")), true).unwrap();
        let err = r.register(Capability::simple(Fake("a", "text/html")), true).unwrap_err();
        assert_eq!(err, ConfigError::DuplicateName { name: "a".into() });
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn component_only_is_never_ranked() {
        let r = registry(&[]);
        r.register(Capability::simple(Fake("hidden", "text/plain")), false).unwrap();
        r.register(Capability::simple(Fake("shown", "text/plain")), true).unwrap();
        let req = TransformationRequest::new("text/plain", 10, "text/html");
        let ranked: Vec<_> = r.ranked_candidates(&req).into_iter().map(|c| c.name().to_string()).collect();
        assert_eq!(ranked, ["shown"]);
        assert!(r.resolve_by_name("hidden").is_ok());
        assert!(!r.is_available("hidden"));
    }

    #[test]
    fn unknown_name_is_not_found() {
        let r = registry(&[]);
        assert!(matches!(r.resolve_by_name("nope"), Err(TransformError::NotFound { .. })));
    }

    #[test]
    fn size_limits_exclude_candidates() {
        let r = registry(&[("content.transformer.small.maxSourceSizeKBytes", "1")]);
        r.register(Capability::simple(Fake("small", "text/plain")), true).unwrap();
        r.register(Capability::simple(Fake("big", "text/plain")), true).unwrap();
        let req = TransformationRequest::new("text/plain", 4096, "text/html");
        let ranked: Vec<_> = r.ranked_candidates(&req).into_iter().map(|c| c.name().to_string()).collect();
        assert_eq!(ranked, ["big"]);
        let unknown = TransformationRequest::new("text/plain", -1, "text/html");
        assert_eq!(r.ranked_candidates(&unknown).len(), 2);
    }

    #[test]
    fn empty_registry_ranks_nothing() {
        let r = registry(&[]);
        assert!(r.best_candidate(&TransformationRequest::new("a/a", 1, "b/b")).is_none());
    }

    #[test]
    fn set_available_keeps_registration_order() {
        let r = registry(&[]);
        for name in ["a", "b", "c"] {
            r.register(Capability::simple(Fake(name, "text/plain")), true).unwrap();
        }
        assert!(r.set_available("a", false));
        assert!(r.set_available("a", true));
        let names: Vec<_> = r.selectable().iter().map(|c| c.name().to_string()).collect();
        assert_eq!(names, ["a", "b", "c"]);
        assert!(!r.set_available("zzz", true));
    }

    #[test]
    fn unregister_drops_from_both_sets() {
        let r = registry(&[]);
        r.register(Capability::simple(Fake("a", "text/plain")), true).unwrap();
        assert!(r.unregister("a").is_some());
        assert!(!r.contains("a"));
        assert!(r.selectable().is_empty());
        assert!(r.unregister("a").is_none());
    }
}
