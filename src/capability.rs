//! Capabilities: the unit the registry ranks and the executor runs.
//!
//! A [`Capability`] is either a leaf [`Transformer`] or one of the two
//! composites. Composites hold their parts as `Arc<Capability>`, so they
//! nest freely: a failover can list a pipeline, a pipeline stage can be a
//! failover.
//!
//! Every check consults the registry's shared settings (properties, limit
//! resolver) so configured `supported` and limit values apply to composites
//! exactly as they do to leaves.

use crate::composite::{Failover, Pipeline};
use crate::limits::{tightest, TransformationLimits};
use crate::options::{TransformationKey, TransformationOptions};
use crate::registry::TransformerRegistry;
use crate::transformer::Transformer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// What sort of capability a name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityKind {
    Simple,
    Pipeline,
    Failover,
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CapabilityKind::Simple => "simple",
            CapabilityKind::Pipeline => "pipeline",
            CapabilityKind::Failover => "failover",
        })
    }
}

/// A leaf transformer or a composite of capabilities.
pub enum Capability {
    Simple(Arc<dyn Transformer>),
    Pipeline(Pipeline),
    Failover(Failover),
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capability")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .field("components", &self.components())
            .finish()
    }
}

impl Capability {
    pub fn simple(transformer: impl Transformer + 'static) -> Self {
        Capability::Simple(Arc::new(transformer))
    }

    pub fn name(&self) -> &str {
        match self {
            Capability::Simple(t) => t.name(),
            Capability::Pipeline(p) => p.name(),
            Capability::Failover(f) => f.name(),
        }
    }

    pub fn kind(&self) -> CapabilityKind {
        match self {
            Capability::Simple(_) => CapabilityKind::Simple,
            Capability::Pipeline(_) => CapabilityKind::Pipeline,
            Capability::Failover(_) => CapabilityKind::Failover,
        }
    }

    pub fn is_composite(&self) -> bool {
        !matches!(self, Capability::Simple(_))
    }

    /// Names of the direct parts; `""` marks a dynamic pipeline stage.
    pub fn components(&self) -> Vec<String> {
        match self {
            Capability::Simple(_) => Vec::new(),
            Capability::Pipeline(p) => p
                .stages()
                .iter()
                .map(|s| s.capability().map(|c| c.name().to_string()).unwrap_or_default())
                .collect(),
            Capability::Failover(f) => f
                .alternatives()
                .iter()
                .map(|c| c.name().to_string())
                .collect(),
        }
    }

    pub fn explicit_transformations(&self) -> Vec<TransformationKey> {
        match self {
            Capability::Simple(t) => t.explicit_transformations(),
            _ => Vec::new(),
        }
    }

    pub fn is_explicit(&self, source: &str, target: &str) -> bool {
        match self {
            Capability::Simple(t) => t.is_explicit(source, target),
            _ => false,
        }
    }

    pub fn is_page_limit_supported(&self, source: &str, target: &str, options: &TransformationOptions) -> bool {
        match self {
            Capability::Simple(t) => t.is_page_limit_supported(source, target, options),
            _ => false,
        }
    }

    /// A composite needs a hard deadline when any of its parts does.
    pub fn needs_interruption(&self) -> bool {
        match self {
            Capability::Simple(t) => t.needs_interruption(),
            Capability::Pipeline(p) => p
                .stages()
                .iter()
                .filter_map(|s| s.capability())
                .any(|c| c.needs_interruption()),
            Capability::Failover(f) => f.alternatives().iter().any(|c| c.needs_interruption()),
        }
    }

    /// Mimetype support: the capability's own answer, filtered by the
    /// configured `supported` properties.
    pub fn is_supported(
        &self,
        source: &str,
        target: &str,
        options: &TransformationOptions,
        registry: &TransformerRegistry,
    ) -> bool {
        let configured = registry
            .properties()
            .is_supported(self.name(), source, target, options.use_context());
        configured
            && match self {
                Capability::Simple(t) => t.is_transformable(source, target, options),
                Capability::Pipeline(p) => p.is_supported(source, target, options, registry),
                Capability::Failover(f) => f.is_supported(source, target, options, registry),
            }
    }

    /// Resolved limits for this capability and pair, request override included.
    pub fn limits(
        &self,
        source: &str,
        target: &str,
        options: &TransformationOptions,
        registry: &TransformerRegistry,
    ) -> TransformationLimits {
        registry.resolver().resolve_for_request(
            Some(self.name()),
            source,
            target,
            options,
            self.is_page_limit_supported(source, target, options),
        )
    }

    /// Largest source accepted, in KB: `0` disabled, `-1` unlimited.
    pub fn max_source_size_kbytes(
        &self,
        source: &str,
        target: &str,
        options: &TransformationOptions,
        registry: &TransformerRegistry,
    ) -> i64 {
        let own = self
            .limits(source, target, options, registry)
            .max_source_size_kbytes();
        match self {
            Capability::Simple(_) => own,
            Capability::Pipeline(p) => tightest(own, p.max_source_size_kbytes(source, target, options, registry)),
            Capability::Failover(f) => tightest(own, f.max_source_size_kbytes(source, target, options, registry)),
        }
    }

    /// Size feasibility, assuming mimetype support was already checked.
    pub fn fits(
        &self,
        source: &str,
        size: i64,
        target: &str,
        options: &TransformationOptions,
        registry: &TransformerRegistry,
    ) -> bool {
        if !self.limits(source, target, options, registry).allows_size(size) {
            return false;
        }
        match self {
            Capability::Simple(_) => true,
            Capability::Pipeline(p) => p.fits(source, size, target, options, registry),
            Capability::Failover(f) => f.fits(source, size, target, options, registry),
        }
    }

    /// Mimetype support and size feasibility together.
    pub fn is_feasible(
        &self,
        source: &str,
        size: i64,
        target: &str,
        options: &TransformationOptions,
        registry: &TransformerRegistry,
    ) -> bool {
        self.is_supported(source, target, options, registry)
            && self.fits(source, size, target, options, registry)
    }

    /// Recorded mean duration for the pair, `0.0` when never run.
    pub fn average_time(&self, source: &str, target: &str, registry: &TransformerRegistry) -> f64 {
        registry
            .tracker()
            .average_time(Some(self.name()), Some(source), Some(target))
    }
}
