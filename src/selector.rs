//! Ranking of feasible candidates.
//!
//! Order: priority ascending, then ranking average ascending, then
//! registration order. The ranking average is `0.0` until a capability has
//! `thresholdCount` recorded attempts for the pair, so fresh capabilities
//! are not starved by peers with early numbers.

use crate::capability::Capability;
use crate::config::EngineConfig;
use crate::resolver::LimitResolver;
use crate::stats::PerformanceTracker;
use std::sync::Arc;

/// One ranked candidate.
#[derive(Debug, Clone)]
pub struct RankedCandidate {
    pub capability: Arc<Capability>,
    pub priority: i32,
    /// Average used for ranking (`0.0` below threshold).
    pub average_ms: f64,
}

impl RankedCandidate {
    pub fn name(&self) -> &str {
        self.capability.name()
    }
}

#[derive(Debug, Clone)]
pub struct SelectionPolicy {
    config: Arc<EngineConfig>,
    resolver: Arc<LimitResolver>,
    tracker: Arc<PerformanceTracker>,
}

impl SelectionPolicy {
    pub fn new(config: Arc<EngineConfig>, resolver: Arc<LimitResolver>, tracker: Arc<PerformanceTracker>) -> Self {
        Self {
            config,
            resolver,
            tracker,
        }
    }

    pub fn priority(&self, capability: &Capability, source: &str, target: &str) -> i32 {
        self.resolver.properties().priority(
            capability.name(),
            source,
            target,
            capability.is_explicit(source, target),
            &self.config,
        )
    }

    pub fn threshold_count(&self, name: &str) -> u64 {
        self.resolver.properties().threshold_count(name, &self.config)
    }

    /// Rank already-feasible candidates. `candidates` must be in
    /// registration order; the sort is stable.
    pub fn rank(&self, candidates: Vec<Arc<Capability>>, source: &str, target: &str) -> Vec<RankedCandidate> {
        let mut ranked: Vec<RankedCandidate> = candidates
            .into_iter()
            .map(|capability| {
                let priority = self.priority(&capability, source, target);
                let threshold = self.threshold_count(capability.name());
                let average_ms = self
                    .tracker
                    .ranking_average(capability.name(), source, target, threshold);
                RankedCandidate {
                    capability,
                    priority,
                    average_ms,
                }
            })
            .collect();
        ranked.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.average_ms.total_cmp(&b.average_ms))
        });
        ranked
    }
}
