//! Management hooks: read-only reports and the test transform.
//!
//! Everything here is built from public accessors of the service, so an
//! operator surface (the `xform` CLI, an HTTP endpoint) needs no access to
//! interior state. All report types serialise with serde.

use crate::capability::CapabilityKind;
use crate::content::MemoryWriter;
use crate::error::TransformError;
use crate::limits::TransformationLimits;
use crate::options::{TransformationOptions, TransformationRequest};
use crate::samples;
use crate::service::TransformService;
use crate::stats::{PerformanceRecord, StatsKey};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::info;

/// One registered capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityInfo {
    pub name: String,
    pub kind: CapabilityKind,
    pub available: bool,
    /// Direct parts of a composite; `""` marks a dynamic pipeline stage.
    pub components: Vec<String>,
    pub needs_interruption: bool,
}

/// One ranked candidate, with its statistics for the pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingEntry {
    pub rank: usize,
    pub name: String,
    pub priority: i32,
    /// Average used for ranking (`0.0` below threshold).
    pub ranking_average_ms: f64,
    pub average_ms: f64,
    pub count: u64,
    pub error_count: u64,
    pub max_source_size_kbytes: i64,
}

/// One statistics record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsEntry {
    #[serde(flatten)]
    pub key: StatsKey,
    pub count: u64,
    pub error_count: u64,
    pub average_ms: f64,
}

impl From<(StatsKey, PerformanceRecord)> for StatsEntry {
    fn from((key, record): (StatsKey, PerformanceRecord)) -> Self {
        Self {
            key,
            count: record.count(),
            error_count: record.error_count(),
            average_ms: record.average_ms(),
        }
    }
}

/// Outcome of [`Admin::test_transform`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub source_mimetype: String,
    pub target_mimetype: String,
    /// Forced capability, if any.
    pub requested: Option<String>,
    /// Capability that produced the output.
    pub transformer: Option<String>,
    pub success: bool,
    pub elapsed_ms: u64,
    pub output_bytes: usize,
    pub error: Option<String>,
}

/// Read-only view over a [`TransformService`] for operators.
pub struct Admin<'a> {
    service: &'a TransformService,
}

impl TransformService {
    pub fn admin(&self) -> Admin<'_> {
        Admin { service: self }
    }
}

impl<'a> Admin<'a> {
    /// Every registered capability, in registration order.
    pub fn list_capabilities(&self) -> Vec<CapabilityInfo> {
        let registry = self.service.registry();
        registry
            .all()
            .iter()
            .map(|c| CapabilityInfo {
                name: c.name().to_string(),
                kind: c.kind(),
                available: registry.is_available(c.name()),
                components: c.components(),
                needs_interruption: c.needs_interruption(),
            })
            .collect()
    }

    /// The ranked candidates for a request with their statistics.
    pub fn rankings(&self, request: &TransformationRequest) -> Vec<RankingEntry> {
        let registry = self.service.registry();
        let tracker = registry.tracker();
        let source = request.source_mimetype.as_str();
        let target = request.target_mimetype.as_str();
        registry
            .ranked_candidates(request)
            .into_iter()
            .enumerate()
            .map(|(i, candidate)| {
                let record = tracker
                    .get(&StatsKey::pair(candidate.name(), source, target))
                    .unwrap_or_default();
                RankingEntry {
                    rank: i + 1,
                    name: candidate.name().to_string(),
                    priority: candidate.priority,
                    ranking_average_ms: candidate.average_ms,
                    average_ms: record.average_ms(),
                    count: record.count(),
                    error_count: record.error_count(),
                    max_source_size_kbytes: candidate.capability.max_source_size_kbytes(
                        source,
                        target,
                        &request.options,
                        registry,
                    ),
                }
            })
            .collect()
    }

    /// Every statistics record, sorted by key.
    pub fn statistics(&self) -> Vec<StatsEntry> {
        self.service
            .tracker()
            .snapshot()
            .into_iter()
            .map(StatsEntry::from)
            .collect()
    }

    /// Statistics of one capability: its summary first, then its pairs.
    pub fn statistics_for(&self, name: &str) -> Vec<StatsEntry> {
        let mut entries: Vec<StatsEntry> = self
            .statistics()
            .into_iter()
            .filter(|e| e.key.transformer.as_deref() == Some(name))
            .collect();
        entries.sort_by_key(|e| e.key.source.is_some());
        entries
    }

    /// Limits in force for a capability and pair. `name == None` gives the
    /// system-wide resolution.
    pub fn resolved_limits(
        &self,
        name: Option<&str>,
        source: &str,
        target: &str,
        use_context: Option<&str>,
    ) -> Result<TransformationLimits, TransformError> {
        let registry = self.service.registry();
        match name {
            None => Ok(registry
                .resolver()
                .resolve(None, source, target, use_context, false)),
            Some(n) => {
                let capability = registry.resolve_by_name(n)?;
                let mut options = TransformationOptions::new();
                options.use_context = use_context.map(str::to_string);
                Ok(capability.limits(source, target, &options, registry))
            }
        }
    }

    /// Source/target pairs with a built-in sample that some selectable
    /// capability can handle.
    pub fn feasible_pairs(&self) -> Vec<(String, String)> {
        let mimetypes = samples::sample_mimetypes();
        let mut pairs = Vec::new();
        for source in &mimetypes {
            let size = samples::sample(source).map_or(-1, |s| s.len() as i64);
            for target in &mimetypes {
                let request = TransformationRequest::new(*source, size, *target);
                if self.service.is_transformable(&request) {
                    pairs.push((source.to_string(), target.to_string()));
                }
            }
        }
        pairs
    }

    /// Run the full selection and execution path on the built-in sample for
    /// `source`, optionally forcing a capability. Failures are reported in
    /// the outcome, not returned.
    pub async fn test_transform(&self, source: &str, target: &str, forced: Option<&str>) -> TestOutcome {
        let mut outcome = TestOutcome {
            source_mimetype: source.to_string(),
            target_mimetype: target.to_string(),
            requested: forced.map(str::to_string),
            transformer: None,
            success: false,
            elapsed_ms: 0,
            output_bytes: 0,
            error: None,
        };
        let Some(reader) = samples::sample_reader(source) else {
            outcome.error = Some(format!("No sample payload for {source}"));
            return outcome;
        };

        let writer = MemoryWriter::new(target);
        let output = writer.buffer();
        let started = Instant::now();
        let result = match forced {
            Some(name) => {
                self.service
                    .transform_with(name, Box::new(reader), Box::new(writer), TransformationOptions::new())
                    .await
            }
            None => {
                self.service
                    .transform(Box::new(reader), Box::new(writer), TransformationOptions::new())
                    .await
            }
        };
        outcome.elapsed_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(report) => {
                outcome.transformer = Some(report.transformer);
                outcome.success = true;
                outcome.output_bytes = output.len();
            }
            Err(e) => outcome.error = Some(e.to_string()),
        }
        outcome
    }

    /// [`Self::test_transform`] over every [`Self::feasible_pairs`] entry,
    /// `concurrency` at a time. `on_done` sees each outcome as it finishes;
    /// the returned list is in pair order.
    pub async fn test_all<F>(&self, concurrency: usize, on_done: F) -> Vec<TestOutcome>
    where
        F: Fn(&TestOutcome),
    {
        let pairs = self.feasible_pairs();
        let started = Instant::now();
        let mut outcomes: Vec<(usize, TestOutcome)> = stream::iter(pairs.iter().enumerate().map(
            |(i, (source, target))| async move { (i, self.test_transform(source, target, None).await) },
        ))
        .buffer_unordered(concurrency.max(1))
        .inspect(|(_, outcome)| on_done(outcome))
        .collect()
        .await;
        outcomes.sort_by_key(|(i, _)| *i);

        let failed = outcomes.iter().filter(|(_, o)| !o.success).count();
        info!(
            pairs = outcomes.len(),
            failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Test transforms complete"
        );
        outcomes.into_iter().map(|(_, o)| o).collect()
    }
}
