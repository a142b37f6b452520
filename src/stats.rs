//! Adaptive timing and error statistics.
//!
//! One [`PerformanceRecord`] per `(transformer, source, target)` key, where
//! `None` stands for "any". A top-level observation updates three records:
//! the exact key, the transformer summary `(name, *, *)` and the system
//! summary `(*, *, *)`. Observations made inside a composite update only the
//! exact key, so the summaries count each top-level call once.
//!
//! Records live in a `DashMap`, each behind its own `parking_lot::Mutex`.
//! Two transforms of different pairs never contend; two of the same pair
//! serialise only for the few instructions of the update.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Statistics key; `None` members mean "any".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StatsKey {
    pub transformer: Option<String>,
    pub source: Option<String>,
    pub target: Option<String>,
}

impl StatsKey {
    pub fn new(transformer: Option<&str>, source: Option<&str>, target: Option<&str>) -> Self {
        Self {
            transformer: transformer.map(str::to_string),
            source: source.map(str::to_string),
            target: target.map(str::to_string),
        }
    }

    pub fn pair(transformer: &str, source: &str, target: &str) -> Self {
        Self::new(Some(transformer), Some(source), Some(target))
    }

    pub fn summary(transformer: &str) -> Self {
        Self::new(Some(transformer), None, None)
    }

    pub fn system() -> Self {
        Self::new(None, None, None)
    }
}

impl fmt::Display for StatsKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} -> {}",
            self.transformer.as_deref().unwrap_or("*"),
            self.source.as_deref().unwrap_or("*"),
            self.target.as_deref().unwrap_or("*")
        )
    }
}

/// Running mean of durations plus attempt and error counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    count: u64,
    error_count: u64,
    average_ms: f64,
}

impl PerformanceRecord {
    /// A record with the given history, mostly for seeding tests and
    /// restoring snapshots.
    pub fn from_parts(count: u64, error_count: u64, average_ms: f64) -> Self {
        Self {
            count,
            error_count,
            average_ms,
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    pub fn average_ms(&self) -> f64 {
        self.average_ms
    }

    /// Fold one sample into the mean. At `u64::MAX` the count is halved
    /// first, so the oldest history loses weight instead of overflowing.
    pub fn add_time(&mut self, ms: f64) {
        if self.count == u64::MAX {
            self.count /= 2;
        }
        self.count += 1;
        self.average_ms += (ms - self.average_ms) / self.count as f64;
    }

    pub fn add_error(&mut self, penalty_ms: f64) {
        self.error_count = self.error_count.saturating_add(1);
        self.add_time(penalty_ms);
    }
}

/// Shared statistics table.
#[derive(Debug, Default)]
pub struct PerformanceTracker {
    records: DashMap<StatsKey, Arc<Mutex<PerformanceRecord>>>,
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, key: StatsKey) -> Arc<Mutex<PerformanceRecord>> {
        self.records.entry(key).or_default().clone()
    }

    fn fan_out(&self, transformer: &str, source: &str, target: &str, top_level: bool) -> Vec<StatsKey> {
        let mut keys = vec![StatsKey::pair(transformer, source, target)];
        if top_level {
            keys.push(StatsKey::summary(transformer));
            keys.push(StatsKey::system());
        }
        keys
    }

    /// A successful attempt took `ms`.
    pub fn record_time(&self, transformer: &str, source: &str, target: &str, ms: u64, top_level: bool) {
        for key in self.fan_out(transformer, source, target, top_level) {
            self.record(key).lock().add_time(ms as f64);
        }
    }

    /// A failed attempt; `penalty_ms` is folded into the mean.
    pub fn record_error(
        &self,
        transformer: &str,
        source: &str,
        target: &str,
        penalty_ms: u64,
        top_level: bool,
    ) {
        for key in self.fan_out(transformer, source, target, top_level) {
            self.record(key).lock().add_error(penalty_ms as f64);
        }
    }

    /// Mean duration in ms, `0.0` when nothing was recorded.
    pub fn average_time(&self, transformer: Option<&str>, source: Option<&str>, target: Option<&str>) -> f64 {
        self.get(&StatsKey::new(transformer, source, target))
            .map_or(0.0, |r| r.average_ms)
    }

    /// Mean used for ranking: `0.0` until `threshold` attempts were seen.
    pub fn ranking_average(&self, transformer: &str, source: &str, target: &str, threshold: u64) -> f64 {
        match self.get(&StatsKey::pair(transformer, source, target)) {
            Some(r) if r.count >= threshold => r.average_ms,
            _ => 0.0,
        }
    }

    /// Copy of one record.
    pub fn get(&self, key: &StatsKey) -> Option<PerformanceRecord> {
        let cell = self.records.get(key).map(|r| r.value().clone())?;
        let snapshot = *cell.lock();
        Some(snapshot)
    }

    /// Replace one record.
    pub fn insert(&self, key: StatsKey, record: PerformanceRecord) {
        *self.record(key).lock() = record;
    }

    /// Copies of every record, sorted by key.
    pub fn snapshot(&self) -> Vec<(StatsKey, PerformanceRecord)> {
        let cells: Vec<(StatsKey, Arc<Mutex<PerformanceRecord>>)> = self
            .records
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        let mut out: Vec<(StatsKey, PerformanceRecord)> =
            cells.into_iter().map(|(k, c)| (k, *c.lock())).collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Forget everything recorded for `transformer`.
    pub fn remove_transformer(&self, transformer: &str) {
        self.records
            .retain(|k, _| k.transformer.as_deref() != Some(transformer));
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
