//! Size, time and page limits.
//!
//! Limits come in three pairs. Each pair has a hard *max* (the transformer is
//! not even attempted when exceeded) and a soft *limit* (the adaptive reader
//! stops consuming the source once reached):
//!
//! | Pair  | Max                   | Limit              |
//! |-------|-----------------------|--------------------|
//! | size  | `maxSourceSizeKBytes` | `readLimitKBytes`  |
//! | time  | `timeoutMs`           | `readLimitTimeMs`  |
//! | pages | `maxPages`            | `pageLimit`        |
//!
//! Values: `0` disables the transformation, `-1` (or unset) is unlimited,
//! anything positive is the bound. Setting one member of a pair to a value
//! `>= 0` clears the other to `-1`, both within one layer and when a more
//! specific layer is applied over a less specific one. Operators layering
//! partial overrides should know that a `readLimitKBytes` at transformer
//! level silently discards a system-wide `maxSourceSizeKBytes`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// No bound.
pub const UNLIMITED: i64 = -1;

/// Transformation switched off.
pub const DISABLED: i64 = 0;

/// The tighter of two hard maxima (`0` wins, `-1` loses).
pub fn tightest(a: i64, b: i64) -> i64 {
    match (a, b) {
        (DISABLED, _) | (_, DISABLED) => DISABLED,
        (a, b) if a < 0 => b,
        (a, b) if b < 0 => a,
        (a, b) => a.min(b),
    }
}

/// The looser of two hard maxima (`-1` wins, `0` loses).
pub fn loosest(a: i64, b: i64) -> i64 {
    if a < 0 || b < 0 {
        UNLIMITED
    } else {
        a.max(b)
    }
}

/// One max/limit pair. `None` means "not set at this layer".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitPair {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    limit: Option<i64>,
}

impl LimitPair {
    pub fn max(&self) -> i64 {
        self.max.unwrap_or(UNLIMITED)
    }

    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(UNLIMITED)
    }

    pub fn set_max(&mut self, value: i64) {
        self.max = Some(value);
        if value >= 0 {
            self.limit = Some(UNLIMITED);
        }
    }

    pub fn set_limit(&mut self, value: i64) {
        self.limit = Some(value);
        if value >= 0 {
            self.max = Some(UNLIMITED);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.max.is_none() && self.limit.is_none()
    }

    /// Apply every member `other` sets, through the clearing setters.
    pub fn overlay(&mut self, other: &LimitPair) {
        if let Some(v) = other.max {
            self.set_max(v);
        }
        if let Some(v) = other.limit {
            self.set_limit(v);
        }
    }

    fn resolved(&self) -> LimitPair {
        LimitPair {
            max: Some(self.max()),
            limit: Some(self.limit()),
        }
    }

    fn is_resolved(&self) -> bool {
        self.max.is_some() && self.limit.is_some()
    }
}

/// The six limit properties, named by their configuration suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LimitProperty {
    MaxSourceSizeKBytes,
    ReadLimitKBytes,
    TimeoutMs,
    ReadLimitTimeMs,
    MaxPages,
    PageLimit,
}

impl LimitProperty {
    pub const ALL: [LimitProperty; 6] = [
        LimitProperty::MaxSourceSizeKBytes,
        LimitProperty::ReadLimitKBytes,
        LimitProperty::TimeoutMs,
        LimitProperty::ReadLimitTimeMs,
        LimitProperty::MaxPages,
        LimitProperty::PageLimit,
    ];

    /// Property-key suffix, e.g. `maxSourceSizeKBytes`.
    pub fn suffix(self) -> &'static str {
        match self {
            LimitProperty::MaxSourceSizeKBytes => "maxSourceSizeKBytes",
            LimitProperty::ReadLimitKBytes => "readLimitKBytes",
            LimitProperty::TimeoutMs => "timeoutMs",
            LimitProperty::ReadLimitTimeMs => "readLimitTimeMs",
            LimitProperty::MaxPages => "maxPages",
            LimitProperty::PageLimit => "pageLimit",
        }
    }

    pub fn from_suffix(suffix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.suffix() == suffix)
    }
}

/// The full set of limits for one resolution.
///
/// A value built by hand or parsed from one property layer may leave fields
/// unset; [`TransformationLimits::resolved`] fills every gap with `-1`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformationLimits {
    #[serde(default)]
    size: LimitPair,
    #[serde(default)]
    time: LimitPair,
    #[serde(default)]
    pages: LimitPair,
}

impl TransformationLimits {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every field explicitly unlimited.
    pub fn unlimited() -> Self {
        Self::default().resolved()
    }

    // ── Accessors ────────────────────────────────────────────────────────

    pub fn max_source_size_kbytes(&self) -> i64 {
        self.size.max()
    }

    pub fn read_limit_kbytes(&self) -> i64 {
        self.size.limit()
    }

    pub fn timeout_ms(&self) -> i64 {
        self.time.max()
    }

    pub fn read_limit_time_ms(&self) -> i64 {
        self.time.limit()
    }

    pub fn max_pages(&self) -> i64 {
        self.pages.max()
    }

    pub fn page_limit(&self) -> i64 {
        self.pages.limit()
    }

    pub fn get(&self, property: LimitProperty) -> i64 {
        match property {
            LimitProperty::MaxSourceSizeKBytes => self.max_source_size_kbytes(),
            LimitProperty::ReadLimitKBytes => self.read_limit_kbytes(),
            LimitProperty::TimeoutMs => self.timeout_ms(),
            LimitProperty::ReadLimitTimeMs => self.read_limit_time_ms(),
            LimitProperty::MaxPages => self.max_pages(),
            LimitProperty::PageLimit => self.page_limit(),
        }
    }

    /// `true` when the field was explicitly set (possibly to `-1` by clearing).
    pub fn is_set(&self, property: LimitProperty) -> bool {
        match property {
            LimitProperty::MaxSourceSizeKBytes => self.size.max.is_some(),
            LimitProperty::ReadLimitKBytes => self.size.limit.is_some(),
            LimitProperty::TimeoutMs => self.time.max.is_some(),
            LimitProperty::ReadLimitTimeMs => self.time.limit.is_some(),
            LimitProperty::MaxPages => self.pages.max.is_some(),
            LimitProperty::PageLimit => self.pages.limit.is_some(),
        }
    }

    // ── Setters (clear the other member of the pair) ─────────────────────

    pub fn set_max_source_size_kbytes(&mut self, v: i64) {
        self.size.set_max(v);
    }

    pub fn set_read_limit_kbytes(&mut self, v: i64) {
        self.size.set_limit(v);
    }

    pub fn set_timeout_ms(&mut self, v: i64) {
        self.time.set_max(v);
    }

    pub fn set_read_limit_time_ms(&mut self, v: i64) {
        self.time.set_limit(v);
    }

    pub fn set_max_pages(&mut self, v: i64) {
        self.pages.set_max(v);
    }

    pub fn set_page_limit(&mut self, v: i64) {
        self.pages.set_limit(v);
    }

    pub fn set(&mut self, property: LimitProperty, v: i64) {
        match property {
            LimitProperty::MaxSourceSizeKBytes => self.set_max_source_size_kbytes(v),
            LimitProperty::ReadLimitKBytes => self.set_read_limit_kbytes(v),
            LimitProperty::TimeoutMs => self.set_timeout_ms(v),
            LimitProperty::ReadLimitTimeMs => self.set_read_limit_time_ms(v),
            LimitProperty::MaxPages => self.set_max_pages(v),
            LimitProperty::PageLimit => self.set_page_limit(v),
        }
    }

    /// Drop the `maxPages` value, leaving `pageLimit` untouched.
    pub(crate) fn suppress_max_pages(&mut self) {
        self.pages.max = Some(UNLIMITED);
    }

    // ── Layering ─────────────────────────────────────────────────────────

    /// Apply the fields `other` sets on top of `self`.
    pub fn overlay(&mut self, other: &TransformationLimits) {
        self.size.overlay(&other.size);
        self.time.overlay(&other.time);
        self.pages.overlay(&other.pages);
    }

    /// Builder-style [`TransformationLimits::overlay`].
    pub fn overlaid(mut self, other: &TransformationLimits) -> Self {
        self.overlay(other);
        self
    }

    /// Copy with every unset field replaced by `-1`.
    pub fn resolved(&self) -> Self {
        Self {
            size: self.size.resolved(),
            time: self.time.resolved(),
            pages: self.pages.resolved(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.size.is_resolved() && self.time.is_resolved() && self.pages.is_resolved()
    }

    pub fn is_empty(&self) -> bool {
        self.size.is_empty() && self.time.is_empty() && self.pages.is_empty()
    }

    // ── Checks ───────────────────────────────────────────────────────────

    /// `maxSourceSizeKBytes == 0`: the transformation is switched off.
    pub fn is_disabled(&self) -> bool {
        self.max_source_size_kbytes() == DISABLED
    }

    /// Whether a source of `size` bytes passes the hard size bound.
    /// A negative size is unknown and always passes unless disabled.
    pub fn allows_size(&self, size: i64) -> bool {
        if self.is_disabled() {
            return false;
        }
        let max = self.max_source_size_kbytes();
        !(size >= 0 && max > 0 && size > max.saturating_mul(1024))
    }
}

impl fmt::Display for TransformationLimits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = LimitProperty::ALL
            .iter()
            .map(|p| format!("{}={}", p.suffix(), self.get(*p)))
            .collect();
        f.write_str(&parts.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_reads_as_unlimited() {
        let l = TransformationLimits::new();
        assert_eq!(l.max_source_size_kbytes(), UNLIMITED);
        assert_eq!(l.page_limit(), UNLIMITED);
        assert!(!l.is_resolved());
        assert!(l.resolved().is_resolved());
    }

    #[test]
    fn setting_one_member_clears_the_other() {
        let mut l = TransformationLimits::new();
        l.set_max_source_size_kbytes(50);
        l.set_read_limit_kbytes(30);
        assert_eq!(l.max_source_size_kbytes(), -1);
        assert_eq!(l.read_limit_kbytes(), 30);

        l.set_timeout_ms(1000);
        assert_eq!(l.read_limit_time_ms(), -1);
        l.set_read_limit_time_ms(-1);
        assert_eq!(l.timeout_ms(), 1000, "-1 must not clear the partner");
    }

    #[test]
    fn overlay_clears_across_layers() {
        let mut base = TransformationLimits::new();
        base.set_max_source_size_kbytes(100);
        let mut layer = TransformationLimits::new();
        layer.set_read_limit_kbytes(20);
        base.overlay(&layer);
        assert_eq!(base.max_source_size_kbytes(), -1);
        assert_eq!(base.read_limit_kbytes(), 20);
    }

    #[test]
    fn overlay_keeps_fields_the_layer_leaves_unset() {
        let mut base = TransformationLimits::new();
        base.set_max_source_size_kbytes(100);
        base.set_timeout_ms(500);
        let mut layer = TransformationLimits::new();
        layer.set_max_pages(3);
        let merged = base.overlaid(&layer);
        assert_eq!(merged.max_source_size_kbytes(), 100);
        assert_eq!(merged.timeout_ms(), 500);
        assert_eq!(merged.max_pages(), 3);
    }

    #[test]
    fn size_checks() {
        let mut l = TransformationLimits::new();
        assert!(l.allows_size(10_000_000));
        l.set_max_source_size_kbytes(1);
        assert!(l.allows_size(1024));
        assert!(!l.allows_size(1025));
        assert!(l.allows_size(-1), "unknown size passes");
        l.set_max_source_size_kbytes(0);
        assert!(l.is_disabled());
        assert!(!l.allows_size(-1));
    }

    #[test]
    fn combining_maxima() {
        assert_eq!(tightest(-1, 10), 10);
        assert_eq!(tightest(20, 10), 10);
        assert_eq!(tightest(0, -1), 0);
        assert_eq!(loosest(-1, 10), -1);
        assert_eq!(loosest(0, 10), 10);
        assert_eq!(loosest(0, 0), 0);
    }

    #[test]
    fn property_suffixes_round_trip() {
        for p in LimitProperty::ALL {
            assert_eq!(LimitProperty::from_suffix(p.suffix()), Some(p));
        }
        assert_eq!(LimitProperty::from_suffix("priority"), None);
    }

    #[test]
    fn display_lists_all_fields() {
        let mut l = TransformationLimits::new();
        l.set_page_limit(2);
        let s = l.to_string();
        assert!(s.contains("pageLimit=2"));
        assert!(s.contains("maxPages=-1"));
    }
}
