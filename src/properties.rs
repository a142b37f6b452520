//! Transformer property grammar.
//!
//! The engine is configured through flat string properties:
//!
//! ```text
//! <prefix>.<name>.<suffix>[.use.<use>]
//! <prefix>.<name>.extensions.<srcExt>.<tgtExt>.<suffix>[.use.<use>]
//! <prefix>.<name>.mimetypes.<srcMime>.<tgtMime>.<suffix>[.use.<use>]
//! ```
//!
//! `<name>` is a transformer name, or `default` for the system-wide layer.
//! Either extension or mimetype token may be `*`. Mimetypes contain dots of
//! their own, so `<srcMime>.<tgtMime>` is split at the first dot that leaves
//! a known mimetype on both sides.
//!
//! | Suffix | Value | Pair | `.use.` | `default` |
//! |---|---|---|---|---|
//! | `priority` | integer | yes | no | yes |
//! | `supported` | boolean | yes | yes | yes |
//! | limit suffixes | integer `>= -1` | yes | yes | yes |
//! | `thresholdCount` | integer `>= 0` | no | no | yes |
//! | `errorTime` | integer | no | no | yes |
//! | `available` | boolean | no | no | no |
//! | `pipeline` | `name\|ext\|name[\|ext\|name…]` | no | no | no |
//! | `failover` | `name\|name[\|name…]` | no | no | no |
//!
//! Parsing never stops at the first problem: every violation is collected
//! and reported as one [`ConfigError`].

use crate::config::EngineConfig;
use crate::error::ConfigError;
use crate::limits::{LimitProperty, TransformationLimits};
use mimetype_catalog::{MimetypeCatalog, ANY};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Name of the system-wide settings layer.
pub const SYSTEM: &str = "default";

static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_$\-]+$").unwrap());

static USE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<body>.+)\.use\.(?P<use>[A-Za-z0-9_\-]+)$").unwrap());

// ── Parsed shapes ────────────────────────────────────────────────────────

/// Source/target pattern of a pair-level property; either side may be `*`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PairPattern {
    pub source: String,
    pub target: String,
}

impl PairPattern {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }

    pub fn matches(&self, source: &str, target: &str) -> bool {
        (self.source == ANY || self.source == source) && (self.target == ANY || self.target == target)
    }

    /// Patterns that can apply to `(source, target)`, least specific first.
    fn candidates(source: &str, target: &str) -> Vec<PairPattern> {
        let mut out: Vec<PairPattern> = Vec::with_capacity(4);
        for (s, t) in [(ANY, ANY), (ANY, target), (source, ANY), (source, target)] {
            let p = PairPattern::new(s, t);
            if !out.contains(&p) {
                out.push(p);
            }
        }
        out
    }
}

/// One stage of a declared pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageDecl {
    /// `None` selects the best top-level transformer at execution time.
    pub name: Option<String>,
    /// Output mimetype; `None` for the last stage (the request target).
    pub target_mimetype: Option<String>,
}

/// A composite declared through properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompositeDecl {
    Pipeline(Vec<StageDecl>),
    Failover(Vec<String>),
}

impl CompositeDecl {
    /// Names this declaration depends on.
    pub fn references(&self) -> Vec<&str> {
        match self {
            CompositeDecl::Pipeline(stages) => {
                stages.iter().filter_map(|s| s.name.as_deref()).collect()
            }
            CompositeDecl::Failover(names) => names.iter().map(String::as_str).collect(),
        }
    }
}

type LayerKey = (Option<PairPattern>, Option<String>);

/// Everything the properties say about one name.
#[derive(Debug, Clone, Default)]
pub struct TransformerSettings {
    pub priority: Option<i32>,
    pub pair_priorities: BTreeMap<PairPattern, i32>,
    limits: BTreeMap<LayerKey, TransformationLimits>,
    supported: BTreeMap<LayerKey, bool>,
    pub threshold_count: Option<u64>,
    pub error_time_ms: Option<i64>,
    pub available: Option<bool>,
    pub composite: Option<CompositeDecl>,
    conflict: bool,
}

impl TransformerSettings {
    /// Limits configured for `(source, target)` at `use_context`, merging
    /// wildcard patterns from least to most specific. `pair == None` reads
    /// the transformer-level entry.
    pub fn limits_for(
        &self,
        pair: Option<(&str, &str)>,
        use_context: Option<&str>,
    ) -> TransformationLimits {
        let mut merged = TransformationLimits::new();
        let use_key = use_context.map(str::to_string);
        match pair {
            None => {
                if let Some(l) = self.limits.get(&(None, use_key)) {
                    merged.overlay(l);
                }
            }
            Some((source, target)) => {
                for p in PairPattern::candidates(source, target) {
                    if let Some(l) = self.limits.get(&(Some(p), use_key.clone())) {
                        merged.overlay(l);
                    }
                }
            }
        }
        merged
    }

    /// Pair-level priority, most specific match first.
    pub fn pair_priority(&self, source: &str, target: &str) -> Option<i32> {
        PairPattern::candidates(source, target)
            .iter()
            .rev()
            .find_map(|p| self.pair_priorities.get(p).copied())
    }

    /// `Some(false)` when blacklisted, `Some(true)` when whitelisted,
    /// `None` when the properties do not restrict the pair.
    pub fn supported(&self, source: &str, target: &str, use_context: Option<&str>) -> Option<bool> {
        let applies = |(pattern, u): &LayerKey| {
            pattern.as_ref().map_or(true, |p| p.matches(source, target))
                && u.as_deref().map_or(true, |u| Some(u) == use_context)
        };
        let in_scope = |(_, u): &LayerKey| u.as_deref().map_or(true, |u| Some(u) == use_context);

        if self.supported.iter().any(|(k, v)| !*v && applies(k)) {
            return Some(false);
        }
        let whitelist = self.supported.iter().any(|(k, v)| *v && in_scope(k));
        if whitelist {
            return Some(self.supported.iter().any(|(k, v)| *v && applies(k)));
        }
        None
    }

    pub fn has_limits(&self) -> bool {
        !self.limits.is_empty()
    }
}

// ── TransformerProperties ────────────────────────────────────────────────

/// Validated transformer properties.
#[derive(Debug, Clone, Default)]
pub struct TransformerProperties {
    prefix: String,
    raw: Vec<(String, String)>,
    by_name: BTreeMap<String, TransformerSettings>,
}

impl TransformerProperties {
    /// No properties: every lookup falls through to [`EngineConfig`].
    pub fn empty(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Self::default()
        }
    }

    /// Parse key/value pairs. Keys outside `prefix` are ignored.
    pub fn from_pairs<K, V>(
        prefix: &str,
        pairs: impl IntoIterator<Item = (K, V)>,
        catalog: &MimetypeCatalog,
    ) -> Result<Self, ConfigError>
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut props = Self::empty(prefix);
        let mut errors = Vec::new();
        let lead = format!("{prefix}.");
        for (k, v) in pairs {
            let key: String = k.into();
            let value: String = v.into();
            let key = key.trim().to_string();
            let value = value.trim().to_string();
            match key.strip_prefix(&lead) {
                Some(rest) => {
                    if let Err(e) = props.apply(&key, rest, &value, catalog) {
                        errors.push(e);
                    }
                    props.raw.push((key, value));
                }
                None => debug!(key = %key, "Ignoring property outside the transformer prefix"),
            }
        }
        for (name, settings) in &props.by_name {
            if settings.conflict {
                errors.push(ConfigError::PipelineAndFailover { name: name.clone() });
            }
        }
        ConfigError::aggregate(errors)?;
        Ok(props)
    }

    /// Parse `.properties` text: `key=value` or `key:value` lines, `#`/`!`
    /// comments, trailing `\` continues a line.
    pub fn from_properties_text(
        prefix: &str,
        text: &str,
        catalog: &MimetypeCatalog,
    ) -> Result<Self, ConfigError> {
        Self::from_pairs(prefix, parse_properties_text(text)?, catalog)
    }

    /// Parse a flat JSON object whose values are strings, numbers or booleans.
    pub fn from_json(prefix: &str, json: &str, catalog: &MimetypeCatalog) -> Result<Self, ConfigError> {
        let value: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| ConfigError::Invalid(format!("properties JSON: {e}")))?;
        let obj = value
            .as_object()
            .ok_or_else(|| ConfigError::Invalid("properties JSON must be an object".into()))?;
        let mut pairs = Vec::with_capacity(obj.len());
        let mut errors = Vec::new();
        for (k, v) in obj {
            match v {
                serde_json::Value::String(s) => pairs.push((k.clone(), s.clone())),
                serde_json::Value::Number(n) => pairs.push((k.clone(), n.to_string())),
                serde_json::Value::Bool(b) => pairs.push((k.clone(), b.to_string())),
                other => errors.push(ConfigError::InvalidValue {
                    key: k.clone(),
                    value: other.to_string(),
                    expected: "a string, number or boolean",
                }),
            }
        }
        ConfigError::aggregate(errors)?;
        Self::from_pairs(prefix, pairs, catalog)
    }

    /// Read a file; `.json` files go through [`Self::from_json`], anything
    /// else through [`Self::from_properties_text`].
    pub fn from_file(prefix: &str, path: &Path, catalog: &MimetypeCatalog) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Invalid(format!("cannot read {}: {e}", path.display())))?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json(prefix, &text, catalog)
        } else {
            Self::from_properties_text(prefix, &text, catalog)
        }
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The properties as given, in input order.
    pub fn raw(&self) -> &[(String, String)] {
        &self.raw
    }

    pub fn settings(&self, name: &str) -> Option<&TransformerSettings> {
        self.by_name.get(name)
    }

    pub fn system(&self) -> Option<&TransformerSettings> {
        self.by_name.get(SYSTEM)
    }

    /// Transformer names mentioned by any property (excluding `default`).
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str).filter(|n| *n != SYSTEM)
    }

    /// Composite declarations, by name.
    pub fn composites(&self) -> impl Iterator<Item = (&str, &CompositeDecl)> {
        self.by_name
            .iter()
            .filter_map(|(n, s)| s.composite.as_ref().map(|c| (n.as_str(), c)))
    }

    /// Priority of `name` for a pair. See the module docs for the order.
    pub fn priority(
        &self,
        name: &str,
        source: &str,
        target: &str,
        explicit: bool,
        config: &EngineConfig,
    ) -> i32 {
        if let Some(s) = self.settings(name) {
            if let Some(p) = s.pair_priority(source, target).or(s.priority) {
                return p;
            }
        }
        if explicit {
            return config.explicit_priority;
        }
        self.system()
            .and_then(|s| s.pair_priority(source, target).or(s.priority))
            .unwrap_or(config.default_priority)
    }

    /// Whether the properties allow `name` to handle the pair.
    pub fn is_supported(&self, name: &str, source: &str, target: &str, use_context: Option<&str>) -> bool {
        if self
            .system()
            .and_then(|s| s.supported(source, target, use_context))
            == Some(false)
        {
            return false;
        }
        self.settings(name)
            .and_then(|s| s.supported(source, target, use_context))
            .unwrap_or(true)
    }

    pub fn threshold_count(&self, name: &str, config: &EngineConfig) -> u64 {
        self.settings(name)
            .and_then(|s| s.threshold_count)
            .or_else(|| self.system().and_then(|s| s.threshold_count))
            .unwrap_or(config.threshold_count)
    }

    /// Penalty for a failed attempt of `name`; `<= 0` means "use elapsed".
    pub fn error_time_ms(&self, name: Option<&str>, config: &EngineConfig) -> i64 {
        name.and_then(|n| self.settings(n))
            .and_then(|s| s.error_time_ms)
            .or_else(|| self.system().and_then(|s| s.error_time_ms))
            .unwrap_or(config.error_time_ms)
    }

    pub fn available(&self, name: &str) -> Option<bool> {
        self.settings(name).and_then(|s| s.available)
    }

    // ── Parsing ──────────────────────────────────────────────────────────

    fn apply(
        &mut self,
        key: &str,
        rest: &str,
        value: &str,
        catalog: &MimetypeCatalog,
    ) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidKey {
            key: key.to_string(),
            reason: reason.to_string(),
        };

        let (body, use_context) = match USE_RE.captures(rest) {
            Some(c) => (
                c.name("body").map_or("", |m| m.as_str()),
                c.name("use").map(|m| m.as_str().to_string()),
            ),
            None => (rest, None),
        };
        if body.ends_with(".use") || body.contains(".use..") {
            return Err(invalid("empty use context"));
        }

        let (name, after_name) = body
            .split_once('.')
            .ok_or_else(|| invalid("expected <name>.<suffix>"))?;
        if !NAME_RE.is_match(name) {
            return Err(invalid("transformer name must be alphanumeric"));
        }
        let (middle, suffix) = match after_name.rsplit_once('.') {
            Some((m, s)) => (Some(m), s),
            None => (None, after_name),
        };
        let pair = match middle {
            None => None,
            Some(m) => Some(parse_pair(key, m, catalog)?),
        };

        let is_system = name == SYSTEM;
        let limit = LimitProperty::from_suffix(suffix);
        let pair_allowed = matches!(suffix, "priority" | "supported") || limit.is_some();
        let use_allowed = suffix == "supported" || limit.is_some();
        if pair.is_some() && !pair_allowed {
            return Err(invalid(&format!("'{suffix}' is a transformer-level property")));
        }
        if use_context.is_some() && !use_allowed {
            return Err(invalid(&format!("'{suffix}' cannot be set per use")));
        }
        if is_system && matches!(suffix, "pipeline" | "failover" | "available") {
            return Err(invalid(&format!("'{suffix}' cannot be set on '{SYSTEM}'")));
        }

        let settings = self.by_name.entry(name.to_string()).or_default();
        match (suffix, limit) {
            (_, Some(prop)) => {
                let v: i64 = parse_int(key, value, "an integer >= -1")?;
                if v < -1 {
                    return Err(ConfigError::InvalidValue {
                        key: key.to_string(),
                        value: value.to_string(),
                        expected: "an integer >= -1",
                    });
                }
                settings
                    .limits
                    .entry((pair, use_context))
                    .or_default()
                    .set(prop, v);
            }
            ("priority", None) => {
                let p: i32 = parse_int(key, value, "an integer")?;
                match pair {
                    Some(pair) => {
                        settings.pair_priorities.insert(pair, p);
                    }
                    None => settings.priority = Some(p),
                }
            }
            ("supported", None) => {
                let b = parse_bool(key, value)?;
                settings.supported.insert((pair, use_context), b);
            }
            ("thresholdCount", None) => {
                settings.threshold_count = Some(parse_int(key, value, "a non-negative integer")?);
            }
            ("errorTime", None) => {
                settings.error_time_ms = Some(parse_int(key, value, "an integer")?);
            }
            ("available", None) => settings.available = Some(parse_bool(key, value)?),
            ("pipeline", None) => {
                let stages = parse_pipeline(name, value, catalog)?;
                settings.set_composite(CompositeDecl::Pipeline(stages));
            }
            ("failover", None) => {
                let names = parse_failover(name, value)?;
                settings.set_composite(CompositeDecl::Failover(names));
            }
            (other, None) => return Err(invalid(&format!("unknown suffix '{other}'"))),
        }
        Ok(())
    }
}

impl TransformerSettings {
    fn set_composite(&mut self, decl: CompositeDecl) {
        match (&self.composite, &decl) {
            (Some(CompositeDecl::Pipeline(_)), CompositeDecl::Failover(_))
            | (Some(CompositeDecl::Failover(_)), CompositeDecl::Pipeline(_)) => {
                self.conflict = true;
            }
            _ => {}
        }
        self.composite = Some(decl);
    }
}

fn parse_int<T: std::str::FromStr>(key: &str, value: &str, expected: &'static str) -> Result<T, ConfigError> {
    value.parse::<T>().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        expected,
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            expected: "true or false",
        }),
    }
}

/// `extensions.<se>.<te>` or `mimetypes.<sm>.<tm>` into a [`PairPattern`].
fn parse_pair(key: &str, middle: &str, catalog: &MimetypeCatalog) -> Result<PairPattern, ConfigError> {
    if let Some(exts) = middle.strip_prefix("extensions.") {
        let (se, te) = exts.split_once('.').ok_or_else(|| ConfigError::InvalidKey {
            key: key.to_string(),
            reason: "expected extensions.<source>.<target>".into(),
        })?;
        let lookup = |token: &str| -> Result<String, ConfigError> {
            if token == ANY {
                return Ok(ANY.to_string());
            }
            if token.contains('.') {
                return Err(ConfigError::InvalidKey {
                    key: key.to_string(),
                    reason: "expected extensions.<source>.<target>".into(),
                });
            }
            catalog
                .mimetype_for_extension(token)
                .map(str::to_string)
                .ok_or_else(|| ConfigError::UnknownExtension {
                    key: key.to_string(),
                    token: token.to_string(),
                })
        };
        return Ok(PairPattern::new(lookup(se)?, lookup(te)?));
    }
    if let Some(mimes) = middle.strip_prefix("mimetypes.") {
        let known = |m: &str| m == ANY || catalog.is_known_mimetype(m);
        return mimes
            .match_indices('.')
            .map(|(i, _)| (&mimes[..i], &mimes[i + 1..]))
            .find(|&(s, t)| known(s) && known(t))
            .map(|(s, t)| PairPattern::new(s, t))
            .ok_or_else(|| ConfigError::UnknownMimetype {
                key: key.to_string(),
                tokens: mimes.to_string(),
            });
    }
    Err(ConfigError::InvalidKey {
        key: key.to_string(),
        reason: "expected 'extensions' or 'mimetypes' before the pair".into(),
    })
}

fn parse_pipeline(name: &str, value: &str, catalog: &MimetypeCatalog) -> Result<Vec<StageDecl>, ConfigError> {
    let bad = |reason: String| ConfigError::InvalidPipeline {
        name: name.to_string(),
        reason,
    };
    let tokens: Vec<&str> = value.split('|').map(str::trim).collect();
    if tokens.len() < 3 || tokens.len() % 2 == 0 {
        return Err(bad(format!(
            "expected name|ext|name[|ext|name…], got {} token(s)",
            tokens.len()
        )));
    }
    let mut stages = Vec::with_capacity(tokens.len() / 2 + 1);
    for chunk in tokens.chunks(2) {
        let stage_name = match chunk[0] {
            "" => None,
            n if n == name => return Err(bad("a pipeline cannot contain itself".into())),
            n => Some(n.to_string()),
        };
        let target_mimetype = match chunk.get(1) {
            None => None,
            Some(ext) => {
                let mimetype = if ext.contains('/') && catalog.is_known_mimetype(ext) {
                    Some(ext.to_string())
                } else {
                    catalog.mimetype_for_extension(ext).map(str::to_string)
                };
                Some(mimetype.ok_or_else(|| bad(format!("unknown intermediate extension '{ext}'")))?)
            }
        };
        stages.push(StageDecl {
            name: stage_name,
            target_mimetype,
        });
    }
    Ok(stages)
}

fn parse_failover(name: &str, value: &str) -> Result<Vec<String>, ConfigError> {
    let names: Vec<String> = value
        .split('|')
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .collect();
    if names.is_empty() {
        return Err(ConfigError::EmptyFailover {
            name: name.to_string(),
        });
    }
    if names.iter().any(|n| n == name) {
        return Err(ConfigError::InvalidPipeline {
            name: name.to_string(),
            reason: "a failover cannot contain itself".into(),
        });
    }
    Ok(names)
}

/// Split `.properties` text into key/value pairs, keeping input order.
pub fn parse_properties_text(text: &str) -> Result<Vec<(String, String)>, ConfigError> {
    let mut pairs = Vec::new();
    let mut pending = String::new();
    let mut errors = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if pending.is_empty() && (line.is_empty() || line.starts_with('#') || line.starts_with('!')) {
            continue;
        }
        if let Some(head) = line.strip_suffix('\\') {
            pending.push_str(head);
            continue;
        }
        pending.push_str(line);
        let logical = std::mem::take(&mut pending);
        match logical.find(&['=', ':'][..]) {
            Some(pos) => {
                let (k, v) = logical.split_at(pos);
                pairs.push((k.trim().to_string(), v[1..].trim().to_string()));
            }
            None => errors.push(ConfigError::InvalidKey {
                key: logical.clone(),
                reason: format!("line {} has no '=' separator", idx + 1),
            }),
        }
    }
    if !pending.is_empty() {
        errors.push(ConfigError::InvalidKey {
            key: pending,
            reason: "continuation at end of input".into(),
        });
    }
    ConfigError::aggregate(errors)?;
    Ok(pairs)
}
