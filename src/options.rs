//! Request-level inputs: the options bag, the request tuple and the
//! source/target key.

use crate::limits::TransformationLimits;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A source/target mimetype pair.
///
/// Equality, hashing and ordering compare the two members field by field.
/// For well-formed mimetypes (which always contain a `/`) this matches
/// comparing the concatenated `source + target` strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransformationKey {
    source: String,
    target: String,
}

impl TransformationKey {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn matches(&self, source: &str, target: &str) -> bool {
        self.source == source && self.target == target
    }
}

impl fmt::Display for TransformationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.target)
    }
}

/// Caller-supplied options for one transformation.
///
/// `use_context` selects `.use.<ctx>` property overrides. `limits` is the
/// request-level override layer: every field it sets replaces the resolved
/// value. `extra` carries anything else a transformer wants to read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformationOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_context: Option<String>,
    #[serde(default, skip_serializing_if = "TransformationLimits::is_empty")]
    pub limits: TransformationLimits,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl TransformationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_use(mut self, use_context: impl Into<String>) -> Self {
        self.use_context = Some(use_context.into());
        self
    }

    pub fn with_limits(mut self, limits: TransformationLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn use_context(&self) -> Option<&str> {
        self.use_context.as_deref()
    }

    pub fn extra(&self, key: &str) -> Option<&str> {
        self.extra.get(key).map(String::as_str)
    }
}

/// What is being asked for: source type and size, target type, options.
///
/// `source_size` is in bytes; a negative value means unknown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformationRequest {
    pub source_mimetype: String,
    pub source_size: i64,
    pub target_mimetype: String,
    #[serde(default)]
    pub options: TransformationOptions,
}

impl TransformationRequest {
    pub fn new(
        source_mimetype: impl Into<String>,
        source_size: i64,
        target_mimetype: impl Into<String>,
    ) -> Self {
        Self {
            source_mimetype: source_mimetype.into(),
            source_size,
            target_mimetype: target_mimetype.into(),
            options: TransformationOptions::default(),
        }
    }

    pub fn with_options(mut self, options: TransformationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn key(&self) -> TransformationKey {
        TransformationKey::new(&self.source_mimetype, &self.target_mimetype)
    }
}

impl fmt::Display for TransformationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} bytes) -> {}",
            self.source_mimetype, self.source_size, self.target_mimetype
        )?;
        if let Some(u) = self.options.use_context() {
            write!(f, " use {u}")?;
        }
        Ok(())
    }
}
