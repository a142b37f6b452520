//! Error types for the edgequake-transform library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`TransformError`] — **per request**: one transformation could not be
//!   performed (no capable transformer, transformer threw, deadline hit).
//!   Returned from every `transform*` entry point.
//!
//! * [`ConfigError`] — **build time**: the transformer properties or the
//!   composite declarations are malformed. Raised while the registry is
//!   assembled, never while serving a request.
//!
//! [`TransformError::kind`] maps every variant onto the small taxonomy
//! callers branch on ([`ErrorKind`]); [`TransformError::root_cause`] digs
//! through the context wrappers added by the executor and composites.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// All per-request errors returned by the edgequake-transform library.
#[derive(Debug, Error)]
pub enum TransformError {
    // ── Request errors ────────────────────────────────────────────────────
    /// The reader or writer carried no mimetype.
    #[error("The {role} mimetype is not set")]
    MissingMimetype { role: &'static str },

    /// No transformer (or not the chosen one) can handle the combination.
    #[error(
        "No transformer can convert {source_mimetype} -> {target_mimetype} \
         (size {size} bytes){}",
        .transformer.as_ref().map(|t| format!(" using '{t}'")).unwrap_or_default()
    )]
    Unsupported {
        source_mimetype: String,
        target_mimetype: String,
        size: i64,
        transformer: Option<String>,
    },

    /// No capability is registered under the given name.
    #[error("Transformer '{name}' is not registered")]
    NotFound { name: String },

    // ── Execution errors ──────────────────────────────────────────────────
    /// A bounded invocation exceeded its wall-clock budget.
    #[error(
        "Transformer '{transformer}' timed out after {timeout_ms}ms \
         (reader {reader}, writer {writer})"
    )]
    Timeout {
        transformer: String,
        timeout_ms: u64,
        reader: String,
        writer: String,
    },

    /// A transformer failed during conversion. Carries the inner error plus
    /// enough context to diagnose it without internal access.
    #[error(
        "Transformer '{transformer}' failed to convert {source_mimetype} -> {target_mimetype} \
         (reader {reader}, writer {writer}): {source}"
    )]
    Failed {
        transformer: String,
        source_mimetype: String,
        target_mimetype: String,
        reader: String,
        writer: String,
        #[source]
        source: Box<TransformError>,
    },

    /// Raised by a leaf transformer implementation.
    #[error("{transformer}: {message}")]
    Transformer { transformer: String, message: String },

    /// The invocation was cancelled after its deadline passed.
    #[error("Transformation cancelled")]
    Cancelled,

    // ── Infrastructure errors ─────────────────────────────────────────────
    /// Reading the source or writing the destination failed.
    #[error("Content I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration problem surfaced while serving a request.
    #[error(transparent)]
    Config(#[from] ConfigError),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// The failure taxonomy callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// No feasible capability. Never counted in performance statistics.
    Unsupported,
    /// Deadline exceeded. Counted as an error observation.
    Timeout,
    /// The capability failed while converting. Counted as an error observation.
    Execution,
    /// Malformed configuration.
    Configuration,
    /// Unknown capability name.
    NotFound,
    /// Anything else.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Execution => "execution",
            ErrorKind::Configuration => "configuration",
            ErrorKind::NotFound => "not-found",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

impl TransformError {
    /// Convenience constructor for leaf transformers.
    pub fn transformer(name: impl Into<String>, message: impl Into<String>) -> Self {
        TransformError::Transformer {
            transformer: name.into(),
            message: message.into(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransformError::MissingMimetype { .. } | TransformError::Unsupported { .. } => {
                ErrorKind::Unsupported
            }
            TransformError::NotFound { .. } => ErrorKind::NotFound,
            TransformError::Timeout { .. } => ErrorKind::Timeout,
            TransformError::Failed { .. }
            | TransformError::Transformer { .. }
            | TransformError::Cancelled
            | TransformError::Io(_) => ErrorKind::Execution,
            TransformError::Config(_) => ErrorKind::Configuration,
            TransformError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn is_unsupported(&self) -> bool {
        self.kind() == ErrorKind::Unsupported
    }

    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }

    /// The innermost error below any [`TransformError::Failed`] wrappers.
    pub fn root_cause(&self) -> &TransformError {
        let mut current = self;
        while let TransformError::Failed { source, .. } = current {
            current = &**source;
        }
        current
    }
}

/// Errors raised while parsing properties or assembling the registry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The key does not follow the property grammar.
    #[error("Invalid property key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    /// The value has the wrong type for its suffix.
    #[error("Invalid value {value:?} for '{key}': expected {expected}")]
    InvalidValue {
        key: String,
        value: String,
        expected: &'static str,
    },

    /// An `extensions.<src>.<tgt>` token is not a known extension.
    #[error("Unknown extension '{token}' in '{key}'")]
    UnknownExtension { key: String, token: String },

    /// A `mimetypes.<src>.<tgt>` section could not be split into known mimetypes.
    #[error("Unknown mimetype in '{key}': could not split {tokens:?} into two known mimetypes")]
    UnknownMimetype { key: String, tokens: String },

    /// Two capabilities share one name.
    #[error("A transformer named '{name}' is already registered")]
    DuplicateName { name: String },

    /// One name declares both a pipeline and a failover.
    #[error("'{name}' declares both a pipeline and a failover")]
    PipelineAndFailover { name: String },

    /// The pipeline value is malformed.
    #[error("Invalid pipeline for '{name}': {reason}")]
    InvalidPipeline { name: String, reason: String },

    /// A failover lists no alternatives.
    #[error("Failover '{name}' has no alternatives")]
    EmptyFailover { name: String },

    /// A composite references names that are neither registered nor declared.
    #[error("'{name}' references unknown transformer(s): {}", missing.join(", "))]
    Unresolved { name: String, missing: Vec<String> },

    /// Composite declarations reference each other in a cycle.
    #[error("Composite transformers reference each other in a cycle: {}", names.join(" -> "))]
    Cycle { names: Vec<String> },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// Several independent problems, reported together.
    #[error("{} configuration errors:\n{}", .0.len(), join_lines(.0))]
    Multiple(Vec<ConfigError>),
}

impl ConfigError {
    /// Collapse a list of errors: `Ok` when empty, the single error when one,
    /// [`ConfigError::Multiple`] otherwise.
    pub fn aggregate(mut errors: Vec<ConfigError>) -> Result<(), ConfigError> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::Multiple(errors)),
        }
    }

    /// Flattened view over nested [`ConfigError::Multiple`] values.
    pub fn flatten(&self) -> Vec<&ConfigError> {
        match self {
            ConfigError::Multiple(all) => all.iter().flat_map(|e| e.flatten()).collect(),
            other => vec![other],
        }
    }
}

fn join_lines(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(|e| format!("  • {e}"))
        .collect::<Vec<_>>()
        .join("\n")
}
