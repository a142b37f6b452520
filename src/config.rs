//! Engine-wide configuration.
//!
//! Everything that is not a per-transformer property lives in
//! [`EngineConfig`], built through [`EngineConfigBuilder`]. The values here
//! are the last fallback of every lookup: a transformer property or a
//! `default.*` property always wins over them.
//!
//! Per-transformer settings (priorities, limits, composites) come from
//! [`crate::properties::TransformerProperties`].

use crate::error::ConfigError;
use crate::limits::TransformationLimits;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Property key prefix used when none is configured.
pub const DEFAULT_PREFIX: &str = "content.transformer";

/// Configuration for a [`crate::TransformService`].
///
/// # Example
/// ```rust
/// use edgequake_transform::EngineConfig;
///
/// let config = EngineConfig::builder()
///     .default_priority(80)
///     .threshold_count(5)
///     .build()
///     .unwrap();
/// assert_eq!(config.default_priority, 80);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Prefix of every transformer property key. Default: `content.transformer`.
    pub prefix: String,

    /// Priority of a transformer that configures none. Default: 100.
    pub default_priority: i32,

    /// Priority given to a transformer's explicit transformations. Default: 50.
    ///
    /// Lower than the default, so a transformer declared as *the* converter
    /// for a pair is tried before the generic ones, while leaving room below
    /// it for operators to slot in something better later.
    pub explicit_priority: i32,

    /// Recorded attempts needed before average time affects ranking. Default: 3.
    pub threshold_count: u64,

    /// Penalty in milliseconds recorded for a failed attempt. Default: 120000.
    ///
    /// A value `<= 0` records the real elapsed time instead.
    pub error_time_ms: i64,

    /// Timeout applied when no property sets `timeoutMs`. Default: 120000.
    pub default_timeout_ms: i64,

    /// Extra time granted on top of `timeoutMs` before a worker is
    /// abandoned. Default: 2000.
    pub timeout_margin_ms: u64,

    /// Retry once with another transformer when a failed source sniffs as a
    /// different mimetype than it claims. Default: true.
    pub reroute_on_mismatch: bool,

    /// Directory for intermediate pipeline and failover artifacts.
    /// Default: the system temp directory.
    pub temp_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            default_priority: 100,
            explicit_priority: 50,
            threshold_count: 3,
            error_time_ms: 120_000,
            default_timeout_ms: 120_000,
            timeout_margin_ms: 2_000,
            reroute_on_mismatch: true,
            temp_dir: None,
        }
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder {
            config: Self::default(),
        }
    }

    /// The least specific limit layer: everything unlimited except the
    /// default timeout.
    pub fn base_limits(&self) -> TransformationLimits {
        let mut limits = TransformationLimits::unlimited();
        limits.set_timeout_ms(self.default_timeout_ms);
        limits
    }
}

/// Builder for [`EngineConfig`].
#[derive(Debug)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.prefix = prefix.into();
        self
    }

    pub fn default_priority(mut self, p: i32) -> Self {
        self.config.default_priority = p;
        self
    }

    pub fn explicit_priority(mut self, p: i32) -> Self {
        self.config.explicit_priority = p;
        self
    }

    pub fn threshold_count(mut self, n: u64) -> Self {
        self.config.threshold_count = n;
        self
    }

    pub fn error_time_ms(mut self, ms: i64) -> Self {
        self.config.error_time_ms = ms;
        self
    }

    pub fn default_timeout_ms(mut self, ms: i64) -> Self {
        self.config.default_timeout_ms = ms;
        self
    }

    pub fn timeout_margin_ms(mut self, ms: u64) -> Self {
        self.config.timeout_margin_ms = ms;
        self
    }

    pub fn reroute_on_mismatch(mut self, v: bool) -> Self {
        self.config.reroute_on_mismatch = v;
        self
    }

    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.temp_dir = Some(dir.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<EngineConfig, ConfigError> {
        let c = &self.config;
        let prefix = c.prefix.trim();
        if prefix.is_empty() || prefix.starts_with('.') || prefix.ends_with('.') {
            return Err(ConfigError::Invalid(format!(
                "property prefix must be a non-empty dotted name, got {:?}",
                c.prefix
            )));
        }
        if c.default_timeout_ms < -1 {
            return Err(ConfigError::Invalid(format!(
                "default timeout must be -1, 0 or positive, got {}",
                c.default_timeout_ms
            )));
        }
        if let Some(dir) = &c.temp_dir {
            if !dir.is_dir() {
                return Err(ConfigError::Invalid(format!(
                    "temp directory {} does not exist",
                    dir.display()
                )));
            }
        }
        Ok(self.config)
    }
}
