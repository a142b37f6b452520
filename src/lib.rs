//! # edgequake-transform
//!
//! Select, chain and execute document format transformers.
//!
//! ## Why this crate?
//!
//! A content repository typically has many ways to turn one format into
//! another: an office suite, a PDF library, an image tool, a plain copy.
//! Each has its own size and time limits, some are better at certain pairs,
//! and some are only useful as a step in a longer chain. This crate keeps
//! all of them in one registry and answers a single question per request:
//! *which capability should turn this source into that target, right now?*
//! It then runs it with the right limits, measures it, and learns from the
//! result.
//!
//! ## Engine Overview
//!
//! ```text
//! request (source mimetype, size, target mimetype, options)
//!  │
//!  ├─ 1. Registry   every capability: leaf transformers, pipelines, failovers
//!  ├─ 2. Support    is_transformable(source, target) per capability
//!  ├─ 3. Limits     layered properties → resolved limits → size fit
//!  ├─ 4. Rank       priority band, then measured average time
//!  ├─ 5. Execute    spawn_blocking + deadline, nested attempts for composites
//!  ├─ 6. Measure    per-pair, per-transformer and system averages
//!  └─ 7. Reroute    on failure, sniff the content and retry once if mislabelled
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_transform::{
//!     MemoryReader, MemoryWriter, MimetypeCatalog, StringExtractingTransformer,
//!     TransformationOptions, TransformService, TransformerProperties, DEFAULT_PREFIX,
//! };
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let catalog = MimetypeCatalog::builtin();
//!     let properties =
//!         TransformerProperties::from_file(DEFAULT_PREFIX, Path::new("transformers.properties"), &catalog)?;
//!     let service = TransformService::builder()
//!         .properties(properties)
//!         .transformer(StringExtractingTransformer)
//!         .build()?;
//!
//!     let reader = MemoryReader::new(b"<p>Hello</p>".to_vec(), "text/html");
//!     let writer = MemoryWriter::new("text/plain");
//!     let output = writer.buffer();
//!     let report = service
//!         .transform(Box::new(reader), Box::new(writer), TransformationOptions::new())
//!         .await?;
//!     eprintln!("{} in {} ms", report.transformer, report.elapsed_ms);
//!     println!("{}", output.to_string_lossy());
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! Transformer behaviour is driven by flat `key=value` properties under a
//! prefix (`content.transformer` by default):
//!
//! ```text
//! content.transformer.default.timeoutMs=120000
//! content.transformer.Office.extensions.doc.pdf.priority=40
//! content.transformer.Office.maxSourceSizeKBytes=10240
//! content.transformer.htmlToPdf.pipeline=StringExtracting|txt|Office
//! content.transformer.anyToText.failover=Tika|StringExtracting
//! ```
//!
//! See [`properties`] for the full key grammar and [`EngineConfig`] for the
//! process-level defaults.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `xform` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! edgequake-transform = { version = "0.5", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod admin;
pub mod assembly;
pub mod capability;
pub mod composite;
pub mod config;
pub mod content;
pub mod error;
pub mod executor;
pub mod limits;
pub mod options;
pub mod progress;
pub mod properties;
pub mod registry;
pub mod resolver;
pub mod samples;
pub mod selector;
pub mod service;
pub mod sniff;
pub mod stats;
pub mod transformer;
pub mod transformers;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use admin::{Admin, CapabilityInfo, RankingEntry, StatsEntry, TestOutcome};
pub use capability::{Capability, CapabilityKind};
pub use composite::{Failover, Pipeline, Stage};
pub use config::{EngineConfig, EngineConfigBuilder, DEFAULT_PREFIX};
pub use content::{
    copy_content, CancelFlag, ContentReader, ContentWriter, FileReader, FileWriter, MemoryReader,
    MemoryWriter, SharedBuffer,
};
pub use error::{ConfigError, ErrorKind, TransformError};
pub use executor::{CallContext, TransformExecutor};
pub use limits::{LimitPair, LimitProperty, TransformationLimits, DISABLED, UNLIMITED};
pub use options::{TransformationKey, TransformationOptions, TransformationRequest};
pub use progress::{Listener, NoopListener, TransformListener};
pub use properties::{CompositeDecl, StageDecl, TransformerProperties};
pub use registry::TransformerRegistry;
pub use resolver::LimitResolver;
pub use selector::{RankedCandidate, SelectionPolicy};
pub use service::{TransformReport, TransformService, TransformServiceBuilder};
pub use sniff::{MagicDetector, MimetypeDetector};
pub use stats::{PerformanceRecord, PerformanceTracker, StatsKey};
pub use transformer::Transformer;
pub use transformers::{BinaryPassThroughTransformer, StringExtractingTransformer};

pub use mimetype_catalog::MimetypeCatalog;
