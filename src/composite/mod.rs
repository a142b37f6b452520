//! Composite capabilities.
//!
//! - [`pipeline`]: a fixed chain; each stage's output feeds the next stage
//!   through a temp file.
//! - [`failover`]: ordered alternatives; the first success wins.
//!
//! Both run their parts through [`crate::TransformExecutor::execute`] with a
//! nested [`crate::CallContext`], so every part gets its own limits and
//! statistics while the system-wide summaries count the outer call once.

pub mod failover;
pub mod pipeline;

pub use failover::Failover;
pub use pipeline::{Pipeline, Stage};
