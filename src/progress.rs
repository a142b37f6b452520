//! Listener trait for transformation events.
//!
//! Inject an [`Arc<dyn TransformListener>`] via
//! [`crate::TransformServiceBuilder::listener`] to observe selection and every
//! attempt the engine makes, including the nested attempts of pipelines and
//! failovers (`depth > 0`).
//!
//! # Example
//!
//! ```rust
//! use edgequake_transform::TransformListener;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! #[derive(Default)]
//! struct CountingListener {
//!     failures: AtomicUsize,
//! }
//!
//! impl TransformListener for CountingListener {
//!     fn on_failure(&self, transformer: &str, _s: &str, _t: &str, error: &str, _depth: u32) {
//!         self.failures.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{transformer} failed: {error}");
//!     }
//! }
//! ```

use std::sync::Arc;

/// Called by the engine as it selects and runs transformers.
///
/// Implementations must be `Send + Sync`: transforms run concurrently on the
/// blocking pool. All methods default to no-ops.
pub trait TransformListener: Send + Sync {
    /// A top-level request picked `transformer` out of `candidates` feasible ones.
    fn on_selected(&self, source: &str, target: &str, transformer: &str, candidates: usize) {
        let _ = (source, target, transformer, candidates);
    }

    /// An attempt is about to run.
    fn on_attempt_start(&self, transformer: &str, source: &str, target: &str, depth: u32) {
        let _ = (transformer, source, target, depth);
    }

    /// An attempt finished successfully.
    fn on_success(&self, transformer: &str, source: &str, target: &str, elapsed_ms: u64, depth: u32) {
        let _ = (transformer, source, target, elapsed_ms, depth);
    }

    /// An attempt failed; `error` is the rendered error.
    fn on_failure(&self, transformer: &str, source: &str, target: &str, error: &str, depth: u32) {
        let _ = (transformer, source, target, error, depth);
    }

    /// Nothing (or not the named transformer) could handle the request.
    fn on_unsupported(&self, source: &str, size: i64, target: &str, transformer: Option<&str>) {
        let _ = (source, size, target, transformer);
    }
}

/// The default listener.
pub struct NoopListener;

impl TransformListener for NoopListener {}

/// Shared listener handle.
pub type Listener = Arc<dyn TransformListener>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Tracking {
        starts: AtomicUsize,
        successes: AtomicUsize,
        failures: AtomicUsize,
        unsupported: AtomicUsize,
    }

    impl TransformListener for Tracking {
        fn on_attempt_start(&self, _t: &str, _s: &str, _g: &str, _d: u32) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_success(&self, _t: &str, _s: &str, _g: &str, _ms: u64, _d: u32) {
            self.successes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_failure(&self, _t: &str, _s: &str, _g: &str, _e: &str, _d: u32) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }

        fn on_unsupported(&self, _s: &str, _z: i64, _g: &str, _t: Option<&str>) {
            self.unsupported.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_listener_does_not_panic() {
        let l = NoopListener;
        l.on_selected("a/a", "b/b", "x", 1);
        l.on_attempt_start("x", "a/a", "b/b", 0);
        l.on_success("x", "a/a", "b/b", 5, 0);
        l.on_failure("x", "a/a", "b/b", "boom", 1);
        l.on_unsupported("a/a", -1, "b/b", None);
    }

    #[test]
    fn overridden_methods_receive_events() {
        let t = Tracking::default();
        t.on_attempt_start("x", "a/a", "b/b", 0);
        t.on_success("x", "a/a", "b/b", 1, 0);
        t.on_attempt_start("y", "a/a", "b/b", 0);
        t.on_failure("y", "a/a", "b/b", "bad", 0);
        t.on_unsupported("a/a", 3, "c/c", Some("z"));
        t.on_selected("a/a", "b/b", "x", 2);
        assert_eq!(t.starts.load(Ordering::SeqCst), 2);
        assert_eq!(t.successes.load(Ordering::SeqCst), 1);
        assert_eq!(t.failures.load(Ordering::SeqCst), 1);
        assert_eq!(t.unsupported.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_listener_works() {
        let l: Listener = Arc::new(NoopListener);
        l.on_success("x", "a/a", "b/b", 1, 0);
    }
}
