//! Failover: ordered alternatives, the first success wins.
//!
//! Each attempt writes to its own temp file so a half-written failure never
//! reaches the caller's writer. On success the temp content is copied over;
//! on failure the next feasible alternative gets a fresh reader. When every
//! attempt fails, the *first* error is returned since it usually names the
//! real problem; later ones tend to be fallbacks failing for the same reason.

use crate::capability::Capability;
use crate::content::{copy_content, ContentReader, ContentWriter};
use crate::error::{ConfigError, TransformError};
use crate::executor::CallContext;
use crate::limits::{loosest, DISABLED};
use crate::options::TransformationOptions;
use crate::registry::TransformerRegistry;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct Failover {
    name: String,
    alternatives: Vec<Arc<Capability>>,
}

impl Failover {
    pub fn new(name: impl Into<String>, alternatives: Vec<Arc<Capability>>) -> Result<Self, ConfigError> {
        let name = name.into();
        if alternatives.is_empty() {
            return Err(ConfigError::EmptyFailover { name });
        }
        Ok(Self { name, alternatives })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn alternatives(&self) -> &[Arc<Capability>] {
        &self.alternatives
    }

    pub(crate) fn is_supported(
        &self,
        source: &str,
        target: &str,
        options: &TransformationOptions,
        registry: &TransformerRegistry,
    ) -> bool {
        self.alternatives
            .iter()
            .any(|c| c.is_supported(source, target, options, registry))
    }

    /// An unknown size always fits; otherwise some alternative must take it.
    pub(crate) fn fits(
        &self,
        source: &str,
        size: i64,
        target: &str,
        options: &TransformationOptions,
        registry: &TransformerRegistry,
    ) -> bool {
        size < 0
            || self
                .alternatives
                .iter()
                .any(|c| c.is_feasible(source, size, target, options, registry))
    }

    pub(crate) fn max_source_size_kbytes(
        &self,
        source: &str,
        target: &str,
        options: &TransformationOptions,
        registry: &TransformerRegistry,
    ) -> i64 {
        self.alternatives
            .iter()
            .filter(|c| c.is_supported(source, target, options, registry))
            .map(|c| c.max_source_size_kbytes(source, target, options, registry))
            .reduce(loosest)
            .unwrap_or(DISABLED)
    }

    pub(crate) fn run(
        &self,
        reader: &mut dyn ContentReader,
        writer: &mut dyn ContentWriter,
        options: &TransformationOptions,
        ctx: &CallContext<'_>,
    ) -> Result<(), TransformError> {
        let executor = ctx.executor();
        let registry = executor.registry();
        let source = reader.mimetype().unwrap_or_default().to_string();
        let target = writer.mimetype().unwrap_or_default().to_string();
        let size = reader.size();
        let nested = ctx.nested();

        let mut first_error: Option<TransformError> = None;
        let mut current: Option<Box<dyn ContentReader>> = None;

        for alternative in &self.alternatives {
            if !alternative.is_feasible(&source, size, &target, options, registry) {
                debug!(failover = %self.name, alternative = alternative.name(), "Skipping infeasible alternative");
                continue;
            }
            if nested.cancel().is_cancelled() {
                return Err(TransformError::Cancelled);
            }

            let input: &mut dyn ContentReader = match current.as_mut() {
                Some(r) => r.as_mut(),
                None => &mut *reader,
            };
            let mut temp = executor.temp_writer(&target)?;
            match executor.execute(alternative, input, &mut temp, options, &nested) {
                Ok(()) => {
                    if temp.is_open() {
                        temp.close()?;
                    }
                    let mut produced = temp.reader()?;
                    copy_content(produced.as_mut(), writer)?;
                    debug!(failover = %self.name, alternative = alternative.name(), "Alternative succeeded");
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        failover = %self.name,
                        alternative = alternative.name(),
                        error = %e,
                        "Alternative failed, trying the next one"
                    );
                    first_error.get_or_insert(e);
                    current = Some(reader.fresh()?);
                }
            }
        }

        Err(first_error.unwrap_or_else(|| TransformError::Unsupported {
            source_mimetype: source,
            target_mimetype: target,
            size,
            transformer: Some(self.name.clone()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transformer::Transformer;

    struct Named(&'static str);

    impl Transformer for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn is_transformable(&self, _s: &str, _t: &str, _o: &TransformationOptions) -> bool {
            true
        }

        fn transform(
            &self,
            _r: &mut dyn ContentReader,
            _w: &mut dyn ContentWriter,
            _o: &TransformationOptions,
        ) -> Result<(), TransformError> {
            Ok(())
        }
    }

    #[test]
    fn empty_failover_is_rejected() {
        let err = Failover::new("f", vec![]).unwrap_err();
        assert_eq!(err, ConfigError::EmptyFailover { name: "f".into() });
    }

    #[test]
    fn alternatives_keep_declaration_order() {
        let f = Failover::new(
            "f",
            vec![
                Arc::new(Capability::simple(Named("b"))),
                Arc::new(Capability::simple(Named("a"))),
            ],
        )
        .unwrap();
        let names: Vec<_> = f.alternatives().iter().map(|c| c.name()).collect();
        assert_eq!(names, ["b", "a"]);
    }
}
