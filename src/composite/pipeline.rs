//! Pipeline: a fixed chain of capabilities.
//!
//! ```text
//!  reader ──► stage 1 ──► temp(html) ──► stage 2 ──► temp(pdf) ──► stage 3 ──► writer
//! ```
//!
//! Every stage but the last writes to a temp file that becomes the next
//! stage's reader; the last stage writes straight to the caller's writer.
//! The first failure ends the pipeline. Temp files are deleted when their
//! last reader is dropped, so nothing is left behind on either path.
//!
//! A stage without a capability is *dynamic*: the best top-level simple
//! capability for that hop is chosen when the pipeline runs.

use crate::capability::Capability;
use crate::content::{ContentReader, ContentWriter};
use crate::error::{ConfigError, TransformError};
use crate::executor::CallContext;
use crate::limits::UNLIMITED;
use crate::options::{TransformationOptions, TransformationRequest};
use crate::registry::TransformerRegistry;
use std::sync::Arc;
use tracing::{debug, error};

/// One hop of a pipeline.
#[derive(Debug, Clone)]
pub struct Stage {
    capability: Option<Arc<Capability>>,
    target_mimetype: Option<String>,
}

impl Stage {
    /// `capability` converting into `target_mimetype`.
    pub fn new(capability: Arc<Capability>, target_mimetype: impl Into<String>) -> Self {
        Self {
            capability: Some(capability),
            target_mimetype: Some(target_mimetype.into()),
        }
    }

    /// Final stage converting into whatever the request asks for.
    pub fn last(capability: Arc<Capability>) -> Self {
        Self {
            capability: Some(capability),
            target_mimetype: None,
        }
    }

    /// A stage whose capability is chosen at run time.
    pub fn dynamic(target_mimetype: Option<String>) -> Self {
        Self {
            capability: None,
            target_mimetype,
        }
    }

    pub fn capability(&self) -> Option<&Arc<Capability>> {
        self.capability.as_ref()
    }

    pub fn target_mimetype(&self) -> Option<&str> {
        self.target_mimetype.as_deref()
    }
}

/// A fixed chain of stages.
#[derive(Debug, Clone)]
pub struct Pipeline {
    name: String,
    source_mimetype: Option<String>,
    stages: Vec<Stage>,
}

impl Pipeline {
    /// Every stage except the last must name its output mimetype.
    pub fn new(name: impl Into<String>, stages: Vec<Stage>) -> Result<Self, ConfigError> {
        let name = name.into();
        if stages.is_empty() {
            return Err(ConfigError::InvalidPipeline {
                name,
                reason: "no stages".into(),
            });
        }
        if let Some(i) = stages[..stages.len() - 1]
            .iter()
            .position(|s| s.target_mimetype.is_none())
        {
            return Err(ConfigError::InvalidPipeline {
                name,
                reason: format!("stage {} has no output mimetype", i + 1),
            });
        }
        Ok(Self {
            name,
            source_mimetype: None,
            stages,
        })
    }

    /// Restrict the pipeline to one source mimetype.
    pub fn with_source(mut self, mimetype: impl Into<String>) -> Self {
        self.source_mimetype = Some(mimetype.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Rejects when either end of the chain disagrees with the request.
    ///
    /// An older chain check rejected only when the first endpoint mismatched
    /// *and* the last one matched, letting a wrong final target through.
    pub fn endpoints_match(&self, source: &str, target: &str) -> bool {
        let first_ok = self.source_mimetype.as_deref().map_or(true, |s| s == source);
        let last_ok = self
            .stages
            .last()
            .and_then(|s| s.target_mimetype.as_deref())
            .map_or(true, |t| t == target);
        !(!first_ok || !last_ok)
    }

    /// `(input, output)` mimetype of every stage.
    fn hops(&self, source: &str, target: &str) -> Vec<(String, String)> {
        let mut current = source.to_string();
        self.stages
            .iter()
            .map(|stage| {
                let out = stage.target_mimetype.clone().unwrap_or_else(|| target.to_string());
                let hop = (current.clone(), out.clone());
                current = out;
                hop
            })
            .collect()
    }

    fn dynamic_candidates(
        &self,
        source: &str,
        size: i64,
        target: &str,
        options: &TransformationOptions,
        registry: &TransformerRegistry,
    ) -> Vec<Arc<Capability>> {
        let request = TransformationRequest::new(source, size, target).with_options(options.clone());
        registry.ranked_where(&request, |c| !c.is_composite() && c.name() != self.name)
    }

    pub(crate) fn is_supported(
        &self,
        source: &str,
        target: &str,
        options: &TransformationOptions,
        registry: &TransformerRegistry,
    ) -> bool {
        if !self.endpoints_match(source, target) {
            return false;
        }
        self.stages
            .iter()
            .zip(self.hops(source, target))
            .all(|(stage, (input, output))| match &stage.capability {
                Some(c) => c.is_supported(&input, &output, options, registry),
                None => !self
                    .dynamic_candidates(&input, UNLIMITED, &output, options, registry)
                    .is_empty(),
            })
    }

    /// Only the first stage sees the real size; later sizes are unknown.
    pub(crate) fn fits(
        &self,
        source: &str,
        size: i64,
        target: &str,
        options: &TransformationOptions,
        registry: &TransformerRegistry,
    ) -> bool {
        self.stages
            .iter()
            .zip(self.hops(source, target))
            .enumerate()
            .all(|(i, (stage, (input, output)))| {
                let stage_size = if i == 0 { size } else { UNLIMITED };
                match &stage.capability {
                    Some(c) => c.fits(&input, stage_size, &output, options, registry),
                    None => !self
                        .dynamic_candidates(&input, stage_size, &output, options, registry)
                        .is_empty(),
                }
            })
    }

    pub(crate) fn max_source_size_kbytes(
        &self,
        source: &str,
        target: &str,
        options: &TransformationOptions,
        registry: &TransformerRegistry,
    ) -> i64 {
        match (self.stages.first(), self.hops(source, target).first()) {
            (Some(stage), Some((input, output))) => match &stage.capability {
                Some(c) => c.max_source_size_kbytes(input, output, options, registry),
                None => self
                    .dynamic_candidates(input, UNLIMITED, output, options, registry)
                    .first()
                    .map_or(UNLIMITED, |c| c.max_source_size_kbytes(input, output, options, registry)),
            },
            _ => UNLIMITED,
        }
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
        let hops = self.hops(&source, &target);
        let last = self.stages.len() - 1;
        let nested = ctx.nested();

        let mut intermediate: Option<Box<dyn ContentReader>> = None;
        for (i, (stage, (input_type, output_type))) in self.stages.iter().zip(hops).enumerate() {
            let input: &mut dyn ContentReader = match intermediate.as_mut() {
                Some(r) => r.as_mut(),
                None => &mut *reader,
            };
            let capability = match &stage.capability {
                Some(c) => Arc::clone(c),
                None => self
                    .dynamic_candidates(&input_type, input.size(), &output_type, options, registry)
                    .into_iter()
                    .next()
                    .ok_or_else(|| TransformError::Unsupported {
                        source_mimetype: input_type.clone(),
                        target_mimetype: output_type.clone(),
                        size: input.size(),
                        transformer: Some(format!("{} (stage {})", self.name, i + 1)),
                    })?,
            };
            debug!(
                pipeline = %self.name,
                stage = i + 1,
                transformer = capability.name(),
                "{} -> {}",
                input_type,
                output_type
            );

            if i == last {
                executor.execute(&capability, input, writer, options, &nested)?;
                break;
            }

            let mut temp = executor.temp_writer(&output_type)?;
            executor.execute(&capability, input, &mut temp, options, &nested)?;
            if temp.is_open() {
                error!(
                    pipeline = %self.name,
                    transformer = capability.name(),
                    writer = %temp.describe(),
                    "Stage left its intermediate writer open"
                );
                temp.close()?;
            }
            intermediate = Some(temp.reader()?);
        }
        Ok(())
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
            reader: &mut dyn ContentReader,
            writer: &mut dyn ContentWriter,
            _o: &TransformationOptions,
        ) -> Result<(), TransformError> {
            crate::content::copy_content(reader, writer).map(|_| ())
        }
    }

    fn cap(name: &'static str) -> Arc<Capability> {
        Arc::new(Capability::simple(Named(name)))
    }

    #[test]
    fn construction_validates_stages() {
        assert!(Pipeline::new("p", vec![]).is_err());
        let err = Pipeline::new("p", vec![Stage::last(cap("a")), Stage::last(cap("b"))]).unwrap_err();
        assert!(err.to_string().contains("stage 1"));
        assert!(Pipeline::new("p", vec![Stage::new(cap("a"), "text/html"), Stage::last(cap("b"))]).is_ok());
    }

    #[test]
    fn hops_chain_outputs_into_inputs() {
        let p = Pipeline::new(
            "p",
            vec![Stage::new(cap("a"), "text/html"), Stage::last(cap("b"))],
        )
        .unwrap();
        assert_eq!(
            p.hops("text/plain", "application/pdf"),
            vec![
                ("text/plain".to_string(), "text/html".to_string()),
                ("text/html".to_string(), "application/pdf".to_string()),
            ]
        );
    }

    #[test]
    fn pipeline_rejects_when_only_last_endpoint_mismatches() {
        let p = Pipeline::new(
            "p",
            vec![
                Stage::new(cap("a"), "text/html"),
                Stage::new(cap("b"), "application/pdf"),
            ],
        )
        .unwrap()
        .with_source("text/plain");

        // first matches, last does not: `!A && B` would have let this through
        assert!(!p.endpoints_match("text/plain", "image/png"));
        assert!(!p.endpoints_match("text/csv", "application/pdf"));
        assert!(!p.endpoints_match("text/csv", "image/png"));
        assert!(p.endpoints_match("text/plain", "application/pdf"));
    }
}
