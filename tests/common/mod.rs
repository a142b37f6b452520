//! Shared fakes for the integration tests.
#![allow(dead_code)]

use edgequake_transform::{
    ContentReader, ContentWriter, EngineConfig, MemoryReader, MemoryWriter, MimetypeCatalog,
    SharedBuffer, TransformError, TransformService, TransformServiceBuilder,
    TransformationKey, TransformationOptions, Transformer, TransformerProperties, DEFAULT_PREFIX,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const TXT: &str = "text/plain";
pub const HTML: &str = "text/html";
pub const PDF: &str = "application/pdf";

/// What a [`Fake`] does with its input.
#[derive(Debug, Clone)]
pub enum Behaviour {
    /// Write `[tag]` followed by the input.
    Tag(String),
    /// Read the input, then fail with this message.
    Fail(String),
    /// Sleep, then copy the input.
    Sleep(Duration),
    /// Fail unless the input starts with these bytes, else tag it.
    Expect(&'static [u8], String),
    /// Tag the input like `Tag`, but leave the writer open.
    LeaveOpen(String),
}

/// Configurable leaf transformer that counts its invocations.
pub struct Fake {
    name: String,
    pairs: Vec<(String, String)>,
    behaviour: Behaviour,
    interrupt: bool,
    explicit: Vec<TransformationKey>,
    calls: Arc<AtomicUsize>,
}

impl Fake {
    pub fn new(name: &str, behaviour: Behaviour) -> Self {
        Self {
            name: name.to_string(),
            pairs: Vec::new(),
            behaviour,
            interrupt: false,
            explicit: Vec::new(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn tagging(name: &str, tag: &str) -> Self {
        Self::new(name, Behaviour::Tag(tag.to_string()))
    }

    pub fn failing(name: &str, message: &str) -> Self {
        Self::new(name, Behaviour::Fail(message.to_string()))
    }

    pub fn pair(mut self, source: &str, target: &str) -> Self {
        self.pairs.push((source.to_string(), target.to_string()));
        self
    }

    pub fn interruptible(mut self) -> Self {
        self.interrupt = true;
        self
    }

    pub fn explicit(mut self, source: &str, target: &str) -> Self {
        self.explicit.push(TransformationKey::new(source, target));
        self
    }

    /// Handle on the invocation counter; take it before registering.
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    fn fail(&self, message: &str) -> Result<(), TransformError> {
        Err(TransformError::transformer(&self.name, message))
    }
}

impl Transformer for Fake {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_transformable(&self, source: &str, target: &str, _options: &TransformationOptions) -> bool {
        self.pairs.iter().any(|(s, t)| s == source && t == target)
    }

    fn transform(
        &self,
        reader: &mut dyn ContentReader,
        writer: &mut dyn ContentWriter,
        _options: &TransformationOptions,
    ) -> Result<(), TransformError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let input = reader.read_all()?;
        match &self.behaviour {
            Behaviour::Tag(tag) => {
                let mut out = format!("[{tag}]").into_bytes();
                out.extend_from_slice(&input);
                writer.write_all(&out)?;
            }
            Behaviour::Fail(message) => return self.fail(message),
            Behaviour::Sleep(d) => {
                std::thread::sleep(*d);
                writer.write_all(&input)?;
            }
            Behaviour::Expect(magic, tag) => {
                if !input.starts_with(magic) {
                    return self.fail("unexpected content");
                }
                let mut out = format!("[{tag}]").into_bytes();
                out.extend_from_slice(&input);
                writer.write_all(&out)?;
            }
            Behaviour::LeaveOpen(tag) => {
                let stream = writer.open()?;
                std::io::Write::write_all(stream, format!("[{tag}]").as_bytes())?;
                std::io::Write::write_all(stream, &input)?;
            }
        }
        Ok(())
    }

    fn needs_interruption(&self) -> bool {
        self.interrupt
    }

    fn explicit_transformations(&self) -> Vec<TransformationKey> {
        self.explicit.clone()
    }
}

pub fn catalog() -> MimetypeCatalog {
    MimetypeCatalog::builtin()
}

pub fn props(pairs: &[(&str, &str)]) -> TransformerProperties {
    TransformerProperties::from_pairs(DEFAULT_PREFIX, pairs.iter().copied(), &catalog())
        .expect("test properties are valid")
}

/// Builder with the given properties and no transformers yet.
pub fn builder(pairs: &[(&str, &str)]) -> TransformServiceBuilder {
    TransformService::builder().properties(props(pairs))
}

pub fn builder_with(config: EngineConfig, pairs: &[(&str, &str)]) -> TransformServiceBuilder {
    TransformService::builder().config(config).properties(props(pairs))
}

pub fn reader(data: &[u8], mimetype: &str) -> Box<MemoryReader> {
    Box::new(MemoryReader::new(data.to_vec(), mimetype))
}

/// A writer plus a handle on what lands in it.
pub fn writer(mimetype: &str) -> (Box<MemoryWriter>, SharedBuffer) {
    let w = MemoryWriter::new(mimetype);
    let out = w.buffer();
    (Box::new(w), out)
}

pub fn calls(counter: &Arc<AtomicUsize>) -> usize {
    counter.load(Ordering::SeqCst)
}

/// Name of the capability an execution error is attributed to.
pub fn failed_by(error: &TransformError) -> Option<&str> {
    match error {
        TransformError::Failed { transformer, .. }
        | TransformError::Timeout { transformer, .. }
        | TransformError::Transformer { transformer, .. } => Some(transformer.as_str()),
        _ => None,
    }
}
