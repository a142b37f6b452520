//! Content readers and writers.
//!
//! Transformers never see paths or buffers directly. They get a
//! [`ContentReader`] to pull the source from and a [`ContentWriter`] to push
//! the result into, both with an explicit open/close lifecycle the executor
//! checks after every call.
//!
//! Three implementations ship with the crate:
//!
//! | Type | Backing | Used for |
//! |---|---|---|
//! | [`MemoryReader`] / [`MemoryWriter`] | shared byte buffer | tests, sample payloads, small content |
//! | [`FileReader`] / [`FileWriter`] | a file on disk | callers' content |
//! | [`FileWriter::temp`] | a `tempfile` path deleted on last drop | pipeline and failover intermediates |
//!
//! Readers honour the soft limits (`readLimitKBytes`, `readLimitTimeMs`)
//! through [`LimitedRead`]: when a limit is reached the stream simply ends,
//! and the transformer converts what it got. Both sides fail their next I/O
//! once the call's [`CancelFlag`] is raised.

use crate::error::TransformError;
use crate::limits::TransformationLimits;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempPath;

// ── Cancellation ─────────────────────────────────────────────────────────

/// Shared flag raised when a bounded call runs out of time.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> io::Result<()> {
        if self.is_cancelled() {
            Err(io::Error::new(io::ErrorKind::TimedOut, "transformation cancelled"))
        } else {
            Ok(())
        }
    }
}

// ── Limit-aware streams ──────────────────────────────────────────────────

/// The soft limits a reader applies on its next `open()`.
#[derive(Debug, Clone, Default)]
struct ReadBounds {
    max_bytes: Option<u64>,
    max_time: Option<Duration>,
    cancel: Option<CancelFlag>,
}

impl ReadBounds {
    fn from_limits(limits: &TransformationLimits, cancel: CancelFlag) -> Self {
        let kb = limits.read_limit_kbytes();
        let ms = limits.read_limit_time_ms();
        Self {
            max_bytes: (kb > 0).then(|| (kb as u64).saturating_mul(1024)),
            max_time: (ms > 0).then(|| Duration::from_millis(ms as u64)),
            cancel: Some(cancel),
        }
    }
}

/// A reader that ends early once its byte or time budget is used, and
/// errors once cancelled.
#[derive(Debug)]
pub struct LimitedRead<R> {
    inner: R,
    remaining: Option<u64>,
    deadline: Option<Instant>,
    cancel: Option<CancelFlag>,
    truncated: bool,
}

impl<R: Read> LimitedRead<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            remaining: None,
            deadline: None,
            cancel: None,
            truncated: false,
        }
    }

    pub fn with_byte_limit(mut self, bytes: u64) -> Self {
        self.remaining = Some(bytes);
        self
    }

    pub fn with_time_limit(mut self, budget: Duration) -> Self {
        // a budget past the clock's range means no deadline
        self.deadline = Instant::now().checked_add(budget);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn bounded(inner: R, bounds: &ReadBounds) -> Self {
        let mut r = Self::new(inner);
        if let Some(b) = bounds.max_bytes {
            r = r.with_byte_limit(b);
        }
        if let Some(t) = bounds.max_time {
            r = r.with_time_limit(t);
        }
        if let Some(c) = &bounds.cancel {
            r = r.with_cancel(c.clone());
        }
        r
    }

    /// Whether a limit cut the stream short.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }
}

impl<R: Read> Read for LimitedRead<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(c) = &self.cancel {
            c.check()?;
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) || self.remaining == Some(0) {
            self.truncated = true;
            return Ok(0);
        }
        let want = match self.remaining {
            Some(left) => buf.len().min(usize::try_from(left).unwrap_or(usize::MAX)),
            None => buf.len(),
        };
        let n = self.inner.read(&mut buf[..want])?;
        if let Some(left) = self.remaining.as_mut() {
            *left -= n as u64;
        }
        Ok(n)
    }
}

/// A writer that errors once cancelled.
#[derive(Debug)]
struct CancelWrite<W> {
    inner: W,
    cancel: Option<CancelFlag>,
}

impl<W: Write> Write for CancelWrite<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(c) = &self.cancel {
            c.check()?;
        }
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

// ── Traits ───────────────────────────────────────────────────────────────

/// Source side of a transformation.
pub trait ContentReader: Send {
    fn mimetype(&self) -> Option<&str>;

    fn set_mimetype(&mut self, mimetype: &str);

    /// Size in bytes, `-1` when unknown.
    fn size(&self) -> i64;

    /// Open the stream (or return the already open one).
    fn open(&mut self) -> io::Result<&mut dyn Read>;

    fn is_open(&self) -> bool;

    fn close(&mut self);

    /// A new, unopened reader over the same content.
    fn fresh(&self) -> Result<Box<dyn ContentReader>, TransformError>;

    /// Soft limits and cancellation for the next `open()`.
    fn set_limits(&mut self, _limits: &TransformationLimits, _cancel: CancelFlag) {}

    /// Short identity for error messages and logs.
    fn describe(&self) -> String;

    /// Open, read everything, close.
    fn read_all(&mut self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        let result = self.open().and_then(|r| r.read_to_end(&mut buf));
        self.close();
        result.map(|_| buf)
    }
}

/// Destination side of a transformation.
pub trait ContentWriter: Send {
    fn mimetype(&self) -> Option<&str>;

    /// Open the stream (or return the already open one). Opening a closed
    /// writer starts its content over.
    fn open(&mut self) -> io::Result<&mut dyn Write>;

    fn is_open(&self) -> bool;

    /// Flush and close.
    fn close(&mut self) -> io::Result<()>;

    /// Bytes written so far.
    fn size(&self) -> i64;

    /// A reader over what was written. The writer should be closed first.
    fn reader(&self) -> Result<Box<dyn ContentReader>, TransformError>;

    /// Cancellation for the next `open()`.
    fn set_cancel(&mut self, _cancel: CancelFlag) {}

    fn describe(&self) -> String;

    /// Open, write everything, close.
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let result = self.open().and_then(|w| w.write_all(data));
        let closed = self.close();
        result.and(closed)
    }
}

/// Copy the whole of `reader` into `writer`, closing both.
pub fn copy_content(
    reader: &mut dyn ContentReader,
    writer: &mut dyn ContentWriter,
) -> Result<u64, TransformError> {
    let copied = (|| -> io::Result<u64> {
        let w = writer.open()?;
        let r = reader.open()?;
        io::copy(r, w)
    })();
    reader.close();
    let closed = writer.close();
    let n = copied?;
    closed?;
    Ok(n)
}

// ── Memory ───────────────────────────────────────────────────────────────

/// Reader over an in-memory buffer.
pub struct MemoryReader {
    data: Arc<[u8]>,
    mimetype: Option<String>,
    bounds: ReadBounds,
    stream: Option<LimitedRead<Cursor<Arc<[u8]>>>>,
}

impl MemoryReader {
    pub fn new(data: impl Into<Vec<u8>>, mimetype: impl Into<String>) -> Self {
        Self::shared(Arc::from(data.into()), Some(mimetype.into()))
    }

    /// A reader with no mimetype set.
    pub fn untyped(data: impl Into<Vec<u8>>) -> Self {
        Self::shared(Arc::from(data.into()), None)
    }

    fn shared(data: Arc<[u8]>, mimetype: Option<String>) -> Self {
        Self {
            data,
            mimetype,
            bounds: ReadBounds::default(),
            stream: None,
        }
    }
}

impl ContentReader for MemoryReader {
    fn mimetype(&self) -> Option<&str> {
        self.mimetype.as_deref()
    }

    fn set_mimetype(&mut self, mimetype: &str) {
        self.mimetype = Some(mimetype.to_string());
    }

    fn size(&self) -> i64 {
        self.data.len() as i64
    }

    fn open(&mut self) -> io::Result<&mut dyn Read> {
        let data = &self.data;
        let bounds = &self.bounds;
        let stream = self
            .stream
            .get_or_insert_with(|| LimitedRead::bounded(Cursor::new(Arc::clone(data)), bounds));
        Ok(stream as &mut dyn Read)
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn close(&mut self) {
        self.stream = None;
    }

    fn fresh(&self) -> Result<Box<dyn ContentReader>, TransformError> {
        Ok(Box::new(Self::shared(Arc::clone(&self.data), self.mimetype.clone())))
    }

    fn set_limits(&mut self, limits: &TransformationLimits, cancel: CancelFlag) {
        self.bounds = ReadBounds::from_limits(limits, cancel);
    }

    fn describe(&self) -> String {
        format!(
            "memory({} bytes, {})",
            self.data.len(),
            self.mimetype.as_deref().unwrap_or("no mimetype")
        )
    }
}

/// `Write` handle onto a shared buffer.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().clone()
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Writer into an in-memory buffer.
///
/// Keep a [`MemoryWriter::buffer`] handle to inspect the output after the
/// writer itself has been handed to the service.
pub struct MemoryWriter {
    buffer: SharedBuffer,
    mimetype: Option<String>,
    cancel: Option<CancelFlag>,
    stream: Option<CancelWrite<SharedBuffer>>,
}

impl MemoryWriter {
    pub fn new(mimetype: impl Into<String>) -> Self {
        Self::with_mimetype(Some(mimetype.into()))
    }

    /// A writer with no mimetype set.
    pub fn untyped() -> Self {
        Self::with_mimetype(None)
    }

    fn with_mimetype(mimetype: Option<String>) -> Self {
        Self {
            buffer: SharedBuffer::default(),
            mimetype,
            cancel: None,
            stream: None,
        }
    }

    pub fn buffer(&self) -> SharedBuffer {
        self.buffer.clone()
    }
}

impl ContentWriter for MemoryWriter {
    fn mimetype(&self) -> Option<&str> {
        self.mimetype.as_deref()
    }

    fn open(&mut self) -> io::Result<&mut dyn Write> {
        if self.stream.is_none() {
            self.buffer.0.lock().clear();
            self.stream = Some(CancelWrite {
                inner: self.buffer.clone(),
                cancel: self.cancel.clone(),
            });
        }
        match self.stream.as_mut() {
            Some(s) => Ok(s as &mut dyn Write),
            None => Err(io::Error::other("memory writer is not open")),
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn close(&mut self) -> io::Result<()> {
        self.stream = None;
        Ok(())
    }

    fn size(&self) -> i64 {
        self.buffer.len() as i64
    }

    fn reader(&self) -> Result<Box<dyn ContentReader>, TransformError> {
        Ok(Box::new(MemoryReader::shared(
            Arc::from(self.buffer.contents()),
            self.mimetype.clone(),
        )))
    }

    fn set_cancel(&mut self, cancel: CancelFlag) {
        self.cancel = Some(cancel);
    }

    fn describe(&self) -> String {
        format!(
            "memory({} bytes, {})",
            self.buffer.len(),
            self.mimetype.as_deref().unwrap_or("no mimetype")
        )
    }
}

// ── Files ────────────────────────────────────────────────────────────────

/// Reader over a file. Temp-backed readers keep their file alive.
pub struct FileReader {
    path: PathBuf,
    mimetype: Option<String>,
    keep: Option<Arc<TempPath>>,
    bounds: ReadBounds,
    stream: Option<LimitedRead<BufReader<File>>>,
}

impl FileReader {
    pub fn new(path: impl Into<PathBuf>, mimetype: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mimetype: Some(mimetype.into()),
            keep: None,
            bounds: ReadBounds::default(),
            stream: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ContentReader for FileReader {
    fn mimetype(&self) -> Option<&str> {
        self.mimetype.as_deref()
    }

    fn set_mimetype(&mut self, mimetype: &str) {
        self.mimetype = Some(mimetype.to_string());
    }

    fn size(&self) -> i64 {
        std::fs::metadata(&self.path).map_or(-1, |m| m.len() as i64)
    }

    fn open(&mut self) -> io::Result<&mut dyn Read> {
        if self.stream.is_none() {
            let file = File::open(&self.path)?;
            self.stream = Some(LimitedRead::bounded(BufReader::new(file), &self.bounds));
        }
        match self.stream.as_mut() {
            Some(s) => Ok(s as &mut dyn Read),
            None => Err(io::Error::other("file reader is not open")),
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn close(&mut self) {
        self.stream = None;
    }

    fn fresh(&self) -> Result<Box<dyn ContentReader>, TransformError> {
        Ok(Box::new(Self {
            path: self.path.clone(),
            mimetype: self.mimetype.clone(),
            keep: self.keep.clone(),
            bounds: ReadBounds::default(),
            stream: None,
        }))
    }

    fn set_limits(&mut self, limits: &TransformationLimits, cancel: CancelFlag) {
        self.bounds = ReadBounds::from_limits(limits, cancel);
    }

    fn describe(&self) -> String {
        format!(
            "file({}, {})",
            self.path.display(),
            self.mimetype.as_deref().unwrap_or("no mimetype")
        )
    }
}

/// Writer into a file, or into a temp file deleted once the writer and
/// every reader over it are dropped.
pub struct FileWriter {
    path: PathBuf,
    mimetype: Option<String>,
    keep: Option<Arc<TempPath>>,
    cancel: Option<CancelFlag>,
    stream: Option<CancelWrite<BufWriter<File>>>,
    written: bool,
}

impl FileWriter {
    pub fn new(path: impl Into<PathBuf>, mimetype: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mimetype: Some(mimetype.into()),
            keep: None,
            cancel: None,
            stream: None,
            written: false,
        }
    }

    /// A fresh temp file in `dir` (or the system temp dir) named
    /// `xform-*.<extension>`.
    pub fn temp(mimetype: &str, dir: Option<&Path>, extension: Option<&str>) -> io::Result<Self> {
        let suffix = extension.map(|e| format!(".{e}")).unwrap_or_default();
        let mut builder = tempfile::Builder::new();
        builder.prefix("xform-").suffix(&suffix);
        let file = match dir {
            Some(d) => builder.tempfile_in(d)?,
            None => builder.tempfile()?,
        };
        let temp = file.into_temp_path();
        Ok(Self {
            path: temp.to_path_buf(),
            mimetype: Some(mimetype.to_string()),
            keep: Some(Arc::new(temp)),
            cancel: None,
            stream: None,
            written: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_temp(&self) -> bool {
        self.keep.is_some()
    }
}

impl ContentWriter for FileWriter {
    fn mimetype(&self) -> Option<&str> {
        self.mimetype.as_deref()
    }

    fn open(&mut self) -> io::Result<&mut dyn Write> {
        if self.stream.is_none() {
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&self.path)?;
            self.written = true;
            self.stream = Some(CancelWrite {
                inner: BufWriter::new(file),
                cancel: self.cancel.clone(),
            });
        }
        match self.stream.as_mut() {
            Some(s) => Ok(s as &mut dyn Write),
            None => Err(io::Error::other("file writer is not open")),
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn close(&mut self) -> io::Result<()> {
        match self.stream.take() {
            Some(mut s) => s.inner.flush(),
            None => Ok(()),
        }
    }

    fn size(&self) -> i64 {
        if !self.written {
            return 0;
        }
        std::fs::metadata(&self.path).map_or(-1, |m| m.len() as i64)
    }

    fn reader(&self) -> Result<Box<dyn ContentReader>, TransformError> {
        Ok(Box::new(FileReader {
            path: self.path.clone(),
            mimetype: self.mimetype.clone(),
            keep: self.keep.clone(),
            bounds: ReadBounds::default(),
            stream: None,
        }))
    }

    fn set_cancel(&mut self, cancel: CancelFlag) {
        self.cancel = Some(cancel);
    }

    fn describe(&self) -> String {
        format!(
            "{}({}, {})",
            if self.is_temp() { "temp" } else { "file" },
            self.path.display(),
            self.mimetype.as_deref().unwrap_or("no mimetype")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_round_trip_through_writer_reader() {
        let mut w = MemoryWriter::new("text/plain");
        let handle = w.buffer();
        w.write_all(b"hello").unwrap();
        assert!(!w.is_open());
        assert_eq!(handle.to_string_lossy(), "hello");
        let mut r = w.reader().unwrap();
        assert_eq!(r.mimetype(), Some("text/plain"));
        assert_eq!(r.read_all().unwrap(), b"hello");
    }

    #[test]
    fn reopening_a_writer_starts_over() {
        let mut w = MemoryWriter::new("text/plain");
        let out = w.buffer();
        w.write_all(b"first attempt").unwrap();
        w.write_all(b"second").unwrap();
        assert_eq!(out.contents(), b"second");
    }

    #[test]
    fn fresh_reader_starts_from_the_beginning() {
        let mut r = MemoryReader::new(b"abcdef".to_vec(), "text/plain");
        let mut two = [0u8; 2];
        r.open().unwrap().read_exact(&mut two).unwrap();
        assert!(r.is_open());
        let mut f = r.fresh().unwrap();
        assert!(!f.is_open());
        assert_eq!(f.read_all().unwrap(), b"abcdef");
    }

    #[test]
    fn read_limit_truncates() {
        let mut r = MemoryReader::new(vec![7u8; 4096], "application/octet-stream");
        let mut limits = TransformationLimits::new();
        limits.set_read_limit_kbytes(1);
        r.set_limits(&limits, CancelFlag::new());
        assert_eq!(r.read_all().unwrap().len(), 1024);
    }

    #[test]
    fn huge_read_limits_do_not_overflow() {
        let mut r = MemoryReader::new(vec![3u8; 2048], "application/octet-stream");
        let mut limits = TransformationLimits::new();
        limits.set_read_limit_kbytes(i64::MAX);
        limits.set_read_limit_time_ms(i64::MAX);
        r.set_limits(&limits, CancelFlag::new());
        assert_eq!(r.read_all().unwrap().len(), 2048);
    }

    #[test]
    fn time_limit_ends_stream() {
        let mut lr = LimitedRead::new(Cursor::new(vec![1u8; 10])).with_time_limit(Duration::ZERO);
        let mut buf = Vec::new();
        lr.read_to_end(&mut buf).unwrap();
        assert!(buf.is_empty());
        assert!(lr.is_truncated());
    }

    #[test]
    fn cancellation_fails_io() {
        let cancel = CancelFlag::new();
        let mut r = MemoryReader::new(b"abc".to_vec(), "text/plain");
        r.set_limits(&TransformationLimits::unlimited(), cancel.clone());
        let mut w = MemoryWriter::new("text/plain");
        w.set_cancel(cancel.clone());
        cancel.cancel();
        assert_eq!(r.read_all().unwrap_err().kind(), io::ErrorKind::TimedOut);
        assert_eq!(w.write_all(b"x").unwrap_err().kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn temp_writer_lives_as_long_as_its_readers() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = FileWriter::temp("text/html", Some(dir.path()), Some("html")).unwrap();
        let path = w.path().to_path_buf();
        assert!(path.extension().is_some_and(|e| e == "html"));
        w.write_all(b"<p>x</p>").unwrap();
        let mut r = w.reader().unwrap();
        drop(w);
        assert!(path.exists());
        assert_eq!(r.read_all().unwrap(), b"<p>x</p>");
        drop(r);
        assert!(!path.exists());
    }

    #[test]
    fn copy_content_closes_both_sides() {
        let mut r = MemoryReader::new(b"payload".to_vec(), "text/plain");
        let mut w = MemoryWriter::new("text/plain");
        let out = w.buffer();
        assert_eq!(copy_content(&mut r, &mut w).unwrap(), 7);
        assert!(!r.is_open());
        assert!(!w.is_open());
        assert_eq!(out.contents(), b"payload");
    }

    #[test]
    fn file_reader_reports_size_and_description() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("in.txt");
        std::fs::write(&p, b"12345").unwrap();
        let r = FileReader::new(&p, "text/plain");
        assert_eq!(r.size(), 5);
        assert!(r.describe().contains("in.txt"));
        assert_eq!(FileReader::new(dir.path().join("missing"), "text/plain").size(), -1);
    }
}
