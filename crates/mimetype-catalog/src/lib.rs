//! # mimetype-catalog
//!
//! A small mimetype ↔ file-extension dictionary used by the transformation
//! engine to validate configuration tokens (`extensions.doc.pdf`,
//! `mimetypes.text/plain.application/pdf`) and to name temporary files.
//!
//! ## How it works
//!
//! 1. A built-in table covers the office, text, PDF and image formats the
//!    engine ships sample payloads for.
//! 2. An optional mapping file extends or overrides the table. Each line is
//!    `mimetype ext [ext…]`; `#` starts a comment.
//! 3. [`default_catalog`] loads both once per process.
//!
//! ```rust
//! use mimetype_catalog::MimetypeCatalog;
//!
//! let catalog = MimetypeCatalog::builtin();
//! assert_eq!(catalog.mimetype_for_extension("pdf"), Some("application/pdf"));
//! assert_eq!(catalog.extension_for_mimetype("text/plain"), Some("txt"));
//! ```
//!
//! ## Environment variable overrides
//!
//! - `MIMETYPE_CATALOG_PATH` — path to a mapping file; replaces the default
//!   location `<config_dir>/edgequake/mimetypes.map`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use thiserror::Error;

// ── Public constants ─────────────────────────────────────────────────────────

/// Wildcard token accepted wherever a mimetype or extension is expected.
pub const ANY: &str = "*";

/// Mimetype used when nothing better is known.
pub const OCTET_STREAM: &str = "application/octet-stream";

const BUILTIN: &[(&str, &[&str])] = &[
    ("text/plain", &["txt", "text"]),
    ("text/html", &["html", "htm"]),
    ("text/xml", &["xml"]),
    ("text/csv", &["csv"]),
    ("text/markdown", &["md", "markdown"]),
    ("application/json", &["json"]),
    ("application/pdf", &["pdf"]),
    ("application/rtf", &["rtf"]),
    ("application/msword", &["doc"]),
    (
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        &["docx"],
    ),
    ("application/vnd.ms-excel", &["xls"]),
    (
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        &["xlsx"],
    ),
    ("application/vnd.ms-powerpoint", &["ppt"]),
    (
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        &["pptx"],
    ),
    ("application/vnd.oasis.opendocument.text", &["odt"]),
    ("application/vnd.oasis.opendocument.spreadsheet", &["ods"]),
    ("application/zip", &["zip"]),
    ("message/rfc822", &["eml"]),
    ("image/png", &["png"]),
    ("image/jpeg", &["jpg", "jpeg"]),
    ("image/gif", &["gif"]),
    ("image/tiff", &["tiff", "tif"]),
    (OCTET_STREAM, &["bin"]),
];

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned while loading a mapping file.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// The mapping file exists but could not be read.
    #[error("Failed to read mimetype map '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A line did not follow `mimetype ext [ext…]`.
    #[error("Malformed mimetype map line {line}: {content:?}")]
    Malformed { line: usize, content: String },
}

// ── Catalog ──────────────────────────────────────────────────────────────────

/// Bidirectional mimetype ↔ extension dictionary.
///
/// Lookups are case-insensitive on the extension side. The first extension
/// registered for a mimetype is its primary extension.
#[derive(Debug, Clone, Default)]
pub struct MimetypeCatalog {
    by_extension: HashMap<String, String>,
    by_mimetype: HashMap<String, Vec<String>>,
}

impl MimetypeCatalog {
    /// An empty catalog. Only useful for tests and fully custom tables.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in table.
    pub fn builtin() -> Self {
        let mut catalog = Self::empty();
        for (mimetype, extensions) in BUILTIN {
            catalog.insert(mimetype, extensions.iter().copied());
        }
        catalog
    }

    /// Built-in table plus the override file, when one exists.
    pub fn load_default() -> Result<Self, CatalogError> {
        let catalog = Self::builtin();
        match catalog_override_path() {
            Some(path) if path.exists() => catalog.with_override_file(&path),
            _ => Ok(catalog),
        }
    }

    /// Apply every mapping in `path` on top of this catalog.
    pub fn with_override_file(mut self, path: &Path) -> Result<Self, CatalogError> {
        let text = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        for (mimetype, extensions) in parse_map(&text)? {
            self.insert(&mimetype, extensions.iter().map(String::as_str));
        }
        Ok(self)
    }

    /// Register `mimetype` with the given extensions.
    ///
    /// An extension already mapped to a different mimetype is moved.
    pub fn insert<'a>(&mut self, mimetype: &str, extensions: impl IntoIterator<Item = &'a str>) {
        let mimetype = mimetype.trim().to_ascii_lowercase();
        for ext in extensions {
            let ext = ext.trim().trim_start_matches('.').to_ascii_lowercase();
            if ext.is_empty() {
                continue;
            }
            if let Some(previous) = self.by_extension.insert(ext.clone(), mimetype.clone()) {
                if previous != mimetype {
                    if let Some(list) = self.by_mimetype.get_mut(&previous) {
                        list.retain(|e| e != &ext);
                    }
                }
            }
            let list = self.by_mimetype.entry(mimetype.clone()).or_default();
            if !list.contains(&ext) {
                list.push(ext);
            }
        }
        self.by_mimetype.entry(mimetype).or_default();
    }

    /// Mimetype for a file extension (without the leading dot).
    pub fn mimetype_for_extension(&self, extension: &str) -> Option<&str> {
        self.by_extension
            .get(&extension.trim_start_matches('.').to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Primary extension for a mimetype.
    pub fn extension_for_mimetype(&self, mimetype: &str) -> Option<&str> {
        self.by_mimetype
            .get(mimetype)
            .and_then(|exts| exts.first())
            .map(String::as_str)
    }

    /// `true` when `mimetype` has been registered.
    pub fn is_known_mimetype(&self, mimetype: &str) -> bool {
        self.by_mimetype.contains_key(mimetype)
    }

    /// All registered mimetypes, sorted.
    pub fn mimetypes(&self) -> Vec<&str> {
        let mut all: Vec<&str> = self.by_mimetype.keys().map(String::as_str).collect();
        all.sort_unstable();
        all
    }
}

/// Parse the text of a mapping file into `(mimetype, extensions)` entries.
pub fn parse_map(text: &str) -> Result<Vec<(String, Vec<String>)>, CatalogError> {
    let mut entries = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let mut tokens = line.split_whitespace();
        let mimetype = match tokens.next() {
            Some(m) if m.contains('/') => m.to_string(),
            _ => {
                return Err(CatalogError::Malformed {
                    line: idx + 1,
                    content: raw.to_string(),
                })
            }
        };
        let extensions: Vec<String> = tokens.map(str::to_string).collect();
        if extensions.is_empty() {
            return Err(CatalogError::Malformed {
                line: idx + 1,
                content: raw.to_string(),
            });
        }
        entries.push((mimetype, extensions));
    }
    Ok(entries)
}

// ── Override file location ───────────────────────────────────────────────────

/// Location of the optional mapping file.
///
/// `MIMETYPE_CATALOG_PATH` wins; otherwise `<config_dir>/edgequake/mimetypes.map`.
pub fn catalog_override_path() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("MIMETYPE_CATALOG_PATH") {
        if !p.is_empty() {
            return Some(PathBuf::from(p));
        }
    }
    dirs::config_dir().map(|d| d.join("edgequake").join("mimetypes.map"))
}

static DEFAULT: OnceLock<MimetypeCatalog> = OnceLock::new();

/// Process-wide catalog, loaded on first use.
///
/// A broken override file is reported on stderr and ignored, so the
/// built-in table is always available.
pub fn default_catalog() -> &'static MimetypeCatalog {
    DEFAULT.get_or_init(|| match MimetypeCatalog::load_default() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("mimetype-catalog: {e}; using built-in table");
            MimetypeCatalog::builtin()
        }
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
