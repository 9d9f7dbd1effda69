//! # Extraction Dispatcher
//!
//! Routes a file to a text-extraction capability by extension. Unsupported
//! extensions are rejected before the file is touched, and nothing a
//! capability does (error or panic) escapes [`ExtractorRegistry::extract`]
//! as anything but an [`ExtractionError`].

pub mod container;
pub mod database;
pub mod image;
pub mod mailbox;
pub mod markup;
pub mod pdf;
pub mod plain;
pub mod structured;
pub mod tabular;

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::locate::CandidateFile;

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "message")]
pub enum ExtractionError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("read failure: {0}")]
    ReadFailure(String),
    #[error("malformed content: {0}")]
    MalformedContent(String),
    #[error("decoding failure: {0}")]
    DecodingFailure(String),
}

impl ExtractionError {
    pub fn kind(&self) -> &'static str {
        match self {
            ExtractionError::UnsupportedFormat(_) => "UnsupportedFormat",
            ExtractionError::ReadFailure(_) => "ReadFailure",
            ExtractionError::MalformedContent(_) => "MalformedContent",
            ExtractionError::DecodingFailure(_) => "DecodingFailure",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ExtractionError::UnsupportedFormat(m)
            | ExtractionError::ReadFailure(m)
            | ExtractionError::MalformedContent(m)
            | ExtractionError::DecodingFailure(m) => m,
        }
    }
}

impl From<std::io::Error> for ExtractionError {
    fn from(err: std::io::Error) -> Self {
        ExtractionError::ReadFailure(err.to_string())
    }
}

/// A format-specific text extraction capability. Implementations must open
/// the source read-only and never modify it.
pub trait Extractor: Send + Sync {
    fn capability(&self) -> &str;
    fn extract(&self, path: &Path) -> Result<String, ExtractionError>;
}

pub struct ExtractorRegistry {
    handlers: HashMap<String, Arc<dyn Extractor>>,
    max_file_bytes: u64,
}

impl ExtractorRegistry {
    pub fn new(max_file_bytes: u64) -> Self {
        Self {
            handlers: HashMap::new(),
            max_file_bytes,
        }
    }

    /// Registry with every built-in capability; raster images only when an
    /// OCR engine is supplied.
    pub fn with_defaults(max_file_bytes: u64, ocr: Option<Arc<dyn image::OcrEngine>>) -> Self {
        let mut registry = Self::new(max_file_bytes);
        let member_limit = if max_file_bytes == 0 {
            container::DEFAULT_MEMBER_LIMIT
        } else {
            max_file_bytes
        };

        registry.register_all(plain::EXTENSIONS, Arc::new(plain::PlainTextExtractor));
        registry.register_all(pdf::EXTENSIONS, Arc::new(pdf::PdfExtractor));
        registry.register_all(markup::EXTENSIONS, Arc::new(markup::MarkupExtractor));
        registry.register_all(tabular::EXTENSIONS, Arc::new(tabular::TabularExtractor));
        registry.register_all(structured::EXTENSIONS, Arc::new(structured::StructuredExtractor));
        registry.register_all(
            container::EXTENSIONS,
            Arc::new(container::ContainerExtractor::new(member_limit)),
        );
        registry.register_all(mailbox::EXTENSIONS, Arc::new(mailbox::MailboxExtractor));
        registry.register_all(database::EXTENSIONS, Arc::new(database::DatabaseExtractor));
        if let Some(engine) = ocr {
            registry.register_all(image::EXTENSIONS, Arc::new(image::ImageExtractor::new(engine)));
        }
        registry
    }

    pub fn register(&mut self, extension: &str, handler: Arc<dyn Extractor>) {
        self.handlers.insert(normalize_extension(extension), handler);
    }

    pub fn register_all(&mut self, extensions: &[&str], handler: Arc<dyn Extractor>) {
        for ext in extensions {
            self.register(ext, handler.clone());
        }
    }

    pub fn get(&self, extension: &str) -> Option<&dyn Extractor> {
        self.handlers
            .get(&normalize_extension(extension))
            .map(|h| h.as_ref())
    }

    pub fn supports(&self, extension: &str) -> bool {
        self.handlers.contains_key(&normalize_extension(extension))
    }

    /// Per-file size cap; 0 means unlimited.
    pub fn max_file_bytes(&self) -> u64 {
        self.max_file_bytes
    }

    pub fn extensions(&self) -> Vec<String> {
        let mut exts: Vec<String> = self.handlers.keys().cloned().collect();
        exts.sort();
        exts
    }

    pub fn extract_file(&self, file: &CandidateFile) -> Result<String, ExtractionError> {
        self.extract_as(&file.path, &file.extension)
    }

    pub fn extract(&self, path: &Path) -> Result<String, ExtractionError> {
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        self.extract_as(path, &extension)
    }

    fn extract_as(&self, path: &Path, extension: &str) -> Result<String, ExtractionError> {
        let handler = self.get(extension).ok_or_else(|| {
            ExtractionError::UnsupportedFormat(format!("no extractor for .{}", normalize_extension(extension)))
        })?;

        let meta = std::fs::metadata(path)?;
        if !meta.is_file() {
            return Err(ExtractionError::ReadFailure("not a regular file".to_string()));
        }
        if self.max_file_bytes > 0 && meta.len() > self.max_file_bytes {
            return Err(ExtractionError::ReadFailure(format!(
                "file size {} exceeds limit {}",
                meta.len(),
                self.max_file_bytes
            )));
        }

        debug!("extracting {} via {}", path.display(), handler.capability());
        match catch_unwind(AssertUnwindSafe(|| handler.extract(path))) {
            Ok(result) => result,
            Err(panic) => Err(ExtractionError::MalformedContent(format!(
                "{} extractor panicked: {}",
                handler.capability(),
                panic_message(panic.as_ref())
            ))),
        }
    }
}

pub fn normalize_extension(extension: &str) -> String {
    extension.trim().trim_start_matches('.').to_ascii_lowercase()
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub(crate) fn read_all(path: &Path) -> Result<Vec<u8>, ExtractionError> {
    let mut file = File::open(path)?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Decode bytes as text: UTF-16 when a BOM says so, UTF-8 otherwise.
pub(crate) fn decode_text(bytes: &[u8]) -> Result<String, ExtractionError> {
    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return utf8(rest);
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFF, 0xFE]) {
        return utf16(rest, u16::from_le_bytes);
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        return utf16(rest, u16::from_be_bytes);
    }
    utf8(bytes)
}

fn utf8(bytes: &[u8]) -> Result<String, ExtractionError> {
    String::from_utf8(bytes.to_vec())
        .map_err(|err| ExtractionError::DecodingFailure(format!("invalid UTF-8: {}", err.utf8_error())))
}

fn utf16(bytes: &[u8], convert: fn([u8; 2]) -> u16) -> Result<String, ExtractionError> {
    if bytes.len() % 2 != 0 {
        return Err(ExtractionError::DecodingFailure("odd-length UTF-16 data".to_string()));
    }
    let units: Vec<u16> = bytes.chunks_exact(2).map(|c| convert([c[0], c[1]])).collect();
    String::from_utf16(&units)
        .map_err(|err| ExtractionError::DecodingFailure(format!("invalid UTF-16: {err}")))
}
