//! Plain text capability.

use std::path::Path;

use super::{ExtractionError, Extractor, decode_text, read_all};

pub const EXTENSIONS: &[&str] = &["txt", "text", "log", "md", "ini", "cfg", "conf"];

pub struct PlainTextExtractor;

impl Extractor for PlainTextExtractor {
    fn capability(&self) -> &str {
        "plain-text"
    }

    fn extract(&self, path: &Path) -> Result<String, ExtractionError> {
        decode_text(&read_all(path)?)
    }
}
