//! PDF capability backed by `lopdf`. Text comes out page by page in the
//! order the content streams draw it; scanned pages yield nothing.

use std::path::Path;

use lopdf::Document;
use memchr::memmem;
use tracing::debug;

use super::{ExtractionError, Extractor, read_all};

pub const EXTENSIONS: &[&str] = &["pdf"];

const HEADER_SEARCH: usize = 1024;

pub struct PdfExtractor;

impl Extractor for PdfExtractor {
    fn capability(&self) -> &str {
        "pdf"
    }

    fn extract(&self, path: &Path) -> Result<String, ExtractionError> {
        let data = read_all(path)?;
        extract_pdf_text(&data)
    }
}

pub fn extract_pdf_text(data: &[u8]) -> Result<String, ExtractionError> {
    let head = &data[..data.len().min(HEADER_SEARCH)];
    if memmem::find(head, b"%PDF-").is_none() {
        return Err(ExtractionError::ReadFailure("not a PDF document".to_string()));
    }
    let doc = Document::load_mem(data)
        .map_err(|err| ExtractionError::ReadFailure(format!("unreadable PDF: {err}")))?;
    if doc.is_encrypted() {
        return Err(ExtractionError::ReadFailure("encrypted PDF".to_string()));
    }
    let pages = doc.get_pages();
    if pages.is_empty() {
        return Err(ExtractionError::ReadFailure("PDF has no pages".to_string()));
    }

    let mut texts = Vec::with_capacity(pages.len());
    let mut last_error = None;
    for number in pages.keys() {
        match doc.extract_text(&[*number]) {
            Ok(text) => texts.push(text.trim_end_matches('\n').to_string()),
            Err(err) => {
                debug!("page {number}: {err}");
                last_error = Some(err);
            }
        }
    }
    match last_error {
        Some(err) if texts.is_empty() => Err(ExtractionError::MalformedContent(format!(
            "no page text could be decoded: {err}"
        ))),
        _ => Ok(texts.join("\n")),
    }
}
