//! Raster images through an external OCR engine.

use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Arc;

use super::{ExtractionError, Extractor};

pub const EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "gif", "tif", "tiff", "webp"];

const PATH_PLACEHOLDER: &str = "{path}";

pub trait OcrEngine: Send + Sync {
    fn recognize(&self, path: &Path) -> Result<String, ExtractionError>;
}

/// Runs an OCR program and reads the recognised text from stdout, e.g.
/// `tesseract {path} stdout`. Without a `{path}` argument the path is
/// appended.
pub struct CommandOcr {
    argv: Vec<String>,
}

impl CommandOcr {
    pub fn new(argv: Vec<String>) -> Option<Self> {
        if argv.is_empty() {
            None
        } else {
            Some(Self { argv })
        }
    }
}

impl OcrEngine for CommandOcr {
    fn recognize(&self, path: &Path) -> Result<String, ExtractionError> {
        let path_arg = path.to_string_lossy();
        let mut args: Vec<String> = self.argv[1..]
            .iter()
            .map(|a| a.replace(PATH_PLACEHOLDER, &path_arg))
            .collect();
        if !self.argv[1..].iter().any(|a| a.contains(PATH_PLACEHOLDER)) {
            args.push(path_arg.to_string());
        }
        let output = Command::new(&self.argv[0])
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .map_err(|err| {
                ExtractionError::ReadFailure(format!("ocr engine {} unavailable: {err}", self.argv[0]))
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractionError::ReadFailure(format!(
                "ocr engine exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        String::from_utf8(output.stdout)
            .map_err(|err| ExtractionError::DecodingFailure(format!("ocr output: {}", err.utf8_error())))
    }
}

pub struct ImageExtractor {
    engine: Arc<dyn OcrEngine>,
}

impl ImageExtractor {
    pub fn new(engine: Arc<dyn OcrEngine>) -> Self {
        Self { engine }
    }
}

impl Extractor for ImageExtractor {
    fn capability(&self) -> &str {
        "image-ocr"
    }

    fn extract(&self, path: &Path) -> Result<String, ExtractionError> {
        let mut header = [0u8; 12];
        let n = {
            use std::io::Read;
            let mut file = std::fs::File::open(path)?;
            file.read(&mut header)?
        };
        if !is_raster_image(&header[..n]) {
            return Err(ExtractionError::MalformedContent(
                "no known image signature".to_string(),
            ));
        }
        let text = self.engine.recognize(path)?;
        Ok(text.trim().to_string())
    }
}

pub fn is_raster_image(header: &[u8]) -> bool {
    header.starts_with(b"\x89PNG\r\n\x1a\n")
        || header.starts_with(&[0xFF, 0xD8, 0xFF])
        || header.starts_with(b"GIF87a")
        || header.starts_with(b"GIF89a")
        || header.starts_with(b"BM")
        || header.starts_with(b"II*\0")
        || header.starts_with(b"MM\0*")
        || (header.len() >= 12 && &header[..4] == b"RIFF" && &header[8..12] == b"WEBP")
}
