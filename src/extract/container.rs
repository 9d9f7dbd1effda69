//! Zip-based document containers: OOXML (docx, xlsx, pptx), OpenDocument
//! (odt, ods, odp) and EPUB. Text lives in XML members; each member is read
//! with a size cap so a hostile archive cannot balloon in memory.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use zip::ZipArchive;

use super::markup::{XmlTextOptions, xml_to_text};
use super::{ExtractionError, Extractor};

pub const EXTENSIONS: &[&str] = &["docx", "xlsx", "pptx", "odt", "ods", "odp", "epub"];
pub const DEFAULT_MEMBER_LIMIT: u64 = 64 * 1024 * 1024;

const WORD_BLOCKS: &[&str] = &["p", "tr", "br", "cr"];
const SHEET_BLOCKS: &[&str] = &["si", "is"];
const SLIDE_BLOCKS: &[&str] = &["p", "br"];
const ODF_BLOCKS: &[&str] = &["p", "h", "table-row", "list-item"];
const EPUB_BLOCKS: &[&str] = &[
    "p", "div", "br", "li", "tr", "h1", "h2", "h3", "h4", "h5", "h6", "title",
];
const EPUB_SKIPPED: &[&str] = &["script", "style"];
const TEXT_RUN: &[&str] = &["t"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor {
    Word,
    Sheet,
    Slides,
    OpenDocument,
    Epub,
}

impl Flavor {
    fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "docx" => Some(Flavor::Word),
            "xlsx" => Some(Flavor::Sheet),
            "pptx" => Some(Flavor::Slides),
            "odt" | "ods" | "odp" => Some(Flavor::OpenDocument),
            "epub" => Some(Flavor::Epub),
            _ => None,
        }
    }

    /// Members holding text, in reading order.
    fn members(self, names: &[String]) -> Vec<String> {
        let mut picked: Vec<String> = match self {
            Flavor::Word => {
                let mut parts = vec!["word/document.xml".to_string()];
                let mut extra: Vec<String> = names
                    .iter()
                    .filter(|n| {
                        n.starts_with("word/header")
                            || n.starts_with("word/footer")
                            || n.as_str() == "word/footnotes.xml"
                            || n.as_str() == "word/endnotes.xml"
                            || n.as_str() == "word/comments.xml"
                    })
                    .cloned()
                    .collect();
                extra.sort();
                parts.extend(extra);
                return parts;
            }
            Flavor::Sheet => return vec!["xl/sharedStrings.xml".to_string()],
            Flavor::OpenDocument => return vec!["content.xml".to_string()],
            Flavor::Slides => names
                .iter()
                .filter(|n| {
                    (n.starts_with("ppt/slides/slide") || n.starts_with("ppt/notesSlides/notesSlide"))
                        && n.ends_with(".xml")
                })
                .cloned()
                .collect(),
            Flavor::Epub => names
                .iter()
                .filter(|n| {
                    let lower = n.to_ascii_lowercase();
                    lower.ends_with(".xhtml") || lower.ends_with(".html") || lower.ends_with(".htm")
                })
                .cloned()
                .collect(),
        };
        picked.sort_by_key(|n| (!n.contains("/slides/"), trailing_number(n), n.clone()));
        picked
    }

    fn options(self) -> XmlTextOptions<'static> {
        match self {
            Flavor::Word => XmlTextOptions {
                html: false,
                blocks: WORD_BLOCKS,
                skipped: &["instrtext"],
                text_only_in: Some(TEXT_RUN),
                node_separator: None,
            },
            Flavor::Sheet => XmlTextOptions {
                html: false,
                blocks: SHEET_BLOCKS,
                skipped: &["rph", "phoneticpr"],
                text_only_in: Some(TEXT_RUN),
                node_separator: None,
            },
            Flavor::Slides => XmlTextOptions {
                html: false,
                blocks: SLIDE_BLOCKS,
                skipped: &[],
                text_only_in: Some(TEXT_RUN),
                node_separator: None,
            },
            Flavor::OpenDocument => XmlTextOptions {
                html: false,
                blocks: ODF_BLOCKS,
                skipped: &["annotation", "tracked-changes"],
                text_only_in: None,
                node_separator: None,
            },
            Flavor::Epub => XmlTextOptions {
                html: true,
                blocks: EPUB_BLOCKS,
                skipped: EPUB_SKIPPED,
                text_only_in: None,
                node_separator: None,
            },
        }
    }

    /// Members that must exist for the container to be what it claims.
    fn required(self) -> Option<&'static str> {
        match self {
            Flavor::Word => Some("word/document.xml"),
            Flavor::OpenDocument => Some("content.xml"),
            _ => None,
        }
    }
}

fn trailing_number(name: &str) -> u64 {
    let stem = name.trim_end_matches(|c: char| !c.is_ascii_digit());
    let digits: String = stem
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse().unwrap_or(0)
}

pub struct ContainerExtractor {
    member_limit: u64,
}

impl ContainerExtractor {
    pub fn new(member_limit: u64) -> Self {
        Self { member_limit }
    }
}

impl Extractor for ContainerExtractor {
    fn capability(&self) -> &str {
        "document-container"
    }

    fn extract(&self, path: &Path) -> Result<String, ExtractionError> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        let flavor = Flavor::from_extension(&ext)
            .ok_or_else(|| ExtractionError::UnsupportedFormat(format!("not a container type: .{ext}")))?;

        let file = File::open(path)?;
        let mut archive = ZipArchive::new(BufReader::new(file))
            .map_err(|err| ExtractionError::ReadFailure(format!("not a readable archive: {err}")))?;
        let names: Vec<String> = archive.file_names().map(str::to_string).collect();

        if let Some(required) = flavor.required() {
            if !names.iter().any(|n| n == required) {
                return Err(ExtractionError::MalformedContent(format!("missing member {required}")));
            }
        }

        let options = flavor.options();
        let mut sections = Vec::new();
        for member in flavor.members(&names) {
            if !names.contains(&member) {
                continue;
            }
            let data = self.read_member(&mut archive, &member)?;
            let text = xml_to_text(&data[..], &options).map_err(|err| {
                ExtractionError::MalformedContent(format!("{member}: {}", err.message()))
            })?;
            if !text.is_empty() {
                sections.push(text);
            }
        }
        Ok(sections.join("\n"))
    }
}

impl ContainerExtractor {
    fn read_member<R: Read + std::io::Seek>(
        &self,
        archive: &mut ZipArchive<R>,
        name: &str,
    ) -> Result<Vec<u8>, ExtractionError> {
        let member = archive
            .by_name(name)
            .map_err(|err| ExtractionError::MalformedContent(format!("{name}: {err}")))?;
        let mut data = Vec::new();
        member
            .take(self.member_limit + 1)
            .read_to_end(&mut data)
            .map_err(|err| ExtractionError::MalformedContent(format!("{name}: {err}")))?;
        if data.len() as u64 > self.member_limit {
            return Err(ExtractionError::MalformedContent(format!(
                "{name} inflates past {} bytes",
                self.member_limit
            )));
        }
        Ok(data)
    }
}
