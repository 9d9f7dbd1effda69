//! HTML and XML capability, plus the XML text walker shared with the
//! office container formats.

use std::io::BufRead;
use std::path::Path;

use once_cell::sync::Lazy;
use quick_xml::Reader;
use quick_xml::events::Event;
use regex::Regex;
use tracing::debug;

use super::{ExtractionError, Extractor, decode_text, read_all};

pub const EXTENSIONS: &[&str] = &["html", "htm", "xhtml", "xml"];

const HTML_BLOCKS: &[&str] = &[
    "p", "div", "br", "li", "tr", "h1", "h2", "h3", "h4", "h5", "h6", "title", "table", "ul",
    "ol", "section", "article", "header", "footer", "blockquote", "pre",
];
const HTML_SKIPPED: &[&str] = &["script", "style", "noscript", "template"];

static TAG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>|<!--.*?-->|<[^>]*>")
        .expect("valid tag regex")
});
static ENTITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&(#x[0-9a-fA-F]+|#[0-9]+|[a-zA-Z]+);").expect("valid entity regex"));

pub struct MarkupExtractor;

impl Extractor for MarkupExtractor {
    fn capability(&self) -> &str {
        "markup"
    }

    fn extract(&self, path: &Path) -> Result<String, ExtractionError> {
        let text = decode_text(&read_all(path)?)?;
        let is_xml = path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("xml"))
            .unwrap_or(false);
        if is_xml {
            xml_to_text(text.as_bytes(), &XmlTextOptions::generic())
        } else {
            Ok(html_to_text(&text))
        }
    }
}

/// Visible text of an HTML document. Real-world HTML is rarely well formed,
/// so parse errors fall back to tag stripping.
pub fn html_to_text(html: &str) -> String {
    match xml_to_text(html.as_bytes(), &XmlTextOptions::html()) {
        Ok(text) => text,
        Err(err) => {
            debug!("html parse failed ({err}); stripping tags");
            let stripped = TAG_RE.replace_all(html, " ");
            tidy(&decode_entities(&stripped))
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct XmlTextOptions<'a> {
    /// Lenient end-tag matching and HTML entity names.
    pub html: bool,
    /// Elements whose end starts a new line.
    pub blocks: &'a [&'a str],
    /// Elements whose content is dropped.
    pub skipped: &'a [&'a str],
    /// When set, only text inside these elements is collected.
    pub text_only_in: Option<&'a [&'a str]>,
    /// Inserted between adjacent text nodes.
    pub node_separator: Option<char>,
}

impl XmlTextOptions<'static> {
    pub fn generic() -> Self {
        Self {
            html: false,
            blocks: &[],
            skipped: &[],
            text_only_in: None,
            node_separator: Some(' '),
        }
    }

    pub fn html() -> Self {
        Self {
            html: true,
            blocks: HTML_BLOCKS,
            skipped: HTML_SKIPPED,
            text_only_in: None,
            node_separator: None,
        }
    }
}

/// Walk an XML event stream and collect character data. Element names are
/// compared by local name, lowercased.
pub(crate) fn xml_to_text<R: BufRead>(
    source: R,
    options: &XmlTextOptions<'_>,
) -> Result<String, ExtractionError> {
    let mut reader = Reader::from_reader(source);
    {
        let config = reader.config_mut();
        config.trim_text(false);
        if options.html {
            config.check_end_names = false;
            config.allow_unmatched_ends = true;
        }
    }

    let mut out = String::new();
    let mut buf = Vec::new();
    let mut skip_depth = 0usize;
    let mut text_depth = 0usize;
    let collect_all = options.text_only_in.is_none();

    loop {
        let event = reader.read_event_into(&mut buf).map_err(|err| {
            ExtractionError::MalformedContent(format!(
                "xml error at byte {}: {}",
                reader.error_position(),
                err
            ))
        })?;
        match event {
            Event::Start(e) => {
                let name = local_name(e.local_name().as_ref());
                if options.skipped.contains(&name.as_str()) {
                    skip_depth += 1;
                } else if options.text_only_in.is_some_and(|tags| tags.contains(&name.as_str())) {
                    text_depth += 1;
                } else if options.html && name == "br" {
                    push_break(&mut out, '\n');
                }
            }
            Event::End(e) => {
                let name = local_name(e.local_name().as_ref());
                if options.skipped.contains(&name.as_str()) {
                    skip_depth = skip_depth.saturating_sub(1);
                } else if options.text_only_in.is_some_and(|tags| tags.contains(&name.as_str())) {
                    text_depth = text_depth.saturating_sub(1);
                }
                if options.blocks.contains(&name.as_str()) {
                    push_break(&mut out, '\n');
                }
            }
            Event::Empty(e) => match local_name(e.local_name().as_ref()).as_str() {
                "br" | "line-break" => push_break(&mut out, '\n'),
                "tab" => out.push('\t'),
                "s" => out.push(' '),
                name if options.blocks.contains(&name) => push_break(&mut out, '\n'),
                _ => {}
            },
            Event::Text(e) => {
                if skip_depth == 0 && (collect_all || text_depth > 0) {
                    let text = if options.html {
                        e.unescape_with(resolve_html_entity)
                    } else {
                        e.unescape()
                    };
                    let text = match text {
                        Ok(t) => t.into_owned(),
                        Err(_) => decode_entities(&String::from_utf8_lossy(&e)),
                    };
                    push_text(&mut out, &text, options.node_separator);
                }
            }
            Event::CData(e) => {
                if skip_depth == 0 && (collect_all || text_depth > 0) {
                    push_text(&mut out, &String::from_utf8_lossy(&e), options.node_separator);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(tidy(&out))
}

fn local_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).to_ascii_lowercase()
}

fn push_text(out: &mut String, text: &str, separator: Option<char>) {
    if text.trim().is_empty() {
        if !text.is_empty() && !out.ends_with(char::is_whitespace) && !out.is_empty() {
            out.push(' ');
        }
        return;
    }
    if let Some(sep) = separator {
        if !out.is_empty() && !out.ends_with(char::is_whitespace) {
            out.push(sep);
        }
    }
    out.push_str(text);
}

fn push_break(out: &mut String, ch: char) {
    if !out.is_empty() && !out.ends_with('\n') {
        out.push(ch);
    }
}

/// Collapse horizontal whitespace runs and drop blank lines.
fn tidy(text: &str) -> String {
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn resolve_html_entity(name: &str) -> Option<&'static str> {
    Some(match name {
        "nbsp" => " ",
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        "copy" => "©",
        "reg" => "®",
        "trade" => "™",
        "euro" => "€",
        "pound" => "£",
        "mdash" => "—",
        "ndash" => "–",
        "hellip" => "…",
        "lsquo" => "‘",
        "rsquo" => "’",
        "ldquo" => "“",
        "rdquo" => "”",
        "auml" => "ä",
        "ouml" => "ö",
        "uuml" => "ü",
        "Auml" => "Ä",
        "Ouml" => "Ö",
        "Uuml" => "Ü",
        "szlig" => "ß",
        "eacute" => "é",
        "egrave" => "è",
        "aacute" => "á",
        "oacute" => "ó",
        "ccedil" => "ç",
        _ => return None,
    })
}

fn decode_entities(text: &str) -> String {
    ENTITY_RE
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let body = &caps[1];
            let numeric = if let Some(hex) = body.strip_prefix("#x") {
                u32::from_str_radix(hex, 16).ok()
            } else if let Some(dec) = body.strip_prefix('#') {
                dec.parse::<u32>().ok()
            } else {
                None
            };
            match numeric {
                Some(code) => char::from_u32(code).map(String::from).unwrap_or_default(),
                None => resolve_html_entity(body)
                    .map(str::to_string)
                    .unwrap_or_else(|| caps[0].to_string()),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_skips_scripts_and_keeps_blocks() {
        let html = "<html><head><title>Record</title><script>var x = 1;</script></head>\
                    <body><p>Jane&nbsp;Doe</p><div>jane@example.com</div></body></html>";
        let text = html_to_text(html);
        assert_eq!(text, "Record\nJane Doe\njane@example.com");
    }

    #[test]
    fn malformed_html_falls_back_to_stripping() {
        let html = "<p>Call <b>555 0100</i></p><script>if (a < b) {}</script>";
        let text = html_to_text(html);
        assert!(text.contains("555 0100"));
        assert!(!text.contains("if (a"));
    }

    #[test]
    fn xml_text_nodes_are_separated() {
        let xml = b"<?xml version=\"1.0\"?><person><name>John</name><mail>john@x.com</mail></person>";
        let text = xml_to_text(&xml[..], &XmlTextOptions::generic()).expect("xml");
        assert_eq!(text, "John john@x.com");
    }

    #[test]
    fn broken_xml_is_malformed() {
        let xml = b"<a><b>text</a>";
        assert!(matches!(
            xml_to_text(&xml[..], &XmlTextOptions::generic()),
            Err(ExtractionError::MalformedContent(_))
        ));
    }

    #[test]
    fn numeric_entities_decode() {
        assert_eq!(decode_entities("A&#66;&#x43;&bogus;"), "ABC&bogus;");
    }
}
