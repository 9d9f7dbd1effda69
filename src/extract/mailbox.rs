//! RFC 5322 messages (`.eml`) and mbox archives, parsed with `mailparse`.
//! Addressing headers and the subject are kept; bodies are decoded from
//! their transfer encoding and declared charset, and HTML parts reduced to
//! text. Attachments contribute only their names.

use std::path::Path;

use mailparse::{DispositionType, MailHeaderMap, ParsedMail, parse_mail};
use tracing::debug;

use super::markup::html_to_text;
use super::{ExtractionError, Extractor, read_all};

pub const EXTENSIONS: &[&str] = &["eml", "mbox"];

const KEPT_HEADERS: &[&str] = &["from", "to", "cc", "bcc", "reply-to", "subject", "date"];
/// Headers that mark a message even when none of the kept ones is present.
const MESSAGE_HEADERS: &[&str] = &["content-type", "message-id", "mime-version", "received"];
const MAX_PART_DEPTH: usize = 8;

pub struct MailboxExtractor;

impl Extractor for MailboxExtractor {
    fn capability(&self) -> &str {
        "mailbox"
    }

    fn extract(&self, path: &Path) -> Result<String, ExtractionError> {
        let data = read_all(path)?;
        let is_mbox = path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("mbox"))
            .unwrap_or(false);
        if is_mbox {
            mbox_to_text(&data)
        } else {
            message_to_text(&data)
        }
    }
}

pub fn mbox_to_text(data: &[u8]) -> Result<String, ExtractionError> {
    let blank = data.iter().all(u8::is_ascii_whitespace);
    if !blank && !data.starts_with(b"From ") {
        return Err(ExtractionError::MalformedContent(
            "mbox does not start with a From_ line".to_string(),
        ));
    }
    let mut messages: Vec<Vec<u8>> = Vec::new();
    let mut current = Vec::new();
    for line in data.split_inclusive(|&b| b == b'\n') {
        if line.starts_with(b"From ") {
            if !current.is_empty() {
                messages.push(std::mem::take(&mut current));
            }
            continue;
        }
        // mboxrd quoting
        if let Some(rest) = line.strip_prefix(b">") {
            let unquoted = &rest[rest.iter().take_while(|&&b| b == b'>').count()..];
            if unquoted.starts_with(b"From ") {
                current.extend_from_slice(rest);
                continue;
            }
        }
        current.extend_from_slice(line);
    }
    if !current.is_empty() {
        messages.push(current);
    }

    let mut out = Vec::new();
    for message in messages {
        let text = message_to_text(&message)?;
        if !text.is_empty() {
            out.push(text);
        }
    }
    Ok(out.join("\n\n"))
}

pub fn message_to_text(data: &[u8]) -> Result<String, ExtractionError> {
    let mail = parse_mail(data)
        .map_err(|err| ExtractionError::MalformedContent(format!("unparsable message: {err}")))?;
    let is_message = mail.headers.iter().any(|h| {
        let key = h.get_key().to_ascii_lowercase();
        KEPT_HEADERS.contains(&key.as_str()) || MESSAGE_HEADERS.contains(&key.as_str())
    });
    if !is_message {
        return Err(ExtractionError::MalformedContent("message has no headers".to_string()));
    }

    let mut lines = Vec::new();
    for name in KEPT_HEADERS {
        for value in mail.headers.get_all_values(name) {
            lines.push(format!("{}: {}", display_name(name), value.trim()));
        }
    }
    let mut body_text = Vec::new();
    collect_part(&mail, 0, &mut body_text);
    if !body_text.is_empty() {
        lines.push(String::new());
        lines.extend(body_text);
    }
    Ok(lines.join("\n").trim().to_string())
}

fn display_name(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

fn collect_part(part: &ParsedMail<'_>, depth: usize, out: &mut Vec<String>) {
    let mime = part.ctype.mimetype.to_ascii_lowercase();
    if mime.starts_with("multipart/") && !part.subparts.is_empty() {
        if depth >= MAX_PART_DEPTH {
            return;
        }
        for sub in &part.subparts {
            collect_part(sub, depth + 1, out);
        }
        return;
    }

    let disposition = part.get_content_disposition();
    let attachment = matches!(disposition.disposition, DispositionType::Attachment);
    if attachment || !(mime.starts_with("text/") || mime.starts_with("multipart/")) {
        let name = disposition
            .params
            .get("filename")
            .or_else(|| part.ctype.params.get("name"));
        if let Some(name) = name {
            out.push(format!("Attachment: {name}"));
        }
        return;
    }

    let body = match part.get_body() {
        Ok(body) => body,
        Err(err) => {
            debug!("skipping undecodable {mime} part: {err}");
            return;
        }
    };
    let text = if mime == "text/html" { html_to_text(&body) } else { body };
    let text = text.trim();
    if !text.is_empty() {
        out.push(text.to_string());
    }
}
