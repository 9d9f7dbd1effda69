//! Delimited text capability (CSV, TSV). One output line per record, fields
//! joined by single spaces.

use std::path::Path;

use super::{ExtractionError, Extractor, read_all};

pub const EXTENSIONS: &[&str] = &["csv", "tsv"];

pub struct TabularExtractor;

impl Extractor for TabularExtractor {
    fn capability(&self) -> &str {
        "tabular"
    }

    fn extract(&self, path: &Path) -> Result<String, ExtractionError> {
        let delimiter = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("tsv") => b'\t',
            _ => b',',
        };
        let data = read_all(path)?;
        let data = data.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(&data);
        records_to_text(data, delimiter)
    }
}

pub(crate) fn records_to_text(data: &[u8], delimiter: u8) -> Result<String, ExtractionError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(data);

    let mut lines = Vec::new();
    for record in reader.records() {
        let record = record.map_err(map_csv_error)?;
        let fields: Vec<&str> = record
            .iter()
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .collect();
        if !fields.is_empty() {
            lines.push(fields.join(" "));
        }
    }
    Ok(lines.join("\n"))
}

fn map_csv_error(err: csv::Error) -> ExtractionError {
    match err.kind() {
        csv::ErrorKind::Utf8 { .. } => ExtractionError::DecodingFailure(err.to_string()),
        csv::ErrorKind::Io(_) => ExtractionError::ReadFailure(err.to_string()),
        _ => ExtractionError::MalformedContent(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_fields_per_record() {
        let text = records_to_text(b"name,email\nJane Doe,jane@x.com\n\n,\n", b',').expect("csv");
        assert_eq!(text, "name email\nJane Doe jane@x.com");
    }

    #[test]
    fn quoted_fields_and_tabs() {
        let text = records_to_text(b"\"Doe, Jane\"\t555 0100\n", b'\t').expect("tsv");
        assert_eq!(text, "Doe, Jane 555 0100");
        let text = records_to_text(b"\"Doe, Jane\",x\n", b',').expect("csv");
        assert_eq!(text, "Doe, Jane x");
    }

    #[test]
    fn invalid_utf8_is_decoding_failure() {
        assert!(matches!(
            records_to_text(b"ok,\xff\xfe\n", b','),
            Err(ExtractionError::DecodingFailure(_))
        ));
    }
}
