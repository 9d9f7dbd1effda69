//! JSON and YAML capability. Scalars are emitted one per line, prefixed
//! with the nearest mapping key so field names stay next to their values.

use std::path::Path;

use super::{ExtractionError, Extractor, decode_text, read_all};

pub const EXTENSIONS: &[&str] = &["json", "yaml", "yml"];

pub struct StructuredExtractor;

impl Extractor for StructuredExtractor {
    fn capability(&self) -> &str {
        "structured-data"
    }

    fn extract(&self, path: &Path) -> Result<String, ExtractionError> {
        let text = decode_text(&read_all(path)?)?;
        let is_json = path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json {
            json_to_text(&text)
        } else {
            yaml_to_text(&text)
        }
    }
}

pub(crate) fn json_to_text(text: &str) -> Result<String, ExtractionError> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|err| ExtractionError::MalformedContent(format!("json: {err}")))?;
    let mut lines = Vec::new();
    walk_json(&value, None, &mut lines);
    Ok(lines.join("\n"))
}

pub(crate) fn yaml_to_text(text: &str) -> Result<String, ExtractionError> {
    let mut lines = Vec::new();
    for document in serde_yaml::Deserializer::from_str(text) {
        let value = <serde_yaml::Value as serde::Deserialize>::deserialize(document)
            .map_err(|err| ExtractionError::MalformedContent(format!("yaml: {err}")))?;
        walk_yaml(&value, None, &mut lines);
    }
    Ok(lines.join("\n"))
}

fn emit(key: Option<&str>, value: String, lines: &mut Vec<String>) {
    if value.trim().is_empty() {
        return;
    }
    match key {
        Some(k) => lines.push(format!("{k}: {value}")),
        None => lines.push(value),
    }
}

fn walk_json(value: &serde_json::Value, key: Option<&str>, lines: &mut Vec<String>) {
    use serde_json::Value;
    match value {
        Value::Null => {}
        Value::Bool(b) => emit(key, b.to_string(), lines),
        Value::Number(n) => emit(key, n.to_string(), lines),
        Value::String(s) => emit(key, s.clone(), lines),
        Value::Array(items) => items.iter().for_each(|v| walk_json(v, key, lines)),
        Value::Object(map) => {
            for (k, v) in map {
                walk_json(v, Some(k), lines);
            }
        }
    }
}

fn walk_yaml(value: &serde_yaml::Value, key: Option<&str>, lines: &mut Vec<String>) {
    use serde_yaml::Value;
    match value {
        Value::Null => {}
        Value::Bool(b) => emit(key, b.to_string(), lines),
        Value::Number(n) => emit(key, n.to_string(), lines),
        Value::String(s) => emit(key, s.clone(), lines),
        Value::Sequence(items) => items.iter().for_each(|v| walk_yaml(v, key, lines)),
        Value::Mapping(map) => {
            for (k, v) in map {
                let name = match k {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    _ => String::new(),
                };
                let name = (!name.is_empty()).then_some(name);
                walk_yaml(v, name.as_deref().or(key), lines);
            }
        }
        Value::Tagged(tagged) => walk_yaml(&tagged.value, key, lines),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_scalars_keep_their_keys() {
        let text = json_to_text(r#"{"user": {"name": "Jane Doe", "phones": ["555 0100", null]}, "age": 41}"#)
            .expect("json");
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines.contains(&"name: Jane Doe"));
        assert!(lines.contains(&"phones: 555 0100"));
        assert!(lines.contains(&"age: 41"));
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn yaml_multi_document() {
        let text = yaml_to_text("name: John\n---\n- a@b.com\n- c@d.org\n").expect("yaml");
        assert_eq!(text, "name: John\na@b.com\nc@d.org");
    }

    #[test]
    fn malformed_inputs() {
        assert!(matches!(json_to_text("{\"a\": "), Err(ExtractionError::MalformedContent(_))));
        assert!(matches!(yaml_to_text("a: [1, 2"), Err(ExtractionError::MalformedContent(_))));
    }
}
