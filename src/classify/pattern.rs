//! Built-in regex classifier. Structured identifiers only; free-text names
//! are recognised when introduced by a title or a `Name:` label.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{ClassificationError, Classifier, Entity};

pub const EMAIL_PATTERN: &str = r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}";

struct Rule {
    label: &'static str,
    regex: Regex,
    /// Capture group holding the entity; 0 for the whole match.
    group: usize,
    score: f64,
    check: Option<fn(&str) -> bool>,
}

impl Rule {
    fn new(label: &'static str, pattern: &str, group: usize, score: f64, check: Option<fn(&str) -> bool>) -> Self {
        Self {
            label,
            regex: Regex::new(pattern).expect("built-in pattern compiles"),
            group,
            score,
            check,
        }
    }
}

static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        Rule::new("EMAIL_ADDRESS", EMAIL_PATTERN, 0, 1.0, None),
        Rule::new(
            "CREDIT_CARD",
            r"\b(?:\d[ -]?){12,18}\d\b",
            0,
            0.95,
            Some(luhn_valid),
        ),
        Rule::new(
            "IBAN_CODE",
            r"\b[A-Z]{2}\d{2}(?: ?[A-Z0-9]{4}){2,7}(?: ?[A-Z0-9]{1,3})?\b",
            0,
            0.95,
            Some(iban_valid),
        ),
        Rule::new(
            "IP_ADDRESS",
            r"\b(?:(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\.){3}(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\b",
            0,
            0.85,
            None,
        ),
        Rule::new("US_SSN", r"\b\d{3}-\d{2}-\d{4}\b", 0, 0.85, None),
        Rule::new(
            "PHONE_NUMBER",
            r"(?:\+\d{1,3}[ .-]?)?(?:\(\d{1,4}\)[ .-]?)?\b\d{3}[ .-]\d{4}\b",
            0,
            0.8,
            None,
        ),
        Rule::new("URL", r#"\bhttps?://[^\s<>"']+"#, 0, 0.6, None),
        Rule::new(
            "PERSON",
            r"\b(?:Mr|Mrs|Ms|Miss|Dr|Prof)\.? ([A-Z][a-z]+(?: [A-Z][a-z]+)?)",
            1,
            0.85,
            None,
        ),
        Rule::new(
            "PERSON",
            r"(?i:\bname)\s*[:=]\s*([A-Z][a-z]+(?: [A-Z][a-z]+)+)",
            1,
            0.9,
            None,
        ),
    ]
});

/// Stateless; safe to call from any number of threads.
#[derive(Debug, Default, Clone, Copy)]
pub struct PatternClassifier;

impl PatternClassifier {
    pub fn new() -> Self {
        Self
    }
}

impl Classifier for PatternClassifier {
    fn name(&self) -> &str {
        "pattern"
    }

    fn classify(&self, text: &str) -> Result<Vec<Entity>, ClassificationError> {
        let mut entities = Vec::new();
        for rule in RULES.iter() {
            for caps in rule.regex.captures_iter(text) {
                let Some(m) = caps.get(rule.group) else {
                    continue;
                };
                if let Some(check) = rule.check {
                    if !check(m.as_str()) {
                        continue;
                    }
                }
                entities.push(Entity {
                    start: m.start(),
                    end: m.end(),
                    text: m.as_str().to_string(),
                    label: rule.label.to_string(),
                    score: rule.score,
                });
            }
        }
        entities.sort_by(|a, b| (a.start, a.end, &a.label).cmp(&(b.start, b.end, &b.label)));
        entities.dedup_by(|a, b| a.start == b.start && a.end == b.end && a.label == b.label);
        Ok(entities)
    }

    fn is_concurrent(&self) -> bool {
        true
    }
}

pub fn luhn_valid(candidate: &str) -> bool {
    let digits: Vec<u32> = candidate.chars().filter_map(|c| c.to_digit(10)).collect();
    if !(13..=19).contains(&digits.len()) {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

pub fn iban_valid(candidate: &str) -> bool {
    let compact: String = candidate.chars().filter(|c| !c.is_whitespace()).collect();
    if !(15..=34).contains(&compact.len()) {
        return false;
    }
    let (head, tail) = compact.split_at(4);
    let mut remainder = 0u32;
    for c in tail.chars().chain(head.chars()) {
        let value = match c.to_digit(36) {
            Some(v) => v,
            None => return false,
        };
        remainder = if value >= 10 {
            (remainder * 100 + value) % 97
        } else {
            (remainder * 10 + value) % 97
        };
    }
    remainder == 1
}
