//! External model adapter. The text goes to the program's stdin; stdout must
//! be a JSON array of `{start, end, label|entity_type, score[, text]}`.
//!
//! `start`/`end` are read in the configured [`OffsetUnit`] (characters by
//! default) and converted to byte offsets into the UTF-8 text. Offsets past
//! the end of the text are left out of range so the pipeline discards them.

use std::io::Write;
use std::process::{Command, Stdio};

use serde::Deserialize;

use super::{ClassificationError, Classifier, Entity};
use crate::config::OffsetUnit;

#[derive(Debug, Deserialize)]
struct WireEntity {
    start: usize,
    end: usize,
    #[serde(alias = "entity_type", alias = "type")]
    label: String,
    score: f64,
    #[serde(default)]
    text: Option<String>,
}

pub struct CommandClassifier {
    argv: Vec<String>,
    concurrent: bool,
    offsets: OffsetUnit,
}

impl CommandClassifier {
    pub fn new(argv: Vec<String>, concurrent: bool, offsets: OffsetUnit) -> Option<Self> {
        if argv.is_empty() {
            None
        } else {
            Some(Self {
                argv,
                concurrent,
                offsets,
            })
        }
    }
}

impl Classifier for CommandClassifier {
    fn name(&self) -> &str {
        &self.argv[0]
    }

    fn classify(&self, text: &str) -> Result<Vec<Entity>, ClassificationError> {
        let mut child = Command::new(&self.argv[0])
            .args(&self.argv[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| ClassificationError::Unavailable(format!("{}: {err}", self.argv[0])))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ClassificationError::Failed("stdin not captured".to_string()))?;
        // Feed stdin from a second thread so a model that streams output
        // before draining its input cannot deadlock us.
        let output = std::thread::scope(|scope| {
            let writer = scope.spawn(move || stdin.write_all(text.as_bytes()));
            let output = child.wait_with_output();
            let written = writer
                .join()
                .unwrap_or_else(|_| Err(std::io::Error::other("stdin writer panicked")));
            (output, written)
        });
        let output = match output {
            (Ok(output), _) => output,
            (Err(err), _) => return Err(ClassificationError::Failed(err.to_string())),
        };
        if !output.status.success() {
            return Err(ClassificationError::Failed(format!(
                "{} exited with {}: {}",
                self.argv[0],
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        parse_entities(&output.stdout, text, self.offsets)
    }

    fn is_concurrent(&self) -> bool {
        self.concurrent
    }
}

pub(crate) fn parse_entities(
    stdout: &[u8],
    text: &str,
    unit: OffsetUnit,
) -> Result<Vec<Entity>, ClassificationError> {
    let wire: Vec<WireEntity> = serde_json::from_slice(stdout)
        .map_err(|err| ClassificationError::InvalidOutput(err.to_string()))?;
    // Byte position of every char offset, plus the end of the text.
    let char_starts: Vec<usize> = match unit {
        OffsetUnit::Chars => text
            .char_indices()
            .map(|(pos, _)| pos)
            .chain(std::iter::once(text.len()))
            .collect(),
        OffsetUnit::Bytes => Vec::new(),
    };
    let to_byte = |offset: usize| match unit {
        OffsetUnit::Bytes => offset,
        OffsetUnit::Chars => char_starts.get(offset).copied().unwrap_or(text.len() + 1),
    };
    Ok(wire
        .into_iter()
        .map(|w| {
            let (start, end) = (to_byte(w.start), to_byte(w.end));
            let surface = w
                .text
                .or_else(|| text.get(start..end).map(str::to_string))
                .unwrap_or_default();
            Entity {
                start,
                end,
                text: surface,
                label: w.label,
                score: w.score,
            }
        })
        .collect())
}
