//! # Classification capability
//!
//! A [`Classifier`] turns UTF-8 text into scored personal-data spans. It is
//! built once per run and shared by reference with every worker; the
//! pipeline serializes calls unless [`Classifier::is_concurrent`] says the
//! implementation is free-threaded.

pub mod command;
pub mod pattern;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{ClassifierConfig, ClassifierKind};

pub use command::CommandClassifier;
pub use pattern::PatternClassifier;

/// A detected span. `start`/`end` are byte offsets into the analyzed text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub start: usize,
    pub end: usize,
    pub text: String,
    pub label: String,
    pub score: f64,
}

impl Entity {
    pub fn overlaps(&self, other: &Entity) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClassificationError {
    #[error("classifier unavailable: {0}")]
    Unavailable(String),
    #[error("classifier failed: {0}")]
    Failed(String),
    #[error("classifier returned invalid output: {0}")]
    InvalidOutput(String),
}

pub trait Classifier: Send + Sync {
    fn name(&self) -> &str;
    fn classify(&self, text: &str) -> Result<Vec<Entity>, ClassificationError>;

    /// True only when concurrent `classify` calls are documented safe.
    fn is_concurrent(&self) -> bool {
        false
    }
}

pub fn build_classifier(cfg: &ClassifierConfig) -> Result<Arc<dyn Classifier>, ClassificationError> {
    match cfg.kind {
        ClassifierKind::Pattern => Ok(Arc::new(PatternClassifier::new())),
        ClassifierKind::Command => {
            let classifier = CommandClassifier::new(cfg.command.clone(), cfg.concurrent, cfg.offsets)
                .ok_or_else(|| ClassificationError::Unavailable("empty classifier command".to_string()))?;
            Ok(Arc::new(classifier))
        }
    }
}
