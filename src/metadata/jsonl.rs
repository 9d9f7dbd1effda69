use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use serde::Serialize;

use crate::classify::Entity;
use crate::constants::RESULTS_JSONL_NAME;
use crate::emails::EmailScanRecord;
use crate::parsers::browser::SocialRecord;
use crate::pipeline::{AnalysisFailure, FileAnalysis};

use super::{CompanionLogs, MetadataError, MetadataSink, lock};

/// `final_results.jsonl`, one object per file.
pub struct JsonlSink {
    writer: Mutex<BufWriter<File>>,
    companions: CompanionLogs,
}

#[derive(Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum Outcome<'a> {
    Ok { entities: &'a [Entity] },
    Error { error: &'a AnalysisFailure },
}

#[derive(Serialize)]
struct AnalysisLine<'a> {
    path: &'a Path,
    partition: &'a str,
    #[serde(flatten)]
    outcome: Outcome<'a>,
}

impl JsonlSink {
    pub fn new(output_dir: &Path) -> Result<Self, MetadataError> {
        let file = File::create(output_dir.join(RESULTS_JSONL_NAME))?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            companions: CompanionLogs::new(output_dir),
        })
    }
}

impl MetadataSink for JsonlSink {
    fn record_analysis(&self, record: &FileAnalysis) -> Result<(), MetadataError> {
        let line = AnalysisLine {
            path: &record.path,
            partition: &record.partition,
            outcome: match &record.result {
                Ok(entities) => Outcome::Ok { entities },
                Err(error) => Outcome::Error { error },
            },
        };
        let mut buf = serde_json::to_vec(&line)?;
        buf.push(b'\n');
        lock(&self.writer).write_all(&buf)?;
        Ok(())
    }

    fn record_emails(&self, record: &EmailScanRecord) -> Result<(), MetadataError> {
        self.companions.record_emails(record)
    }

    fn record_social(&self, record: &SocialRecord) -> Result<(), MetadataError> {
        self.companions.record_social(record)
    }

    fn flush(&self) -> Result<(), MetadataError> {
        lock(&self.writer).flush()?;
        self.companions.flush()
    }
}
