use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use crate::constants::{LOG_BLOCK_DELIMITER, RESULTS_LOG_NAME};
use crate::emails::EmailScanRecord;
use crate::parsers::browser::SocialRecord;
use crate::pipeline::FileAnalysis;

use super::{CompanionLogs, MetadataError, MetadataSink, lock};

pub const NO_ENTITIES_LINE: &str = "No entities detected above the threshold.";

/// Human-readable `final_results.txt`, one block per file.
pub struct TextLogSink {
    writer: Mutex<BufWriter<File>>,
    companions: CompanionLogs,
}

impl TextLogSink {
    pub fn new(output_dir: &Path) -> Result<Self, MetadataError> {
        let file = File::create(output_dir.join(RESULTS_LOG_NAME))?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            companions: CompanionLogs::new(output_dir),
        })
    }
}

pub fn write_analysis_block<W: Write>(w: &mut W, record: &FileAnalysis) -> std::io::Result<()> {
    write!(w, "Analysis of file: {}\n\n", record.path.display())?;
    match &record.result {
        Ok(entities) if entities.is_empty() => write!(w, "{NO_ENTITIES_LINE}\n\n")?,
        Ok(entities) => {
            for e in entities {
                write!(
                    w,
                    "Entity: {}\nType: {}\nScore: {:.4}\nStart: {}\nEnd: {}\n\n",
                    e.text, e.label, e.score, e.start, e.end
                )?;
            }
        }
        Err(failure) => write!(w, "Error: {failure}\n\n")?,
    }
    write!(w, "{LOG_BLOCK_DELIMITER}\n\n")
}

impl MetadataSink for TextLogSink {
    fn record_analysis(&self, record: &FileAnalysis) -> Result<(), MetadataError> {
        // Render first so a block is appended whole under the lock.
        let mut block = Vec::new();
        write_analysis_block(&mut block, record)?;
        lock(&self.writer).write_all(&block)?;
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
