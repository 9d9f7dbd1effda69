pub mod jsonl;
pub mod text;

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use crate::constants::{EMAILS_LOG_NAME, SOCIAL_LOG_NAME};
use crate::emails::EmailScanRecord;
use crate::parsers::browser::SocialRecord;
use crate::pipeline::FileAnalysis;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataBackendKind {
    Text,
    Jsonl,
}

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("other error: {0}")]
    Other(String),
}

/// Persisted record of a run. Every analyzed file is recorded exactly once
/// through [`MetadataSink::record_analysis`]; the email and social scans
/// have their own logs.
///
/// # Example
/// ```rust
/// use evidence_intake::metadata::{self, MetadataBackendKind};
///
/// let dir = std::env::temp_dir().join("evidence_intake_meta_example");
/// std::fs::create_dir_all(&dir).unwrap();
/// let sink = metadata::build_sink(MetadataBackendKind::Text, &dir).unwrap();
/// sink.flush().unwrap();
/// assert!(dir.join("final_results.txt").exists());
/// ```
pub trait MetadataSink: Send + Sync {
    fn record_analysis(&self, record: &FileAnalysis) -> Result<(), MetadataError>;
    fn record_emails(&self, record: &EmailScanRecord) -> Result<(), MetadataError>;
    fn record_social(&self, record: &SocialRecord) -> Result<(), MetadataError>;
    fn flush(&self) -> Result<(), MetadataError>;
}

/// A sink that drops everything.
pub struct NullSink;

impl MetadataSink for NullSink {
    fn record_analysis(&self, _record: &FileAnalysis) -> Result<(), MetadataError> {
        Ok(())
    }
    fn record_emails(&self, _record: &EmailScanRecord) -> Result<(), MetadataError> {
        Ok(())
    }
    fn record_social(&self, _record: &SocialRecord) -> Result<(), MetadataError> {
        Ok(())
    }
    fn flush(&self) -> Result<(), MetadataError> {
        Ok(())
    }
}

pub fn build_sink(
    backend: MetadataBackendKind,
    output_dir: &Path,
) -> Result<std::sync::Arc<dyn MetadataSink>, MetadataError> {
    std::fs::create_dir_all(output_dir)?;
    match backend {
        MetadataBackendKind::Text => Ok(std::sync::Arc::new(text::TextLogSink::new(output_dir)?)),
        MetadataBackendKind::Jsonl => Ok(std::sync::Arc::new(jsonl::JsonlSink::new(output_dir)?)),
    }
}

/// Writers only hold buffered bytes, so a poisoned lock is still usable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A log file opened on first write, so runs without the matching scan
/// leave no empty file behind.
struct LazyLog {
    path: PathBuf,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl LazyLog {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            writer: Mutex::new(None),
        }
    }

    fn write_with(
        &self,
        f: impl FnOnce(&mut BufWriter<File>) -> Result<(), MetadataError>,
    ) -> Result<(), MetadataError> {
        let mut guard = lock(&self.writer);
        if guard.is_none() {
            let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
            *guard = Some(BufWriter::new(file));
        }
        match guard.as_mut() {
            Some(writer) => f(writer),
            None => Err(MetadataError::Other(format!("{} not open", self.path.display()))),
        }
    }

    fn flush(&self) -> Result<(), MetadataError> {
        if let Some(writer) = lock(&self.writer).as_mut() {
            writer.flush()?;
        }
        Ok(())
    }
}

/// `emails.txt` and `social_media_analysis.jsonl`, shared by every backend.
struct CompanionLogs {
    emails: LazyLog,
    social: LazyLog,
}

impl CompanionLogs {
    fn new(output_dir: &Path) -> Self {
        Self {
            emails: LazyLog::new(output_dir.join(EMAILS_LOG_NAME)),
            social: LazyLog::new(output_dir.join(SOCIAL_LOG_NAME)),
        }
    }

    /// Files without addresses (and failed files) leave no block.
    fn record_emails(&self, record: &EmailScanRecord) -> Result<(), MetadataError> {
        let Ok(addresses) = &record.result else {
            return Ok(());
        };
        if addresses.is_empty() {
            return Ok(());
        }
        self.emails.write_with(|w| {
            writeln!(w, "Analysis of file: {}", record.path.display())?;
            for address in addresses {
                writeln!(w, "{address}")?;
            }
            writeln!(w)?;
            Ok(())
        })
    }

    fn record_social(&self, record: &SocialRecord) -> Result<(), MetadataError> {
        self.social.write_with(|w| {
            serde_json::to_writer(&mut *w, record)?;
            w.write_all(b"\n")?;
            Ok(())
        })
    }

    fn flush(&self) -> Result<(), MetadataError> {
        self.emails.flush()?;
        self.social.flush()
    }
}
