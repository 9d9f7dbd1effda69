//! # Email Scan
//!
//! Companion pass that collects email addresses from the extracted text of
//! email-capable files. Formats without a registered extractor (Outlook
//! `.msg`) and text that fails strict decoding are scanned as lossy UTF-8.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use crossbeam_channel::bounded;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

use crate::classify::pattern::EMAIL_PATTERN;
use crate::constants::MIN_CHANNEL_CAPACITY;
use crate::extract::{ExtractionError, ExtractorRegistry};
use crate::locate::CandidateFile;
use crate::metadata::MetadataSink;
use crate::pipeline::events::MetadataEvent;
use crate::pipeline::workers::{JobFault, Stopper, parallel_map, spawn_metadata_thread};
use crate::pipeline::{AnalysisFailure, FailureKind};

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(EMAIL_PATTERN).expect("email pattern compiles"));

#[derive(Debug, Clone, PartialEq)]
pub struct EmailScanRecord {
    pub path: PathBuf,
    pub partition: String,
    pub result: Result<BTreeSet<String>, AnalysisFailure>,
}

#[derive(Debug, Clone, Default)]
pub struct EmailScanOutcome {
    pub records: Vec<EmailScanRecord>,
    /// Union over every file.
    pub addresses: BTreeSet<String>,
    pub files_failed: u64,
    pub cancelled: bool,
}

pub fn find_emails(text: &str) -> BTreeSet<String> {
    EMAIL_RE.find_iter(text).map(|m| m.as_str().to_string()).collect()
}

fn read_lossy(path: &Path, max_bytes: u64) -> Result<String, ExtractionError> {
    let limit = if max_bytes > 0 { max_bytes } else { u64::MAX };
    let mut buf = Vec::new();
    File::open(path)?.take(limit).read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn email_text(file: &CandidateFile, registry: &ExtractorRegistry) -> Result<String, ExtractionError> {
    if !registry.supports(&file.extension) {
        return read_lossy(&file.path, registry.max_file_bytes());
    }
    match registry.extract_file(file) {
        Err(ExtractionError::DecodingFailure(reason)) => {
            info!("{}: {reason}; scanning raw bytes", file.path.display());
            read_lossy(&file.path, registry.max_file_bytes())
        }
        other => other,
    }
}

pub fn scan_file(file: &CandidateFile, registry: &ExtractorRegistry) -> EmailScanRecord {
    EmailScanRecord {
        path: file.path.clone(),
        partition: file.partition.clone(),
        result: email_text(file, registry)
            .map(|text| find_emails(&text))
            .map_err(AnalysisFailure::from),
    }
}

/// Scan `files` on `workers` threads. Blocks for files with addresses are
/// appended to the email log through `sink`.
pub fn scan_emails(
    files: Vec<CandidateFile>,
    registry: &ExtractorRegistry,
    workers: usize,
    stopper: &Stopper,
    sink: Arc<dyn MetadataSink>,
) -> EmailScanOutcome {
    info!("email scan over {} files", files.len());
    let metadata_errors = Arc::new(AtomicU64::new(0));
    let (meta_tx, meta_rx) = bounded::<MetadataEvent>(MIN_CHANNEL_CAPACITY * 2);
    let meta_handle = spawn_metadata_thread(sink, meta_rx, metadata_errors);

    let identities = files.clone();
    let results = parallel_map(files, workers, stopper, |file| scan_file(file, registry), &mut || {});

    let mut outcome = EmailScanOutcome::default();
    for (file, result) in identities.iter().zip(results) {
        let record = match result {
            Ok(record) => record,
            Err(fault) => {
                let failure = match fault {
                    JobFault::Cancelled => {
                        outcome.cancelled = true;
                        AnalysisFailure::new(FailureKind::Cancelled, "scan stopped before this file started")
                    }
                    JobFault::Panicked(msg) => AnalysisFailure::new(FailureKind::WorkerPanic, msg),
                    JobFault::Lost => AnalysisFailure::new(FailureKind::WorkerPanic, "no result produced"),
                };
                EmailScanRecord {
                    path: file.path.clone(),
                    partition: file.partition.clone(),
                    result: Err(failure),
                }
            }
        };
        match &record.result {
            Ok(found) => outcome.addresses.extend(found.iter().cloned()),
            Err(failure) => {
                outcome.files_failed += 1;
                if failure.kind != FailureKind::Cancelled {
                    warn!("cannot scan {} for emails: {failure}", record.path.display());
                }
            }
        }
        if let Err(err) = meta_tx.send(MetadataEvent::Emails(record.clone())) {
            warn!("metadata channel closed: {err}");
        }
        outcome.records.push(record);
    }

    drop(meta_tx);
    if meta_handle.join().is_err() {
        warn!("email log writer thread panicked");
    }
    info!(
        "email scan complete: files={} failed={} unique_addresses={}",
        outcome.records.len(),
        outcome.files_failed,
        outcome.addresses.len()
    );
    outcome
}
