//! # Pipeline Module
//!
//! Concurrent extraction and analysis of located files. Each file goes
//! through extract, chunk, classify, validate and threshold filtering on a
//! fixed worker pool and yields exactly one terminal [`FileAnalysis`].

pub mod events;
pub mod workers;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crossbeam_channel::bounded;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::chunk::build_text_chunks;
use crate::classify::{ClassificationError, Classifier, Entity};
use crate::config::Config;
use crate::constants::{CHANNEL_CAPACITY_MULTIPLIER, MIN_CHANNEL_CAPACITY};
use crate::extract::{ExtractionError, ExtractorRegistry};
use crate::locate::CandidateFile;
use crate::metadata::MetadataSink;

use events::MetadataEvent;
use workers::{JobFault, Stopper, parallel_map, spawn_metadata_thread};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    UnsupportedFormat,
    ReadFailure,
    MalformedContent,
    DecodingFailure,
    ClassificationFailure,
    WorkerPanic,
    Cancelled,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::UnsupportedFormat => "UnsupportedFormat",
            FailureKind::ReadFailure => "ReadFailure",
            FailureKind::MalformedContent => "MalformedContent",
            FailureKind::DecodingFailure => "DecodingFailure",
            FailureKind::ClassificationFailure => "ClassificationFailure",
            FailureKind::WorkerPanic => "WorkerPanic",
            FailureKind::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a file produced no entity list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl AnalysisFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for AnalysisFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl From<ExtractionError> for AnalysisFailure {
    fn from(err: ExtractionError) -> Self {
        let kind = match err {
            ExtractionError::UnsupportedFormat(_) => FailureKind::UnsupportedFormat,
            ExtractionError::ReadFailure(_) => FailureKind::ReadFailure,
            ExtractionError::MalformedContent(_) => FailureKind::MalformedContent,
            ExtractionError::DecodingFailure(_) => FailureKind::DecodingFailure,
        };
        Self::new(kind, err.message())
    }
}

impl From<ClassificationError> for AnalysisFailure {
    fn from(err: ClassificationError) -> Self {
        Self::new(FailureKind::ClassificationFailure, err.to_string())
    }
}

/// Terminal record for one located file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileAnalysis {
    pub path: PathBuf,
    pub partition: String,
    pub result: Result<Vec<Entity>, AnalysisFailure>,
}

impl FileAnalysis {
    fn failed(file: &CandidateFile, failure: AnalysisFailure) -> Self {
        Self {
            path: file.path.clone(),
            partition: file.partition.clone(),
            result: Err(failure),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn entities(&self) -> &[Entity] {
        match &self.result {
            Ok(entities) => entities,
            Err(_) => &[],
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AnalysisOptions {
    /// Entities scoring below this are dropped.
    pub threshold: f64,
    pub workers: usize,
    pub chunk_bytes: usize,
    pub overlap_bytes: usize,
}

impl AnalysisOptions {
    pub fn from_config(cfg: &Config, workers: usize) -> Self {
        Self {
            threshold: cfg.score_threshold,
            workers: workers.max(1),
            chunk_bytes: cfg.chunk_bytes,
            overlap_bytes: cfg.overlap_bytes,
        }
    }
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            threshold: 0.8,
            workers: 1,
            chunk_bytes: 1000,
            overlap_bytes: 64,
        }
    }
}

/// Pipeline statistics collected during a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub files_total: u64,
    pub files_succeeded: u64,
    pub files_failed: u64,
    pub entities_found: u64,
    pub metadata_errors: u64,
}

#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    /// One record per submitted file, in submission order.
    pub files: Vec<FileAnalysis>,
    pub stats: PipelineStats,
    pub cancelled: bool,
}

impl AnalysisOutcome {
    pub fn into_map(self) -> BTreeMap<PathBuf, Result<Vec<Entity>, AnalysisFailure>> {
        self.files.into_iter().map(|f| (f.path, f.result)).collect()
    }
}

/// Progress snapshot reported during a run.
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    pub files_total: u64,
    pub files_done: u64,
    pub files_failed: u64,
    pub entities_found: u64,
    pub metadata_errors: u64,
    pub elapsed_seconds: f64,
    pub eta_seconds: Option<u64>,
    /// Completion percentage (0.0 - 100.0)
    pub completion_pct: f64,
}

/// Progress callback trait for long-running analyses.
pub trait ProgressReporter: Send + Sync {
    fn on_progress(&self, snapshot: &ProgressSnapshot);
}

pub struct ProgressConfig {
    pub reporter: Arc<dyn ProgressReporter>,
    pub interval: Duration,
}

/// Serializes classifier calls unless the classifier is free-threaded.
pub struct ClassifierGate<'a> {
    classifier: &'a dyn Classifier,
    lock: Mutex<()>,
}

impl<'a> ClassifierGate<'a> {
    pub fn new(classifier: &'a dyn Classifier) -> Self {
        Self {
            classifier,
            lock: Mutex::new(()),
        }
    }

    pub fn classify(&self, text: &str) -> Result<Vec<Entity>, ClassificationError> {
        if self.classifier.is_concurrent() {
            return self.classifier.classify(text);
        }
        // A panic inside classify poisons the lock; the guard protects no data.
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.classifier.classify(text)
    }
}

/// Classify `text` chunk by chunk and return entities with offsets into
/// `text`, ordered by position, scoring at least `options.threshold`.
pub fn analyze_text(
    text: &str,
    gate: &ClassifierGate<'_>,
    options: &AnalysisOptions,
) -> Result<Vec<Entity>, ClassificationError> {
    let chunk_bytes = if options.chunk_bytes == 0 {
        text.len()
    } else {
        options.chunk_bytes
    };
    let mut kept: Vec<Entity> = Vec::new();
    let mut previous_end = 0usize;

    for chunk in build_text_chunks(text, chunk_bytes, options.overlap_bytes) {
        let window = chunk.slice(text);
        let from_earlier_chunks = kept.len();
        for entity in gate.classify(window)? {
            if let Err(reason) = check_entity(&entity, window) {
                debug!(
                    "discarding {} entity at {}..{} in chunk {}: {reason}",
                    entity.label, entity.start, entity.end, chunk.id
                );
                continue;
            }
            if !chunk.owns(entity.start) {
                continue;
            }
            let shifted = Entity {
                start: entity.start + chunk.start,
                end: entity.end + chunk.start,
                text: if entity.text.is_empty() {
                    window[entity.start..entity.end].to_string()
                } else {
                    entity.text
                },
                label: entity.label,
                score: entity.score,
            };
            // An entity cut off at the previous window's end continues here.
            let earlier = kept[..from_earlier_chunks].iter_mut().find(|k| {
                k.label == shifted.label
                    && (k.overlaps(&shifted) || (k.end == previous_end && shifted.start == previous_end))
            });
            match earlier {
                Some(k) if shifted.end > k.end => {
                    k.end = shifted.end;
                    k.text = text[k.start..k.end].to_string();
                    k.score = k.score.max(shifted.score);
                }
                Some(_) => {}
                None => kept.push(shifted),
            }
        }
        previous_end = chunk.start + chunk.length;
    }

    kept.retain(|e| e.score >= options.threshold);
    kept.sort_by(|a, b| (a.start, a.end, &a.label).cmp(&(b.start, b.end, &b.label)));
    Ok(kept)
}

fn check_entity(entity: &Entity, window: &str) -> Result<(), &'static str> {
    if entity.score.is_nan() || !(0.0..=1.0).contains(&entity.score) {
        return Err("score outside [0, 1]");
    }
    if entity.start > entity.end || entity.end > window.len() {
        return Err("span outside the text");
    }
    if !window.is_char_boundary(entity.start) || !window.is_char_boundary(entity.end) {
        return Err("span splits a character");
    }
    Ok(())
}

fn analyze_file(
    file: &CandidateFile,
    registry: &ExtractorRegistry,
    gate: &ClassifierGate<'_>,
    options: &AnalysisOptions,
) -> FileAnalysis {
    let result = registry
        .extract_file(file)
        .map_err(AnalysisFailure::from)
        .and_then(|text| analyze_text(&text, gate, options).map_err(AnalysisFailure::from));
    FileAnalysis {
        path: file.path.clone(),
        partition: file.partition.clone(),
        result,
    }
}

struct PipelineCounters {
    files_done: AtomicU64,
    files_failed: AtomicU64,
    entities_found: AtomicU64,
    metadata_errors: Arc<AtomicU64>,
}

impl PipelineCounters {
    fn new() -> Self {
        Self {
            files_done: AtomicU64::new(0),
            files_failed: AtomicU64::new(0),
            entities_found: AtomicU64::new(0),
            metadata_errors: Arc::new(AtomicU64::new(0)),
        }
    }

    fn record(&self, analysis: &FileAnalysis) {
        self.files_done.fetch_add(1, Ordering::Relaxed);
        match &analysis.result {
            Ok(entities) => {
                self.entities_found
                    .fetch_add(entities.len() as u64, Ordering::Relaxed);
            }
            Err(_) => {
                self.files_failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn snapshot(&self, files_total: u64, start_time: &Instant) -> ProgressSnapshot {
        let elapsed_seconds = start_time.elapsed().as_secs_f64();
        let files_done = self.files_done.load(Ordering::Relaxed);
        let files_per_sec = if elapsed_seconds > 0.0 {
            files_done as f64 / elapsed_seconds
        } else {
            0.0
        };
        let eta_seconds = if files_per_sec > 0.0 && files_done < files_total {
            Some(((files_total - files_done) as f64 / files_per_sec).round() as u64)
        } else {
            None
        };
        let completion_pct = if files_total > 0 {
            (files_done as f64 / files_total as f64) * 100.0
        } else {
            100.0
        };
        ProgressSnapshot {
            files_total,
            files_done,
            files_failed: self.files_failed.load(Ordering::Relaxed),
            entities_found: self.entities_found.load(Ordering::Relaxed),
            metadata_errors: self.metadata_errors.load(Ordering::Relaxed),
            elapsed_seconds,
            eta_seconds,
            completion_pct,
        }
    }
}

/// Analyze every file on `options.workers` threads. The outcome holds one
/// record per file; each record is also written once to `sink` by a
/// dedicated writer thread. Files not yet started when `stopper` fires are
/// recorded as [`FailureKind::Cancelled`].
pub fn analyze(
    files: Vec<CandidateFile>,
    registry: &ExtractorRegistry,
    classifier: &dyn Classifier,
    options: &AnalysisOptions,
    sink: Arc<dyn MetadataSink>,
    stopper: &Stopper,
    progress: Option<&ProgressConfig>,
) -> AnalysisOutcome {
    let files_total = files.len() as u64;
    let workers = options.workers.max(1);
    info!(
        "analyzing {} files with {} workers classifier={} threshold={} chunk_bytes={} overlap={}",
        files_total,
        workers,
        classifier.name(),
        options.threshold,
        options.chunk_bytes,
        options.overlap_bytes
    );

    let counters = PipelineCounters::new();
    let channel_cap = workers
        .saturating_mul(CHANNEL_CAPACITY_MULTIPLIER)
        .max(MIN_CHANNEL_CAPACITY);
    let (meta_tx, meta_rx) = bounded::<MetadataEvent>(channel_cap * 2);
    let meta_handle = spawn_metadata_thread(sink, meta_rx, counters.metadata_errors.clone());

    let gate = ClassifierGate::new(classifier);
    let start_time = Instant::now();
    let mut last_progress = Instant::now();
    let mut tick = || {
        if let Some(progress) = progress {
            if progress.interval.is_zero() || last_progress.elapsed() >= progress.interval {
                progress
                    .reporter
                    .on_progress(&counters.snapshot(files_total, &start_time));
                last_progress = Instant::now();
                let _ = meta_tx.send(MetadataEvent::Flush);
            }
        }
    };

    // `files` moves into the pool; keep what failure records need.
    let identities: Vec<CandidateFile> = files.clone();
    let results = parallel_map(
        files,
        workers,
        stopper,
        |file| {
            let analysis = analyze_file(file, registry, &gate, options);
            counters.record(&analysis);
            if let Err(failure) = &analysis.result {
                warn!("{}: {failure}", file.path.display());
            }
            if let Err(err) = meta_tx.send(MetadataEvent::Analysis(analysis.clone())) {
                warn!("metadata channel closed: {err}");
            }
            analysis
        },
        &mut tick,
    );

    let mut cancelled = false;
    let mut records = Vec::with_capacity(results.len());
    for (file, result) in identities.iter().zip(results) {
        let analysis = match result {
            Ok(analysis) => analysis,
            Err(fault) => {
                let failure = match fault {
                    JobFault::Panicked(msg) => AnalysisFailure::new(FailureKind::WorkerPanic, msg),
                    JobFault::Cancelled => {
                        cancelled = true;
                        AnalysisFailure::new(FailureKind::Cancelled, "analysis stopped before this file started")
                    }
                    JobFault::Lost => AnalysisFailure::new(
                        FailureKind::WorkerPanic,
                        "worker exited without producing a result",
                    ),
                };
                if failure.kind != FailureKind::Cancelled {
                    warn!("{}: {failure}", file.path.display());
                }
                let analysis = FileAnalysis::failed(file, failure);
                counters.record(&analysis);
                if let Err(err) = meta_tx.send(MetadataEvent::Analysis(analysis.clone())) {
                    warn!("metadata channel closed: {err}");
                }
                analysis
            }
        };
        records.push(analysis);
    }

    drop(tick);
    drop(meta_tx);
    if meta_handle.join().is_err() {
        warn!("metadata writer thread panicked");
        counters.metadata_errors.fetch_add(1, Ordering::Relaxed);
    }

    if let Some(progress) = progress {
        progress
            .reporter
            .on_progress(&counters.snapshot(files_total, &start_time));
    }
    if cancelled {
        info!("shutdown requested; remaining files recorded as cancelled");
    }

    let stats = PipelineStats {
        files_total,
        files_succeeded: records.iter().filter(|r| r.is_success()).count() as u64,
        files_failed: records.iter().filter(|r| !r.is_success()).count() as u64,
        entities_found: records.iter().map(|r| r.entities().len() as u64).sum(),
        metadata_errors: counters.metadata_errors.load(Ordering::Relaxed),
    };
    info!(
        "analysis complete: files={} succeeded={} failed={} entities={} elapsed={:.1}s",
        stats.files_total,
        stats.files_succeeded,
        stats.files_failed,
        stats.entities_found,
        start_time.elapsed().as_secs_f64()
    );

    AnalysisOutcome {
        files: records,
        stats,
        cancelled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::PatternClassifier;

    /// Returns one fixed entity per call, regardless of input.
    struct Fixed(Vec<Entity>);

    impl Classifier for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }
        fn classify(&self, _text: &str) -> Result<Vec<Entity>, ClassificationError> {
            Ok(self.0.clone())
        }
    }

    fn entity(start: usize, end: usize, label: &str, score: f64) -> Entity {
        Entity {
            start,
            end,
            text: String::new(),
            label: label.to_string(),
            score,
        }
    }

    fn options(threshold: f64, chunk_bytes: usize, overlap_bytes: usize) -> AnalysisOptions {
        AnalysisOptions {
            threshold,
            workers: 1,
            chunk_bytes,
            overlap_bytes,
        }
    }

    #[test]
    fn invalid_entities_are_discarded() {
        let classifier = Fixed(vec![
            entity(0, 4, "PERSON", 0.9),
            entity(0, 400, "PERSON", 0.9),
            entity(3, 1, "PERSON", 0.9),
            entity(0, 4, "PERSON", 1.5),
            entity(0, 4, "PERSON", f64::NAN),
            entity(1, 2, "PERSON", 0.9),
        ]);
        let gate = ClassifierGate::new(&classifier);
        let found = analyze_text("ébcd efgh", &gate, &options(0.0, 1000, 0)).expect("analyze");
        // 'é' is two bytes, so 1..2 splits it.
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].text, "ébc");
    }

    #[test]
    fn threshold_is_inclusive() {
        let classifier = Fixed(vec![entity(0, 4, "A", 0.8), entity(5, 9, "B", 0.79)]);
        let gate = ClassifierGate::new(&classifier);
        let found = analyze_text("abcd efgh", &gate, &options(0.8, 1000, 0)).expect("analyze");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].label, "A");
    }

    #[test]
    fn chunked_offsets_point_into_the_whole_text() {
        let mut text = "x".repeat(990);
        text.push_str(" mail jane.doe@example.com today ");
        text.push_str(&"y".repeat(1500));
        text.push_str(" bob@example.org");
        let gate = ClassifierGate::new(&PatternClassifier);
        let found = analyze_text(&text, &gate, &options(0.5, 1000, 64)).expect("analyze");
        let emails: Vec<&Entity> = found.iter().filter(|e| e.label == "EMAIL_ADDRESS").collect();
        assert_eq!(emails.len(), 2);
        for e in &found {
            assert_eq!(&text[e.start..e.end], e.text);
        }
        assert_eq!(emails[0].text, "jane.doe@example.com");
    }

    /// Labels every run of capital letters as a person.
    struct Capitals;

    impl Classifier for Capitals {
        fn name(&self) -> &str {
            "capitals"
        }
        fn classify(&self, text: &str) -> Result<Vec<Entity>, ClassificationError> {
            let mut found = Vec::new();
            let mut run: Option<usize> = None;
            for (i, b) in text.bytes().chain(std::iter::once(b' ')).enumerate() {
                match (b.is_ascii_uppercase(), run) {
                    (true, None) => run = Some(i),
                    (false, Some(start)) => {
                        found.push(entity(start, i, "PERSON", 0.9));
                        run = None;
                    }
                    _ => {}
                }
            }
            Ok(found)
        }
    }

    #[test]
    fn entity_longer_than_the_overlap_is_stitched() {
        let text = format!("{}{}{}", "a".repeat(95), "Z".repeat(30), "a".repeat(50));
        let gate = ClassifierGate::new(&Capitals);
        for overlap in [0, 10] {
            let found = analyze_text(&text, &gate, &options(0.5, 100, overlap)).expect("analyze");
            assert_eq!(found.len(), 1, "overlap {overlap}");
            assert_eq!((found[0].start, found[0].end), (95, 125));
            assert_eq!(found[0].text, "Z".repeat(30));
        }
    }

    #[test]
    fn empty_text_is_an_empty_success() {
        let gate = ClassifierGate::new(&PatternClassifier);
        assert!(analyze_text("", &gate, &options(0.8, 1000, 64)).expect("analyze").is_empty());
    }

    #[test]
    fn failure_display_has_kind_prefix() {
        let failure = AnalysisFailure::from(ExtractionError::DecodingFailure("bad utf-8".into()));
        assert_eq!(failure.to_string(), "DecodingFailure: bad utf-8");
        let failure = AnalysisFailure::from(ClassificationError::Failed("boom".into()));
        assert_eq!(failure.kind, FailureKind::ClassificationFailure);
    }
}
