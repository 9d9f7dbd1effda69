mod common;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use evidence_intake::classify::{ClassificationError, Classifier, Entity};
use evidence_intake::constants::{LOG_BLOCK_DELIMITER, RESULTS_LOG_NAME};
use evidence_intake::extract::ExtractorRegistry;
use evidence_intake::metadata::{self, MetadataBackendKind, MetadataSink};
use evidence_intake::pipeline::workers::Stopper;
use evidence_intake::pipeline::{AnalysisOptions, FailureKind, analyze};

use common::{RecordingSink, ScriptedClassifier, candidate, candidates, record_counts, write_tree};

fn options(threshold: f64, workers: usize) -> AnalysisOptions {
    AnalysisOptions {
        threshold,
        workers,
        chunk_bytes: 1000,
        overlap_bytes: 64,
    }
}

#[test]
fn readable_and_corrupt_files_map_to_entities_and_failures() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_tree(
        dir.path(),
        &[
            ("a.txt", b"John Smith, john@x.com"),
            ("b.pdf", b"\x00\x01garbage that is not a pdf"),
        ],
    );
    let files = candidates(dir.path(), "loop0p1", &[".txt", ".pdf"]);
    assert_eq!(files.len(), 2);

    let classifier = ScriptedClassifier::new(&[("John Smith", "PERSON", 0.95), ("john@x.com", "EMAIL_ADDRESS", 0.5)]);
    let registry = ExtractorRegistry::with_defaults(0, None);
    let sink = Arc::new(RecordingSink::default());
    let outcome = analyze(
        files,
        &registry,
        &classifier,
        &options(0.9, 2),
        sink.clone(),
        &Stopper::default(),
        None,
    );

    assert!(!outcome.cancelled);
    assert_eq!(outcome.stats.files_total, 2);
    assert_eq!(outcome.stats.files_succeeded, 1);
    assert_eq!(outcome.stats.files_failed, 1);

    let map = outcome.into_map();
    let a = map.get(&dir.path().join("a.txt")).expect("a.txt record");
    let entities = a.as_ref().expect("a.txt analyzed");
    assert_eq!(entities.len(), 1);
    assert_eq!(entities[0].label, "PERSON");
    assert_eq!(entities[0].text, "John Smith");
    assert_eq!((entities[0].start, entities[0].end), (0, 10));
    assert!((entities[0].score - 0.95).abs() < 1e-9);

    let b = map.get(&dir.path().join("b.pdf")).expect("b.pdf record");
    assert_eq!(b.as_ref().expect_err("b.pdf failed").kind, FailureKind::ReadFailure);

    assert_eq!(sink.analysis_paths().len(), 2);
}

#[test]
fn every_file_is_recorded_exactly_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut files = Vec::new();
    for i in 0..40 {
        let rel = format!("docs/{i:02}.txt");
        let body = match i % 4 {
            0 => "contact Mr. Doe please".to_string(),
            1 => "nothing interesting".to_string(),
            2 => "CLASSIFIER-BOOM".to_string(),
            _ => "Mr. Doe and Mr. Doe again".to_string(),
        };
        write_tree(dir.path(), &[(rel.as_str(), body.as_bytes())]);
        files.push(candidate(&dir.path().join(&rel), "loop0p1"));
    }
    // Unsupported format, missing file, empty file.
    files.push(candidate(&dir.path().join("blob.xyz"), "loop0p1"));
    files.push(candidate(&dir.path().join("missing.txt"), "loop0p1"));
    write_tree(dir.path(), &[("empty.txt", b"")]);
    files.push(candidate(&dir.path().join("empty.txt"), "loop0p1"));
    let expected: HashSet<PathBuf> = files.iter().map(|f| f.path.clone()).collect();

    let classifier = ScriptedClassifier::new(&[("Doe", "PERSON", 0.9)]);
    let registry = ExtractorRegistry::with_defaults(0, None);
    let sink = Arc::new(RecordingSink::default());
    let outcome = analyze(
        files,
        &registry,
        &classifier,
        &options(0.8, 4),
        sink.clone(),
        &Stopper::default(),
        None,
    );

    assert_eq!(outcome.files.len(), expected.len());
    let counts = record_counts(&outcome.files);
    assert!(counts.values().all(|&c| c == 1));
    assert_eq!(counts.keys().cloned().collect::<HashSet<_>>(), expected);

    let logged = sink.analyses.lock().expect("lock").clone();
    let logged_counts = record_counts(&logged);
    assert_eq!(logged.len(), expected.len());
    assert!(logged_counts.values().all(|&c| c == 1));

    let failures: Vec<FailureKind> = outcome
        .files
        .iter()
        .filter_map(|f| f.result.as_ref().err().map(|e| e.kind))
        .collect();
    assert_eq!(failures.iter().filter(|k| **k == FailureKind::ClassificationFailure).count(), 10);
    assert!(failures.contains(&FailureKind::UnsupportedFormat));
    assert!(failures.contains(&FailureKind::ReadFailure));
    assert_eq!(outcome.stats.files_failed, failures.len() as u64);
    assert_eq!(outcome.stats.entities_found, 10 + 10 * 2);

    let empty = outcome
        .files
        .iter()
        .find(|f| f.path.ends_with("empty.txt"))
        .expect("empty record");
    assert_eq!(empty.result.as_ref().map(Vec::len), Ok(0));
}

#[test]
fn classifier_panic_is_contained_to_its_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_tree(
        dir.path(),
        &[
            ("bad.txt", b"CLASSIFIER-PANIC"),
            ("good1.txt", b"Mr. Doe"),
            ("good2.txt", b"Mr. Doe"),
        ],
    );
    let files = candidates(dir.path(), "p1", &[".txt"]);
    let classifier = ScriptedClassifier::new(&[("Doe", "PERSON", 0.9)]);
    let registry = ExtractorRegistry::with_defaults(0, None);
    let outcome = analyze(
        files,
        &registry,
        &classifier,
        &options(0.5, 2),
        Arc::new(metadata::NullSink),
        &Stopper::default(),
        None,
    );

    let map = outcome.into_map();
    assert_eq!(map.len(), 3);
    let bad = map.get(&dir.path().join("bad.txt")).expect("bad record");
    assert_eq!(bad.as_ref().expect_err("panicked").kind, FailureKind::WorkerPanic);
    for good in ["good1.txt", "good2.txt"] {
        let entities = map.get(&dir.path().join(good)).expect("good record");
        assert_eq!(entities.as_ref().map(Vec::len), Ok(1));
    }
}

#[test]
fn cancelled_batch_records_every_file_as_cancelled() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_tree(dir.path(), &[("a.txt", b"Mr. Doe"), ("b.txt", b"Mr. Roe")]);
    let files = candidates(dir.path(), "p1", &[".txt"]);
    let classifier = ScriptedClassifier::new(&[("Doe", "PERSON", 0.9)]);
    let registry = ExtractorRegistry::with_defaults(0, None);
    let sink = Arc::new(RecordingSink::default());
    let stopper = Stopper::new(Some(Arc::new(AtomicBool::new(true))), None);

    let outcome = analyze(
        files,
        &registry,
        &classifier,
        &options(0.5, 2),
        sink.clone(),
        &stopper,
        None,
    );

    assert!(outcome.cancelled);
    assert_eq!(outcome.files.len(), 2);
    assert!(outcome.files.iter().all(|f| matches!(
        &f.result,
        Err(failure) if failure.kind == FailureKind::Cancelled
    )));
    assert_eq!(sink.analysis_paths().len(), 2);
}

#[test]
fn text_log_has_one_block_per_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let data = dir.path().join("data");
    let out = dir.path().join("out");
    std::fs::create_dir_all(&out).expect("out dir");
    write_tree(
        &data,
        &[
            ("a.txt", b"John Smith, john@x.com"),
            ("b.pdf", b"not a pdf"),
            ("c.txt", b"nobody here"),
        ],
    );
    let files = candidates(&data, "p1", &[".txt", ".pdf"]);
    let classifier = ScriptedClassifier::new(&[("John Smith", "PERSON", 0.95)]);
    let registry = ExtractorRegistry::with_defaults(0, None);
    let sink: Arc<dyn MetadataSink> = metadata::build_sink(MetadataBackendKind::Text, &out).expect("sink");

    analyze(
        files,
        &registry,
        &classifier,
        &options(0.9, 3),
        sink,
        &Stopper::default(),
        None,
    );

    let log = std::fs::read_to_string(out.join(RESULTS_LOG_NAME)).expect("log");
    assert_eq!(log.matches("Analysis of file: ").count(), 3);
    assert_eq!(log.matches(LOG_BLOCK_DELIMITER).count(), 3);
    assert!(log.contains("Entity: John Smith\nType: PERSON\nScore: 0.9500\nStart: 0\nEnd: 10\n"));
    assert!(log.contains("Error: ReadFailure: "));
    assert!(log.contains("No entities detected above the threshold."));
}

/// Counts how many `classify` calls run at the same time.
struct OverlapCounter {
    concurrent: bool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl OverlapCounter {
    fn new(concurrent: bool) -> Self {
        Self {
            concurrent,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }
}

impl Classifier for OverlapCounter {
    fn name(&self) -> &str {
        "overlap-counter"
    }

    fn classify(&self, _text: &str) -> Result<Vec<Entity>, ClassificationError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(20));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(Vec::new())
    }

    fn is_concurrent(&self) -> bool {
        self.concurrent
    }
}

fn max_classify_overlap(concurrent: bool) -> usize {
    let dir = tempfile::tempdir().expect("tempdir");
    let files: Vec<(String, Vec<u8>)> = (0..16)
        .map(|i| (format!("doc{i}.txt"), format!("document number {i}").into_bytes()))
        .collect();
    let tree: Vec<(&str, &[u8])> = files.iter().map(|(n, b)| (n.as_str(), b.as_slice())).collect();
    write_tree(dir.path(), &tree);

    let classifier = OverlapCounter::new(concurrent);
    let registry = ExtractorRegistry::with_defaults(0, None);
    let outcome = analyze(
        candidates(dir.path(), "loop0p1", &[".txt"]),
        &registry,
        &classifier,
        &options(0.5, 4),
        Arc::new(RecordingSink::default()),
        &Stopper::default(),
        None,
    );
    assert_eq!(outcome.stats.files_succeeded, 16);
    classifier.max_in_flight.load(Ordering::SeqCst)
}

#[test]
fn single_threaded_classifier_never_runs_twice_at_once() {
    assert_eq!(max_classify_overlap(false), 1);
}

#[test]
fn concurrent_classifier_calls_overlap() {
    assert!(max_classify_overlap(true) > 1);
}
