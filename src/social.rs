//! # Social-Media Artifact Scan
//!
//! Finds browser history and cookie databases on a mounted partition and
//! keeps the entries whose host belongs to a configured social-media
//! domain. Records go to the social log through the metadata sink.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use crossbeam_channel::bounded;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::constants::MIN_CHANNEL_CAPACITY;
use crate::metadata::MetadataSink;
use crate::parsers::browser::{ArtifactKind, Browser, BrowserArtifact, SocialRecord, classify_artifact};
use crate::parsers::sqlite_db::extract_social_records;
use crate::pipeline::events::MetadataEvent;
use crate::pipeline::workers::{JobFault, Stopper, parallel_map, spawn_metadata_thread};

#[derive(Debug, Clone, Default)]
pub struct SocialScanOutcome {
    pub records: Vec<SocialRecord>,
    pub databases_scanned: u64,
    pub databases_failed: u64,
    pub cancelled: bool,
}

/// Every browser database under `root`. Symlinks are not followed and the
/// walk stays on one filesystem.
pub fn find_browser_artifacts(root: &Path, partition: &str) -> Vec<BrowserArtifact> {
    WalkDir::new(root)
        .follow_links(false)
        .same_file_system(true)
        .into_iter()
        .filter_map(|item| match item {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!("traversal error under {}: {err}; skipping", root.display());
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let (browser, kind) = classify_artifact(entry.path())?;
            Some(BrowserArtifact {
                path: entry.path().to_path_buf(),
                browser,
                kind,
                partition: partition.to_string(),
            })
        })
        .collect()
}

fn is_unsupported(artifact: &BrowserArtifact) -> bool {
    // Safari stores cookies in a proprietary binary file, not SQLite.
    artifact.browser == Browser::Safari && artifact.kind == ArtifactKind::Cookies
}

pub fn scan_social(
    artifacts: Vec<BrowserArtifact>,
    domains: &[String],
    workers: usize,
    stopper: &Stopper,
    sink: Arc<dyn MetadataSink>,
) -> SocialScanOutcome {
    let (artifacts, skipped): (Vec<_>, Vec<_>) = artifacts.into_iter().partition(|a| !is_unsupported(a));
    for artifact in &skipped {
        info!("skipping {} cookies {}", artifact.browser, artifact.path.display());
    }
    info!("social scan over {} browser databases", artifacts.len());

    let metadata_errors = Arc::new(AtomicU64::new(0));
    let (meta_tx, meta_rx) = bounded::<MetadataEvent>(MIN_CHANNEL_CAPACITY * 2);
    let meta_handle = spawn_metadata_thread(sink, meta_rx, metadata_errors);

    let identities = artifacts.clone();
    let results = parallel_map(
        artifacts,
        workers,
        stopper,
        |artifact| {
            debug!("analyzing {} {:?} {}", artifact.browser, artifact.kind, artifact.path.display());
            extract_social_records(artifact, domains).map_err(|err| err.to_string())
        },
        &mut || {},
    );

    let mut outcome = SocialScanOutcome::default();
    for (artifact, result) in identities.iter().zip(results) {
        match result {
            Ok(Ok(records)) => {
                outcome.databases_scanned += 1;
                for record in records {
                    if let Err(err) = meta_tx.send(MetadataEvent::Social(record.clone())) {
                        warn!("metadata channel closed: {err}");
                    }
                    outcome.records.push(record);
                }
            }
            Ok(Err(err)) => {
                outcome.databases_failed += 1;
                warn!("cannot read {} database {}: {err}", artifact.browser, artifact.path.display());
            }
            Err(JobFault::Cancelled) => outcome.cancelled = true,
            Err(fault) => {
                outcome.databases_failed += 1;
                warn!("{} database {} not read: {fault:?}", artifact.browser, artifact.path.display());
            }
        }
    }

    drop(meta_tx);
    if meta_handle.join().is_err() {
        warn!("social log writer thread panicked");
    }
    info!(
        "social scan complete: databases={} failed={} records={}",
        outcome.databases_scanned,
        outcome.databases_failed,
        outcome.records.len()
    );
    outcome
}
