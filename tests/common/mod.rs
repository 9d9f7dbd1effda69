//! Shared test infrastructure for the integration tests.
//!
//! Provides file-tree builders, a scripted classifier, a recording metadata
//! sink and a block-device fake that "mounts" prepared directory trees.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use evidence_intake::classify::{ClassificationError, Classifier, Entity};
use evidence_intake::emails::EmailScanRecord;
use evidence_intake::locate::{CandidateFile, ExtensionFilter, locate};
use evidence_intake::metadata::{MetadataError, MetadataSink};
use evidence_intake::mount::{BlockDeviceOps, FsProbe, OsCommandError};
use evidence_intake::parsers::browser::SocialRecord;
use evidence_intake::pipeline::FileAnalysis;

// ============================================================================
// File trees
// ============================================================================

pub fn write_tree(root: &Path, files: &[(&str, &[u8])]) {
    for (rel, data) in files {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(&path, data).expect("write file");
    }
}

/// Located candidates under `root`, sorted by path for stable assertions.
pub fn candidates(root: &Path, partition: &str, extensions: &[&str]) -> Vec<CandidateFile> {
    let filter = ExtensionFilter::new(extensions);
    let mut files: Vec<CandidateFile> = locate(root, partition, &filter, true).iter().collect();
    files.sort();
    files
}

pub fn candidate(path: &Path, partition: &str) -> CandidateFile {
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    CandidateFile {
        path: path.to_path_buf(),
        extension,
        partition: partition.to_string(),
    }
}

// ============================================================================
// Classifier
// ============================================================================

/// Reports every occurrence of each configured phrase with a fixed label
/// and score.
pub struct ScriptedClassifier {
    phrases: Vec<(String, String, f64)>,
    concurrent: bool,
}

impl ScriptedClassifier {
    pub fn new(phrases: &[(&str, &str, f64)]) -> Self {
        Self {
            phrases: phrases
                .iter()
                .map(|(p, l, s)| (p.to_string(), l.to_string(), *s))
                .collect(),
            concurrent: false,
        }
    }

    pub fn concurrent(mut self) -> Self {
        self.concurrent = true;
        self
    }
}

impl Classifier for ScriptedClassifier {
    fn name(&self) -> &str {
        "scripted"
    }

    fn classify(&self, text: &str) -> Result<Vec<Entity>, ClassificationError> {
        if text.contains("CLASSIFIER-BOOM") {
            return Err(ClassificationError::Failed("scripted failure".to_string()));
        }
        if text.contains("CLASSIFIER-PANIC") {
            panic!("scripted panic");
        }
        let mut out = Vec::new();
        for (phrase, label, score) in &self.phrases {
            for (start, matched) in text.match_indices(phrase.as_str()) {
                out.push(Entity {
                    start,
                    end: start + matched.len(),
                    text: matched.to_string(),
                    label: label.clone(),
                    score: *score,
                });
            }
        }
        Ok(out)
    }

    fn is_concurrent(&self) -> bool {
        self.concurrent
    }
}

// ============================================================================
// Metadata sink
// ============================================================================

#[derive(Default)]
pub struct RecordingSink {
    pub analyses: Mutex<Vec<FileAnalysis>>,
    pub emails: Mutex<Vec<EmailScanRecord>>,
    pub social: Mutex<Vec<SocialRecord>>,
    pub flushes: Mutex<u64>,
}

impl RecordingSink {
    pub fn analysis_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self
            .analyses
            .lock()
            .expect("lock")
            .iter()
            .map(|a| a.path.clone())
            .collect();
        paths.sort();
        paths
    }
}

impl MetadataSink for RecordingSink {
    fn record_analysis(&self, record: &FileAnalysis) -> Result<(), MetadataError> {
        self.analyses.lock().expect("lock").push(record.clone());
        Ok(())
    }

    fn record_emails(&self, record: &EmailScanRecord) -> Result<(), MetadataError> {
        self.emails.lock().expect("lock").push(record.clone());
        Ok(())
    }

    fn record_social(&self, record: &SocialRecord) -> Result<(), MetadataError> {
        self.social.lock().expect("lock").push(record.clone());
        Ok(())
    }

    fn flush(&self) -> Result<(), MetadataError> {
        *self.flushes.lock().expect("lock") += 1;
        Ok(())
    }
}

// ============================================================================
// Block device fake
// ============================================================================

/// One device node exposed by [`TreeMountOps`]. A node with a `source`
/// tree gets that tree copied into its mount point; a node without a
/// probe has no recognizable filesystem.
pub struct FakeNode {
    pub name: String,
    pub probe: Option<FsProbe>,
    pub source: Option<PathBuf>,
}

impl FakeNode {
    pub fn ext4(name: &str, source: &Path) -> Self {
        Self {
            name: name.to_string(),
            probe: Some(FsProbe {
                fs_type: "ext4".to_string(),
                uuid: Some(format!("uuid-{name}")),
                label: None,
            }),
            source: Some(source.to_path_buf()),
        }
    }

    pub fn unformatted(name: &str) -> Self {
        Self {
            name: name.to_string(),
            probe: None,
            source: None,
        }
    }
}

#[derive(Default)]
pub struct OpsLog {
    pub calls: Vec<String>,
    pub mount_options: Vec<Vec<String>>,
    pub mounted: Vec<PathBuf>,
}

/// Pretends to attach the image at `/dev/loop9` and mounts partitions by
/// copying prepared directory trees into the mount point.
pub struct TreeMountOps {
    pub nodes: Vec<FakeNode>,
    pub log: std::sync::Arc<Mutex<OpsLog>>,
}

impl TreeMountOps {
    pub fn new(nodes: Vec<FakeNode>) -> (Self, std::sync::Arc<Mutex<OpsLog>>) {
        let log = std::sync::Arc::new(Mutex::new(OpsLog::default()));
        (
            Self {
                nodes,
                log: log.clone(),
            },
            log,
        )
    }

    fn node(&self, device: &Path) -> Option<&FakeNode> {
        let name = device.file_name()?.to_string_lossy().to_string();
        self.nodes.iter().find(|n| n.name == name)
    }
}

fn copy_tree(from: &Path, to: &Path) -> std::io::Result<()> {
    for entry in walkdir::WalkDir::new(from).min_depth(1) {
        let entry = entry.map_err(std::io::Error::other)?;
        let rel = entry.path().strip_prefix(from).map_err(std::io::Error::other)?;
        let dest = to.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest)?;
        } else {
            fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

fn empty_dir(dir: &Path) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

fn io_failure(program: &str, err: std::io::Error) -> OsCommandError {
    OsCommandError::Output {
        program: program.to_string(),
        details: err.to_string(),
    }
}

impl BlockDeviceOps for TreeMountOps {
    fn attach(&self, _image: &Path) -> Result<PathBuf, OsCommandError> {
        self.log.lock().expect("lock").calls.push("attach".to_string());
        Ok(PathBuf::from("/dev/loop9"))
    }

    fn partition_devices(&self, _loop_device: &Path) -> Result<Vec<PathBuf>, OsCommandError> {
        Ok(self
            .nodes
            .iter()
            .map(|n| PathBuf::from("/dev").join(&n.name))
            .collect())
    }

    fn probe(&self, device: &Path) -> Result<Option<FsProbe>, OsCommandError> {
        Ok(self.node(device).and_then(|n| n.probe.clone()))
    }

    fn mount(&self, device: &Path, target: &Path, options: &[String]) -> Result<(), OsCommandError> {
        let mut log = self.log.lock().expect("lock");
        log.calls.push(format!("mount {}", device.display()));
        log.mount_options.push(options.to_vec());
        if let Some(source) = self.node(device).and_then(|n| n.source.as_ref()) {
            copy_tree(source, target).map_err(|err| io_failure("mount", err))?;
        }
        log.mounted.push(target.to_path_buf());
        Ok(())
    }

    fn unmount(&self, target: &Path, _lazy: bool) -> Result<(), OsCommandError> {
        let mut log = self.log.lock().expect("lock");
        log.calls.push("umount".to_string());
        empty_dir(target).map_err(|err| io_failure("umount", err))?;
        log.mounted.retain(|m| m != target);
        Ok(())
    }

    fn detach(&self, _loop_device: &Path) -> Result<(), OsCommandError> {
        let mut log = self.log.lock().expect("lock");
        assert!(log.mounted.is_empty(), "detach before unmount");
        log.calls.push("detach".to_string());
        Ok(())
    }
}

/// Count of records per path; used to check exactly-once accounting.
pub fn record_counts(analyses: &[FileAnalysis]) -> HashMap<PathBuf, usize> {
    let mut counts = HashMap::new();
    for a in analyses {
        *counts.entry(a.path.clone()).or_insert(0) += 1;
    }
    counts
}
