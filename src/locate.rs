//! # Artifact Locator
//!
//! Lazy recursive enumeration of candidate evidence files under a mount
//! point. Each call to [`Locator::iter`] starts a fresh walk, so the
//! sequence is restartable and reflects the tree at iteration time.

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::warn;
use walkdir::{DirEntry, WalkDir};

use crate::constants::RESERVED_PREFIXES;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CandidateFile {
    pub path: PathBuf,
    /// Lowercase, without the leading dot.
    pub extension: String,
    /// Partition the file was found on (device node name).
    pub partition: String,
}

#[derive(Debug, Error)]
#[error("traversal error at {path}: {source}")]
pub struct LocateError {
    pub path: PathBuf,
    #[source]
    pub source: walkdir::Error,
}

/// Normalised extension allow-list: lowercase, leading dot.
#[derive(Debug, Clone, Default)]
pub struct ExtensionFilter {
    suffixes: Vec<String>,
}

impl ExtensionFilter {
    pub fn new<S: AsRef<str>>(extensions: &[S]) -> Self {
        let mut suffixes: Vec<String> = extensions
            .iter()
            .map(|e| e.as_ref().trim().to_ascii_lowercase())
            .filter(|e| !e.is_empty() && e != ".")
            .map(|e| if e.starts_with('.') { e } else { format!(".{e}") })
            .collect();
        suffixes.sort();
        suffixes.dedup();
        Self { suffixes }
    }

    pub fn is_empty(&self) -> bool {
        self.suffixes.is_empty()
    }

    pub fn extend<S: AsRef<str>>(&mut self, extensions: &[S]) {
        let mut all = std::mem::take(&mut self.suffixes);
        all.extend(Self::new(extensions).suffixes);
        *self = Self::new(&all);
    }

    /// Matching suffix without its dot, or `None`. Longest suffix wins.
    pub fn matches(&self, file_name: &str) -> Option<String> {
        let lower = file_name.to_ascii_lowercase();
        self.suffixes
            .iter()
            .filter(|s| lower.ends_with(s.as_str()) && lower.len() > s.len())
            .max_by_key(|s| s.len())
            .map(|s| s.trim_start_matches('.').to_string())
    }

    pub fn suffixes(&self) -> &[String] {
        &self.suffixes
    }
}

#[derive(Debug, Clone)]
pub struct Locator {
    root: PathBuf,
    partition: String,
    filter: ExtensionFilter,
    exclude_system_paths: bool,
}

pub fn locate(
    root: &Path,
    partition: &str,
    filter: &ExtensionFilter,
    exclude_system_paths: bool,
) -> Locator {
    Locator {
        root: root.to_path_buf(),
        partition: partition.to_string(),
        filter: filter.clone(),
        exclude_system_paths,
    }
}

impl Locator {
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Traversal errors are logged and skipped.
    pub fn iter(&self) -> impl Iterator<Item = CandidateFile> + '_ {
        self.iter_with_errors().filter_map(|item| match item {
            Ok(file) => Some(file),
            Err(err) => {
                warn!("{err}; skipping");
                None
            }
        })
    }

    pub fn iter_with_errors(&self) -> impl Iterator<Item = Result<CandidateFile, LocateError>> + '_ {
        WalkDir::new(&self.root)
            .follow_links(false)
            .same_file_system(true)
            .into_iter()
            .filter_entry(move |entry| !self.is_pruned(entry))
            .filter_map(move |item| match item {
                Ok(entry) => self.candidate(&entry).map(Ok),
                Err(source) => Some(Err(LocateError {
                    path: source
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| self.root.clone()),
                    source,
                })),
            })
    }

    fn candidate(&self, entry: &DirEntry) -> Option<CandidateFile> {
        if !entry.file_type().is_file() {
            return None;
        }
        let name = entry.file_name().to_string_lossy();
        let extension = self.filter.matches(&name)?;
        Some(CandidateFile {
            path: entry.path().to_path_buf(),
            extension,
            partition: self.partition.clone(),
        })
    }

    fn is_pruned(&self, entry: &DirEntry) -> bool {
        if !self.exclude_system_paths || !entry.file_type().is_dir() {
            return false;
        }
        match entry.path().strip_prefix(&self.root) {
            Ok(rel) if !rel.as_os_str().is_empty() => is_reserved(rel),
            _ => false,
        }
    }
}

/// True when `rel` (relative to a mount root) equals a reserved prefix.
/// Descendants are never reached because the prefix itself is pruned.
pub fn is_reserved(rel: &Path) -> bool {
    let rel = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join("/");
    RESERVED_PREFIXES.iter().any(|prefix| rel == *prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, b"x").expect("write");
    }

    #[test]
    fn extension_match_is_case_insensitive_suffix() {
        let filter = ExtensionFilter::new(&["txt", ".PDF", ".tar.gz", ".gz"]);
        assert_eq!(filter.matches("Notes.TXT").as_deref(), Some("txt"));
        assert_eq!(filter.matches("report.pdf").as_deref(), Some("pdf"));
        assert_eq!(filter.matches("backup.tar.gz").as_deref(), Some("tar.gz"));
        assert_eq!(filter.matches("txt"), None);
        assert_eq!(filter.matches(".txt"), None);
        assert_eq!(filter.matches("image.png"), None);
    }

    #[test]
    fn excludes_reserved_prefixes_when_requested() {
        let dir = tempfile::tempdir().expect("tempdir");
        touch(dir.path(), "home/alice/notes.txt");
        touch(dir.path(), "usr/share/doc/readme.txt");
        touch(dir.path(), "Windows/System32/license.txt");
        touch(dir.path(), "var/lib/dpkg/status.txt");
        touch(dir.path(), "var/log/syslog.txt");
        let filter = ExtensionFilter::new(&[".txt"]);

        let locator = locate(dir.path(), "loop0p1", &filter, true);
        let mut found: Vec<_> = locator
            .iter()
            .map(|c| c.path.strip_prefix(dir.path()).expect("rel").to_path_buf())
            .collect();
        found.sort();
        assert_eq!(
            found,
            vec![PathBuf::from("home/alice/notes.txt"), PathBuf::from("var/log/syslog.txt")]
        );

        let all = locate(dir.path(), "loop0p1", &filter, false).iter().count();
        assert_eq!(all, 5);
    }

    #[test]
    fn iteration_is_restartable_and_keeps_duplicates() {
        let dir = tempfile::tempdir().expect("tempdir");
        touch(dir.path(), "a/same.txt");
        touch(dir.path(), "b/same.txt");
        let filter = ExtensionFilter::new(&[".txt"]);
        let locator = locate(dir.path(), "loop0", &filter, true);
        let first: Vec<_> = locator.iter().collect();
        let second: Vec<_> = locator.iter().collect();
        assert_eq!(first.len(), 2);
        assert_eq!(first.len(), second.len());
        assert!(first.iter().all(|c| c.partition == "loop0" && c.extension == "txt"));

        touch(dir.path(), "c/new.txt");
        assert_eq!(locator.iter().count(), 3);
    }

    #[test]
    fn missing_root_reports_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let filter = ExtensionFilter::new(&[".txt"]);
        let locator = locate(&dir.path().join("gone"), "loop0", &filter, true);
        let results: Vec<_> = locator.iter_with_errors().collect();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());
        assert_eq!(locator.iter().count(), 0);
    }
}
