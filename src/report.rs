//! Run report: `report.json` for tooling and `report.txt` for people.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::aggregate::AggregateReport;
use crate::constants::{REPORT_JSON_NAME, REPORT_TEXT_NAME};
use crate::techinfo::PartitionInfo;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Author {
    pub name: Option<String>,
    pub surname: Option<String>,
    pub nr: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageDigest {
    pub before: String,
    pub after: Option<String>,
}

impl ImageDigest {
    pub fn unchanged(&self) -> Option<bool> {
        self.after.as_ref().map(|after| *after == self.before)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub tool_version: String,
    pub run_id: String,
    pub config_hash: String,
    pub generated_at: String,
    pub author: Author,
    pub image_name: String,
    pub image_path: PathBuf,
    pub image_sha256: Option<ImageDigest>,
    pub modes: Vec<String>,
    pub files_located: u64,
    pub cancelled: bool,
    pub partitions: Vec<PartitionInfo>,
    pub aggregate: AggregateReport,
}

pub fn write_report(output_dir: &Path, report: &Report) -> Result<(), ReportError> {
    fs::create_dir_all(output_dir)?;
    let json = serde_json::to_vec_pretty(report)?;
    fs::write(output_dir.join(REPORT_JSON_NAME), json)?;
    fs::write(output_dir.join(REPORT_TEXT_NAME), render_text(report))?;
    Ok(())
}

fn or_dash(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("-")
}

pub fn render_text(report: &Report) -> String {
    let mut out = String::new();
    let agg = &report.aggregate;
    // Writing to a String cannot fail.
    let _ = writeln!(out, "Disk Image Analysis Report for Personal Data");
    let _ = writeln!(
        out,
        "Author: {} {}",
        or_dash(&report.author.name),
        or_dash(&report.author.surname)
    );
    let _ = writeln!(out, "Nr: {}", or_dash(&report.author.nr));
    let _ = writeln!(out, "Disk Image: {}", report.image_name);
    let _ = writeln!(out, "Date and time of generation: {}", report.generated_at);
    let _ = writeln!(out, "Run: {} (config {})", report.run_id, report.config_hash);
    if let Some(digest) = &report.image_sha256 {
        let _ = writeln!(out, "Image SHA-256: {}", digest.before);
        match digest.unchanged() {
            Some(true) => {
                let _ = writeln!(out, "Image SHA-256 after teardown: unchanged");
            }
            Some(false) => {
                let _ = writeln!(out, "Image SHA-256 after teardown: CHANGED ({})", or_dash(&digest.after));
            }
            None => {}
        }
    }
    if report.cancelled {
        let _ = writeln!(out, "Run was interrupted; unprocessed files are recorded as cancelled.");
    }

    if !report.partitions.is_empty() {
        let _ = writeln!(out, "\nPartition and Operating System Analysis");
        for p in &report.partitions {
            let _ = writeln!(out, "Partition: {}", p.name);
            let _ = writeln!(out, "  Filesystem: {}", or_dash(&p.fs_type));
            if p.uuid.is_some() {
                let _ = writeln!(out, "  UUID: {}", or_dash(&p.uuid));
            }
            if p.label.is_some() {
                let _ = writeln!(out, "  Label: {}", or_dash(&p.label));
            }
            let _ = writeln!(out, "  Operating System: {}", or_dash(&p.operating_system));
        }
    }

    let _ = writeln!(out, "\nPersonal Data");
    let _ = writeln!(
        out,
        "Files located: {}  analyzed: {}  failed: {}",
        report.files_located,
        agg.files_succeeded,
        agg.files_failed
    );
    if agg.entity_counts.is_empty() {
        let _ = writeln!(out, "No personal data detected.");
    }
    for (label, count) in &agg.entity_counts {
        let _ = writeln!(out, "{label}: {count}");
    }
    if !agg.failure_counts.is_empty() {
        let _ = writeln!(out, "\nFailures");
        for (kind, count) in &agg.failure_counts {
            let _ = writeln!(out, "{kind}: {count}");
        }
    }

    if !agg.email_addresses.is_empty() {
        let _ = writeln!(out, "\nEmail addresses ({})", agg.email_addresses.len());
        for address in &agg.email_addresses {
            let _ = writeln!(out, "{address}");
        }
    }

    if !agg.social_counts.is_empty() {
        let _ = writeln!(out, "\nSocial media artifacts");
        for (browser, hosts) in &agg.social_counts {
            let _ = writeln!(out, "{browser}");
            for (host, count) in hosts {
                let _ = writeln!(out, "  {host}: {count}");
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> Report {
        let mut aggregate = AggregateReport::default();
        aggregate.entity_counts.insert("PERSON".to_string(), 2);
        aggregate.files_succeeded = 1;
        aggregate.add_emails(["jane@example.com"]);
        Report {
            tool_version: "0.1.0".to_string(),
            run_id: "run1".to_string(),
            config_hash: "abc".to_string(),
            generated_at: "2024-01-01 00:00:00".to_string(),
            author: Author {
                name: Some("Anna".to_string()),
                surname: Some("Nowak".to_string()),
                nr: Some("42".to_string()),
            },
            image_name: "disk.img".to_string(),
            image_path: PathBuf::from("/evidence/disk.img"),
            image_sha256: Some(ImageDigest {
                before: "ff".to_string(),
                after: Some("ff".to_string()),
            }),
            modes: vec!["analyze".to_string()],
            files_located: 1,
            cancelled: false,
            partitions: Vec::new(),
            aggregate,
        }
    }

    #[test]
    fn text_report_lists_findings() {
        let text = render_text(&report());
        assert!(text.contains("Author: Anna Nowak"));
        assert!(text.contains("Nr: 42"));
        assert!(text.contains("PERSON: 2"));
        assert!(text.contains("jane@example.com"));
        assert!(text.contains("unchanged"));
    }

    #[test]
    fn writes_both_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_report(dir.path(), &report()).expect("write");
        let json: serde_json::Value =
            serde_json::from_slice(&fs::read(dir.path().join("report.json")).expect("read")).expect("json");
        assert_eq!(json["aggregate"]["entity_counts"]["PERSON"], 2);
        assert!(dir.path().join("report.txt").exists());
    }
}
