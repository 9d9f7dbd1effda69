//! # Utility Module
//!
//! Glue between CLI options, configuration and the library: output
//! directory checks, extension allow-lists and backend selection.

use std::fs::OpenOptions;
use std::path::Path;

use anyhow::{Result, anyhow};
use tracing::warn;

use crate::cli::{CliOptions, LogFormat};
use crate::config::Config;
use crate::locate::ExtensionFilter;
use crate::metadata::MetadataBackendKind;

/// Convert CLI log format to internal enum
pub fn backend_from_cli(format: LogFormat) -> MetadataBackendKind {
    match format {
        LogFormat::Text => MetadataBackendKind::Text,
        LogFormat::Jsonl => MetadataBackendKind::Jsonl,
    }
}

/// Ensure output directory exists and is writable, warning on unsafe permissions.
pub fn ensure_output_dir(path: &Path) -> Result<()> {
    if path.exists() {
        let metadata = std::fs::metadata(path)?;
        if !metadata.is_dir() {
            return Err(anyhow!("output path is not a directory: {}", path.display()));
        }
    } else {
        std::fs::create_dir_all(path)?;
    }
    let metadata = std::fs::metadata(path)?;

    let probe_path = path.join(".evidence_intake_write_probe");
    match OpenOptions::new().write(true).create(true).truncate(true).open(&probe_path) {
        Ok(_) => {
            let _ = std::fs::remove_file(&probe_path);
        }
        Err(err) => {
            return Err(anyhow!(
                "output directory is not writable: {} ({})",
                path.display(),
                err
            ));
        }
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = metadata.permissions().mode();
        if mode & 0o002 != 0 {
            warn!("output directory is world-writable: {}", path.display());
        }
    }
    #[cfg(not(unix))]
    let _ = metadata;

    Ok(())
}

/// The output directory must not live inside the image's mount tree.
pub fn check_output_outside(output: &Path, mount_base: &Path) -> Result<()> {
    let output = output.canonicalize().unwrap_or_else(|_| output.to_path_buf());
    let mount_base = mount_base
        .canonicalize()
        .unwrap_or_else(|_| mount_base.to_path_buf());
    if output.starts_with(&mount_base) {
        return Err(anyhow!(
            "output directory {} is inside the mount base {}",
            output.display(),
            mount_base.display()
        ));
    }
    Ok(())
}

/// Extensions analyzed for PII: the base list, plus the extended list with
/// `-x` and raster images with `-o`.
pub fn analysis_filter(cfg: &Config, opts: &CliOptions) -> ExtensionFilter {
    let mut filter = ExtensionFilter::new(&cfg.base_extensions);
    if opts.extend {
        filter.extend(&cfg.extended_extensions);
    }
    if opts.ocr {
        filter.extend(&cfg.image_extensions);
    }
    filter
}

pub fn email_filter(cfg: &Config) -> ExtensionFilter {
    ExtensionFilter::new(&cfg.email_extensions)
}

/// Loop setup and mounting need root unless a privilege command is set.
#[cfg(unix)]
pub fn running_as_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
pub fn running_as_root() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config;
    use clap::Parser;

    #[test]
    fn analysis_filter_grows_with_flags() {
        let cfg = load_config(None).expect("config").config;
        let base = CliOptions::try_parse_from(["evidence-intake", "disk.img"]).expect("parse");
        let filter = analysis_filter(&cfg, &base);
        assert!(filter.matches("a.txt").is_some());
        assert!(filter.matches("a.csv").is_none());
        assert!(filter.matches("a.png").is_none());

        let wide = CliOptions::try_parse_from(["evidence-intake", "disk.img", "-x", "-o"]).expect("parse");
        let filter = analysis_filter(&cfg, &wide);
        assert!(filter.matches("a.csv").is_some());
        assert!(filter.matches("a.PNG").is_some());
    }

    #[test]
    fn output_dir_is_created_and_probed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("nested/out");
        ensure_output_dir(&out).expect("ensure");
        assert!(out.is_dir());
        assert!(!out.join(".evidence_intake_write_probe").exists());

        let file = dir.path().join("file");
        std::fs::write(&file, b"x").expect("write");
        assert!(ensure_output_dir(&file).is_err());
    }

    #[test]
    fn output_inside_mount_base_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let base = dir.path().join("mnt");
        assert!(check_output_outside(&base.join("out"), &base).is_err());
        assert!(check_output_outside(&dir.path().join("out"), &base).is_ok());
    }
}
