//! Per-partition technical details: filesystem probe results plus the
//! operating system installed on the partition, when recognisable.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::mount::{MountPoint, Partition};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionInfo {
    pub name: String,
    pub device: PathBuf,
    pub fs_type: Option<String>,
    pub uuid: Option<String>,
    pub label: Option<String>,
    pub mount_point: Option<PathBuf>,
    pub operating_system: Option<String>,
}

pub fn collect_partition_info(partitions: &[Partition], mounts: &[MountPoint]) -> Vec<PartitionInfo> {
    partitions
        .iter()
        .map(|partition| {
            let mount = mounts.iter().find(|m| m.device == partition.device);
            let probe = partition.probe.as_ref();
            PartitionInfo {
                name: partition.name(),
                device: partition.device.clone(),
                fs_type: probe.map(|p| p.fs_type.clone()),
                uuid: probe.and_then(|p| p.uuid.clone()),
                label: probe.and_then(|p| p.label.clone()),
                mount_point: mount.map(|m| m.path.clone()),
                operating_system: mount.and_then(|m| detect_os(&m.path)),
            }
        })
        .collect()
}

/// Identify the OS from files on a mounted root.
pub fn detect_os(root: &Path) -> Option<String> {
    for rel in ["etc/os-release", "usr/lib/os-release"] {
        if let Ok(text) = fs::read_to_string(root.join(rel)) {
            if let Some(name) = parse_os_release(&text) {
                return Some(name);
            }
        }
    }
    if find_dir_ci(root, &["windows", "system32"]).is_some() {
        return Some("Windows".to_string());
    }
    if root.join("System/Library/CoreServices/SystemVersion.plist").is_file() {
        return Some("macOS".to_string());
    }
    debug!("no operating system recognised under {}", root.display());
    None
}

/// `PRETTY_NAME`, falling back to `NAME`.
pub fn parse_os_release(text: &str) -> Option<String> {
    let mut name = None;
    for line in text.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"').trim_matches('\'').to_string();
        if value.is_empty() {
            continue;
        }
        match key.trim() {
            "PRETTY_NAME" => return Some(value),
            "NAME" => name = Some(value),
            _ => {}
        }
    }
    name
}

/// Case-insensitive directory lookup, as NTFS names are case-preserving.
fn find_dir_ci(root: &Path, components: &[&str]) -> Option<PathBuf> {
    let mut current = root.to_path_buf();
    for component in components {
        let entry = fs::read_dir(&current).ok()?.filter_map(Result::ok).find(|entry| {
            entry.file_name().to_string_lossy().eq_ignore_ascii_case(component)
                && entry.file_type().map(|t| t.is_dir()).unwrap_or(false)
        })?;
        current = entry.path();
    }
    Some(current)
}
