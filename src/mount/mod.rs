//! # Mount Module
//!
//! Read-only attachment of a disk image and lifecycle management of the
//! resulting loop device and partition mounts.

pub mod manager;
pub mod ops;

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

pub use manager::{ImageMountManager, MountSettings, with_mounted_image};
pub use ops::{BlockDeviceOps, OsCommandError, SystemBlockOps};

/// Lifecycle of the disk image under analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ImageState {
    Unattached,
    Attached,
    Mounted,
    TornDown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoopDevice {
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FsProbe {
    pub fs_type: String,
    pub uuid: Option<String>,
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Partition {
    pub device: PathBuf,
    /// 0 for the whole loop device, N for `<loop>pN`.
    pub index: u32,
    pub probe: Option<FsProbe>,
    pub mount_point: Option<PathBuf>,
}

impl Partition {
    pub fn is_valid(&self) -> bool {
        self.probe.is_some()
    }

    /// Device node name, e.g. `loop0p1`.
    pub fn name(&self) -> String {
        self.device
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.device.display().to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountPoint {
    pub path: PathBuf,
    pub read_only: bool,
    pub device: PathBuf,
    pub partition_index: u32,
    pub fs_type: String,
}

impl MountPoint {
    pub fn partition_name(&self) -> String {
        self.device
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.device.display().to_string())
    }
}

#[derive(Debug, Error)]
pub enum AttachError {
    #[error("disk image {path} is unusable: {reason}")]
    MalformedImage { path: PathBuf, reason: String },
    #[error("privileged tooling unavailable: {0}")]
    ToolUnavailable(OsCommandError),
    #[error("loop attach failed: {0}")]
    Attach(OsCommandError),
    #[error("partition enumeration failed: {0}")]
    Enumerate(OsCommandError),
    #[error("mount root {0} is a host system location")]
    ForbiddenMountRoot(PathBuf),
    #[error("image has already been torn down")]
    TornDown,
    #[error("no loop device attached")]
    NotAttached,
}

impl AttachError {
    fn from_attach(err: OsCommandError) -> Self {
        match err {
            OsCommandError::Unavailable { .. } => AttachError::ToolUnavailable(err),
            other => AttachError::Attach(other),
        }
    }
}

#[derive(Debug, Error)]
pub enum MountError {
    #[error("partition {0} has no recognized filesystem")]
    NoFilesystem(PathBuf),
    #[error("partition {0} is already mounted")]
    AlreadyMounted(PathBuf),
    #[error("image is not attached")]
    NotAttached,
    #[error("failed to prepare mount point {path}: {source}")]
    MountPoint {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("mount of {device} failed: {source}")]
    Command {
        device: PathBuf,
        source: OsCommandError,
    },
}
