//! # Image Mount Manager
//!
//! Drives the image through `Unattached -> Attached -> Mounted -> TornDown`.
//! Attach failures are fatal; a partition that fails to mount is logged and
//! skipped. `cleanup` unmounts everything it mounted, removes the mount
//! directories it created and detaches the loop device. It is idempotent
//! and also runs on drop.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::constants::FORBIDDEN_MOUNT_BASES;
use crate::evidence;

use super::{
    AttachError, BlockDeviceOps, FsProbe, ImageState, LoopDevice, MountError, MountPoint,
    Partition,
};

#[derive(Debug, Clone)]
pub struct MountSettings {
    /// Private per-run directory; partitions mount at `<mount_root>/part<N>`.
    pub mount_root: PathBuf,
    pub options: Vec<String>,
    /// Extra options keyed by filesystem type (e.g. `ext4: [noload]`).
    pub fs_options: BTreeMap<String, Vec<String>>,
}

impl MountSettings {
    pub fn from_config(cfg: &crate::config::Config) -> Self {
        Self {
            mount_root: cfg.mount_base.join(&cfg.run_id),
            options: cfg.mount_options.clone(),
            fs_options: cfg.fs_mount_options.clone(),
        }
    }

    /// Mount options for `fs_type`, always led by `ro`.
    pub fn options_for(&self, fs_type: &str) -> Vec<String> {
        let mut opts = vec!["ro".to_string()];
        let extra = self
            .fs_options
            .get(&fs_type.to_ascii_lowercase())
            .into_iter()
            .flatten();
        for opt in self.options.iter().chain(extra) {
            let opt = opt.trim();
            if opt.is_empty() || opt == "rw" || opts.iter().any(|o| o == opt) {
                continue;
            }
            opts.push(opt.to_string());
        }
        opts
    }
}

pub struct ImageMountManager {
    image: PathBuf,
    ops: Box<dyn BlockDeviceOps>,
    settings: MountSettings,
    state: ImageState,
    loop_device: Option<LoopDevice>,
    partitions: Vec<Partition>,
    mounts: Vec<MountPoint>,
    created_dirs: Vec<PathBuf>,
}

impl ImageMountManager {
    pub fn new(image: &Path, ops: Box<dyn BlockDeviceOps>, settings: MountSettings) -> Self {
        Self {
            image: image.to_path_buf(),
            ops,
            settings,
            state: ImageState::Unattached,
            loop_device: None,
            partitions: Vec::new(),
            mounts: Vec::new(),
            created_dirs: Vec::new(),
        }
    }

    pub fn image(&self) -> &Path {
        &self.image
    }

    pub fn state(&self) -> ImageState {
        self.state
    }

    pub fn loop_device(&self) -> Option<&LoopDevice> {
        self.loop_device.as_ref()
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    pub fn mounts(&self) -> &[MountPoint] {
        &self.mounts
    }

    /// Attach the image read-only. Returns the existing device when already attached.
    pub fn attach(&mut self) -> Result<LoopDevice, AttachError> {
        match self.state {
            ImageState::TornDown => return Err(AttachError::TornDown),
            ImageState::Attached | ImageState::Mounted => {
                if let Some(device) = &self.loop_device {
                    return Ok(device.clone());
                }
            }
            ImageState::Unattached => {}
        }

        check_mount_root(&self.settings.mount_root)?;
        evidence::check_image(&self.image).map_err(|err| AttachError::MalformedImage {
            path: self.image.clone(),
            reason: err.to_string(),
        })?;

        let path = self.ops.attach(&self.image).map_err(AttachError::from_attach)?;
        let device = LoopDevice { path };
        info!(
            "loop device attached: {} -> {}",
            self.image.display(),
            device.path.display()
        );
        self.loop_device = Some(device.clone());
        self.state = ImageState::Attached;
        Ok(device)
    }

    pub fn enumerate_partitions(&mut self) -> Result<Vec<Partition>, AttachError> {
        let device = self.loop_device.as_ref().ok_or(AttachError::NotAttached)?;
        let nodes = self
            .ops
            .partition_devices(&device.path)
            .map_err(AttachError::Enumerate)?;
        let base = device
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        self.partitions = nodes
            .into_iter()
            .filter_map(|node| {
                let name = node
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                let Some(index) = super::ops::loop_partition_number(&base, &name) else {
                    warn!("device node {} does not belong to {base}; skipping", node.display());
                    return None;
                };
                Some(Partition {
                    index,
                    device: node,
                    probe: None,
                    mount_point: None,
                })
            })
            .collect();
        debug!("found {} device node(s) for {}", self.partitions.len(), device.path.display());
        Ok(self.partitions.clone())
    }

    pub fn probe_filesystem(&self, partition: &Partition) -> Option<FsProbe> {
        match self.ops.probe(&partition.device) {
            Ok(probe) => probe,
            Err(err) => {
                warn!("filesystem probe failed for {}: {err}", partition.device.display());
                None
            }
        }
    }

    pub fn validate_filesystem(&self, partition: &Partition) -> bool {
        self.probe_filesystem(partition).is_some()
    }

    pub fn mount_read_only(&mut self, partition: &Partition) -> Result<MountPoint, MountError> {
        if !matches!(self.state, ImageState::Attached | ImageState::Mounted) {
            return Err(MountError::NotAttached);
        }
        let probe = partition
            .probe
            .as_ref()
            .ok_or_else(|| MountError::NoFilesystem(partition.device.clone()))?;
        if self.mounts.iter().any(|m| m.device == partition.device) {
            return Err(MountError::AlreadyMounted(partition.device.clone()));
        }

        let target = self.settings.mount_root.join(format!("part{}", partition.index));
        self.create_dir_tracked(&target)
            .map_err(|source| MountError::MountPoint {
                path: target.clone(),
                source,
            })?;

        let options = self.settings.options_for(&probe.fs_type);
        if let Err(source) = self.ops.mount(&partition.device, &target, &options) {
            self.remove_created_dir(&target);
            return Err(MountError::Command {
                device: partition.device.clone(),
                source,
            });
        }

        let mount = MountPoint {
            path: target,
            read_only: true,
            device: partition.device.clone(),
            partition_index: partition.index,
            fs_type: probe.fs_type.clone(),
        };
        info!(
            "partition {} ({}) mounted read-only at {}",
            partition.device.display(),
            probe.fs_type,
            mount.path.display()
        );
        self.mounts.push(mount.clone());
        if let Some(p) = self.partitions.iter_mut().find(|p| p.device == partition.device) {
            p.mount_point = Some(mount.path.clone());
        }
        self.state = ImageState::Mounted;
        Ok(mount)
    }

    /// Probe and mount every enumerated partition. Returns the active mounts.
    pub fn mount_all(&mut self) -> Vec<MountPoint> {
        let mut partitions = std::mem::take(&mut self.partitions);
        for partition in partitions.iter_mut() {
            partition.probe = self.probe_filesystem(partition);
        }
        self.partitions = partitions.clone();

        for partition in &partitions {
            if !partition.is_valid() {
                warn!(
                    "partition {} has no recognized filesystem; skipping",
                    partition.device.display()
                );
                continue;
            }
            if let Err(err) = self.mount_read_only(partition) {
                error!("unable to mount partition {}: {err}; skipping", partition.device.display());
            }
        }
        if self.mounts.is_empty() {
            warn!("no partition of {} could be mounted", self.image.display());
        }
        self.mounts.clone()
    }

    /// Unmount everything, remove created directories, detach the loop device.
    pub fn cleanup(&mut self) {
        if self.state == ImageState::TornDown && self.loop_device.is_none() && self.mounts.is_empty()
        {
            debug!("cleanup already complete for {}", self.image.display());
            return;
        }

        while let Some(mount) = self.mounts.pop() {
            match self.ops.unmount(&mount.path, false) {
                Ok(()) => info!("unmounted {}", mount.path.display()),
                Err(err) => {
                    warn!("unmount of {} failed: {err}; retrying lazily", mount.path.display());
                    match self.ops.unmount(&mount.path, true) {
                        Ok(()) => info!("lazily unmounted {}", mount.path.display()),
                        Err(err) => error!("unable to unmount {}: {err}", mount.path.display()),
                    }
                }
            }
        }
        for partition in &mut self.partitions {
            partition.mount_point = None;
        }

        while let Some(dir) = self.created_dirs.pop() {
            self.remove_dir_quiet(&dir);
        }

        if let Some(device) = self.loop_device.take() {
            match self.ops.detach(&device.path) {
                Ok(()) => info!("loop device {} detached", device.path.display()),
                Err(err) => error!("error detaching loop device {}: {err}", device.path.display()),
            }
        }

        self.state = ImageState::TornDown;
    }

    fn create_dir_tracked(&mut self, target: &Path) -> std::io::Result<()> {
        let mut missing = Vec::new();
        let mut cursor = Some(target);
        while let Some(dir) = cursor {
            if dir.exists() {
                break;
            }
            missing.push(dir.to_path_buf());
            cursor = dir.parent();
        }
        std::fs::create_dir_all(target)?;
        // Outermost first so cleanup pops innermost first.
        self.created_dirs.extend(missing.into_iter().rev());
        Ok(())
    }

    fn remove_created_dir(&mut self, target: &Path) {
        if let Some(pos) = self.created_dirs.iter().position(|d| d == target) {
            self.created_dirs.remove(pos);
            self.remove_dir_quiet(target);
        }
    }

    fn remove_dir_quiet(&self, dir: &Path) {
        if let Err(err) = std::fs::remove_dir(dir) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!("could not remove mount directory {}: {err}", dir.display());
            }
        }
    }
}

impl Drop for ImageMountManager {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn check_mount_root(root: &Path) -> Result<(), AttachError> {
    let forbidden = |p: &Path| FORBIDDEN_MOUNT_BASES.iter().any(|f| p == Path::new(f));
    if root.as_os_str().is_empty() || forbidden(root) {
        return Err(AttachError::ForbiddenMountRoot(root.to_path_buf()));
    }
    if let Ok(canonical) = root.canonicalize() {
        if forbidden(&canonical) {
            return Err(AttachError::ForbiddenMountRoot(root.to_path_buf()));
        }
    }
    Ok(())
}

struct TeardownGuard<'a> {
    manager: &'a mut ImageMountManager,
}

impl Drop for TeardownGuard<'_> {
    fn drop(&mut self) {
        self.manager.cleanup();
    }
}

/// Attach, mount every valid partition, run `analysis`, and tear down on
/// every exit path including unwinding panics. Only attach/enumeration
/// failures are returned as errors.
pub fn with_mounted_image<T, F>(manager: &mut ImageMountManager, analysis: F) -> Result<T, AttachError>
where
    F: FnOnce(&[MountPoint], &[Partition]) -> T,
{
    let mut guard = TeardownGuard { manager };
    guard.manager.attach()?;
    guard.manager.enumerate_partitions()?;
    let mounts = guard.manager.mount_all();
    let partitions = guard.manager.partitions().to_vec();
    Ok(analysis(&mounts, &partitions))
}
