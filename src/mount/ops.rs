//! # Block Device Operations
//!
//! The privileged OS boundary: loop-device attach/detach, partition node
//! discovery, filesystem probing and read-only mounting. Everything above
//! this trait is testable without root.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use tracing::debug;

use super::FsProbe;

#[derive(Debug, Error)]
pub enum OsCommandError {
    #[error("{program} is not available: {source}")]
    Unavailable {
        program: String,
        source: std::io::Error,
    },
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("{program} {args} failed (exit {code}): {stderr}")]
    Failed {
        program: String,
        args: String,
        code: i32,
        stderr: String,
    },
    #[error("unexpected output from {program}: {details}")]
    Output { program: String, details: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub trait BlockDeviceOps: Send + Sync {
    /// Attach `image` read-only with partition scanning, returning the loop device path.
    fn attach(&self, image: &Path) -> Result<PathBuf, OsCommandError>;
    /// Device nodes belonging to `loop_device`: the whole device first, then partitions.
    fn partition_devices(&self, loop_device: &Path) -> Result<Vec<PathBuf>, OsCommandError>;
    /// Filesystem signature, or `None` when no filesystem is recognized.
    fn probe(&self, device: &Path) -> Result<Option<FsProbe>, OsCommandError>;
    fn mount(&self, device: &Path, target: &Path, options: &[String]) -> Result<(), OsCommandError>;
    fn unmount(&self, target: &Path, lazy: bool) -> Result<(), OsCommandError>;
    fn detach(&self, loop_device: &Path) -> Result<(), OsCommandError>;
}

/// `losetup`/`blkid`/`mount`/`umount` backed implementation.
pub struct SystemBlockOps {
    privilege_command: Option<String>,
    dev_dir: PathBuf,
}

impl SystemBlockOps {
    pub fn new(privilege_command: Option<String>) -> Self {
        Self {
            privilege_command: privilege_command.filter(|p| !p.trim().is_empty()),
            dev_dir: PathBuf::from("/dev"),
        }
    }

    fn command(&self, program: &str) -> Command {
        match &self.privilege_command {
            Some(prefix) => {
                let mut cmd = Command::new(prefix);
                cmd.arg(program);
                cmd
            }
            None => Command::new(program),
        }
    }

    fn run(&self, program: &str, args: &[&str]) -> Result<std::process::Output, OsCommandError> {
        debug!("exec {} {}", program, args.join(" "));
        self.command(program)
            .args(args)
            .output()
            .map_err(|source| {
                if source.kind() == ErrorKind::NotFound {
                    OsCommandError::Unavailable {
                        program: program.to_string(),
                        source,
                    }
                } else {
                    OsCommandError::Spawn {
                        program: program.to_string(),
                        source,
                    }
                }
            })
    }

    fn run_checked(&self, program: &str, args: &[&str]) -> Result<String, OsCommandError> {
        let output = self.run(program, args)?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(OsCommandError::Failed {
                program: program.to_string(),
                args: args.join(" "),
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

impl BlockDeviceOps for SystemBlockOps {
    fn attach(&self, image: &Path) -> Result<PathBuf, OsCommandError> {
        let image = image.to_string_lossy();
        let stdout = self.run_checked(
            "losetup",
            &["--read-only", "--find", "--partscan", "--show", image.as_ref()],
        )?;
        let device = stdout.lines().next().unwrap_or("").trim();
        if device.is_empty() {
            return Err(OsCommandError::Output {
                program: "losetup".to_string(),
                details: "no loop device reported".to_string(),
            });
        }
        Ok(PathBuf::from(device))
    }

    fn partition_devices(&self, loop_device: &Path) -> Result<Vec<PathBuf>, OsCommandError> {
        let base = loop_device
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| OsCommandError::Output {
                program: "losetup".to_string(),
                details: format!("invalid loop device path {}", loop_device.display()),
            })?;

        let mut found = Vec::new();
        for entry in std::fs::read_dir(&self.dev_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(number) = loop_partition_number(&base, &name) {
                found.push((number, entry.path()));
            }
        }
        found.sort();
        Ok(found.into_iter().map(|(_, path)| path).collect())
    }

    fn probe(&self, device: &Path) -> Result<Option<FsProbe>, OsCommandError> {
        let device = device.to_string_lossy();
        let output = self.run("blkid", &["-o", "export", device.as_ref()])?;
        match output.status.code() {
            Some(0) => Ok(parse_blkid_export(&String::from_utf8_lossy(&output.stdout))),
            // blkid exits 2 when nothing could be identified.
            Some(2) => Ok(None),
            code => Err(OsCommandError::Failed {
                program: "blkid".to_string(),
                args: device.to_string(),
                code: code.unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
        }
    }

    fn mount(&self, device: &Path, target: &Path, options: &[String]) -> Result<(), OsCommandError> {
        let opts = options.join(",");
        let device = device.to_string_lossy();
        let target = target.to_string_lossy();
        self.run_checked("mount", &["-o", &opts, device.as_ref(), target.as_ref()])?;
        Ok(())
    }

    fn unmount(&self, target: &Path, lazy: bool) -> Result<(), OsCommandError> {
        let target = target.to_string_lossy();
        if lazy {
            self.run_checked("umount", &["-l", target.as_ref()])?;
        } else {
            self.run_checked("umount", &[target.as_ref()])?;
        }
        Ok(())
    }

    fn detach(&self, loop_device: &Path) -> Result<(), OsCommandError> {
        let device = loop_device.to_string_lossy();
        self.run_checked("losetup", &["-d", device.as_ref()])?;
        Ok(())
    }
}

/// Partition number of `name` relative to loop device `base`: `0` for the
/// whole device, `N` for `<base>pN`. `loop1` does not claim `loop10`.
pub fn loop_partition_number(base: &str, name: &str) -> Option<u32> {
    if name == base {
        return Some(0);
    }
    let rest = name.strip_prefix(base)?.strip_prefix('p')?;
    if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    rest.parse().ok()
}

/// Parse `blkid -o export` output. Only `TYPE` marks a filesystem;
/// `PTTYPE` alone describes a partition table.
pub fn parse_blkid_export(output: &str) -> Option<FsProbe> {
    let mut fs_type = None;
    let mut uuid = None;
    let mut label = None;
    for line in output.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().to_string();
        if value.is_empty() {
            continue;
        }
        match key.trim() {
            "TYPE" => fs_type = Some(value),
            "UUID" => uuid = Some(value),
            "LABEL" => label = Some(value),
            _ => {}
        }
    }
    fs_type.map(|fs_type| FsProbe {
        fs_type,
        uuid,
        label,
    })
}
