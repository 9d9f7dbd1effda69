//! Disk image source checks and hashing.
//!
//! The image is only ever opened read-only. Container formats that cannot
//! be exposed through a loop device are rejected up front.

use std::fs::File;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;

/// EnCase/EWF segment signature.
const EWF_SIGNATURE: &[u8] = b"EVF\x09\x0d\x0a\xff\x00";
/// Advanced Forensic Format signature.
const AFF_SIGNATURE: &[u8] = b"AFF10\r\n\0";

#[derive(Debug, Error)]
pub enum EvidenceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a regular file: {0}")]
    NotAFile(PathBuf),
    #[error("image is empty: {0}")]
    Empty(PathBuf),
    #[error("unsupported evidence type: {0}")]
    Unsupported(String),
}

pub trait EvidenceSource: Send + Sync {
    fn len(&self) -> u64;
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, EvidenceError>;
}

pub struct RawImageSource {
    file: File,
    len: u64,
    #[cfg(not(unix))]
    lock: std::sync::Mutex<()>,
}

impl RawImageSource {
    pub fn open(path: &Path) -> Result<Self, EvidenceError> {
        let meta = std::fs::metadata(path)?;
        if !meta.is_file() {
            return Err(EvidenceError::NotAFile(path.to_path_buf()));
        }
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        if len == 0 {
            return Err(EvidenceError::Empty(path.to_path_buf()));
        }
        Ok(Self {
            file,
            len,
            #[cfg(not(unix))]
            lock: std::sync::Mutex::new(()),
        })
    }
}

impl EvidenceSource for RawImageSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, EvidenceError> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            Ok(self.file.read_at(buf, offset)?)
        }
        #[cfg(not(unix))]
        {
            use std::io::{Read, Seek, SeekFrom};
            let _guard = self
                .lock
                .lock()
                .map_err(|_| EvidenceError::Unsupported("poisoned image lock".to_string()))?;
            let mut f = &self.file;
            f.seek(SeekFrom::Start(offset))?;
            Ok(f.read(buf)?)
        }
    }
}

/// Open `path` and make sure it is a raw image a loop device can expose.
pub fn check_image(path: &Path) -> Result<RawImageSource, EvidenceError> {
    let source = RawImageSource::open(path)?;
    let mut header = [0u8; 8];
    let n = source.read_at(0, &mut header)?;
    if n == header.len() {
        if header == EWF_SIGNATURE {
            return Err(EvidenceError::Unsupported(
                "EWF (E01) container; convert to a raw image first".to_string(),
            ));
        }
        if header == AFF_SIGNATURE {
            return Err(EvidenceError::Unsupported(
                "AFF container; convert to a raw image first".to_string(),
            ));
        }
    }
    Ok(source)
}

pub fn compute_sha256(source: &dyn EvidenceSource, buf_size: usize) -> Result<String, EvidenceError> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; buf_size.max(4096)];
    let mut offset = 0u64;
    while offset < source.len() {
        let n = source.read_at(offset, &mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        offset += n as u64;
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_missing_images() {
        let dir = tempfile::tempdir().expect("tempdir");
        let empty = dir.path().join("empty.img");
        std::fs::write(&empty, b"").expect("write");
        assert!(matches!(check_image(&empty), Err(EvidenceError::Empty(_))));
        assert!(matches!(
            check_image(&dir.path().join("missing.img")),
            Err(EvidenceError::Io(_))
        ));
        assert!(matches!(check_image(dir.path()), Err(EvidenceError::NotAFile(_))));
    }

    #[test]
    fn rejects_ewf_container() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("disk.E01");
        let mut data = EWF_SIGNATURE.to_vec();
        data.extend_from_slice(&[0u8; 64]);
        std::fs::write(&path, data).expect("write");
        assert!(matches!(check_image(&path), Err(EvidenceError::Unsupported(_))));
    }

    #[test]
    fn hashes_image_contents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("disk.img");
        std::fs::write(&path, b"abc").expect("write");
        let source = check_image(&path).expect("source");
        assert_eq!(
            compute_sha256(&source, 1).expect("hash"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
