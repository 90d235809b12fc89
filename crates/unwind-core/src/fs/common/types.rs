/// Common types and utilities for raw device access
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::{Result, UnwindError};

/// A read-only handle on a block device or image file.
///
/// Reads are positional, so one handle can be shared between threads
/// without any locking around a cursor.
pub struct BlockDevice {
    file: File,
    path: PathBuf,
    size: u64,
}

impl BlockDevice {
    /// Open a block device or image file for shared read access
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|source| UnwindError::DeviceOpen {
            path: path.clone(),
            source,
        })?;

        // Block devices report a zero metadata length, the end offset is reliable
        let size = (&file).seek(SeekFrom::End(0))?;

        tracing::debug!("Opened {} ({} bytes)", path.display(), size);

        Ok(BlockDevice { file, path, size })
    }

    /// Path the device was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the size of the device in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Fill `buf` with exactly `buf.len()` bytes starting at `offset`
    pub fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        if offset.saturating_add(buf.len() as u64) > self.size {
            return Err(UnwindError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "Read beyond end of device: {} > {}",
                    offset.saturating_add(buf.len() as u64),
                    self.size
                ),
            )));
        }
        read_exact_at(&self.file, offset, buf)?;
        Ok(())
    }

    /// Read `length` bytes at an absolute byte offset
    pub fn read_bytes(&self, offset: u64, length: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; length];
        self.read_exact_at(offset, &mut buf)?;
        Ok(buf)
    }

    /// Read a single sector (512 bytes)
    pub fn read_sector(&self, sector: u64) -> Result<Vec<u8>> {
        self.read_bytes(sector * 512, 512)
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut offset: u64, mut buf: &mut [u8]) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "failed to fill whole buffer",
                ))
            }
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// A contiguous on-disk extent, in clusters.
///
/// Decoded ranges always have `start > 0` and `count > 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterRange {
    /// Absolute logical cluster number
    pub start: i64,
    /// Number of clusters
    pub count: u64,
}

impl ClusterRange {
    pub fn new(start: i64, count: u64) -> Self {
        Self { start, count }
    }

    /// One past the last cluster of the extent
    pub fn end(&self) -> i64 {
        self.start + self.count as i64
    }
}
