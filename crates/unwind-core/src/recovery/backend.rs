//! Recovery backends: the component that actually writes file content

use anyhow::{bail, Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::fs::common::BlockDevice;
use crate::fs::ntfs::MftEntry;

/// Copy unit for device reads
const COPY_CHUNK_SIZE: usize = 1024 * 1024;

/// Writes the content of one MFT entry to a destination file.
///
/// Implementations only produce the file; measuring and classifying what was
/// written is left to the caller. Called concurrently from worker threads.
pub trait RecoveryBackend: Send + Sync {
    fn name(&self) -> &str;

    fn recover_entry(&self, entry: &MftEntry, destination: &Path) -> Result<()>;
}

/// Delegates to `ntfsundelete` from the ntfs-3g tools
#[derive(Debug, Clone)]
pub struct NtfsUndeleteBackend {
    device: PathBuf,
    program: String,
}

impl NtfsUndeleteBackend {
    pub fn new(device: impl Into<PathBuf>) -> Self {
        Self {
            device: device.into(),
            program: "ntfsundelete".to_string(),
        }
    }

    /// Use a different executable than `ntfsundelete` from `PATH`
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn command(&self, entry_id: u64, destination: &Path) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg(&self.device)
            .arg("--undelete")
            .arg("--inodes")
            .arg(entry_id.to_string())
            .arg("--output")
            .arg(destination)
            .arg("--force");
        command
    }
}

impl RecoveryBackend for NtfsUndeleteBackend {
    fn name(&self) -> &str {
        "ntfsundelete"
    }

    fn recover_entry(&self, entry: &MftEntry, destination: &Path) -> Result<()> {
        let output = self
            .command(entry.id, destination)
            .output()
            .with_context(|| format!("Failed to run {}", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("ntfsundelete failed: {}", stderr.trim());
        }

        Ok(())
    }
}

/// Copies the clusters listed in an entry's data runs straight off the device
pub struct DataRunBackend {
    device: BlockDevice,
    cluster_size: u64,
}

impl DataRunBackend {
    pub fn new(device: BlockDevice, cluster_size: u64) -> Self {
        Self {
            device,
            cluster_size,
        }
    }

    pub fn open(device_path: &Path, cluster_size: u64) -> Result<Self> {
        let device = BlockDevice::open(device_path)?;
        Ok(Self::new(device, cluster_size))
    }
}

impl RecoveryBackend for DataRunBackend {
    fn name(&self) -> &str {
        "data-runs"
    }

    fn recover_entry(&self, entry: &MftEntry, destination: &Path) -> Result<()> {
        if entry.data_runs.is_empty() {
            bail!("Entry {} has no data runs", entry.id);
        }

        let mut output = BufWriter::new(
            File::create(destination)
                .with_context(|| format!("Failed to create {}", destination.display()))?,
        );
        let mut buffer = vec![0u8; COPY_CHUNK_SIZE];
        let device_size = self.device.size();

        for run in &entry.data_runs {
            let start = (run.start as u64).saturating_mul(self.cluster_size);
            if start >= device_size {
                tracing::warn!(
                    "Entry {}: run at LCN {} starts beyond the device end",
                    entry.id,
                    run.start
                );
                continue;
            }

            let run_bytes = run.count.saturating_mul(self.cluster_size);
            let end = start.saturating_add(run_bytes).min(device_size);
            let mut offset = start;

            while offset < end {
                let chunk = ((end - offset) as usize).min(COPY_CHUNK_SIZE);
                self.device.read_exact_at(offset, &mut buffer[..chunk])?;
                output.write_all(&buffer[..chunk])?;
                offset += chunk as u64;
            }

            tracing::debug!(
                "Entry {}: copied clusters {}..{}",
                entry.id,
                run.start,
                run.end()
            );
        }

        output.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::common::ClusterRange;
    use crate::fs::ntfs::EntryTimestamps;
    use tempfile::NamedTempFile;

    fn entry_with_runs(runs: Vec<ClusterRange>) -> MftEntry {
        MftEntry {
            id: 64,
            parent_id: 5,
            name: "photo.jpg".to_string(),
            size: 300,
            is_directory: false,
            is_deleted: true,
            data_runs: runs,
            timestamps: EntryTimestamps::default(),
        }
    }

    #[test]
    fn test_data_run_copy_follows_run_order() {
        // 8 clusters of 128 bytes, each filled with its cluster number
        let mut image = NamedTempFile::new().unwrap();
        for cluster in 0..8u8 {
            image.write_all(&[cluster; 128]).unwrap();
        }
        image.flush().unwrap();

        let backend = DataRunBackend::open(image.path(), 128).unwrap();
        let entry = entry_with_runs(vec![ClusterRange::new(5, 2), ClusterRange::new(2, 1)]);

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("photo.jpg");
        backend.recover_entry(&entry, &dest).unwrap();

        let data = std::fs::read(&dest).unwrap();
        assert_eq!(data.len(), 3 * 128);
        assert!(data[..256].iter().enumerate().all(|(i, &b)| b == 5 + (i / 128) as u8));
        assert!(data[256..].iter().all(|&b| b == 2));
    }

    #[test]
    fn test_data_run_copy_clipped_to_device() {
        let mut image = NamedTempFile::new().unwrap();
        image.write_all(&[0xAB; 512]).unwrap();
        image.flush().unwrap();

        let backend = DataRunBackend::open(image.path(), 128).unwrap();
        let entry = entry_with_runs(vec![ClusterRange::new(3, 4), ClusterRange::new(40, 1)]);

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("clipped.bin");
        backend.recover_entry(&entry, &dest).unwrap();

        assert_eq!(std::fs::metadata(&dest).unwrap().len(), 128);
    }

    #[test]
    fn test_data_run_backend_requires_runs() {
        let image = NamedTempFile::new().unwrap();
        let backend = DataRunBackend::open(image.path(), 4096).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("none.bin");

        assert!(backend.recover_entry(&entry_with_runs(Vec::new()), &dest).is_err());
        assert!(!dest.exists());
    }

    #[test]
    fn test_ntfsundelete_missing_program() {
        let backend =
            NtfsUndeleteBackend::new("/dev/null").with_program("/nonexistent/ntfsundelete");
        let dir = tempfile::tempdir().unwrap();
        let err = backend
            .recover_entry(&entry_with_runs(Vec::new()), &dir.path().join("x"))
            .unwrap_err();
        assert!(err.to_string().contains("Failed to run"));
    }

    #[test]
    fn test_ntfsundelete_command_line() {
        let backend = NtfsUndeleteBackend::new("/dev/sdb1");
        let command = backend.command(1234, Path::new("/out/Docs/a.txt"));
        let args: Vec<_> = command.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(command.get_program(), "ntfsundelete");
        assert_eq!(
            args,
            vec![
                "/dev/sdb1",
                "--undelete",
                "--inodes",
                "1234",
                "--output",
                "/out/Docs/a.txt",
                "--force"
            ]
        );
    }
}
