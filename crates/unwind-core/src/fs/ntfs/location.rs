/// Locating the MFT on an NTFS volume
use byteorder::{LittleEndian, ReadBytesExt};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::Path;
use std::process::Command;

use crate::error::{Result, UnwindError};
use crate::fs::common::BlockDevice;

/// NTFS OEM identifier at offset 3 of the boot sector
const NTFS_OEM_ID: &[u8; 8] = b"NTFS    ";

/// Largest MFT record size accepted as plausible
pub const MAX_MFT_RECORD_SIZE: u64 = 64 * 1024;

/// Geometry needed to read MFT records from the raw device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MftLocation {
    pub cluster_size: u64,
    pub mft_record_size: u64,
    pub mft_lcn: u64,
    /// `mft_lcn * cluster_size`
    pub mft_byte_offset: u64,
}

impl MftLocation {
    pub fn new(cluster_size: u64, mft_record_size: u64, mft_lcn: u64) -> Self {
        Self {
            cluster_size,
            mft_record_size,
            mft_lcn,
            mft_byte_offset: mft_lcn.saturating_mul(cluster_size),
        }
    }

    /// Build a location from geometry read off the volume or reported by a
    /// tool, rejecting values no NTFS volume can have
    pub fn checked(cluster_size: u64, mft_record_size: u64, mft_lcn: u64) -> Result<Self> {
        if mft_record_size == 0 || mft_record_size > MAX_MFT_RECORD_SIZE {
            return Err(UnwindError::LocatorParse(format!(
                "MFT record size {} outside 1..={}",
                mft_record_size, MAX_MFT_RECORD_SIZE
            )));
        }

        let mft_byte_offset = mft_lcn.checked_mul(cluster_size).ok_or_else(|| {
            UnwindError::LocatorParse(format!(
                "MFT LCN {} with cluster size {} overflows a byte offset",
                mft_lcn, cluster_size
            ))
        })?;

        Ok(Self {
            cluster_size,
            mft_record_size,
            mft_lcn,
            mft_byte_offset,
        })
    }
}

/// Source of the MFT geometry for a device
pub trait MftLocator {
    fn locate(&self, device: &Path) -> Result<MftLocation>;
}

/// Queries `ntfsinfo` (ntfs-3g tools) for the MFT geometry
#[derive(Debug, Clone)]
pub struct NtfsInfoLocator {
    program: String,
}

impl Default for NtfsInfoLocator {
    fn default() -> Self {
        Self {
            program: "ntfsinfo".to_string(),
        }
    }
}

impl NtfsInfoLocator {
    /// Use a different executable than `ntfsinfo` from `PATH`
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl MftLocator for NtfsInfoLocator {
    fn locate(&self, device: &Path) -> Result<MftLocation> {
        tracing::debug!("Running {} -m --force {}", self.program, device.display());

        let output = Command::new(&self.program)
            .args(["-m", "--force"])
            .arg(device)
            .output()
            .map_err(|e| UnwindError::LocatorCommand(format!("{}: {}", self.program, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        // ntfsinfo writes warnings to stderr even when it succeeds
        if !stderr.trim().is_empty() && stdout.trim().is_empty() {
            return Err(UnwindError::LocatorCommand(stderr.trim().to_string()));
        }
        if !stderr.trim().is_empty() {
            tracing::warn!("{}: {}", self.program, stderr.trim());
        }

        parse_ntfsinfo_output(&stdout)
    }
}

/// Extract the MFT geometry from `ntfsinfo -m` output.
///
/// All three fields must be present and non-zero.
pub fn parse_ntfsinfo_output(text: &str) -> Result<MftLocation> {
    let cluster_size = numeric_field(text, "Cluster Size")?;
    let mft_record_size = numeric_field(text, "MFT Record Size")?;
    let mft_lcn = numeric_field(text, "LCN of Data Attribute for FILE_MFT")?;

    match (cluster_size, mft_record_size, mft_lcn) {
        (Some(cluster), Some(record), Some(lcn)) if cluster > 0 && record > 0 && lcn > 0 => {
            MftLocation::checked(cluster, record, lcn)
        }
        _ => Err(UnwindError::LocatorParse(
            "cluster size, MFT record size or MFT LCN missing".to_string(),
        )),
    }
}

fn numeric_field(text: &str, key: &str) -> Result<Option<u64>> {
    let pattern = format!(r"{}:\s*(\d+)", regex::escape(key));
    let re = Regex::new(&pattern).map_err(|e| UnwindError::LocatorParse(e.to_string()))?;

    Ok(re
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok()))
}

/// The NTFS boot sector fields that describe the MFT
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NtfsBootSector {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u32,
    pub mft_lcn: u64,
    /// Raw clusters-per-record value; negative means `2^-n` bytes, down to -31
    pub clusters_per_mft_record: i8,
}

impl NtfsBootSector {
    /// Parse the NTFS boot sector from raw bytes
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 512 {
            return Err(UnwindError::LocatorParse(
                "Insufficient data for NTFS boot sector".to_string(),
            ));
        }

        if &data[3..11] != NTFS_OEM_ID {
            return Err(UnwindError::LocatorParse(
                "Invalid NTFS signature".to_string(),
            ));
        }

        let mut cursor = Cursor::new(data);

        cursor.set_position(0x0B);
        let bytes_per_sector = cursor.read_u16::<LittleEndian>()?;
        let sectors_per_cluster_raw = cursor.read_u8()?;

        cursor.set_position(0x30);
        let mft_lcn = cursor.read_u64::<LittleEndian>()?;

        cursor.set_position(0x40);
        let clusters_per_mft_record = cursor.read_i8()?;

        // Values above 0x80 encode large clusters as a power of two
        let sectors_per_cluster = if sectors_per_cluster_raw > 0x80 {
            1u32.checked_shl(256 - sectors_per_cluster_raw as u32).unwrap_or(0)
        } else {
            sectors_per_cluster_raw as u32
        };

        if bytes_per_sector == 0
            || sectors_per_cluster == 0
            || clusters_per_mft_record == 0
            || clusters_per_mft_record < -31
        {
            return Err(UnwindError::LocatorParse(
                "Zero-sized sector, cluster or MFT record".to_string(),
            ));
        }

        Ok(NtfsBootSector {
            bytes_per_sector,
            sectors_per_cluster,
            mft_lcn,
            clusters_per_mft_record,
        })
    }

    /// Get bytes per cluster
    pub fn cluster_size(&self) -> u64 {
        self.bytes_per_sector as u64 * self.sectors_per_cluster as u64
    }

    /// Get bytes per MFT record
    pub fn mft_record_size(&self) -> u64 {
        if self.clusters_per_mft_record > 0 {
            self.clusters_per_mft_record as u64 * self.cluster_size()
        } else {
            1u64 << (-(self.clusters_per_mft_record as i32)) as u32
        }
    }

    pub fn location(&self) -> Result<MftLocation> {
        MftLocation::checked(self.cluster_size(), self.mft_record_size(), self.mft_lcn)
    }
}

/// Reads the MFT geometry from the volume's own boot sector
#[derive(Debug, Clone, Copy, Default)]
pub struct BootSectorLocator;

impl MftLocator for BootSectorLocator {
    fn locate(&self, device: &Path) -> Result<MftLocation> {
        let device = BlockDevice::open(device)?;
        let sector0 = device.read_sector(0)?;
        let boot_sector = NtfsBootSector::parse(&sector0)?;

        tracing::debug!("NTFS boot sector: {:?}", boot_sector);

        let location = boot_sector.location()?;
        if location.mft_byte_offset >= device.size() {
            return Err(UnwindError::LocatorParse(format!(
                "MFT offset {} is beyond the end of {} ({} bytes)",
                location.mft_byte_offset,
                device.path().display(),
                device.size()
            )));
        }
        Ok(location)
    }
}
