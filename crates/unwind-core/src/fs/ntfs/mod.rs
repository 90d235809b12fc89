/// NTFS Master File Table support
use serde::{Deserialize, Serialize};

use super::common::BlockDevice;

pub mod location;
pub mod record;
pub mod runs;

pub use location::{
    BootSectorLocator, MftLocation, MftLocator, NtfsBootSector, NtfsInfoLocator,
    MAX_MFT_RECORD_SIZE,
};
pub use record::{parse_mft_record, EntryTimestamps, MftEntry};
pub use runs::{decode_data_runs, encode_data_runs};

/// MFT file record signature
pub const MFT_SIGNATURE: &[u8; 4] = b"FILE";

/// MFT record header offsets
pub(crate) mod header {
    pub const FIRST_ATTRIBUTE_OFFSET: usize = 0x14;
    pub const FLAGS: usize = 0x16;

    pub const FLAG_IN_USE: u16 = 0x01;
    pub const FLAG_DIRECTORY: u16 = 0x02;
}

/// Attribute type codes and header offsets
pub(crate) mod attribute {
    /// Recognised but not decoded; timestamps stay unpopulated
    #[allow(dead_code)]
    pub const STANDARD_INFORMATION: u32 = 0x10;
    pub const FILE_NAME: u32 = 0x30;
    pub const DATA: u32 = 0x80;
    pub const END: u32 = 0xFFFF_FFFF;

    pub const TYPE: usize = 0x00;
    pub const LENGTH: usize = 0x04;
    pub const NON_RESIDENT_FLAG: usize = 0x08;

    pub const RESIDENT_DATA_SIZE: usize = 0x10;
    pub const RESIDENT_DATA_OFFSET: usize = 0x14;

    pub const DATA_RUNS_OFFSET: usize = 0x20;
    pub const REAL_SIZE: usize = 0x30;
}

/// FILE_NAME content offsets, relative to the attribute's resident data
pub(crate) mod file_name {
    pub const PARENT_REFERENCE: usize = 0x00;
    pub const NAME_LENGTH: usize = 0x40;
    pub const NAME_DATA: usize = 0x42;
}

/// Limits applied while walking possibly corrupted MFT data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Consecutive unreadable or non-`FILE` records that end the scan
    pub max_consecutive_errors: u32,
    /// Attributes longer than this end the attribute walk of a record
    pub max_attribute_length: u32,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_consecutive_errors: 100,
            max_attribute_length: 1024,
        }
    }
}

/// Entries parsed by one sequential MFT scan
#[derive(Debug, Clone)]
pub struct MftScan {
    pub entries: Vec<MftEntry>,
    /// Records read, including the trailing run of failures
    pub records_scanned: u64,
}

/// Check the 4-byte record signature
pub fn is_file_record(data: &[u8]) -> bool {
    data.len() >= 4 && &data[..4] == MFT_SIGNATURE
}

/// Read MFT records sequentially until too many consecutive failures.
///
/// A failure is either a read error (including reading past the end of the
/// device) or a record without the `FILE` signature. Any valid signature
/// resets the counter, whether or not the record yields a named entry. The
/// scan also ends when the next record offset no longer fits in a `u64`, and
/// a record size outside `1..=MAX_MFT_RECORD_SIZE` reads nothing.
pub fn read_mft_entries(
    device: &BlockDevice,
    location: &MftLocation,
    config: &ScanConfig,
) -> MftScan {
    let mut entries = Vec::new();
    let mut entry_number = 0u64;
    let mut consecutive_errors = 0u32;

    if location.mft_record_size == 0 || location.mft_record_size > MAX_MFT_RECORD_SIZE {
        tracing::warn!(
            "MFT record size {} is implausible, nothing scanned",
            location.mft_record_size
        );
        return MftScan {
            entries,
            records_scanned: 0,
        };
    }

    let record_size = location.mft_record_size as usize;
    let mut buffer = vec![0u8; record_size];

    tracing::info!(
        "MFT scan: offset {} record size {} bytes",
        location.mft_byte_offset,
        record_size
    );

    while consecutive_errors < config.max_consecutive_errors {
        let Some(offset) = entry_number
            .checked_mul(location.mft_record_size)
            .and_then(|relative| relative.checked_add(location.mft_byte_offset))
        else {
            tracing::warn!("MFT record {} lies beyond any addressable offset", entry_number);
            break;
        };

        match device.read_exact_at(offset, &mut buffer) {
            Ok(()) if is_file_record(&buffer) => {
                consecutive_errors = 0;
                if let Some(entry) = parse_mft_record(&buffer, entry_number, config) {
                    entries.push(entry);
                }
            }
            Ok(()) => consecutive_errors += 1,
            Err(e) => {
                tracing::debug!("MFT record {} unreadable: {}", entry_number, e);
                consecutive_errors += 1;
            }
        }

        entry_number += 1;
    }

    tracing::info!(
        "MFT scan complete: {} entries from {} records",
        entries.len(),
        entry_number
    );

    MftScan {
        entries,
        records_scanned: entry_number,
    }
}
