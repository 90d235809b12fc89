//! Volume analysis: MFT scan, tree reconstruction and deletion statistics

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;

use crate::error::{Result, UnwindError};
use crate::fs::common::BlockDevice;
use crate::fs::ntfs::{read_mft_entries, MftEntry, MftLocation, MftLocator, ScanConfig};
use crate::tree::DirectoryTree;

/// Entry counts over one MFT scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryStats {
    pub total: usize,
    pub deleted: usize,
    /// Deleted entries that still have data runs
    pub recoverable: usize,
}

impl EntryStats {
    pub fn from_entries(entries: &[MftEntry]) -> Self {
        entries.iter().fold(EntryStats::default(), |mut stats, entry| {
            stats.total += 1;
            if entry.is_deleted {
                stats.deleted += 1;
                if !entry.data_runs.is_empty() {
                    stats.recoverable += 1;
                }
            }
            stats
        })
    }
}

/// Result of analyzing one NTFS volume
#[derive(Debug, Clone)]
pub struct MftAnalysis {
    pub location: MftLocation,
    pub tree: DirectoryTree,
    pub stats: EntryStats,
    pub records_scanned: u64,
}

/// Build a directory tree and statistics from already parsed entries
pub fn analyze_entries(location: MftLocation, entries: Vec<MftEntry>, records_scanned: u64) -> Result<MftAnalysis> {
    let stats = EntryStats::from_entries(&entries);
    let tree = DirectoryTree::build(entries)?;

    Ok(MftAnalysis {
        location,
        tree,
        stats,
        records_scanned,
    })
}

/// Locate the MFT, read every record and rebuild the directory hierarchy.
///
/// Fails if the MFT cannot be located or lies past the end of the device, the
/// device cannot be opened, or no root entry is found.
pub fn analyze_device(
    device_path: &Path,
    locator: &dyn MftLocator,
    config: &ScanConfig,
) -> Result<MftAnalysis> {
    let started = Instant::now();
    tracing::info!("Analyzing MFT of {}", device_path.display());

    let location = locator.locate(device_path)?;
    tracing::info!(
        "MFT at LCN {} (cluster size {}, record size {})",
        location.mft_lcn,
        location.cluster_size,
        location.mft_record_size
    );

    let device = BlockDevice::open(device_path)?;
    if location.mft_byte_offset >= device.size() {
        return Err(UnwindError::LocatorParse(format!(
            "MFT offset {} is beyond the end of {} ({} bytes)",
            location.mft_byte_offset,
            device_path.display(),
            device.size()
        )));
    }

    let scan = read_mft_entries(&device, &location, config);
    let analysis = analyze_entries(location, scan.entries, scan.records_scanned)?;

    tracing::info!(
        "Analysis complete in {:?}: {} entries, {} deleted, {} recoverable",
        started.elapsed(),
        analysis.stats.total,
        analysis.stats.deleted,
        analysis.stats.recoverable
    );

    Ok(analysis)
}
