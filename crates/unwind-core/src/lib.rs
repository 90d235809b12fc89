//! NTFS deleted-file recovery from raw MFT records.
//!
//! The pipeline reads the Master File Table straight off a block device,
//! rebuilds the directory hierarchy including deleted entries, and recovers
//! selected files with bounded concurrency.

pub mod analysis;
pub mod error;
pub mod fs;
pub mod recovery;
pub mod tree;

pub use analysis::{analyze_device, analyze_entries, EntryStats, MftAnalysis};
pub use error::{Result, UnwindError};
pub use fs::common::{BlockDevice, ClusterRange};
pub use fs::ntfs::{
    BootSectorLocator, MftEntry, MftLocation, MftLocator, NtfsInfoLocator, ScanConfig,
};
pub use tree::{DirectoryTree, NodeId, TreeNode};

// Re-export key recovery types
pub use recovery::{
    cleanup_artifacts, ConflictPolicy, DataRunBackend, NodeFilter, NtfsUndeleteBackend,
    RecoveryBackend, RecoveryEngine, RecoveryFile, RecoveryOptions, RecoveryResult,
    RecoveryState, RecoveryStats,
};
