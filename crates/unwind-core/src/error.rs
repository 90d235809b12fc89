//! Error types shared by the analysis and recovery pipeline

use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors surfaced by MFT analysis and recovery setup.
///
/// Per-record corruption and per-file recovery failures are not represented
/// here: the scanner skips bad records and the orchestrator records failed
/// files in its result instead of aborting.
#[derive(Error, Debug)]
pub enum UnwindError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to open device '{}': {source}", path.display())]
    DeviceOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to get MFT info: {0}")]
    LocatorCommand(String),

    #[error("Failed to parse MFT info: {0}")]
    LocatorParse(String),

    #[error("No root entry found in MFT")]
    NoRoot,

    #[error("Failed to build recovery worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Result type alias for analysis and recovery operations
pub type Result<T> = std::result::Result<T, UnwindError>;

impl UnwindError {
    /// Whether the error came from locating the MFT (command or parse failure)
    pub fn is_location_error(&self) -> bool {
        matches!(
            self,
            UnwindError::LocatorCommand(_) | UnwindError::LocatorParse(_)
        )
    }
}
