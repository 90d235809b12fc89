//! Per-file recovery outcomes and batched progress accounting

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::fs::ntfs::MftEntry;

/// Recovery state of a single file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecoveryState {
    Pending,
    Recovering,
    Recovered,
    PartiallyRecovered,
    Failed,
    Skipped,
}

/// Outcome of recovering one tree node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryFile {
    pub entry: MftEntry,
    pub target_path: PathBuf,
    pub state: RecoveryState,
    pub bytes_recovered: u64,
    /// `bytes_recovered / entry.size`, 0 for empty entries
    pub recovered_factor: f64,
    pub error: Option<String>,
}

impl RecoveryFile {
    pub fn new(entry: MftEntry, target_path: PathBuf) -> Self {
        Self {
            entry,
            target_path,
            state: RecoveryState::Pending,
            bytes_recovered: 0,
            recovered_factor: 0.0,
            error: None,
        }
    }
}

/// Running totals of one recovery run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryStats {
    /// Number of selected nodes
    pub total: usize,
    pub recovered: usize,
    pub partially_recovered: usize,
    pub failed: usize,
    /// Never incremented; skipped files only show up in the file list
    pub skipped: usize,
    pub total_bytes_recovered: u64,
}

/// Cumulative result of a recovery run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecoveryResult {
    pub files: Vec<RecoveryFile>,
    pub stats: RecoveryStats,
}

impl RecoveryResult {
    /// Write the result as pretty-printed JSON
    pub fn write_report(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self).map_err(std::io::Error::from)?;
        writer.flush()?;

        tracing::info!("Recovery report written to {}", path.display());
        Ok(())
    }
}

/// Accumulates outcomes from concurrent workers and merges them into the
/// cumulative result in batches.
///
/// Owned by the single thread that receives outcomes, so no locking is
/// involved. Callers pass the current time in, which keeps flush decisions
/// deterministic under test.
#[derive(Debug)]
pub struct ProgressAccumulator {
    result: RecoveryResult,
    pending_files: Vec<RecoveryFile>,
    pending: RecoveryStats,
    interval: Duration,
    last_flush: Instant,
}

impl ProgressAccumulator {
    pub fn new(total: usize, interval: Duration, now: Instant) -> Self {
        Self {
            result: RecoveryResult {
                files: Vec::with_capacity(total),
                stats: RecoveryStats {
                    total,
                    ..Default::default()
                },
            },
            pending_files: Vec::new(),
            pending: RecoveryStats::default(),
            interval,
            last_flush: now,
        }
    }

    /// Buffer one outcome until the next flush
    pub fn record(&mut self, file: RecoveryFile) {
        match file.state {
            RecoveryState::Recovered => self.pending.recovered += 1,
            RecoveryState::PartiallyRecovered => self.pending.partially_recovered += 1,
            RecoveryState::Failed => self.pending.failed += 1,
            RecoveryState::Pending | RecoveryState::Recovering | RecoveryState::Skipped => {}
        }
        if file.state != RecoveryState::Skipped {
            self.pending.total_bytes_recovered += file.bytes_recovered;
        }
        self.pending_files.push(file);
    }

    pub fn has_pending(&self) -> bool {
        !self.pending_files.is_empty()
    }

    /// At least one interval has passed since the last flush
    pub fn should_flush(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_flush) >= self.interval
    }

    /// Merge buffered outcomes into the cumulative result
    pub fn flush(&mut self, now: Instant) {
        let stats = &mut self.result.stats;
        stats.recovered += self.pending.recovered;
        stats.partially_recovered += self.pending.partially_recovered;
        stats.failed += self.pending.failed;
        stats.total_bytes_recovered += self.pending.total_bytes_recovered;

        self.result.files.append(&mut self.pending_files);
        self.pending = RecoveryStats::default();
        self.last_flush = now;
    }

    /// The cumulative result as of the last flush
    pub fn result(&self) -> &RecoveryResult {
        &self.result
    }

    pub fn into_result(self) -> RecoveryResult {
        self.result
    }
}
