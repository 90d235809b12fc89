/// Recovery orchestration: selection, conflict policy, concurrent execution
use anyhow::Context;
use crossbeam_channel::bounded;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};

use super::backend::RecoveryBackend;
use super::progress::{ProgressAccumulator, RecoveryFile, RecoveryResult, RecoveryState};
use crate::error::Result;
use crate::fs::ntfs::MftEntry;
use crate::tree::{DirectoryTree, NodeId, TreeNode};

pub const DEFAULT_CONCURRENCY: usize = 100;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(100);

/// What to do when a recovery target already exists
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Empty the output directory before the run
    ClearAll,
    /// Leave existing files untouched
    SkipConflict,
    /// Delete existing files and recover them again
    #[default]
    ReplaceConflict,
}

/// Recovery engine configuration
#[derive(Debug, Clone)]
pub struct RecoveryOptions {
    pub output: PathBuf,
    pub conflict_policy: ConflictPolicy,
    /// Maximum number of files recovered at once
    pub concurrency: usize,
    /// Minimum time between progress flushes
    pub flush_interval: Duration,
}

impl RecoveryOptions {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
            conflict_policy: ConflictPolicy::default(),
            concurrency: DEFAULT_CONCURRENCY,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

/// Selects which tree nodes are recovered.
///
/// Evaluated once per node during selection and again when sizing the run, so
/// it must be deterministic.
pub trait NodeFilter: Send + Sync {
    fn keep(&self, node: &TreeNode) -> bool;
}

impl<F> NodeFilter for F
where
    F: Fn(&TreeNode) -> bool + Send + Sync,
{
    fn keep(&self, node: &TreeNode) -> bool {
        self(node)
    }
}

type ProgressCallback = Box<dyn FnMut(&RecoveryResult, &RecoveryFile) + Send>;

/// Drives recovery of a reconstructed directory tree
pub struct RecoveryEngine {
    options: RecoveryOptions,
    backend: Box<dyn RecoveryBackend>,
    filter: Box<dyn NodeFilter>,
    progress_callback: Option<ProgressCallback>,
}

impl RecoveryEngine {
    pub fn new(options: RecoveryOptions, backend: Box<dyn RecoveryBackend>) -> Self {
        Self {
            options,
            backend,
            filter: Box::new(|_: &TreeNode| true),
            progress_callback: None,
        }
    }

    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: NodeFilter + 'static,
    {
        self.filter = Box::new(filter);
        self
    }

    /// Called on the orchestrating thread after every flush with the
    /// cumulative result and the most recently merged file
    pub fn set_progress_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&RecoveryResult, &RecoveryFile) + Send + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
    }

    pub fn options(&self) -> &RecoveryOptions {
        &self.options
    }

    /// Nodes accepted by the filter: pre-order from the root, then orphans in
    /// scan order
    pub fn collect_nodes(&self, tree: &DirectoryTree) -> Vec<NodeId> {
        let mut selected: Vec<NodeId> = tree
            .preorder()
            .filter(|(_, node)| self.filter.keep(node))
            .map(|(id, _)| id)
            .collect();

        selected.extend(
            tree.orphans()
                .filter(|(_, node)| self.filter.keep(node))
                .map(|(id, _)| id),
        );

        selected
    }

    /// Sum of sizes of accepted non-directory nodes that have data runs
    pub fn total_recoverable_size(&self, tree: &DirectoryTree) -> u64 {
        tree.iter()
            .filter(|(_, node)| self.filter.keep(node))
            .filter(|(_, node)| !node.entry.is_directory && !node.entry.data_runs.is_empty())
            .map(|(_, node)| node.entry.size)
            .sum()
    }

    /// Recover every selected node.
    ///
    /// Selected directories are created first, in pre-order, on the calling
    /// thread. Files are then processed on a dedicated pool of `concurrency`
    /// threads.
    ///
    /// Per-file failures are recorded in the result; only setting up the run
    /// (clearing the output, building the pool) can fail.
    pub fn recover(&mut self, tree: &DirectoryTree) -> Result<RecoveryResult> {
        let selected = self.collect_nodes(tree);
        let concurrency = self.options.concurrency.max(1);

        tracing::info!(
            "Recovering {} nodes to {} ({} workers, {:?})",
            selected.len(),
            self.options.output.display(),
            concurrency,
            self.options.conflict_policy
        );

        if self.options.conflict_policy == ConflictPolicy::ClearAll && self.options.output.exists() {
            tracing::info!("Clearing output directory {}", self.options.output.display());
            fs::remove_dir_all(&self.options.output)?;
        }
        // Orphans target the output root itself, which must be a directory
        fs::create_dir_all(&self.options.output)?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(concurrency)
            .thread_name(|i| format!("unwind-recover-{}", i))
            .build()?;

        let options = &self.options;
        let backend = self.backend.as_ref();
        let callback = &mut self.progress_callback;

        let mut progress =
            ProgressAccumulator::new(selected.len(), options.flush_interval, Instant::now());
        let (sender, receiver) = bounded::<RecoveryFile>(concurrency);

        let (directories, files): (Vec<NodeId>, Vec<NodeId>) = selected
            .into_iter()
            .partition(|&id| tree.node(id).entry.is_directory);

        // Directories go first, parents before children, so a conflict check
        // only ever sees what existed before the run
        for &id in &directories {
            merge(&mut progress, callback, recover_node(options, backend, tree.node(id)));
        }

        pool.in_place_scope(|scope| {
            for &id in &files {
                let sender = sender.clone();
                let node = tree.node(id);
                scope.spawn(move |_| {
                    let outcome = recover_node(options, backend, node);
                    // The receiver lives until every sender is gone
                    let _ = sender.send(outcome);
                });
            }
            drop(sender);

            for outcome in receiver.iter() {
                merge(&mut progress, callback, outcome);
            }
        });

        if progress.has_pending() {
            progress.flush(Instant::now());
            notify(callback, progress.result());
        }

        let result = progress.into_result();
        tracing::info!(
            "Recovery complete: {} recovered, {} partial, {} failed, {} bytes",
            result.stats.recovered,
            result.stats.partially_recovered,
            result.stats.failed,
            result.stats.total_bytes_recovered
        );

        Ok(result)
    }
}

fn merge(
    progress: &mut ProgressAccumulator,
    callback: &mut Option<ProgressCallback>,
    outcome: RecoveryFile,
) {
    progress.record(outcome);
    let now = Instant::now();
    if progress.should_flush(now) {
        progress.flush(now);
        notify(callback, progress.result());
    }
}

fn notify(callback: &mut Option<ProgressCallback>, result: &RecoveryResult) {
    if let (Some(callback), Some(current)) = (callback.as_mut(), result.files.last()) {
        callback(result, current);
    }
}

/// Output location of a node: its tree path below the output root, with
/// empty, `.` and `..` components dropped
pub fn target_path(output: &Path, node_path: &str) -> PathBuf {
    let mut target = output.to_path_buf();
    for part in node_path.split('/') {
        if part.is_empty() || part == "." || part == ".." {
            continue;
        }
        // Drive prefixes and roots never leave the output directory
        match Path::new(part).components().next() {
            Some(Component::Normal(_)) => target.push(part),
            _ => continue,
        }
    }
    target
}

/// Classify the number of bytes recovered against the expected size
pub fn classify(bytes_recovered: u64, expected_size: u64) -> (RecoveryState, f64) {
    let state = if bytes_recovered == 0 {
        RecoveryState::Failed
    } else if bytes_recovered == expected_size {
        RecoveryState::Recovered
    } else {
        RecoveryState::PartiallyRecovered
    };

    let factor = if expected_size > 0 {
        bytes_recovered as f64 / expected_size as f64
    } else {
        0.0
    };

    (state, factor)
}

/// Recover one node, never failing: errors are folded into the outcome
pub fn recover_node(
    options: &RecoveryOptions,
    backend: &dyn RecoveryBackend,
    node: &TreeNode,
) -> RecoveryFile {
    let target = target_path(&options.output, &node.path);
    let mut file = RecoveryFile::new(node.entry.clone(), target);

    match recover_to_target(options.conflict_policy, backend, &node.entry, &file.target_path) {
        Ok((state, bytes_recovered, factor)) => {
            file.state = state;
            file.bytes_recovered = bytes_recovered;
            file.recovered_factor = factor;
            if state == RecoveryState::Failed {
                file.error = Some("No data recovered".to_string());
            }
        }
        Err(e) => {
            tracing::debug!("Entry {} failed: {:#}", node.entry.id, e);
            file.state = RecoveryState::Failed;
            file.error = Some(format!("{:#}", e));
        }
    }

    tracing::debug!(
        "Entry {} -> {} ({:?}, {} bytes)",
        file.entry.id,
        file.target_path.display(),
        file.state,
        file.bytes_recovered
    );

    file
}

fn recover_to_target(
    policy: ConflictPolicy,
    backend: &dyn RecoveryBackend,
    entry: &MftEntry,
    target: &Path,
) -> anyhow::Result<(RecoveryState, u64, f64)> {
    let exists = fs::symlink_metadata(target).is_ok();

    // Directories carry no content: the layout is created, nothing is counted
    // as recovered, and an existing directory is never removed
    if entry.is_directory {
        if exists && policy == ConflictPolicy::SkipConflict {
            return Ok((RecoveryState::Skipped, 0, 0.0));
        }
        fs::create_dir_all(target)
            .with_context(|| format!("Failed to create directory {}", target.display()))?;
        let (state, factor) = classify(0, entry.size);
        return Ok((state, 0, factor));
    }

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    if exists {
        match policy {
            ConflictPolicy::SkipConflict => return Ok((RecoveryState::Skipped, 0, 0.0)),
            ConflictPolicy::ClearAll | ConflictPolicy::ReplaceConflict => {
                fs::remove_file(target)
                    .with_context(|| format!("Failed to replace {}", target.display()))?;
            }
        }
    }

    backend
        .recover_entry(entry, target)
        .with_context(|| format!("{} backend failed", backend.name()))?;

    let mut bytes_recovered = fs::metadata(target)
        .with_context(|| format!("Recovered file {} missing", target.display()))?
        .len();

    // Backends may write whole clusters; cut back to the logical size
    if bytes_recovered > entry.size {
        OpenOptions::new()
            .write(true)
            .open(target)
            .and_then(|file| file.set_len(entry.size))
            .with_context(|| format!("Failed to truncate {}", target.display()))?;
        bytes_recovered = entry.size;
    }

    let (state, factor) = classify(bytes_recovered, entry.size);
    Ok((state, bytes_recovered, factor))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(classify(0, 100), (RecoveryState::Failed, 0.0));
        assert_eq!(classify(0, 0), (RecoveryState::Failed, 0.0));
        assert_eq!(classify(100, 100), (RecoveryState::Recovered, 1.0));
        assert_eq!(classify(25, 100), (RecoveryState::PartiallyRecovered, 0.25));
    }

    #[test]
    fn test_target_path_normalization() {
        let out = Path::new("/srv/out");
        assert_eq!(target_path(out, "Docs/a.txt"), PathBuf::from("/srv/out/Docs/a.txt"));
        assert_eq!(target_path(out, "Docs/"), PathBuf::from("/srv/out/Docs"));
        assert_eq!(target_path(out, ""), PathBuf::from("/srv/out"));
        assert_eq!(target_path(out, "../../etc/passwd"), PathBuf::from("/srv/out/etc/passwd"));
        assert_eq!(target_path(out, "a//./b"), PathBuf::from("/srv/out/a/b"));
    }

    #[test]
    fn test_default_options() {
        let options = RecoveryOptions::new("/tmp/out");
        assert_eq!(options.conflict_policy, ConflictPolicy::ReplaceConflict);
        assert_eq!(options.concurrency, 100);
        assert_eq!(options.flush_interval, Duration::from_millis(100));
    }
}
