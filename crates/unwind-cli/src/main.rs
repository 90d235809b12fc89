use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use regex::Regex;
use tracing_subscriber::EnvFilter;
use unwind_core::{
	analyze_device, cleanup_artifacts, BootSectorLocator, ConflictPolicy, DataRunBackend,
	MftAnalysis, MftLocator, NodeFilter, NtfsInfoLocator, NtfsUndeleteBackend, RecoveryBackend,
	RecoveryEngine, RecoveryOptions, ScanConfig, TreeNode,
};

#[derive(Parser, Debug)]
#[command(name = "unwind", version, about = "Recover deleted files from NTFS volumes")]
struct Cli {
	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
	/// Parse the MFT and report deleted and recoverable entries
	Analyze {
		#[command(flatten)]
		source: SourceArgs,
	},
	/// Recover deleted files into an output directory
	Recover {
		#[command(flatten)]
		source: SourceArgs,
		/// Output directory for recovered files
		#[arg(short, long)]
		output: PathBuf,
		/// Number of files to recover in parallel
		#[arg(short, long, default_value_t = 100)]
		parallel: usize,
		/// Maximum file size (bytes) to recover
		#[arg(long, default_value_t = 100u64 * 1024 * 1024 * 1024)]
		max_size: u64,
		/// Minimum file size (bytes) to recover
		#[arg(long, default_value_t = 1)]
		min_size: u64,
		/// Only recover files whose path matches this regex
		#[arg(short, long, value_parser = parse_regex)]
		regex: Option<Regex>,
		/// What to do with files that already exist in the output
		#[arg(short, long, value_enum, default_value_t = ConflictArg::ReplaceConflict)]
		conflict_resolution: ConflictArg,
		/// How file content is recovered
		#[arg(long, value_enum, default_value_t = BackendKind::Ntfsundelete)]
		backend: BackendKind,
		/// Write a JSON report of every file to this path
		#[arg(long)]
		report: Option<PathBuf>,
	},
}

#[derive(Args, Debug)]
struct SourceArgs {
	/// Device or image path (ex: /dev/nvme0n1p1)
	#[arg(short, long)]
	device: PathBuf,
	/// How to find the MFT
	#[arg(long, value_enum, default_value_t = LocatorKind::Ntfsinfo)]
	locator: LocatorKind,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LocatorKind {
	/// Ask `ntfsinfo` (ntfs-3g)
	Ntfsinfo,
	/// Read the volume boot sector
	BootSector,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BackendKind {
	/// Run `ntfsundelete` per file (ntfs-3g)
	Ntfsundelete,
	/// Copy data runs straight from the device
	DataRuns,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ConflictArg {
	ClearAll,
	SkipConflict,
	ReplaceConflict,
}

impl From<ConflictArg> for ConflictPolicy {
	fn from(arg: ConflictArg) -> Self {
		match arg {
			ConflictArg::ClearAll => ConflictPolicy::ClearAll,
			ConflictArg::SkipConflict => ConflictPolicy::SkipConflict,
			ConflictArg::ReplaceConflict => ConflictPolicy::ReplaceConflict,
		}
	}
}

fn parse_regex(value: &str) -> Result<Regex, regex::Error> {
	Regex::new(value)
}

/// Selection used by `recover`: deleted files in the size window that still
/// have data runs, optionally restricted by a path regex
struct RecoverFilter {
	min_size: u64,
	max_size: u64,
	regex: Option<Regex>,
}

impl NodeFilter for RecoverFilter {
	fn keep(&self, node: &TreeNode) -> bool {
		let entry = &node.entry;
		if !entry.is_deleted || entry.data_runs.is_empty() {
			return false;
		}
		if entry.size < self.min_size || entry.size > self.max_size {
			return false;
		}

		match &self.regex {
			Some(regex) => regex.is_match(&node.path),
			None => {
				entry.name != "System Volume Information"
					&& !entry.name.starts_with('$')
					&& !entry.name.starts_with(".fuse_hidden")
			}
		}
	}
}

fn main() -> Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.with_writer(std::io::stderr)
		.init();

	let cli = Cli::parse();
	match cli.command {
		Commands::Analyze { source } => {
			let analysis = analyze(&source)?;
			print_analysis(&analysis);
		}
		Commands::Recover {
			source,
			output,
			parallel,
			max_size,
			min_size,
			regex,
			conflict_resolution,
			backend,
			report,
		} => {
			let analysis = analyze(&source)?;
			print_analysis(&analysis);

			let backend: Box<dyn RecoveryBackend> = match backend {
				BackendKind::Ntfsundelete => Box::new(NtfsUndeleteBackend::new(&source.device)),
				BackendKind::DataRuns => Box::new(DataRunBackend::open(
					&source.device,
					analysis.location.cluster_size,
				)?),
			};

			let options = RecoveryOptions {
				conflict_policy: conflict_resolution.into(),
				concurrency: parallel,
				..RecoveryOptions::new(&output)
			};
			let mut engine = RecoveryEngine::new(options, backend).with_filter(RecoverFilter {
				min_size,
				max_size,
				regex,
			});

			let total_size = engine.total_recoverable_size(&analysis.tree);
			println!("💾 Total recoverable size: {}", format_size(total_size, BINARY));

			let bar = ProgressBar::new(total_size.max(1));
			bar.set_style(
				ProgressStyle::with_template(
					"{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {percent:>3}% {msg}",
				)
				.context("Invalid progress template")?
				.progress_chars("█▉░"),
			);

			let progress_bar = bar.clone();
			engine.set_progress_callback(move |result, current| {
				let stats = &result.stats;
				progress_bar.set_position(stats.total_bytes_recovered.min(total_size));
				progress_bar.set_message(format!(
					"🟢 {}  🟡 {}  🔴 {}  {} / {}  {}",
					stats.recovered,
					stats.partially_recovered,
					stats.failed,
					format_size(stats.total_bytes_recovered, BINARY),
					format_size(total_size, BINARY),
					current.entry.name
				));
			});

			let result = engine.recover(&analysis.tree)?;
			bar.finish_and_clear();

			println!();
			println!("✅ Recovery complete:");
			println!("   🟢 Fully recovered: {}", result.stats.recovered);
			println!("   🟡 Partially recovered: {}", result.stats.partially_recovered);
			println!("   ⚫️ Skipped: {}", result.stats.skipped);
			println!("   🔴 Failed: {}", result.stats.failed);
			println!("   Total bytes: {}", format_size(result.stats.total_bytes_recovered, BINARY));

			if let Some(report) = report {
				result.write_report(&report)?;
				println!("📄 Report written to {}", report.display());
			}

			println!();
			println!("🧹 Cleaning up artifacts left by NTFS tools...");
			if cleanup_artifacts(&output) {
				println!("✅ Cleanup complete");
			} else {
				println!("⚠️  Cleanup had errors");
			}
		}
	}
	Ok(())
}

fn analyze(source: &SourceArgs) -> Result<MftAnalysis> {
	let locator: Box<dyn MftLocator> = match source.locator {
		LocatorKind::Ntfsinfo => Box::new(NtfsInfoLocator::default()),
		LocatorKind::BootSector => Box::new(BootSectorLocator),
	};

	tracing::debug!("Locating MFT with {:?}", source.locator);
	println!("🔍 Analyzing MFT of {}", source.device.display());
	let analysis = analyze_device(&source.device, locator.as_ref(), &ScanConfig::default())
		.with_context(|| format!("Failed to analyze {}", source.device.display()))?;
	Ok(analysis)
}

fn print_analysis(analysis: &MftAnalysis) {
	println!("✅ Analysis completed successfully!");
	println!("📐 Cluster Size: {} bytes", analysis.location.cluster_size);
	println!("📐 MFT Record Size: {} bytes", analysis.location.mft_record_size);
	println!("📍 MFT Offset: {}", analysis.location.mft_byte_offset);
	println!("📚 Records Scanned: {}", analysis.records_scanned);
	println!("📈 Entries: {}", analysis.stats.total);
	println!("🗑️  Deleted: {}", analysis.stats.deleted);
	println!("🔄 Recoverable: {}", analysis.stats.recoverable);
	println!("👻 Orphaned: {}", analysis.tree.orphans().count());
}
