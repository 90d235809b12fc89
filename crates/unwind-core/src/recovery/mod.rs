/// Recovery module: orchestration, backends and progress accounting
pub mod backend;
pub mod cleanup;
pub mod engine;
pub mod progress;

pub use backend::{DataRunBackend, NtfsUndeleteBackend, RecoveryBackend};

pub use cleanup::cleanup_artifacts;

pub use engine::{
    classify, recover_node, target_path, ConflictPolicy, NodeFilter, RecoveryEngine,
    RecoveryOptions, DEFAULT_CONCURRENCY, DEFAULT_FLUSH_INTERVAL,
};

pub use progress::{
    ProgressAccumulator, RecoveryFile, RecoveryResult, RecoveryState, RecoveryStats,
};
