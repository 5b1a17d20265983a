//! Multisync Engine Library
//!
//! Keeps one or more storage targets consistent with a locally built file set:
//! - Catalogs of content fingerprints for sources and targets
//! - Pure diff planning (upload, update, delete, skip)
//! - Bounded-concurrency execution with retry and backoff
//! - Per-target orchestration with isolated failures
//! - Status events and run summaries

pub mod backend;
pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod diff;
pub mod error;
pub mod filter;
pub mod pool;
pub mod reporter;
pub mod retry;
pub mod summary;

// Re-export main types and functions
pub use backend::{Backend, BackendFactory, BackendRegistry, Endpoint, ListedFile, LocalBackend, MemoryBackend};
pub use catalog::{Catalog, Fingerprint, HashAlgorithm, LogicalFile, Side};
pub use config::{EngineOptions, SourceConfig, TargetConfig};
pub use coordinator::{SyncCoordinator, TargetPlan};
pub use diff::{DiffPlanner, Plan, PlanAction, PlanItem, PlanOptions, PlanSummary, SkipReason};
pub use error::{BackendError, ErrorKind, Result, SyncError};
pub use filter::{FileFilter, FilterOptions};
pub use pool::{BackendTransfer, Transfer, WorkerPool};
pub use reporter::{
    format_bytes, ChannelReporter, LogReporter, NoopReporter, ProgressChannel, StatusEvent, StatusReporter,
    TargetPhase,
};
pub use retry::RetryPolicy;
pub use summary::{Outcome, RunSummary, TargetStatus};

/// Run a full sync with the built-in backends, logging status through `tracing`
pub async fn sync(
    sources: &[SourceConfig],
    targets: &[TargetConfig],
    options: &EngineOptions,
) -> Result<Vec<RunSummary>> {
    SyncCoordinator::new().run(sources, targets, options, &LogReporter).await
}

/// Compute the plan for every target without changing anything
pub async fn plan(
    sources: &[SourceConfig],
    targets: &[TargetConfig],
    options: &EngineOptions,
) -> Result<Vec<TargetPlan>> {
    SyncCoordinator::new().preview(sources, targets, options).await
}

// Test modules
#[cfg(test)]
mod testing;
