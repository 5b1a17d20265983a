//! Engine configuration: global options plus source and target definitions
//!
//! These are the normalized shapes the engine accepts. Translating user-facing
//! or legacy settings into them is the caller's job.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::Endpoint;
use crate::catalog::{HashAlgorithm, Side};
use crate::diff::PlanOptions;
use crate::error::{Result, SyncError};
use crate::filter::{validate_pattern, FilterOptions};
use crate::retry::RetryPolicy;

/// Largest pool a target may ask for
pub const MAX_POOL_SIZE: usize = tokio::sync::Semaphore::MAX_PERMITS;

/// Global engine options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineOptions {
    /// Report skipped items, phase changes and retries
    #[serde(default)]
    pub verbose: bool,
    /// Re-upload every source file regardless of fingerprints
    #[serde(default)]
    pub force: bool,
    /// Whether the host build pipeline should sync after a successful build
    #[serde(default = "default_true")]
    pub run_on_build: bool,
    #[serde(default = "default_true")]
    pub sync_outdated_files: bool,
    #[serde(default = "default_true")]
    pub delete_abandoned_files: bool,
    #[serde(default = "default_true")]
    pub upload_missing_files: bool,
    /// Concurrent transfers per target; `None` means available parallelism
    #[serde(default)]
    pub target_pool_size: Option<usize>,
    #[serde(default = "default_max_sync_attempts")]
    pub max_sync_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    #[serde(default)]
    pub fingerprint: HashAlgorithm,
    /// Plan and report without calling `put` or `delete`
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            verbose: false,
            force: false,
            run_on_build: true,
            sync_outdated_files: true,
            delete_abandoned_files: true,
            upload_missing_files: true,
            target_pool_size: None,
            max_sync_attempts: default_max_sync_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            fingerprint: HashAlgorithm::default(),
            dry_run: false,
        }
    }
}

impl EngineOptions {
    pub fn validate(&self) -> Result<()> {
        if let Some(size) = self.target_pool_size {
            check_pool_size("target_pool_size", size)?;
        }
        if self.max_sync_attempts == 0 {
            return Err(SyncError::config("max_sync_attempts must be at least 1"));
        }
        if self.retry_max_delay_ms < self.retry_base_delay_ms {
            return Err(SyncError::config("retry_max_delay_ms must not be below retry_base_delay_ms"));
        }
        Ok(())
    }

    /// Planner switches derived from these options
    pub fn plan_options(&self) -> PlanOptions {
        PlanOptions {
            sync_outdated_files: self.sync_outdated_files,
            delete_abandoned_files: self.delete_abandoned_files,
            upload_missing_files: self.upload_missing_files,
            force: self.force,
            case_sensitive: true,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_sync_attempts)
            .with_delays(
                Duration::from_millis(self.retry_base_delay_ms),
                Duration::from_millis(self.retry_max_delay_ms),
            )
    }

    /// Pool size for a target, falling back to the global setting and then the CPU count
    pub fn pool_size_for(&self, target: &TargetConfig) -> usize {
        target
            .pool_size
            .or(self.target_pool_size)
            .unwrap_or_else(default_pool_size)
            .clamp(1, MAX_POOL_SIZE)
    }
}

/// One configured source of files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    #[serde(rename = "type", default = "default_backend_type")]
    pub kind: String,
    pub source_dir: PathBuf,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Targets this source feeds; empty means every target
    #[serde(default)]
    pub targets: Vec<String>,
}

impl SourceConfig {
    pub fn local(name: impl Into<String>, source_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            kind: default_backend_type(),
            source_dir: source_dir.into(),
            include: Vec::new(),
            exclude: Vec::new(),
            targets: Vec::new(),
        }
    }

    pub fn feeds(&self, target: &str) -> bool {
        self.targets.is_empty() || self.targets.iter().any(|t| t == target)
    }

    pub fn filter_options(&self) -> FilterOptions {
        FilterOptions::new(self.include.clone(), self.exclude.clone())
    }

    pub fn endpoint(&self, fingerprint: HashAlgorithm) -> Endpoint {
        Endpoint {
            name: self.name.clone(),
            kind: self.kind.clone(),
            side: Side::Source,
            dir: Some(self.source_dir.clone()),
            prefix: None,
            credentials: BTreeMap::new(),
            fingerprint,
        }
    }
}

/// One configured storage target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub name: String,
    #[serde(rename = "type", default = "default_backend_type")]
    pub kind: String,
    /// Root directory, bucket or container
    #[serde(default)]
    pub target_dir: Option<PathBuf>,
    /// Sub-path inside `target_dir`
    #[serde(default)]
    pub destination_dir: Option<String>,
    #[serde(default)]
    pub credentials: BTreeMap<String, String>,
    /// Overrides the global `target_pool_size`
    #[serde(default)]
    pub pool_size: Option<usize>,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl TargetConfig {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            target_dir: None,
            destination_dir: None,
            credentials: BTreeMap::new(),
            pool_size: None,
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }

    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.target_dir = Some(dir.into());
        self
    }

    pub fn filter_options(&self) -> FilterOptions {
        FilterOptions::new(self.include.clone(), self.exclude.clone())
    }

    pub fn endpoint(&self, fingerprint: HashAlgorithm) -> Endpoint {
        Endpoint {
            name: self.name.clone(),
            kind: self.kind.clone(),
            side: Side::Target,
            dir: self.target_dir.clone(),
            prefix: self.destination_dir.clone(),
            credentials: self.credentials.clone(),
            fingerprint,
        }
    }
}

/// Check names are unique, routing points at real targets, and patterns compile
pub fn validate_topology(sources: &[SourceConfig], targets: &[TargetConfig]) -> Result<()> {
    let mut source_names = HashSet::new();
    for source in sources {
        if source.name.is_empty() {
            return Err(SyncError::config("source name cannot be empty"));
        }
        if !source_names.insert(source.name.as_str()) {
            return Err(SyncError::config(format!("duplicate source name '{}'", source.name)));
        }
        for pattern in source.include.iter().chain(&source.exclude) {
            validate_pattern(pattern)?;
        }
    }

    let mut target_names = HashSet::new();
    for target in targets {
        if target.name.is_empty() {
            return Err(SyncError::config("target name cannot be empty"));
        }
        if !target_names.insert(target.name.as_str()) {
            return Err(SyncError::config(format!("duplicate target name '{}'", target.name)));
        }
        if let Some(size) = target.pool_size {
            check_pool_size(&format!("pool_size of target '{}'", target.name), size)?;
        }
        for pattern in target.include.iter().chain(&target.exclude) {
            validate_pattern(pattern)?;
        }
    }

    for source in sources {
        if let Some(unknown) = source.targets.iter().find(|t| !target_names.contains(t.as_str())) {
            return Err(SyncError::config(format!(
                "source '{}' feeds unknown target '{}'",
                source.name, unknown
            )));
        }
    }

    Ok(())
}

fn check_pool_size(what: &str, size: usize) -> Result<()> {
    if size == 0 || size > MAX_POOL_SIZE {
        return Err(SyncError::config(format!(
            "{} must be between 1 and {}, got {}",
            what, MAX_POOL_SIZE, size
        )));
    }
    Ok(())
}

/// Number of available processing units
pub fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_true() -> bool { true }
fn default_max_sync_attempts() -> u32 { 3 }
fn default_retry_base_delay_ms() -> u64 { 250 }
fn default_retry_max_delay_ms() -> u64 { 10_000 }
fn default_backend_type() -> String { "local".to_string() }
