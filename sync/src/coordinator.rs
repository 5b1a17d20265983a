//! Run orchestration across every configured target
//!
//! Each target walks `Idle → BuildingCatalogs → Planning → Executing →
//! Reporting → Done` on its own. Targets run concurrently; a target whose
//! catalogs cannot be built stops there with `CatalogUnavailable` while the
//! others carry on. Source catalogs are built at most once per run and shared
//! by every target they feed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, OnceCell};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::backend::{Backend, BackendRegistry};
use crate::catalog::{Catalog, HashAlgorithm, Side};
use crate::config::{validate_topology, EngineOptions, SourceConfig, TargetConfig};
use crate::diff::{DiffPlanner, Plan};
use crate::error::Result;
use crate::filter::FileFilter;
use crate::pool::{BackendTransfer, PoolEvent, WorkerPool};
use crate::reporter::{NoopReporter, StatusEvent, StatusReporter, TargetPhase};
use crate::summary::RunSummary;

/// Planning result for one target, as returned by [`SyncCoordinator::preview`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TargetPlan {
    Planned(Plan),
    Unavailable { target: String, error: String },
}

impl TargetPlan {
    pub fn target(&self) -> &str {
        match self {
            TargetPlan::Planned(plan) => &plan.target,
            TargetPlan::Unavailable { target, .. } => target,
        }
    }
}

/// A source listed once per run
#[derive(Clone)]
struct LoadedSource {
    backend: Arc<dyn Backend>,
    catalog: Arc<Catalog>,
}

/// Lazily built source catalog shared by all targets of a run
struct SourceSlot<'a> {
    config: &'a SourceConfig,
    loaded: OnceCell<std::result::Result<LoadedSource, String>>,
}

/// Everything the planning phase hands to execution
struct Prepared {
    plan: Plan,
    target_backend: Arc<dyn Backend>,
    source_backends: Vec<Arc<dyn Backend>>,
    owners: HashMap<String, usize>,
}

/// Applies verbosity gating in front of the caller's reporter
struct Emitter<'a> {
    reporter: &'a dyn StatusReporter,
    verbose: bool,
}

impl Emitter<'_> {
    fn emit(&self, event: StatusEvent) {
        if self.verbose || !event.is_verbose_only() {
            self.reporter.report(event);
        }
    }

    fn phase(&self, target: &str, phase: TargetPhase) {
        self.emit(StatusEvent::PhaseChanged {
            target: target.to_string(),
            phase,
        });
    }
}

struct RunContext<'a> {
    run_id: Uuid,
    options: &'a EngineOptions,
    sources: Vec<SourceSlot<'a>>,
    emitter: Emitter<'a>,
}

/// Drives catalog building, planning and execution for every target
#[derive(Debug, Default)]
pub struct SyncCoordinator {
    registry: BackendRegistry,
    planner: DiffPlanner,
}

impl SyncCoordinator {
    /// Coordinator with the built-in `local` and `memory` backends
    pub fn new() -> Self {
        Self::with_registry(BackendRegistry::with_builtin())
    }

    pub fn with_registry(registry: BackendRegistry) -> Self {
        Self {
            registry,
            planner: DiffPlanner::new(),
        }
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut BackendRegistry {
        &mut self.registry
    }

    /// Sync every target and return one summary per target, in configuration order.
    ///
    /// Only invalid configuration is an error here; per-target and per-item
    /// failures are recorded in the summaries.
    pub async fn run(
        &self,
        sources: &[SourceConfig],
        targets: &[TargetConfig],
        options: &EngineOptions,
        reporter: &dyn StatusReporter,
    ) -> Result<Vec<RunSummary>> {
        options.validate()?;
        validate_topology(sources, targets)?;

        let context = RunContext::new(sources, options, reporter);
        info!(
            run_id = %context.run_id,
            sources = sources.len(),
            targets = targets.len(),
            dry_run = options.dry_run,
            force = options.force,
            "starting sync run"
        );

        let runs = targets.iter().map(|target| {
            self.sync_target(&context, target)
                .instrument(info_span!("target_sync", dest = %target.name, run_id = %context.run_id))
        });
        let summaries = join_all(runs).await;

        let failed = summaries.iter().filter(|s| !s.is_success()).count();
        info!(run_id = %context.run_id, targets = summaries.len(), failed, "sync run finished");
        Ok(summaries)
    }

    /// Build catalogs and plans for every target without executing anything
    pub async fn preview(
        &self,
        sources: &[SourceConfig],
        targets: &[TargetConfig],
        options: &EngineOptions,
    ) -> Result<Vec<TargetPlan>> {
        options.validate()?;
        validate_topology(sources, targets)?;

        let context = RunContext::new(sources, options, &NoopReporter);
        let context = &context;
        let plans = targets.iter().map(|target| async move {
            match self.prepare(context, target).await {
                Ok(prepared) => TargetPlan::Planned(prepared.plan),
                Err(error) => TargetPlan::Unavailable {
                    target: target.name.clone(),
                    error,
                },
            }
        });
        Ok(join_all(plans).await)
    }

    async fn sync_target(&self, context: &RunContext<'_>, target: &TargetConfig) -> RunSummary {
        let started_at = Utc::now();
        let clock = Instant::now();
        let emitter = &context.emitter;

        let prepared = match self.prepare(context, target).await {
            Ok(prepared) => prepared,
            Err(error) => {
                warn!(dest = %target.name, %error, "target aborted");
                let mut summary = RunSummary::catalog_unavailable(context.run_id, &target.name, started_at, error);
                summary.finish(clock.elapsed());
                emitter.phase(&target.name, TargetPhase::Reporting);
                emitter.emit(StatusEvent::TargetCompleted {
                    summary: summary.clone(),
                });
                emitter.phase(&target.name, TargetPhase::Done);
                return summary;
            }
        };

        emitter.phase(&target.name, TargetPhase::Executing);
        let pool = WorkerPool::new(context.options.pool_size_for(target));
        let mut summary = RunSummary::new(context.run_id, &target.name, started_at);
        summary.plan = prepared.plan.summary.clone();

        debug!(
            dest = %target.name,
            pool_size = pool.pool_size(),
            transfers = prepared.plan.transfers().count(),
            "executing plan"
        );

        let transfer = BackendTransfer::new(prepared.target_backend, prepared.source_backends, prepared.owners)
            .dry_run(context.options.dry_run);
        let (tx, rx) = mpsc::unbounded_channel();

        let ((), ()) = tokio::join!(
            pool.run(prepared.plan, Arc::new(transfer), context.options.retry_policy(), tx),
            collect(rx, &target.name, &mut summary, emitter),
        );

        emitter.phase(&target.name, TargetPhase::Reporting);
        summary.finish(clock.elapsed());
        emitter.emit(StatusEvent::TargetCompleted {
            summary: summary.clone(),
        });
        emitter.phase(&target.name, TargetPhase::Done);
        summary
    }

    /// `BuildingCatalogs` and `Planning` for one target
    async fn prepare(&self, context: &RunContext<'_>, target: &TargetConfig) -> std::result::Result<Prepared, String> {
        let emitter = &context.emitter;
        let fingerprint = context.options.fingerprint;
        emitter.phase(&target.name, TargetPhase::BuildingCatalogs);

        let feeding: Vec<&SourceSlot<'_>> = context
            .sources
            .iter()
            .filter(|slot| slot.config.feeds(&target.name))
            .collect();
        if feeding.is_empty() {
            return Err(format!("no source feeds target '{}'", target.name));
        }

        let mut source_backends = Vec::with_capacity(feeding.len());
        let mut layers = Vec::with_capacity(feeding.len());
        for slot in feeding {
            let loaded = slot.load(&self.registry, fingerprint).await?;
            source_backends.push(loaded.backend);
            layers.push(loaded.catalog);
        }

        let target_backend = self
            .registry
            .create(&target.endpoint(fingerprint))
            .map_err(|e| format!("target '{}': {}", target.name, e))?;
        let case_sensitive = target_backend.case_sensitive();
        let mut filter_options = target.filter_options();
        filter_options.case_sensitive = case_sensitive;
        let filter = FileFilter::new(&filter_options).map_err(|e| e.to_string())?;
        let target_catalog = Catalog::build(&target.name, Side::Target, target_backend.as_ref(), &filter)
            .await
            .map_err(|e| e.to_string())?;

        let (merged, owners) = Catalog::overlay(&target.name, &layers, case_sensitive);
        let source_catalog = merged.filtered(&filter);

        emitter.phase(&target.name, TargetPhase::Planning);
        let mut plan_options = context.options.plan_options();
        plan_options.case_sensitive = case_sensitive;

        let plan = self
            .planner
            .plan(&source_catalog, &target_catalog, &plan_options)
            .map_err(|e| e.to_string())?;

        info!(
            dest = %target.name,
            uploads = plan.summary.uploads,
            updates = plan.summary.updates,
            deletes = plan.summary.deletes,
            skips = plan.summary.skips,
            bytes = plan.summary.total_bytes_to_transfer,
            "plan ready"
        );

        Ok(Prepared {
            plan,
            target_backend,
            source_backends,
            owners,
        })
    }
}

impl<'a> RunContext<'a> {
    fn new(sources: &'a [SourceConfig], options: &'a EngineOptions, reporter: &'a dyn StatusReporter) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            options,
            sources: sources
                .iter()
                .map(|config| SourceSlot {
                    config,
                    loaded: OnceCell::new(),
                })
                .collect(),
            emitter: Emitter {
                reporter,
                verbose: options.verbose,
            },
        }
    }
}

impl SourceSlot<'_> {
    async fn load(&self, registry: &BackendRegistry, fingerprint: HashAlgorithm) -> std::result::Result<LoadedSource, String> {
        self.loaded
            .get_or_init(|| load_source(self.config, registry, fingerprint))
            .await
            .clone()
    }
}

async fn load_source(
    config: &SourceConfig,
    registry: &BackendRegistry,
    fingerprint: HashAlgorithm,
) -> std::result::Result<LoadedSource, String> {
    let backend = registry
        .create(&config.endpoint(fingerprint))
        .map_err(|e| format!("source '{}': {}", config.name, e))?;
    let filter = FileFilter::new(&config.filter_options()).map_err(|e| e.to_string())?;
    let catalog = Catalog::build(&config.name, Side::Source, backend.as_ref(), &filter)
        .await
        .map_err(|e| e.to_string())?;

    info!(source = %config.name, files = catalog.len(), bytes = catalog.total_bytes(), "source catalog built");
    Ok(LoadedSource {
        backend,
        catalog: Arc::new(catalog),
    })
}

/// Channel collector: the only writer of a target's summary
async fn collect(
    mut rx: mpsc::UnboundedReceiver<PoolEvent>,
    target: &str,
    summary: &mut RunSummary,
    emitter: &Emitter<'_>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            PoolEvent::Retrying { path, attempt, delay } => {
                emitter.emit(StatusEvent::RetryScheduled {
                    target: target.to_string(),
                    path,
                    attempt,
                    delay,
                });
            }
            PoolEvent::Completed { item, outcome } => {
                emitter.emit(StatusEvent::ItemCompleted {
                    target: target.to_string(),
                    path: item.path.clone(),
                    action: item.action,
                    outcome,
                    attempts: item.attempts,
                });
                summary.record(item, outcome);
            }
        }
    }
}
