//! Bounded-concurrency execution of one target's plan

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::backend::{Backend, BackendResult};
use crate::config::MAX_POOL_SIZE;
use crate::diff::{Plan, PlanAction, PlanItem};
use crate::error::BackendError;
use crate::retry::RetryPolicy;
use crate::summary::Outcome;

/// Something that can carry out a single plan item
#[async_trait]
pub trait Transfer: Send + Sync {
    async fn transfer(&self, action: PlanAction, path: &str) -> BackendResult<()>;
}

/// Copies from the owning source backend into the target backend
pub struct BackendTransfer {
    target: Arc<dyn Backend>,
    sources: Vec<Arc<dyn Backend>>,
    /// Path to index into `sources`
    owners: HashMap<String, usize>,
    dry_run: bool,
}

impl BackendTransfer {
    pub fn new(target: Arc<dyn Backend>, sources: Vec<Arc<dyn Backend>>, owners: HashMap<String, usize>) -> Self {
        Self {
            target,
            sources,
            owners,
            dry_run: false,
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    fn source_for(&self, path: &str) -> BackendResult<&Arc<dyn Backend>> {
        self.owners
            .get(path)
            .and_then(|index| self.sources.get(*index))
            .ok_or_else(|| BackendError::Permanent(format!("no source provides '{}'", path)))
    }
}

#[async_trait]
impl Transfer for BackendTransfer {
    async fn transfer(&self, action: PlanAction, path: &str) -> BackendResult<()> {
        if self.dry_run {
            debug!(backend = %self.target.name(), %path, %action, "dry run");
            return Ok(());
        }

        match action {
            PlanAction::Upload | PlanAction::Update => {
                let source = self.source_for(path)?;
                let content = source.fetch(path).await?;
                self.target.put(path, content).await
            }
            PlanAction::Delete => self.target.delete(path).await,
            PlanAction::Skip => Ok(()),
        }
    }
}

/// Run one transfer, turning a panic inside the adapter into a permanent error
async fn guarded(transfer: &dyn Transfer, action: PlanAction, path: &str) -> BackendResult<()> {
    match AssertUnwindSafe(transfer.transfer(action, path)).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(%path, %action, panic = %message, "transfer panicked");
            Err(BackendError::Permanent(format!("transfer panicked: {}", message)))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Message from a worker to the result collector
#[derive(Debug, Clone)]
pub enum PoolEvent {
    Retrying { path: String, attempt: u32, delay: Duration },
    Completed { item: PlanItem, outcome: Outcome },
}

/// Executes plan items with at most `pool_size` transfers in flight
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    pool_size: usize,
}

impl WorkerPool {
    pub fn new(pool_size: usize) -> Self {
        Self {
            pool_size: pool_size.clamp(1, MAX_POOL_SIZE),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Run every item of `plan` and return once all of them are terminal.
    ///
    /// Each item yields exactly one [`PoolEvent::Completed`] on `events`. Skip
    /// items resolve immediately without touching `transfer`.
    pub async fn run(
        &self,
        plan: Plan,
        transfer: Arc<dyn Transfer>,
        retry: RetryPolicy,
        events: mpsc::UnboundedSender<PoolEvent>,
    ) {
        let semaphore = Arc::new(Semaphore::new(self.pool_size));
        let mut tasks = JoinSet::new();

        for mut item in plan.into_items() {
            if !item.action.is_transfer() {
                let _ = events.send(PoolEvent::Completed {
                    item,
                    outcome: Outcome::Skipped,
                });
                continue;
            }

            // The semaphore is never closed, so a permit always arrives
            let permit = semaphore.clone().acquire_owned().await.ok();
            let transfer = transfer.clone();
            let events = events.clone();

            tasks.spawn(async move {
                let retry_events = events.clone();
                let action = item.action;
                let path = item.path.clone();
                let result = retry
                    .execute(
                        &mut item,
                        || guarded(transfer.as_ref(), action, &path),
                        |item, delay, _| {
                            let _ = retry_events.send(PoolEvent::Retrying {
                                path: item.path.clone(),
                                attempt: item.attempts,
                                delay,
                            });
                        },
                    )
                    .await;

                let outcome = match result {
                    Ok(()) => Outcome::succeeded(item.action),
                    Err(kind) => Outcome::Failed(kind),
                };
                let _ = events.send(PoolEvent::Completed { item, outcome });
                drop(permit);
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "transfer task aborted");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::catalog::{Catalog, Side};
    use crate::diff::{DiffPlanner, PlanOptions};
    use crate::filter::FileFilter;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records concurrency and fails the paths it is told to
    #[derive(Default)]
    struct RecordingTransfer {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        seen: Mutex<Vec<String>>,
        failing: Vec<String>,
    }

    #[async_trait]
    impl Transfer for RecordingTransfer {
        async fn transfer(&self, _action: PlanAction, path: &str) -> BackendResult<()> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.seen.lock().push(path.to_string());

            if self.failing.iter().any(|p| p == path) {
                Err(BackendError::Permanent("denied".into()))
            } else {
                Ok(())
            }
        }
    }

    fn plan(items: Vec<PlanItem>) -> Plan {
        Plan::new("cdn", items).unwrap()
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(2).with_delays(Duration::from_millis(1), Duration::from_millis(1))
    }

    async fn collect(mut rx: mpsc::UnboundedReceiver<PoolEvent>) -> Vec<(PlanItem, Outcome)> {
        let mut done = Vec::new();
        while let Some(event) = rx.recv().await {
            if let PoolEvent::Completed { item, outcome } = event {
                done.push((item, outcome));
            }
        }
        done.sort_by(|a, b| a.0.path.cmp(&b.0.path));
        done
    }

    #[tokio::test]
    async fn test_pool_size_bounds_concurrency() {
        let items = (0..12)
            .map(|i| PlanItem::new(format!("file-{:02}", i), PlanAction::Upload, 1))
            .collect();
        let transfer = Arc::new(RecordingTransfer::default());
        let (tx, rx) = mpsc::unbounded_channel();

        WorkerPool::new(3).run(plan(items), transfer.clone(), fast_retry(), tx).await;
        let done = collect(rx).await;

        assert_eq!(done.len(), 12);
        assert!(transfer.peak.load(Ordering::SeqCst) <= 3);
        assert!(done.iter().all(|(_, outcome)| *outcome == Outcome::Uploaded));
    }

    #[tokio::test]
    async fn test_skips_never_reach_transfer() {
        let items = vec![
            PlanItem::new("a", PlanAction::Skip, 0),
            PlanItem::new("b", PlanAction::Delete, 0),
        ];
        let transfer = Arc::new(RecordingTransfer::default());
        let (tx, rx) = mpsc::unbounded_channel();

        WorkerPool::new(1).run(plan(items), transfer.clone(), fast_retry(), tx).await;
        let done = collect(rx).await;

        assert_eq!(*transfer.seen.lock(), vec!["b".to_string()]);
        assert_eq!(done[0].1, Outcome::Skipped);
        assert_eq!(done[0].0.attempts, 0);
        assert_eq!(done[1].1, Outcome::Deleted);
    }

    #[tokio::test]
    async fn test_failure_does_not_block_others() {
        let items = vec![
            PlanItem::new("bad", PlanAction::Upload, 1),
            PlanItem::new("good-1", PlanAction::Upload, 1),
            PlanItem::new("good-2", PlanAction::Update, 1),
        ];
        let transfer = Arc::new(RecordingTransfer {
            failing: vec!["bad".to_string()],
            ..Default::default()
        });
        let (tx, rx) = mpsc::unbounded_channel();

        WorkerPool::new(2).run(plan(items), transfer, fast_retry(), tx).await;
        let done = collect(rx).await;

        assert_eq!(done[0].1, Outcome::Failed(crate::error::ErrorKind::PermanentFailure));
        assert_eq!(done[1].1, Outcome::Uploaded);
        assert_eq!(done[2].1, Outcome::Updated);
    }

    struct PanickingTransfer;

    #[async_trait]
    impl Transfer for PanickingTransfer {
        async fn transfer(&self, _action: PlanAction, path: &str) -> BackendResult<()> {
            if path == "boom.txt" {
                panic!("adapter bug on {}", path);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_panicking_transfer_is_a_recorded_failure() {
        let items = vec![
            PlanItem::new("boom.txt", PlanAction::Upload, 4),
            PlanItem::new("fine.txt", PlanAction::Upload, 4),
        ];
        let (tx, rx) = mpsc::unbounded_channel();

        WorkerPool::new(2).run(plan(items), Arc::new(PanickingTransfer), fast_retry(), tx).await;
        let done = collect(rx).await;

        assert_eq!(done.len(), 2);
        let (boom, outcome) = &done[0];
        assert_eq!(*outcome, Outcome::Failed(crate::error::ErrorKind::PermanentFailure));
        assert_eq!(boom.attempts, 1);
        assert!(boom.last_message.as_deref().unwrap().contains("adapter bug on boom.txt"));
        assert_eq!(done[1].1, Outcome::Uploaded);
    }

    #[test]
    fn test_pool_size_is_clamped() {
        assert_eq!(WorkerPool::new(0).pool_size(), 1);
        assert_eq!(WorkerPool::new(usize::MAX).pool_size(), MAX_POOL_SIZE);
    }

    #[tokio::test]
    async fn test_backend_transfer_copies_and_deletes() {
        let source = MemoryBackend::new("site");
        source.insert("index.html", "<html>");
        let target = MemoryBackend::new("cdn");
        target.insert("stale.css", "old");

        let source_catalog = Catalog::build("site", Side::Source, &source, &FileFilter::allow_all())
            .await
            .unwrap();
        let target_catalog = Catalog::build("cdn", Side::Target, &target, &FileFilter::allow_all())
            .await
            .unwrap();
        let plan = DiffPlanner::new()
            .plan(&source_catalog, &target_catalog, &PlanOptions::default())
            .unwrap();

        let owners = HashMap::from([("index.html".to_string(), 0)]);
        let transfer = BackendTransfer::new(
            Arc::new(target.clone()),
            vec![Arc::new(source.clone()) as Arc<dyn Backend>],
            owners,
        );
        let (tx, rx) = mpsc::unbounded_channel();
        WorkerPool::new(2).run(plan, Arc::new(transfer), fast_retry(), tx).await;
        collect(rx).await;

        assert_eq!(target.paths(), vec!["index.html".to_string()]);
        assert_eq!(target.get("index.html").unwrap(), Bytes::from_static(b"<html>"));
    }

    #[tokio::test]
    async fn test_dry_run_leaves_target_untouched() {
        let target = MemoryBackend::new("cdn");
        target.insert("stale.css", "old");
        let transfer = BackendTransfer::new(Arc::new(target.clone()), Vec::new(), HashMap::new()).dry_run(true);

        let (tx, rx) = mpsc::unbounded_channel();
        let items = vec![
            PlanItem::new("new.html", PlanAction::Upload, 3),
            PlanItem::new("stale.css", PlanAction::Delete, 0),
        ];
        WorkerPool::new(2).run(plan(items), Arc::new(transfer), fast_retry(), tx).await;
        let done = collect(rx).await;

        assert_eq!(done[0].1, Outcome::Uploaded);
        assert_eq!(done[1].1, Outcome::Deleted);
        assert_eq!(target.paths(), vec!["stale.css".to_string()]);
    }
}
