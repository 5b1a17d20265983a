//! Per-target run summaries

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::diff::{PlanAction, PlanItem, PlanSummary};
use crate::error::ErrorKind;
use crate::reporter::format_bytes;

/// Terminal result of one plan item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Uploaded,
    Updated,
    Deleted,
    Skipped,
    Failed(ErrorKind),
}

impl Outcome {
    /// Successful outcome for an action
    pub fn succeeded(action: PlanAction) -> Self {
        match action {
            PlanAction::Upload => Outcome::Uploaded,
            PlanAction::Update => Outcome::Updated,
            PlanAction::Delete => Outcome::Deleted,
            PlanAction::Skip => Outcome::Skipped,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Uploaded => write!(f, "uploaded"),
            Outcome::Updated => write!(f, "updated"),
            Outcome::Deleted => write!(f, "deleted"),
            Outcome::Skipped => write!(f, "skipped"),
            Outcome::Failed(kind) => write!(f, "failed ({})", kind),
        }
    }
}

/// Final state of one target's run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetStatus {
    /// Every item reached a successful outcome
    Success,
    /// At least one item failed; the rest completed
    PartialFailure,
    /// Source or target could not be listed; nothing was executed
    CatalogUnavailable,
}

impl std::fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetStatus::Success => write!(f, "success"),
            TargetStatus::PartialFailure => write!(f, "partial failure"),
            TargetStatus::CatalogUnavailable => write!(f, "catalog unavailable"),
        }
    }
}

/// Aggregate result for one target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Shared by every target of one run
    pub run_id: Uuid,
    pub target: String,
    pub status: TargetStatus,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub plan: PlanSummary,
    pub uploaded: usize,
    pub updated: usize,
    pub deleted: usize,
    pub skipped: usize,
    /// Items that failed permanently or exhausted their attempts
    pub failed: Vec<PlanItem>,
    pub bytes_transferred: u64,
    /// Reason the target was aborted, if it was
    pub error: Option<String>,
}

impl RunSummary {
    pub fn new(run_id: Uuid, target: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            target: target.into(),
            status: TargetStatus::Success,
            started_at,
            duration: Duration::ZERO,
            plan: PlanSummary::default(),
            uploaded: 0,
            updated: 0,
            deleted: 0,
            skipped: 0,
            failed: Vec::new(),
            bytes_transferred: 0,
            error: None,
        }
    }

    /// Summary for a target whose catalogs could not be built
    pub fn catalog_unavailable(
        run_id: Uuid,
        target: impl Into<String>,
        started_at: DateTime<Utc>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            status: TargetStatus::CatalogUnavailable,
            error: Some(error.into()),
            ..Self::new(run_id, target, started_at)
        }
    }

    /// Tally one item's terminal outcome
    pub fn record(&mut self, item: PlanItem, outcome: Outcome) {
        match outcome {
            Outcome::Uploaded => {
                self.uploaded += 1;
                self.bytes_transferred += item.size;
            }
            Outcome::Updated => {
                self.updated += 1;
                self.bytes_transferred += item.size;
            }
            Outcome::Deleted => self.deleted += 1,
            Outcome::Skipped => self.skipped += 1,
            Outcome::Failed(_) => {
                self.status = TargetStatus::PartialFailure;
                self.failed.push(item);
            }
        }
    }

    /// Seal the summary once the pool has drained
    pub fn finish(&mut self, duration: Duration) {
        self.duration = duration;
        self.failed.sort_by(|a, b| a.path.cmp(&b.path));
        if self.status == TargetStatus::Success && !self.failed.is_empty() {
            self.status = TargetStatus::PartialFailure;
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TargetStatus::Success
    }

    pub fn completed(&self) -> usize {
        self.uploaded + self.updated + self.deleted + self.skipped
    }

    /// One-line human readable summary
    pub fn line(&self) -> String {
        match self.status {
            TargetStatus::CatalogUnavailable => format!(
                "{}: catalog unavailable ({})",
                self.target,
                self.error.as_deref().unwrap_or("unknown error")
            ),
            _ => format!(
                "{}: {} uploaded, {} updated, {} deleted, {} skipped, {} failed, {} transferred in {:.2}s",
                self.target,
                self.uploaded,
                self.updated,
                self.deleted,
                self.skipped,
                self.failed.len(),
                format_bytes(self.bytes_transferred),
                self.duration.as_secs_f64()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> RunSummary {
        RunSummary::new(Uuid::new_v4(), "cdn", Utc::now())
    }

    #[test]
    fn test_record_tallies() {
        let mut summary = summary();
        summary.record(PlanItem::new("a.txt", PlanAction::Upload, 2048), Outcome::Uploaded);
        summary.record(PlanItem::new("b.txt", PlanAction::Update, 10), Outcome::Updated);
        summary.record(PlanItem::new("c.txt", PlanAction::Delete, 0), Outcome::Deleted);
        summary.record(PlanItem::new("d.txt", PlanAction::Skip, 0), Outcome::Skipped);
        summary.finish(Duration::from_millis(1500));

        assert!(summary.is_success());
        assert_eq!(summary.completed(), 4);
        assert_eq!(summary.bytes_transferred, 2058);
        assert_eq!(
            summary.line(),
            "cdn: 1 uploaded, 1 updated, 1 deleted, 1 skipped, 0 failed, 2.01 KB transferred in 1.50s"
        );
    }

    #[test]
    fn test_failure_marks_partial() {
        let mut summary = summary();
        summary.record(PlanItem::new("z.txt", PlanAction::Upload, 1), Outcome::Failed(ErrorKind::SyncFailed));
        summary.record(PlanItem::new("a.txt", PlanAction::Upload, 1), Outcome::Failed(ErrorKind::PermanentFailure));
        summary.record(PlanItem::new("m.txt", PlanAction::Upload, 1), Outcome::Uploaded);
        summary.finish(Duration::ZERO);

        assert_eq!(summary.status, TargetStatus::PartialFailure);
        let failed: Vec<_> = summary.failed.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(failed, vec!["a.txt", "z.txt"]);
        assert_eq!(summary.bytes_transferred, 1);
    }

    #[test]
    fn test_catalog_unavailable_line() {
        let summary = RunSummary::catalog_unavailable(Uuid::nil(), "backup", Utc::now(), "bucket missing");
        assert!(!summary.is_success());
        assert_eq!(summary.line(), "backup: catalog unavailable (bucket missing)");

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["status"], "CatalogUnavailable");
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(Outcome::succeeded(PlanAction::Delete), Outcome::Deleted);
        assert_eq!(Outcome::Failed(ErrorKind::SyncFailed).to_string(), "failed (sync failed)");
        assert!(Outcome::Failed(ErrorKind::Transient).is_failure());
    }
}
