//! Diff algorithm for turning a source and a target catalog into a plan

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::catalog::{Catalog, LogicalFile};
use crate::error::{ErrorKind, Result, SyncError};

/// Per-path action decided by the planner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlanAction {
    /// File missing from the target
    Upload,
    /// File present on both sides but outdated (or forced)
    Update,
    /// File abandoned on the target
    Delete,
    /// Nothing to do
    Skip,
}

impl PlanAction {
    /// Whether the item needs a transfer
    pub fn is_transfer(self) -> bool {
        !matches!(self, PlanAction::Skip)
    }
}

impl std::fmt::Display for PlanAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanAction::Upload => write!(f, "upload"),
            PlanAction::Update => write!(f, "update"),
            PlanAction::Delete => write!(f, "delete"),
            PlanAction::Skip => write!(f, "skip"),
        }
    }
}

/// Why an item ended up as Skip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// Fingerprints match
    InSync,
    /// Outdated but `sync_outdated_files` is off
    OutdatedKept,
    /// Abandoned but `delete_abandoned_files` is off
    AbandonedKept,
    /// Missing but `upload_missing_files` is off
    MissingNotUploaded,
}

/// One path's entry in a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanItem {
    pub path: String,
    pub action: PlanAction,
    /// Bytes to transfer for uploads and updates
    pub size: u64,
    pub skip_reason: Option<SkipReason>,
    /// Attempts made so far
    pub attempts: u32,
    pub last_error: Option<ErrorKind>,
    /// Message of the last underlying error
    pub last_message: Option<String>,
}

impl PlanItem {
    pub fn new(path: impl Into<String>, action: PlanAction, size: u64) -> Self {
        Self {
            path: path.into(),
            action,
            size,
            skip_reason: None,
            attempts: 0,
            last_error: None,
            last_message: None,
        }
    }

    fn skip(path: impl Into<String>, reason: SkipReason) -> Self {
        Self {
            skip_reason: Some(reason),
            ..Self::new(path, PlanAction::Skip, 0)
        }
    }
}

/// Ordered plan for one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub target: String,
    items: Vec<PlanItem>,
    pub summary: PlanSummary,
}

impl Plan {
    /// Build a plan, enforcing unique paths
    pub fn new(target: impl Into<String>, items: Vec<PlanItem>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(items.len());
        for item in &items {
            if !seen.insert(item.path.as_str()) {
                return Err(SyncError::DuplicatePath(item.path.clone()));
            }
        }

        let summary = PlanSummary::from_items(&items);
        Ok(Self {
            target: target.into(),
            items,
            summary,
        })
    }

    pub fn items(&self) -> &[PlanItem] {
        &self.items
    }

    pub fn into_items(self) -> Vec<PlanItem> {
        self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items that need a transfer
    pub fn transfers(&self) -> impl Iterator<Item = &PlanItem> {
        self.items.iter().filter(|item| item.action.is_transfer())
    }

    pub fn get(&self, path: &str) -> Option<&PlanItem> {
        self.items.iter().find(|item| item.path == path)
    }
}

/// Summary of a plan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub total_actions: usize,
    pub uploads: usize,
    pub updates: usize,
    pub deletes: usize,
    pub skips: usize,
    pub total_bytes_to_transfer: u64,
}

impl PlanSummary {
    fn from_items(items: &[PlanItem]) -> Self {
        let mut summary = PlanSummary {
            total_actions: items.len(),
            ..Default::default()
        };

        for item in items {
            match item.action {
                PlanAction::Upload => {
                    summary.uploads += 1;
                    summary.total_bytes_to_transfer += item.size;
                }
                PlanAction::Update => {
                    summary.updates += 1;
                    summary.total_bytes_to_transfer += item.size;
                }
                PlanAction::Delete => summary.deletes += 1,
                PlanAction::Skip => summary.skips += 1,
            }
        }

        summary
    }
}

/// Planner switches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanOptions {
    pub sync_outdated_files: bool,
    pub delete_abandoned_files: bool,
    pub upload_missing_files: bool,
    pub force: bool,
    /// Whether the target distinguishes paths by case
    pub case_sensitive: bool,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            sync_outdated_files: true,
            delete_abandoned_files: true,
            upload_missing_files: true,
            force: false,
            case_sensitive: true,
        }
    }
}

/// Pure planner: compares two catalogs, performs no IO
#[derive(Debug, Default, Clone, Copy)]
pub struct DiffPlanner;

impl DiffPlanner {
    pub fn new() -> Self {
        Self
    }

    /// Generate the plan that makes `target` match `source`.
    ///
    /// Items come out sorted by path.
    pub fn plan(&self, source: &Catalog, target: &Catalog, options: &PlanOptions) -> Result<Plan> {
        let source_map = keyed(source, options.case_sensitive);
        let target_map = keyed(target, options.case_sensitive);

        let mut keys: Vec<&String> = source_map.keys().chain(target_map.keys()).collect();
        keys.sort();
        keys.dedup();

        let mut items: Vec<PlanItem> = keys
            .into_iter()
            .map(|key| decide(source_map.get(key).copied(), target_map.get(key).copied(), options))
            .collect();
        items.sort_by(|a, b| a.path.cmp(&b.path));

        Plan::new(target.name(), items)
    }
}

/// Index a catalog by comparison key, folding case when the target requires it
fn keyed<'a>(catalog: &'a Catalog, case_sensitive: bool) -> BTreeMap<String, &'a LogicalFile> {
    let mut map: BTreeMap<String, &'a LogicalFile> = BTreeMap::new();

    for file in catalog.iter() {
        let key = if case_sensitive {
            file.path.clone()
        } else {
            file.path.to_lowercase()
        };

        if let Some(existing) = map.get(&key) {
            warn!(
                catalog = %catalog.name(),
                kept = %existing.path,
                dropped = %file.path,
                "paths collide on a case-insensitive target"
            );
            continue;
        }
        map.insert(key, file);
    }

    map
}

fn decide(source: Option<&LogicalFile>, target: Option<&LogicalFile>, options: &PlanOptions) -> PlanItem {
    match (source, target) {
        (Some(src), None) => {
            if !options.upload_missing_files {
                PlanItem::skip(&src.path, SkipReason::MissingNotUploaded)
            } else if options.force {
                PlanItem::new(&src.path, PlanAction::Update, src.size)
            } else {
                PlanItem::new(&src.path, PlanAction::Upload, src.size)
            }
        }
        (None, Some(dst)) => {
            if options.delete_abandoned_files {
                PlanItem::new(&dst.path, PlanAction::Delete, 0)
            } else {
                PlanItem::skip(&dst.path, SkipReason::AbandonedKept)
            }
        }
        (Some(src), Some(dst)) => {
            let outdated = src.fingerprint != dst.fingerprint;
            if outdated && !options.sync_outdated_files {
                PlanItem::skip(&src.path, SkipReason::OutdatedKept)
            } else if outdated || options.force {
                PlanItem::new(&src.path, PlanAction::Update, src.size)
            } else {
                PlanItem::skip(&src.path, SkipReason::InSync)
            }
        }
        (None, None) => unreachable!("planner keys come from one of the catalogs"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{HashAlgorithm, Side};

    fn catalog(name: &str, side: Side, files: &[(&str, &str)]) -> Catalog {
        let files = files.iter().map(|(path, content)| {
            LogicalFile::new(
                *path,
                HashAlgorithm::Blake3.fingerprint(content.as_bytes()),
                content.len() as u64,
                side,
            )
        });
        Catalog::from_files(name, side, files).unwrap()
    }

    #[test]
    fn test_upload_missing_file() {
        let source = catalog("src", Side::Source, &[("a.txt", "one")]);
        let target = catalog("dst", Side::Target, &[]);

        let plan = DiffPlanner::new().plan(&source, &target, &PlanOptions::default()).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.items()[0].action, PlanAction::Upload);
        assert_eq!(plan.summary.uploads, 1);
        assert_eq!(plan.summary.total_bytes_to_transfer, 3);
        assert_eq!(plan.target, "dst");
    }

    #[test]
    fn test_delete_and_skip() {
        let source = catalog("src", Side::Source, &[("a.txt", "one")]);
        let target = catalog("dst", Side::Target, &[("a.txt", "one"), ("b.txt", "two")]);

        let plan = DiffPlanner::new().plan(&source, &target, &PlanOptions::default()).unwrap();
        let actions: Vec<_> = plan.items().iter().map(|i| (i.path.as_str(), i.action)).collect();
        assert_eq!(actions, vec![("a.txt", PlanAction::Skip), ("b.txt", PlanAction::Delete)]);
        assert_eq!(plan.items()[0].skip_reason, Some(SkipReason::InSync));
    }

    #[test]
    fn test_case_insensitive_target_matches_folded_paths() {
        let source = catalog("src", Side::Source, &[("Logo.PNG", "png")]);
        let target = catalog("dst", Side::Target, &[("logo.png", "png")]);

        let sensitive = DiffPlanner::new().plan(&source, &target, &PlanOptions::default()).unwrap();
        assert_eq!(sensitive.summary.uploads, 1);
        assert_eq!(sensitive.summary.deletes, 1);

        let options = PlanOptions {
            case_sensitive: false,
            ..Default::default()
        };
        let folded = DiffPlanner::new().plan(&source, &target, &options).unwrap();
        assert_eq!(folded.len(), 1);
        assert_eq!(folded.items()[0].path, "Logo.PNG");
        assert_eq!(folded.items()[0].action, PlanAction::Skip);
    }

    #[test]
    fn test_plan_rejects_duplicate_paths() {
        let items = vec![
            PlanItem::new("a", PlanAction::Upload, 1),
            PlanItem::new("a", PlanAction::Delete, 0),
        ];
        assert!(matches!(Plan::new("t", items), Err(SyncError::DuplicatePath(_))));
    }
}
