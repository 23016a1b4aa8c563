use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::result_tree::ResultTree;
use crate::selection::{self, SelectionSet};

/// Why a single item could not be deleted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum FailureReason {
    NotFound,
    PermissionDenied,
    Locked,
    SystemProtected,
    OutOfScope,
    Other(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::NotFound => write!(f, "not found"),
            FailureReason::PermissionDenied => write!(f, "permission denied"),
            FailureReason::Locked => write!(f, "in use"),
            FailureReason::SystemProtected => write!(f, "protected by the system"),
            FailureReason::OutOfScope => write!(f, "outside the scanned locations"),
            FailureReason::Other(message) => write!(f, "{}", message),
        }
    }
}

/// Result of deleting one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub id: String,
    pub success: bool,
    pub logical_size: u64,
    pub physical_size: u64,
    #[serde(default)]
    pub failure: Option<FailureReason>,
    /// Scheduled for removal on next restart; only meaningful with `failure == Locked`.
    #[serde(default)]
    pub deferred_to_reboot: bool,
}

impl ItemOutcome {
    pub fn deleted(id: impl Into<String>, logical_size: u64, physical_size: u64) -> Self {
        ItemOutcome {
            id: id.into(),
            success: true,
            logical_size,
            physical_size,
            failure: None,
            deferred_to_reboot: false,
        }
    }

    pub fn failed(id: impl Into<String>, logical_size: u64, reason: FailureReason) -> Self {
        ItemOutcome {
            id: id.into(),
            success: false,
            logical_size,
            physical_size: 0,
            failure: Some(reason),
            deferred_to_reboot: false,
        }
    }

    /// Locked now, removed on the next restart.
    pub fn deferred(id: impl Into<String>, logical_size: u64) -> Self {
        ItemOutcome {
            deferred_to_reboot: true,
            ..ItemOutcome::failed(id, logical_size, FailureReason::Locked)
        }
    }

    pub fn is_deferred(&self) -> bool {
        !self.success && self.deferred_to_reboot
    }

    fn reason(&self) -> FailureReason {
        self.failure
            .clone()
            .unwrap_or_else(|| FailureReason::Other("unknown failure".into()))
    }
}

/// Per-item results of one delete call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOutcome {
    pub items: Vec<ItemOutcome>,
}

impl DeleteOutcome {
    pub fn new(items: Vec<ItemOutcome>) -> Self {
        DeleteOutcome { items }
    }

    /// Every attempted path failed with the same reason; used when the call itself broke.
    pub fn all_failed<I>(attempted: I, reason: FailureReason) -> Self
    where
        I: IntoIterator<Item = (String, u64)>,
    {
        DeleteOutcome {
            items: attempted
                .into_iter()
                .map(|(id, size)| ItemOutcome::failed(id, size, reason.clone()))
                .collect(),
        }
    }

    // Successes first, then failures for ids that did not also succeed; one entry per id.
    fn partition(&self) -> (Vec<&ItemOutcome>, Vec<&ItemOutcome>) {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut removed = Vec::new();
        for entry in self.items.iter().filter(|e| e.success) {
            if seen.insert(entry.id.as_str()) {
                removed.push(entry);
            }
        }
        let mut kept = Vec::new();
        for entry in self.items.iter().filter(|e| !e.success) {
            if seen.insert(entry.id.as_str()) {
                kept.push(entry);
            }
        }
        (removed, kept)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedItem {
    pub id: String,
    pub reason: FailureReason,
}

/// Aggregate statistics of a delete outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteSummary {
    pub success_count: usize,
    pub failed_count: usize,
    pub reboot_pending_count: usize,
    pub freed_logical_size: u64,
    pub freed_physical_size: u64,
    pub skipped_size: u64,
    pub failures: Vec<FailedItem>,
    pub reboot_pending: Vec<String>,
}

impl DeleteSummary {
    pub fn from_outcome(outcome: &DeleteOutcome) -> Self {
        let (removed, kept) = outcome.partition();
        Self::from_partition(&removed, &kept)
    }

    fn from_partition(removed: &[&ItemOutcome], kept: &[&ItemOutcome]) -> Self {
        let (deferred, failed): (Vec<&ItemOutcome>, Vec<&ItemOutcome>) =
            kept.iter().copied().partition(|e| e.is_deferred());
        DeleteSummary {
            success_count: removed.len(),
            failed_count: failed.len(),
            reboot_pending_count: deferred.len(),
            freed_logical_size: removed.iter().map(|e| e.logical_size).sum(),
            freed_physical_size: removed.iter().map(|e| e.physical_size).sum(),
            skipped_size: failed.iter().map(|e| e.logical_size).sum(),
            failures: failed
                .iter()
                .map(|e| FailedItem {
                    id: e.id.clone(),
                    reason: e.reason(),
                })
                .collect(),
            reboot_pending: deferred.iter().map(|e| e.id.clone()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub tree: ResultTree,
    pub selection: SelectionSet,
    pub summary: DeleteSummary,
}

/// Fold a delete outcome back into the tree it was issued against.
///
/// Successful ids leave the tree and the selection. Failed and deferred items stay
/// in both so the user can see them and retry. Re-running with the same outcome
/// against the returned tree removes nothing further.
pub fn reconcile(
    tree: &ResultTree,
    selection: &SelectionSet,
    outcome: &DeleteOutcome,
) -> Reconciliation {
    let (removed, kept) = outcome.partition();
    let removed_ids: HashSet<&str> = removed.iter().map(|e| e.id.as_str()).collect();

    let categories = tree
        .categories()
        .iter()
        .map(|category| category.filtered(|item| !removed_ids.contains(item.id.as_str())))
        .collect();
    let next_tree = tree.with_categories(categories);

    let remaining: SelectionSet = selection
        .iter()
        .filter(|id| !removed_ids.contains(id.as_str()))
        .cloned()
        .collect();
    let next_selection = selection::prune(&remaining, &next_tree);

    Reconciliation {
        tree: next_tree,
        selection: next_selection,
        summary: DeleteSummary::from_partition(&removed, &kept),
    }
}
