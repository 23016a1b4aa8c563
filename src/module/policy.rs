use std::fmt;
use std::sync::Arc;

use super::kind::ModuleKind;
use crate::result_tree::{ResultTree, RiskLevel};
use crate::selection::{self, SelectionSet};

type SelectFn = dyn Fn(&ResultTree) -> SelectionSet + Send + Sync;

/// What gets pre-selected when a scan completes.
#[derive(Clone)]
pub enum SelectionPolicy {
    Nothing,
    Everything,
    /// Every item in categories at or below this risk.
    UpToRisk(RiskLevel),
    Custom(Arc<SelectFn>),
}

impl SelectionPolicy {
    pub fn custom(f: impl Fn(&ResultTree) -> SelectionSet + Send + Sync + 'static) -> Self {
        SelectionPolicy::Custom(Arc::new(f))
    }

    pub fn initial_selection(&self, tree: &ResultTree) -> SelectionSet {
        match self {
            SelectionPolicy::Nothing => SelectionSet::new(),
            SelectionPolicy::Everything => selection::select_all(tree, true),
            SelectionPolicy::UpToRisk(max) => tree
                .categories()
                .iter()
                .filter(|c| c.risk() <= *max)
                .flat_map(|c| c.items().iter().map(|item| item.id.clone()))
                .collect(),
            // custom policies may name ids the tree lacks
            SelectionPolicy::Custom(f) => selection::prune(&f(tree), tree),
        }
    }
}

impl fmt::Debug for SelectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionPolicy::Nothing => write!(f, "Nothing"),
            SelectionPolicy::Everything => write!(f, "Everything"),
            SelectionPolicy::UpToRisk(level) => write!(f, "UpToRisk({:?})", level),
            SelectionPolicy::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

pub fn policy_for_module(kind: ModuleKind) -> SelectionPolicy {
    match kind {
        ModuleKind::Junk => SelectionPolicy::UpToRisk(RiskLevel::Low),
        ModuleKind::Social => SelectionPolicy::UpToRisk(RiskLevel::Safe),
        ModuleKind::Leftovers | ModuleKind::Registry => SelectionPolicy::Everything,
        ModuleKind::BigFiles | ModuleKind::SystemSlim => SelectionPolicy::Nothing,
    }
}
