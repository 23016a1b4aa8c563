//! Selection algebra over a module's result tree.
//!
//! Every function is pure and returns a new set. Identifiers that are not in the
//! tree are ignored, so a set built only through these functions never holds an
//! id the tree does not contain.

use std::collections::BTreeSet;

use crate::result_tree::{Category, ResultTree};

pub type SelectionSet = BTreeSet<String>;

/// Flip membership of `id`. Unknown ids leave the set unchanged.
pub fn toggle_item(set: &SelectionSet, tree: &ResultTree, id: &str) -> SelectionSet {
    let mut next = set.clone();
    if !tree.contains(id) {
        return next;
    }
    if !next.remove(id) {
        next.insert(id.to_string());
    }
    next
}

/// Add every item of `category` to the set, or remove every one of them.
pub fn toggle_category(set: &SelectionSet, category: &Category, make_selected: bool) -> SelectionSet {
    let mut next = set.clone();
    for item in category.items() {
        if make_selected {
            next.insert(item.id.clone());
        } else {
            next.remove(&item.id);
        }
    }
    next
}

/// Every item id in the tree, or nothing.
pub fn select_all(tree: &ResultTree, select: bool) -> SelectionSet {
    if select {
        tree.item_ids().map(str::to_string).collect()
    } else {
        SelectionSet::new()
    }
}

pub fn is_category_fully_selected(category: &Category, set: &SelectionSet) -> bool {
    !category.is_empty() && category.items().iter().all(|item| set.contains(&item.id))
}

pub fn is_category_partially_selected(category: &Category, set: &SelectionSet) -> bool {
    let selected = category
        .items()
        .iter()
        .filter(|item| set.contains(&item.id))
        .count();
    selected > 0 && selected < category.file_count()
}

pub fn selected_size(tree: &ResultTree, set: &SelectionSet) -> u64 {
    tree.items()
        .filter(|item| set.contains(&item.id))
        .map(|item| item.size)
        .sum()
}

pub fn selected_count(tree: &ResultTree, set: &SelectionSet) -> usize {
    tree.items().filter(|item| set.contains(&item.id)).count()
}

/// Drop ids the tree no longer contains. One pass over the tree.
pub fn prune(set: &SelectionSet, tree: &ResultTree) -> SelectionSet {
    if set.is_empty() {
        return SelectionSet::new();
    }
    tree.item_ids()
        .filter(|id| set.contains(*id))
        .map(str::to_string)
        .collect()
}
