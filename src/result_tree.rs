use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Ordinal risk of deleting a category, 1 (safe) through 5 (high risk).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum RiskLevel {
    Safe = 1,
    Low = 2,
    Moderate = 3,
    Elevated = 4,
    High = 5,
}

impl RiskLevel {
    pub fn ordinal(self) -> u8 {
        self as u8
    }
}

impl From<u8> for RiskLevel {
    // Out-of-range values from a service are clamped rather than rejected.
    fn from(value: u8) -> Self {
        match value {
            0 | 1 => RiskLevel::Safe,
            2 => RiskLevel::Low,
            3 => RiskLevel::Moderate,
            4 => RiskLevel::Elevated,
            _ => RiskLevel::High,
        }
    }
}

impl From<RiskLevel> for u8 {
    fn from(level: RiskLevel) -> Self {
        level.ordinal()
    }
}

/// A single reclaimable unit produced by a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Path or other identifier, unique within one scan.
    pub id: String,
    /// Logical size in bytes.
    pub size: u64,
    /// On-disk size when the service knows it (cluster rounding may make it larger).
    #[serde(default)]
    pub physical_size: Option<u64>,
    /// Owning application for scans that attribute items (social caches, leftovers).
    #[serde(default)]
    pub source: Option<String>,
}

impl Item {
    pub fn new(id: impl Into<String>, size: u64) -> Self {
        Item {
            id: id.into(),
            size,
            physical_size: None,
            source: None,
        }
    }

    pub fn with_physical_size(mut self, physical_size: u64) -> Self {
        self.physical_size = Some(physical_size);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Named group of items. `file_count` and `total_size` are derived from `items`
/// and can only change through [`recompute_category`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "CategoryParts")]
pub struct Category {
    name: String,
    risk: RiskLevel,
    description: String,
    items: Vec<Item>,
    file_count: usize,
    total_size: u64,
}

// Wire shape: stated aggregates are ignored and recomputed on the way in.
#[derive(Deserialize)]
struct CategoryParts {
    name: String,
    risk: RiskLevel,
    #[serde(default)]
    description: String,
    #[serde(default)]
    items: Vec<Item>,
}

impl From<CategoryParts> for Category {
    fn from(parts: CategoryParts) -> Self {
        Category::new(parts.name, parts.risk, parts.description, parts.items)
    }
}

impl Category {
    pub fn new(
        name: impl Into<String>,
        risk: RiskLevel,
        description: impl Into<String>,
        items: Vec<Item>,
    ) -> Self {
        let mut category = Category {
            name: name.into(),
            risk,
            description: description.into(),
            items,
            file_count: 0,
            total_size: 0,
        };
        recompute_category(&mut category);
        category
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn risk(&self) -> RiskLevel {
        self.risk
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn file_count(&self) -> usize {
        self.file_count
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Copy of this category keeping only the items `keep` accepts, with fresh aggregates.
    pub(crate) fn filtered(&self, mut keep: impl FnMut(&Item) -> bool) -> Category {
        let mut category = Category {
            name: self.name.clone(),
            risk: self.risk,
            description: self.description.clone(),
            items: self.items.iter().filter(|item| keep(item)).cloned().collect(),
            file_count: 0,
            total_size: 0,
        };
        recompute_category(&mut category);
        category
    }
}

/// Recompute a category's file count and total size from its current items.
pub fn recompute_category(category: &mut Category) {
    category.file_count = category.items.len();
    category.total_size = category.items.iter().map(|item| item.size).sum();
}

/// Everything one scan of one module produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "TreeParts")]
pub struct ResultTree {
    categories: Vec<Category>,
    total_files: usize,
    total_size: u64,
    scan_duration_ms: u64,
}

#[derive(Deserialize)]
struct TreeParts {
    #[serde(default)]
    categories: Vec<Category>,
    #[serde(default)]
    scan_duration_ms: u64,
}

impl From<TreeParts> for ResultTree {
    fn from(parts: TreeParts) -> Self {
        ResultTree::from_categories(parts.categories, parts.scan_duration_ms)
    }
}

/// Attach tree aggregates to a freshly scanned category list.
pub fn build_tree(categories: Vec<Category>, scan_duration: Duration) -> ResultTree {
    let millis = scan_duration.as_millis().min(u64::MAX as u128) as u64;
    ResultTree::from_categories(categories, millis)
}

impl ResultTree {
    fn from_categories(mut categories: Vec<Category>, scan_duration_ms: u64) -> Self {
        for category in categories.iter_mut() {
            recompute_category(category);
        }
        let total_files = categories.iter().map(|c| c.file_count).sum();
        let total_size = categories.iter().map(|c| c.total_size).sum();
        ResultTree {
            categories,
            total_files,
            total_size,
            scan_duration_ms,
        }
    }

    pub fn empty() -> Self {
        ResultTree::from_categories(Vec::new(), 0)
    }

    /// Same scan with a new category list; the scan duration is carried over.
    pub(crate) fn with_categories(&self, categories: Vec<Category>) -> Self {
        ResultTree::from_categories(categories, self.scan_duration_ms)
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn category(&self, name: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.name == name)
    }

    pub fn total_files(&self) -> usize {
        self.total_files
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn scan_duration(&self) -> Duration {
        Duration::from_millis(self.scan_duration_ms)
    }

    pub fn is_empty(&self) -> bool {
        self.total_files == 0
    }

    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.categories.iter().flat_map(|c| c.items.iter())
    }

    pub fn item_ids(&self) -> impl Iterator<Item = &str> {
        self.items().map(|item| item.id.as_str())
    }

    pub fn item(&self, id: &str) -> Option<&Item> {
        self.items().find(|item| item.id == id)
    }

    /// Linear in the number of items; use [`ResultTree::id_index`] for bulk lookups.
    pub fn contains(&self, id: &str) -> bool {
        self.item(id).is_some()
    }

    pub fn id_index(&self) -> HashSet<&str> {
        self.item_ids().collect()
    }

    /// Whether every stated aggregate matches a recomputation from the items.
    pub fn aggregates_consistent(&self) -> bool {
        let categories_ok = self.categories.iter().all(|c| {
            c.file_count == c.items.len()
                && c.total_size == c.items.iter().map(|i| i.size).sum::<u64>()
        });
        let item_total: u64 = self.items().map(|i| i.size).sum();
        let category_total: u64 = self.categories.iter().map(|c| c.total_size).sum();
        categories_ok
            && self.total_size == category_total
            && self.total_size == item_total
            && self.total_files == self.items().count()
    }
}
