use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytesize::ByteSize;
use dashmap::DashMap;
use futures::future::{try_join_all, BoxFuture};
use log::{debug, info};
use tokio::sync::Semaphore;
use tokio::task;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use super::fs_ops::{entry_sizes, physical_size, remove_entry, FileFamily};
use crate::config::DashboardConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::module::{CleanupService, ModuleKind, ProgressSink, ScanContext};
use crate::reconcile::{DeleteOutcome, FailureReason, ItemOutcome};
use crate::result_tree::{build_tree, Category, Item, ResultTree, RiskLevel};

/// In-process scanner/deleter for the junk and big-files modules.
///
/// Deletes are limited to ids produced by the module's most recent scan.
pub struct LocalCleanupService {
    config: DashboardConfig,
    running: DashMap<ModuleKind, (u64, CancellationToken)>,
    scanned: DashMap<ModuleKind, HashSet<String>>,
    next_scan_id: AtomicU64,
    delete_slots: Arc<Semaphore>,
}

impl LocalCleanupService {
    pub fn new(config: DashboardConfig) -> Self {
        let slots = config.max_parallel_deletes.max(1);
        LocalCleanupService {
            config,
            running: DashMap::new(),
            scanned: DashMap::new(),
            next_scan_id: AtomicU64::new(0),
            delete_slots: Arc::new(Semaphore::new(slots)),
        }
    }

    fn roots_for(&self, module: ModuleKind) -> Option<Vec<PathBuf>> {
        match module {
            ModuleKind::Junk => Some(self.config.junk_roots.clone()),
            ModuleKind::BigFiles => Some(self.config.big_file_roots.clone()),
            _ => None,
        }
    }
}

impl CleanupService for LocalCleanupService {
    fn scan(&self, module: ModuleKind, ctx: ScanContext) -> BoxFuture<'_, ServiceResult<ResultTree>> {
        Box::pin(async move {
            let roots = self
                .roots_for(module)
                .ok_or(ServiceError::Unsupported(module))?;
            let scan_id = self.next_scan_id.fetch_add(1, Ordering::Relaxed);
            self.running.insert(module, (scan_id, ctx.cancel.clone()));

            let started = Instant::now();
            let threshold = self.config.big_file_threshold;
            let ScanContext { cancel, progress } = ctx;
            let categories = task::spawn_blocking(move || match module {
                ModuleKind::BigFiles => scan_big_files(&roots, threshold, &cancel, &progress),
                _ => scan_junk(&roots, &cancel, &progress),
            })
            .await;

            self.running.remove_if(&module, |_, (id, _)| *id == scan_id);
            let tree = build_tree(categories?, started.elapsed());
            self.scanned
                .insert(module, tree.item_ids().map(str::to_string).collect());
            info!(
                "local {} scan: {} item(s), {} in {:?}",
                module,
                tree.total_files(),
                ByteSize(tree.total_size()),
                tree.scan_duration()
            );
            Ok(tree)
        })
    }

    fn cancel_scan(&self, module: ModuleKind) -> BoxFuture<'_, ServiceResult<()>> {
        Box::pin(async move {
            match self.running.get(&module) {
                Some(entry) => entry.value().1.cancel(),
                None => debug!("local {}: no scan to cancel", module),
            }
            Ok(())
        })
    }

    fn delete(&self, module: ModuleKind, paths: Vec<String>) -> BoxFuture<'_, ServiceResult<DeleteOutcome>> {
        Box::pin(async move {
            let roots = Arc::new(
                self.roots_for(module)
                    .ok_or(ServiceError::Unsupported(module))?,
            );
            let known = self
                .scanned
                .get(&module)
                .map(|ids| ids.value().clone())
                .unwrap_or_default();
            let mut pending = Vec::with_capacity(paths.len());
            let mut refused = Vec::new();
            for id in paths {
                if !known.contains(&id) {
                    debug!("local {}: refusing unscanned path {}", module, id);
                    refused.push(ItemOutcome::failed(id, 0, FailureReason::OutOfScope));
                    continue;
                }
                let permit = Arc::clone(&self.delete_slots)
                    .acquire_owned()
                    .await
                    .map_err(|e| ServiceError::Other(e.to_string()))?;
                let roots = Arc::clone(&roots);
                pending.push(task::spawn_blocking(move || {
                    let _permit = permit;
                    remove_entry(&roots, &id)
                }));
            }
            let mut items = try_join_all(pending).await?;
            items.extend(refused);
            if let Some(mut ids) = self.scanned.get_mut(&module) {
                for item in items.iter().filter(|item| item.success) {
                    ids.remove(&item.id);
                }
            }
            Ok(DeleteOutcome::new(items))
        })
    }
}

/// Files at or above `threshold`, bucketed by file family, largest first.
/// Stops early and returns what it has once `cancel` fires.
fn scan_big_files(
    roots: &[PathBuf],
    threshold: u64,
    cancel: &CancellationToken,
    progress: &ProgressSink,
) -> Vec<Category> {
    let mut buckets: BTreeMap<FileFamily, Vec<Item>> = BTreeMap::new();
    'roots: for root in roots {
        if !root.exists() {
            debug!("skipping missing scan root {}", root.display());
            continue;
        }
        for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
            if cancel.is_cancelled() {
                info!("big-files walk stopped early");
                break 'roots;
            }
            if !entry.file_type().is_file() {
                continue;
            }
            progress.report(entry.path().to_string_lossy());
            let Ok(md) = entry.metadata() else {
                continue;
            };
            if md.len() < threshold {
                continue;
            }
            let item = Item::new(entry.path().to_string_lossy(), md.len())
                .with_physical_size(physical_size(&md))
                .with_source(root.to_string_lossy());
            buckets.entry(FileFamily::of(entry.path())).or_default().push(item);
        }
    }

    buckets
        .into_iter()
        .map(|(family, mut items)| {
            items.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.id.cmp(&b.id)));
            Category::new(family.label(), family.risk(), family.description(), items)
        })
        .collect()
}

/// One category per junk root holding its immediate children.
fn scan_junk(roots: &[PathBuf], cancel: &CancellationToken, progress: &ProgressSink) -> Vec<Category> {
    let temp_dir = std::env::temp_dir();
    let mut categories = Vec::new();
    for root in roots {
        if cancel.is_cancelled() {
            break;
        }
        let Ok(children) = fs::read_dir(root) else {
            debug!("skipping unreadable junk root {}", root.display());
            continue;
        };
        let mut items = Vec::new();
        for child in children.filter_map(|e| e.ok()) {
            let path = child.path();
            progress.report(path.to_string_lossy());
            let Ok(md) = fs::symlink_metadata(&path) else {
                continue;
            };
            if md.file_type().is_symlink() {
                continue;
            }
            let (logical, physical) = entry_sizes(&path, &md);
            items.push(
                Item::new(path.to_string_lossy(), logical)
                    .with_physical_size(physical)
                    .with_source(root.to_string_lossy()),
            );
        }
        items.sort_by(|a, b| a.id.cmp(&b.id));
        let (risk, description) = if is_temp_root(root, &temp_dir) {
            (RiskLevel::Safe, "Temporary files left behind by applications")
        } else {
            (RiskLevel::Low, "Application caches that are rebuilt on demand")
        };
        categories.push(Category::new(
            root.to_string_lossy(),
            risk,
            description,
            items,
        ));
    }
    categories
}

fn is_temp_root(root: &Path, temp_dir: &Path) -> bool {
    root == temp_dir
        || matches!(
            (root.canonicalize(), temp_dir.canonicalize()),
            (Ok(a), Ok(b)) if a == b
        )
}
