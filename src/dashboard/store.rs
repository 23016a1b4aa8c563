use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::info;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::config::DashboardConfig;
use crate::module::ModuleKind;
use crate::ops::OperationRegistry;
use crate::result_tree::ResultTree;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleStatus {
    Idle,
    Scanning,
    Done,
    Error,
}

/// Dashboard-level view of one module. Always replaced as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleLifecycle {
    pub status: ModuleStatus,
    pub file_count: usize,
    pub total_size: u64,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ModuleLifecycle {
    pub fn idle() -> Self {
        ModuleLifecycle {
            status: ModuleStatus::Idle,
            file_count: 0,
            total_size: 0,
            error: None,
            updated_at: Utc::now(),
        }
    }

    pub fn scanning() -> Self {
        ModuleLifecycle {
            status: ModuleStatus::Scanning,
            ..ModuleLifecycle::idle()
        }
    }

    pub fn done(tree: &ResultTree) -> Self {
        ModuleLifecycle {
            status: ModuleStatus::Done,
            file_count: tree.total_files(),
            total_size: tree.total_size(),
            ..ModuleLifecycle::idle()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        ModuleLifecycle {
            status: ModuleStatus::Error,
            error: Some(message.into()),
            ..ModuleLifecycle::idle()
        }
    }
}

/// Broadcast to every subscriber; the number is the generation that fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DashboardEvent {
    ScanAll(u64),
    Refresh(u64),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DashboardTotals {
    pub modules_done: usize,
    pub file_count: usize,
    pub total_size: u64,
}

/// Shared dashboard state: one lifecycle record per module plus the scan-all and
/// refresh triggers. Share it through an `Arc`; each test builds its own.
pub struct DashboardStore {
    lifecycles: DashMap<ModuleKind, ModuleLifecycle>,
    expanded: Mutex<Option<ModuleKind>>,
    scan_all_generation: AtomicU64,
    refresh_generation: AtomicU64,
    events: broadcast::Sender<DashboardEvent>,
    operations: OperationRegistry,
}

impl DashboardStore {
    pub fn new(config: &DashboardConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_channel_capacity.max(1));
        let lifecycles = DashMap::new();
        for kind in ModuleKind::ALL {
            lifecycles.insert(kind, ModuleLifecycle::idle());
        }
        DashboardStore {
            lifecycles,
            expanded: Mutex::new(None),
            scan_all_generation: AtomicU64::new(0),
            refresh_generation: AtomicU64::new(0),
            events,
            operations: OperationRegistry::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DashboardEvent> {
        self.events.subscribe()
    }

    /// Ask every listening module to rescan. Returns immediately.
    pub fn trigger_scan_all(&self) -> u64 {
        let generation = self.scan_all_generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!("scan-all triggered (generation {})", generation);
        // no subscribers is fine: nothing is mounted yet
        let _ = self.events.send(DashboardEvent::ScanAll(generation));
        generation
    }

    /// Tell the disk-usage and health views to re-pull their data.
    pub fn trigger_refresh(&self) -> u64 {
        let generation = self.refresh_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.events.send(DashboardEvent::Refresh(generation));
        generation
    }

    pub fn scan_all_generation(&self) -> u64 {
        self.scan_all_generation.load(Ordering::SeqCst)
    }

    pub fn refresh_generation(&self) -> u64 {
        self.refresh_generation.load(Ordering::SeqCst)
    }

    pub fn is_any_busy(&self) -> bool {
        self.lifecycles
            .iter()
            .any(|entry| entry.value().status == ModuleStatus::Scanning)
    }

    pub fn lifecycle(&self, kind: ModuleKind) -> ModuleLifecycle {
        self.lifecycles
            .get(&kind)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(ModuleLifecycle::idle)
    }

    pub fn lifecycles(&self) -> Vec<(ModuleKind, ModuleLifecycle)> {
        ModuleKind::ALL
            .iter()
            .map(|kind| (*kind, self.lifecycle(*kind)))
            .collect()
    }

    pub(crate) fn replace_lifecycle(&self, kind: ModuleKind, record: ModuleLifecycle) {
        self.lifecycles.insert(kind, record);
    }

    pub fn totals(&self) -> DashboardTotals {
        self.lifecycles
            .iter()
            .filter(|entry| entry.value().status == ModuleStatus::Done)
            .fold(DashboardTotals::default(), |mut acc, entry| {
                acc.modules_done += 1;
                acc.file_count += entry.value().file_count;
                acc.total_size += entry.value().total_size;
                acc
            })
    }

    pub fn expanded(&self) -> Option<ModuleKind> {
        *self.expanded.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn set_expanded(&self, kind: Option<ModuleKind>) {
        *self.expanded.lock().unwrap_or_else(|p| p.into_inner()) = kind;
    }

    /// Expand `kind`, collapsing whichever module was open; collapse it if it already was.
    pub fn toggle_expanded(&self, kind: ModuleKind) -> Option<ModuleKind> {
        let mut guard = self.expanded.lock().unwrap_or_else(|p| p.into_inner());
        *guard = if *guard == Some(kind) { None } else { Some(kind) };
        *guard
    }

    pub fn operations(&self) -> &OperationRegistry {
        &self.operations
    }
}
