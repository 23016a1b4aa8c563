use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use bytesize::ByteSize;
use chrono::Utc;
use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};
use tokio_util::sync::CancellationToken;

use super::kind::ModuleKind;
use super::policy::{policy_for_module, SelectionPolicy};
use super::progress::{ProgressEvent, ProgressSink, ScanProgress};
use super::service::{CleanupService, ScanContext};
use crate::config::DashboardConfig;
use crate::dashboard::{DashboardEvent, DashboardStore, ModuleLifecycle, ModuleStatus};
use crate::error::{ControllerError, ServiceError, ServiceResult};
use crate::ops::{OperationId, OperationKind};
use crate::reconcile::{reconcile, DeleteOutcome, DeleteSummary, FailureReason};
use crate::result_tree::ResultTree;
use crate::selection::{self, SelectionSet};

struct ActiveScan {
    generation: u64,
    op_id: OperationId,
    token: CancellationToken,
}

#[derive(Default)]
struct ControllerState {
    /// Bumped by every scan; progress and results from older generations are dropped.
    generation: u64,
    scan: Option<ActiveScan>,
    tree: Option<ResultTree>,
    selection: SelectionSet,
    deleting: bool,
    progress: Option<ScanProgress>,
    last_delete: Option<DeleteSummary>,
    reboot_pending: BTreeSet<String>,
}

fn lock_state(state: &Mutex<ControllerState>) -> MutexGuard<'_, ControllerState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// Ends a scan whose future was dropped before it finished, as if it were cancelled.
struct ScanGuard<'a> {
    controller: &'a ModuleController,
    generation: u64,
    consumer: Option<JoinHandle<()>>,
    finished: bool,
}

impl ScanGuard<'_> {
    fn stop_consumer(&mut self) {
        if let Some(task) = self.consumer.take() {
            task.abort();
        }
    }
}

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.stop_consumer();
        if !self.finished {
            self.controller.abandon_scan(self.generation);
        }
    }
}

// Clears the deleting flag even if the delete future is dropped midway.
struct DeletingGuard {
    state: Arc<Mutex<ControllerState>>,
}

impl Drop for DeletingGuard {
    fn drop(&mut self) {
        lock_state(&self.state).deleting = false;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CategorySelection {
    All,
    Some,
    None,
}

/// Everything the presentation layer needs to render one module.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleSnapshot {
    pub kind: ModuleKind,
    pub lifecycle: ModuleLifecycle,
    pub tree: Option<ResultTree>,
    pub selection: SelectionSet,
    pub selected_count: usize,
    pub selected_size: u64,
    pub deleting: bool,
    pub progress: Option<ScanProgress>,
    pub last_delete: Option<DeleteSummary>,
    pub reboot_pending: BTreeSet<String>,
}

/// Drives one cleanup module: scan lifecycle, selection and delete reconciliation.
///
/// Lifecycle changes are written to the shared [`DashboardStore`]; the result tree
/// and selection stay private to the controller. Controller state is never locked
/// across an await.
pub struct ModuleController {
    kind: ModuleKind,
    service: Arc<dyn CleanupService>,
    store: Arc<DashboardStore>,
    policy: SelectionPolicy,
    config: DashboardConfig,
    state: Arc<Mutex<ControllerState>>,
    scan_finished: Arc<Notify>,
}

impl ModuleController {
    pub fn new(
        kind: ModuleKind,
        service: Arc<dyn CleanupService>,
        store: Arc<DashboardStore>,
        config: DashboardConfig,
    ) -> Self {
        ModuleController {
            kind,
            service,
            store,
            policy: policy_for_module(kind),
            config,
            state: Arc::new(Mutex::new(ControllerState::default())),
            scan_finished: Arc::new(Notify::new()),
        }
    }

    /// Replace the module's default pre-selection rule.
    pub fn with_policy(mut self, policy: SelectionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn kind(&self) -> ModuleKind {
        self.kind
    }

    pub fn status(&self) -> ModuleStatus {
        self.store.lifecycle(self.kind).status
    }

    pub fn is_deleting(&self) -> bool {
        lock_state(&self.state).deleting
    }

    pub fn is_busy(&self) -> bool {
        let state = lock_state(&self.state);
        state.scan.is_some() || state.deleting
    }

    // ---------------- Scan ----------------

    /// Run one scan to completion and return the status it ended in.
    ///
    /// A scan started while another is still running supersedes it; the older
    /// call then returns without touching the module.
    pub async fn scan(&self) -> ModuleStatus {
        let (generation, token) = self.begin_scan();
        let mut guard = ScanGuard {
            controller: self,
            generation,
            consumer: None,
            finished: false,
        };

        let sink = if self.kind.streams_progress() {
            let (sink, rx) = ProgressSink::channel(
                generation,
                self.config.progress_channel_capacity,
                self.config.progress_min_interval(),
            );
            guard.consumer = Some(spawn_progress_consumer(Arc::clone(&self.state), rx));
            sink
        } else {
            ProgressSink::disabled()
        };

        let ctx = ScanContext {
            cancel: token.clone(),
            progress: sink,
        };
        let mut call = self.service.scan(self.kind, ctx);
        let early = tokio::select! {
            result = &mut call => Some(result),
            _ = token.cancelled() => None,
        };
        let result = match early {
            Some(result) => result,
            // cancelled: give the service one grace period to hand back a partial tree
            None => match timeout(self.config.cancel_grace(), &mut call).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        "{}: scan did not return within {:?} of cancellation",
                        self.kind,
                        self.config.cancel_grace()
                    );
                    Err(ServiceError::Cancelled)
                }
            },
        };
        drop(call);

        guard.stop_consumer();
        let status = self.finish_scan(generation, result);
        guard.finished = true;
        status
    }

    fn begin_scan(&self) -> (u64, CancellationToken) {
        let mut guard = lock_state(&self.state);
        let state = &mut *guard;
        if let Some(previous) = state.scan.take() {
            debug!(
                "{}: superseding scan generation {}",
                self.kind, previous.generation
            );
            previous.token.cancel();
            self.store.operations().finish_canceled(&previous.op_id);
        }
        state.generation += 1;
        let generation = state.generation;
        let (op_id, token) = self
            .store
            .operations()
            .register(OperationKind::Scan, self.kind);
        state.scan = Some(ActiveScan {
            generation,
            op_id,
            token: token.clone(),
        });
        state.tree = None;
        state.selection.clear();
        state.progress = None;
        state.reboot_pending.clear();
        self.store
            .replace_lifecycle(self.kind, ModuleLifecycle::scanning());
        info!("{}: scan started (generation {})", self.kind, generation);
        (generation, token)
    }

    fn finish_scan(&self, generation: u64, result: ServiceResult<ResultTree>) -> ModuleStatus {
        let mut guard = lock_state(&self.state);
        let state = &mut *guard;
        let active = match state.scan.take() {
            Some(active) if active.generation == generation => active,
            other => {
                state.scan = other;
                debug!(
                    "{}: discarding result of superseded scan generation {}",
                    self.kind, generation
                );
                return self.status();
            }
        };

        let cancelled = active.token.is_cancelled();
        let ops = self.store.operations();
        let record = match result {
            Ok(tree) => {
                info!(
                    "{}: scan finished with {} item(s), {}{}",
                    self.kind,
                    tree.total_files(),
                    ByteSize(tree.total_size()),
                    if cancelled { " (cancelled, partial)" } else { "" }
                );
                if cancelled {
                    ops.finish_canceled(&active.op_id);
                } else {
                    ops.finish_success(&active.op_id);
                }
                state.selection = self.policy.initial_selection(&tree);
                let record = ModuleLifecycle::done(&tree);
                state.tree = Some(tree);
                record
            }
            // a user-initiated cancel never ends in the error state
            Err(err) if cancelled => {
                info!("{}: scan cancelled without results ({})", self.kind, err);
                ops.finish_canceled(&active.op_id);
                let tree = ResultTree::empty();
                let record = ModuleLifecycle::done(&tree);
                state.selection.clear();
                state.tree = Some(tree);
                record
            }
            Err(err) => {
                warn!("{}: scan failed: {}", self.kind, err);
                ops.finish_failed(&active.op_id, &err.to_string());
                state.selection.clear();
                state.tree = None;
                ModuleLifecycle::failed(err.to_string())
            }
        };
        let status = record.status;
        self.store.replace_lifecycle(self.kind, record);
        drop(guard);
        self.scan_finished.notify_waiters();
        status
    }

    // Nobody is waiting for this scan any more; settle it like a cancelled one.
    fn abandon_scan(&self, generation: u64) {
        {
            let state = lock_state(&self.state);
            match state.scan.as_ref() {
                Some(active) if active.generation == generation => active.token.cancel(),
                _ => return,
            }
        }
        warn!("{}: scan generation {} dropped before finishing", self.kind, generation);
        self.finish_scan(generation, Err(ServiceError::Cancelled));
    }

    fn active_generation(&self) -> Option<u64> {
        lock_state(&self.state).scan.as_ref().map(|s| s.generation)
    }

    /// Stop a running big-files scan.
    ///
    /// The module leaves `scanning` within two grace periods whether or not the
    /// service acknowledges the request or the scan future is still being polled.
    pub async fn cancel(&self) -> Result<(), ControllerError> {
        if !self.kind.supports_cancel() {
            return Err(ControllerError::CancelUnsupported(self.kind));
        }
        let finished = self.scan_finished.notified();
        let active = {
            let state = lock_state(&self.state);
            state.scan.as_ref().map(|s| (s.generation, s.op_id.clone()))
        };
        let Some((generation, op_id)) = active else {
            debug!("{}: cancel requested with no scan running", self.kind);
            return Ok(());
        };

        let grace = self.config.cancel_grace();
        let deadline = Instant::now() + grace * 2;
        self.store.operations().cancel(&op_id);

        match timeout(grace, self.service.cancel_scan(self.kind)).await {
            Ok(Ok(())) => debug!("{}: cancel delivered", self.kind),
            Ok(Err(err)) => warn!("{}: cancel request failed: {}", self.kind, err),
            Err(_) => warn!("{}: cancel request timed out after {:?}", self.kind, grace),
        }

        if self.active_generation() == Some(generation)
            && timeout_at(deadline, finished).await.is_err()
            && self.active_generation() == Some(generation)
        {
            warn!("{}: abandoning scan that ignored cancellation", self.kind);
            self.finish_scan(generation, Err(ServiceError::Cancelled));
        }
        Ok(())
    }

    // ---------------- Selection ----------------

    /// Flip one item. Returns whether it is selected afterwards; unknown ids are ignored.
    pub fn toggle_item(&self, id: &str) -> bool {
        let mut guard = lock_state(&self.state);
        let state = &mut *guard;
        let Some(tree) = state.tree.as_ref() else {
            debug!("{}: ignoring selection of {} with no results", self.kind, id);
            return false;
        };
        if !tree.contains(id) {
            debug!("{}: ignoring selection of unknown item {}", self.kind, id);
            return false;
        }
        state.selection = selection::toggle_item(&state.selection, tree, id);
        state.selection.contains(id)
    }

    /// Select or clear a whole category. Returns false when the category is unknown.
    pub fn toggle_category(&self, name: &str, make_selected: bool) -> bool {
        let mut guard = lock_state(&self.state);
        let state = &mut *guard;
        let Some(category) = state.tree.as_ref().and_then(|tree| tree.category(name)) else {
            debug!("{}: ignoring unknown category {}", self.kind, name);
            return false;
        };
        state.selection = selection::toggle_category(&state.selection, category, make_selected);
        true
    }

    pub fn select_all(&self, select: bool) {
        let mut guard = lock_state(&self.state);
        let state = &mut *guard;
        state.selection = match state.tree.as_ref() {
            Some(tree) => selection::select_all(tree, select),
            None => SelectionSet::new(),
        };
    }

    pub fn category_selection(&self, name: &str) -> Option<CategorySelection> {
        let state = lock_state(&self.state);
        let category = state.tree.as_ref()?.category(name)?;
        Some(if selection::is_category_fully_selected(category, &state.selection) {
            CategorySelection::All
        } else if selection::is_category_partially_selected(category, &state.selection) {
            CategorySelection::Some
        } else {
            CategorySelection::None
        })
    }

    pub fn selection(&self) -> SelectionSet {
        lock_state(&self.state).selection.clone()
    }

    pub fn selected_size(&self) -> u64 {
        let state = lock_state(&self.state);
        state
            .tree
            .as_ref()
            .map(|tree| selection::selected_size(tree, &state.selection))
            .unwrap_or(0)
    }

    pub fn tree(&self) -> Option<ResultTree> {
        lock_state(&self.state).tree.clone()
    }

    pub fn progress(&self) -> Option<ScanProgress> {
        lock_state(&self.state).progress.clone()
    }

    pub fn snapshot(&self) -> ModuleSnapshot {
        let lifecycle = self.store.lifecycle(self.kind);
        let state = lock_state(&self.state);
        let (selected_count, selected_size) = match state.tree.as_ref() {
            Some(tree) => (
                selection::selected_count(tree, &state.selection),
                selection::selected_size(tree, &state.selection),
            ),
            None => (0, 0),
        };
        ModuleSnapshot {
            kind: self.kind,
            lifecycle,
            tree: state.tree.clone(),
            selection: state.selection.clone(),
            selected_count,
            selected_size,
            deleting: state.deleting,
            progress: state.progress.clone(),
            last_delete: state.last_delete.clone(),
            reboot_pending: state.reboot_pending.clone(),
        }
    }

    // ---------------- Delete ----------------

    /// Delete the current selection and fold the outcome back into the tree.
    ///
    /// Transport failures become a per-item `Other` failure for every attempted
    /// path; they are never returned as an error.
    pub async fn delete(&self) -> Result<DeleteSummary, ControllerError> {
        let (generation, attempted) = {
            let mut guard = lock_state(&self.state);
            let state = &mut *guard;
            if state.deleting {
                return Err(ControllerError::DeleteInFlight);
            }
            let Some(tree) = state.tree.as_ref() else {
                return Err(ControllerError::NoResults);
            };
            let sizes: HashMap<&str, u64> =
                tree.items().map(|item| (item.id.as_str(), item.size)).collect();
            // items already queued for removal at reboot are not sent again
            let attempted: Vec<(String, u64)> = state
                .selection
                .iter()
                .filter(|id| !state.reboot_pending.contains(id.as_str()))
                .map(|id| (id.clone(), sizes.get(id.as_str()).copied().unwrap_or(0)))
                .collect();
            if attempted.is_empty() {
                return Err(ControllerError::EmptySelection);
            }
            state.deleting = true;
            (state.generation, attempted)
        };
        let deleting = DeletingGuard {
            state: Arc::clone(&self.state),
        };

        let ops = self.store.operations();
        let (op_id, _) = ops.register(OperationKind::Delete, self.kind);
        let paths: Vec<String> = attempted.iter().map(|(id, _)| id.clone()).collect();
        ops.update(&op_id, |op| op.details = Some(format!("{} path(s)", paths.len())));
        info!("{}: deleting {} item(s)", self.kind, paths.len());

        let outcome = match self.service.delete(self.kind, paths).await {
            Ok(outcome) => {
                ops.finish_success(&op_id);
                outcome
            }
            Err(err) => {
                warn!("{}: delete call failed: {}", self.kind, err);
                ops.finish_failed(&op_id, &err.to_string());
                DeleteOutcome::all_failed(attempted, FailureReason::Other(err.to_string()))
            }
        };

        let summary = self.apply_outcome(generation, &outcome);
        drop(deleting);

        info!(
            "{}: delete finished: {} removed, {} failed, {} pending reboot, {} freed",
            self.kind,
            summary.success_count,
            summary.failed_count,
            summary.reboot_pending_count,
            ByteSize(summary.freed_physical_size)
        );
        self.store.trigger_refresh();
        Ok(summary)
    }

    fn apply_outcome(&self, generation: u64, outcome: &DeleteOutcome) -> DeleteSummary {
        let mut guard = lock_state(&self.state);
        let state = &mut *guard;
        let current = state.generation == generation && state.scan.is_none();
        let reconciled = match state.tree.as_ref() {
            Some(tree) if current => Some(reconcile(tree, &state.selection, outcome)),
            _ => None,
        };

        let summary = match reconciled {
            Some(result) => {
                self.store
                    .replace_lifecycle(self.kind, ModuleLifecycle::done(&result.tree));
                state
                    .reboot_pending
                    .extend(result.summary.reboot_pending.iter().cloned());
                let present = result.tree.id_index();
                state.reboot_pending.retain(|id| present.contains(id.as_str()));
                state.tree = Some(result.tree);
                state.selection = result.selection;
                result.summary
            }
            None => {
                debug!(
                    "{}: results were replaced while deleting; skipping reconciliation",
                    self.kind
                );
                DeleteSummary::from_outcome(outcome)
            }
        };
        state.last_delete = Some(summary.clone());
        summary
    }

    // ---------------- Fan-out ----------------

    /// Start `scan()` on a background task.
    pub fn spawn_scan(self: &Arc<Self>) -> JoinHandle<ModuleStatus> {
        let controller = Arc::clone(self);
        tokio::spawn(async move { controller.scan().await })
    }

    /// Rescan whenever the dashboard fires a scan-all generation this module has
    /// not handled yet. Abort the handle to unmount the module.
    pub fn spawn_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        let baseline = controller.store.scan_all_generation();
        let mut events = controller.store.subscribe();
        tokio::spawn(async move {
            let mut last_seen = baseline;
            // a trigger that raced the subscription is not in the channel
            let current = controller.store.scan_all_generation();
            if current > last_seen {
                last_seen = current;
                let _ = controller.spawn_scan();
            }
            loop {
                let generation = match events.recv().await {
                    Ok(DashboardEvent::ScanAll(generation)) => generation,
                    Ok(DashboardEvent::Refresh(_)) => continue,
                    Err(RecvError::Lagged(missed)) => {
                        debug!("{}: listener lagged by {} event(s)", controller.kind, missed);
                        controller.store.scan_all_generation()
                    }
                    Err(RecvError::Closed) => break,
                };
                if generation > last_seen {
                    last_seen = generation;
                    let _ = controller.spawn_scan();
                }
            }
        })
    }
}

fn spawn_progress_consumer(
    state: Arc<Mutex<ControllerState>>,
    mut rx: mpsc::Receiver<ProgressEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let mut guard = lock_state(&state);
            let live = matches!(
                guard.scan.as_ref(),
                Some(active) if active.generation == event.generation
            );
            if !live {
                debug!("dropping late progress from scan generation {}", event.generation);
                continue;
            }
            let seen = guard.progress.as_ref().map(|p| p.messages_seen).unwrap_or(0);
            guard.progress = Some(ScanProgress {
                current_path: event.path,
                messages_seen: seen + 1,
                updated_at: Utc::now(),
            });
        }
    })
}
