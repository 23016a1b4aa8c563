#![cfg(test)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::Notify;
use tokio::time::{sleep, timeout};

use super::*;
use crate::config::DashboardConfig;
use crate::dashboard::{DashboardStore, ModuleStatus};
use crate::error::{ControllerError, ServiceError, ServiceResult};
use crate::reconcile::{DeleteOutcome, FailureReason, ItemOutcome};
use crate::result_tree::{build_tree, Category, Item, ResultTree, RiskLevel};
use crate::selection::SelectionSet;

#[derive(Clone)]
enum ScanScript {
    Immediate(ServiceResult<ResultTree>),
    Gated(Arc<Notify>, ServiceResult<ResultTree>),
    ReportThenGate(Vec<String>, Arc<Notify>, ResultTree),
    UntilCancelled(Vec<String>, ResultTree),
    CaptureSink(Arc<Mutex<Option<ProgressSink>>>, ResultTree),
    IgnoresCancel,
}

#[derive(Clone)]
enum DeleteScript {
    Outcome(DeleteOutcome),
    Fail(ServiceError),
    Gated(Arc<Notify>, DeleteOutcome),
}

#[derive(Default)]
struct FakeService {
    scans: Mutex<HashMap<ModuleKind, ScanScript>>,
    delete: Mutex<Option<DeleteScript>>,
    cancel_fails: Mutex<bool>,
    cancel_calls: AtomicUsize,
    deleted_paths: Mutex<Vec<Vec<String>>>,
}

impl FakeService {
    fn script_scan(&self, module: ModuleKind, script: ScanScript) {
        self.scans.lock().unwrap().insert(module, script);
    }

    fn script_delete(&self, script: DeleteScript) {
        *self.delete.lock().unwrap() = Some(script);
    }
}

impl CleanupService for FakeService {
    fn scan(&self, module: ModuleKind, ctx: ScanContext) -> BoxFuture<'_, ServiceResult<ResultTree>> {
        let script = self
            .scans
            .lock()
            .unwrap()
            .get(&module)
            .cloned()
            .unwrap_or(ScanScript::Immediate(Err(ServiceError::Unsupported(module))));
        Box::pin(async move {
            match script {
                ScanScript::Immediate(result) => result,
                ScanScript::Gated(gate, result) => {
                    gate.notified().await;
                    result
                }
                ScanScript::ReportThenGate(paths, gate, tree) => {
                    for path in paths {
                        ctx.progress.report(path);
                    }
                    gate.notified().await;
                    Ok(tree)
                }
                ScanScript::UntilCancelled(paths, partial) => {
                    for path in paths {
                        ctx.progress.report(path);
                    }
                    ctx.cancel.cancelled().await;
                    Ok(partial)
                }
                ScanScript::CaptureSink(slot, tree) => {
                    *slot.lock().unwrap() = Some(ctx.progress.clone());
                    Ok(tree)
                }
                ScanScript::IgnoresCancel => futures::future::pending().await,
            }
        })
    }

    fn cancel_scan(&self, _module: ModuleKind) -> BoxFuture<'_, ServiceResult<()>> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        let fails = *self.cancel_fails.lock().unwrap();
        Box::pin(async move {
            if fails {
                Err(ServiceError::Transport("ipc channel closed".into()))
            } else {
                Ok(())
            }
        })
    }

    fn delete(&self, _module: ModuleKind, paths: Vec<String>) -> BoxFuture<'_, ServiceResult<DeleteOutcome>> {
        self.deleted_paths.lock().unwrap().push(paths);
        let script = self.delete.lock().unwrap().clone();
        Box::pin(async move {
            match script {
                Some(DeleteScript::Outcome(outcome)) => Ok(outcome),
                Some(DeleteScript::Fail(err)) => Err(err),
                Some(DeleteScript::Gated(gate, outcome)) => {
                    gate.notified().await;
                    Ok(outcome)
                }
                None => Ok(DeleteOutcome::default()),
            }
        })
    }
}

fn test_config() -> DashboardConfig {
    DashboardConfig {
        cancel_grace_ms: 50,
        progress_min_interval_ms: 0,
        ..DashboardConfig::default()
    }
}

struct Harness {
    service: Arc<FakeService>,
    store: Arc<DashboardStore>,
}

impl Harness {
    fn new() -> Self {
        let config = test_config();
        Harness {
            service: Arc::new(FakeService::default()),
            store: Arc::new(DashboardStore::new(&config)),
        }
    }

    fn controller(&self, kind: ModuleKind) -> Arc<ModuleController> {
        let service: Arc<dyn CleanupService> = self.service.clone();
        Arc::new(ModuleController::new(
            kind,
            service,
            Arc::clone(&self.store),
            test_config(),
        ))
    }

    fn controller_with_policy(&self, kind: ModuleKind, policy: SelectionPolicy) -> Arc<ModuleController> {
        let service: Arc<dyn CleanupService> = self.service.clone();
        Arc::new(
            ModuleController::new(kind, service, Arc::clone(&self.store), test_config())
                .with_policy(policy),
        )
    }
}

fn junk_tree() -> ResultTree {
    build_tree(
        vec![
            Category::new(
                "Temp Files",
                RiskLevel::Safe,
                "Scratch files left by applications",
                vec![Item::new("a", 100), Item::new("b", 200), Item::new("c", 300)],
            ),
            Category::new(
                "Crash Dumps",
                RiskLevel::Elevated,
                "Diagnostic dumps",
                vec![Item::new("d", 4000)],
            ),
        ],
        Duration::from_millis(12),
    )
}

fn temp_only_tree() -> ResultTree {
    build_tree(
        vec![Category::new(
            "Temp Files",
            RiskLevel::Safe,
            "",
            vec![Item::new("a", 100), Item::new("b", 200), Item::new("c", 300)],
        )],
        Duration::ZERO,
    )
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn ids(list: &[&str]) -> SelectionSet {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn scan_success_applies_module_policy() {
    let h = Harness::new();
    h.service
        .script_scan(ModuleKind::Junk, ScanScript::Immediate(Ok(junk_tree())));
    let junk = h.controller(ModuleKind::Junk);

    assert_eq!(junk.status(), ModuleStatus::Idle);
    assert_eq!(junk.scan().await, ModuleStatus::Done);

    assert_eq!(junk.selection(), ids(&["a", "b", "c"]));
    assert_eq!(junk.selected_size(), 600);
    let record = h.store.lifecycle(ModuleKind::Junk);
    assert_eq!(record.file_count, 4);
    assert_eq!(record.total_size, 4600);
    assert!(record.error.is_none());
    assert!(h.store.operations().active().is_empty());
}

#[tokio::test]
async fn scan_failure_is_recoverable() {
    let h = Harness::new();
    h.service.script_scan(
        ModuleKind::Registry,
        ScanScript::Immediate(Err(ServiceError::Transport("pipe closed".into()))),
    );
    let registry = h.controller(ModuleKind::Registry);

    assert_eq!(registry.scan().await, ModuleStatus::Error);
    let record = h.store.lifecycle(ModuleKind::Registry);
    assert!(record.error.unwrap().contains("pipe closed"));
    assert!(registry.tree().is_none());

    h.service
        .script_scan(ModuleKind::Registry, ScanScript::Immediate(Ok(junk_tree())));
    assert_eq!(registry.scan().await, ModuleStatus::Done);
    assert!(h.store.lifecycle(ModuleKind::Registry).error.is_none());
    // registry pre-selects everything
    assert_eq!(registry.selection().len(), 4);
}

#[tokio::test]
async fn rescan_clears_tree_and_selection() {
    let h = Harness::new();
    h.service
        .script_scan(ModuleKind::Junk, ScanScript::Immediate(Ok(junk_tree())));
    let junk = h.controller(ModuleKind::Junk);
    junk.scan().await;
    assert!(!junk.selection().is_empty());

    let gate = Arc::new(Notify::new());
    h.service.script_scan(
        ModuleKind::Junk,
        ScanScript::Gated(gate.clone(), Ok(temp_only_tree())),
    );
    let handle = junk.spawn_scan();
    wait_for(|| junk.status() == ModuleStatus::Scanning).await;
    assert!(junk.tree().is_none());
    assert!(junk.selection().is_empty());
    assert!(junk.is_busy());
    assert!(h.store.is_any_busy());

    gate.notify_one();
    assert_eq!(handle.await.unwrap(), ModuleStatus::Done);
    assert_eq!(junk.tree().unwrap().total_size(), 600);
}

#[tokio::test]
async fn delete_reconciles_mixed_outcome() {
    let h = Harness::new();
    h.service
        .script_scan(ModuleKind::Junk, ScanScript::Immediate(Ok(temp_only_tree())));
    h.service.script_delete(DeleteScript::Outcome(DeleteOutcome::new(vec![
        ItemOutcome::deleted("a", 100, 104),
        ItemOutcome::deferred("b", 200),
        ItemOutcome::failed("c", 300, FailureReason::PermissionDenied),
    ])));
    let junk = h.controller_with_policy(ModuleKind::Junk, SelectionPolicy::Nothing);
    junk.scan().await;
    junk.select_all(true);

    let refresh_before = h.store.refresh_generation();
    let summary = junk.delete().await.unwrap();

    assert_eq!(summary.success_count, 1);
    assert_eq!(summary.reboot_pending_count, 1);
    assert_eq!(summary.failed_count, 1);
    assert_eq!(summary.freed_physical_size, 104);

    let tree = junk.tree().unwrap();
    let temp = tree.category("Temp Files").unwrap();
    let remaining: Vec<&str> = temp.items().iter().map(|i| i.id.as_str()).collect();
    assert_eq!(remaining, vec!["b", "c"]);
    assert_eq!(temp.total_size(), 500);
    assert!(tree.aggregates_consistent());
    assert_eq!(junk.selection(), ids(&["b", "c"]));

    let snapshot = junk.snapshot();
    assert!(!snapshot.deleting);
    assert!(snapshot.reboot_pending.contains("b"));
    assert_eq!(snapshot.last_delete, Some(summary));
    assert_eq!(h.store.lifecycle(ModuleKind::Junk).total_size, 500);
    assert_eq!(h.store.refresh_generation(), refresh_before + 1);

    let attempted = h.service.deleted_paths.lock().unwrap().clone();
    assert_eq!(attempted, vec![vec!["a".to_string(), "b".into(), "c".into()]]);
}

#[tokio::test]
async fn delete_guards() {
    let h = Harness::new();
    h.service
        .script_scan(ModuleKind::BigFiles, ScanScript::Immediate(Ok(temp_only_tree())));
    let big = h.controller(ModuleKind::BigFiles);

    assert_eq!(big.delete().await, Err(ControllerError::NoResults));
    big.scan().await;
    // big files pre-selects nothing
    assert_eq!(big.delete().await, Err(ControllerError::EmptySelection));

    let gate = Arc::new(Notify::new());
    h.service.script_delete(DeleteScript::Gated(
        gate.clone(),
        DeleteOutcome::new(vec![ItemOutcome::deleted("a", 100, 100)]),
    ));
    assert!(big.toggle_item("a"));
    let background = Arc::clone(&big);
    let first = tokio::spawn(async move { background.delete().await });
    wait_for(|| big.is_deleting()).await;
    assert_eq!(big.status(), ModuleStatus::Done);
    assert_eq!(big.delete().await, Err(ControllerError::DeleteInFlight));

    gate.notify_one();
    let summary = first.await.unwrap().unwrap();
    assert_eq!(summary.success_count, 1);
    assert!(!big.is_deleting());
    assert!(big.selection().is_empty());
}

#[tokio::test]
async fn delete_transport_failure_keeps_everything() {
    let h = Harness::new();
    h.service
        .script_scan(ModuleKind::Leftovers, ScanScript::Immediate(Ok(temp_only_tree())));
    h.service
        .script_delete(DeleteScript::Fail(ServiceError::Transport("service crashed".into())));
    let leftovers = h.controller(ModuleKind::Leftovers);
    leftovers.scan().await;

    let summary = leftovers.delete().await.unwrap();
    assert_eq!(summary.success_count, 0);
    assert_eq!(summary.failed_count, 3);
    assert_eq!(summary.skipped_size, 600);
    assert!(matches!(
        summary.failures[0].reason,
        FailureReason::Other(ref message) if message.contains("service crashed")
    ));
    assert_eq!(leftovers.tree().unwrap(), temp_only_tree());
    assert_eq!(leftovers.selection().len(), 3);
    assert_eq!(leftovers.status(), ModuleStatus::Done);
    assert_eq!(h.store.refresh_generation(), 1);
}

#[tokio::test]
async fn cancel_big_files_keeps_partial_tree() {
    let h = Harness::new();
    let partial = temp_only_tree();
    h.service.script_scan(
        ModuleKind::BigFiles,
        ScanScript::UntilCancelled(vec!["/home/u/movie.mkv".into()], partial.clone()),
    );
    let big = h.controller(ModuleKind::BigFiles);

    let handle = big.spawn_scan();
    wait_for(|| big.status() == ModuleStatus::Scanning).await;
    big.cancel().await.unwrap();

    assert_eq!(handle.await.unwrap(), ModuleStatus::Done);
    assert_eq!(big.tree(), Some(partial));
    assert_eq!(h.service.cancel_calls.load(Ordering::SeqCst), 1);
    assert!(h.store.lifecycle(ModuleKind::BigFiles).error.is_none());
}

#[tokio::test]
async fn cancel_is_bounded_when_service_ignores_it() {
    let h = Harness::new();
    *h.service.cancel_fails.lock().unwrap() = true;
    h.service
        .script_scan(ModuleKind::BigFiles, ScanScript::IgnoresCancel);
    let big = h.controller(ModuleKind::BigFiles);

    let handle = big.spawn_scan();
    wait_for(|| big.status() == ModuleStatus::Scanning).await;
    timeout(Duration::from_secs(2), big.cancel())
        .await
        .expect("cancel must not hang")
        .unwrap();

    wait_for(|| big.status() == ModuleStatus::Done).await;
    assert!(big.tree().unwrap().is_empty());
    assert_eq!(handle.await.unwrap(), ModuleStatus::Done);
}

#[tokio::test]
async fn cancel_survives_abandoned_scan_future() {
    let h = Harness::new();
    h.service
        .script_scan(ModuleKind::BigFiles, ScanScript::IgnoresCancel);
    let big = h.controller(ModuleKind::BigFiles);

    let handle = big.spawn_scan();
    wait_for(|| big.status() == ModuleStatus::Scanning).await;
    // nobody polls the scan any more
    handle.abort();
    let _ = handle.await;

    big.cancel().await.unwrap();
    assert_eq!(big.status(), ModuleStatus::Done);
    assert!(!big.is_busy());
}

#[tokio::test]
async fn cancel_only_for_big_files() {
    let h = Harness::new();
    let junk = h.controller(ModuleKind::Junk);
    assert_eq!(
        junk.cancel().await,
        Err(ControllerError::CancelUnsupported(ModuleKind::Junk))
    );
    // nothing running is not an error
    let big = h.controller(ModuleKind::BigFiles);
    assert_eq!(big.cancel().await, Ok(()));
}

#[tokio::test]
async fn progress_is_display_only() {
    let h = Harness::new();
    let gate = Arc::new(Notify::new());
    let paths = vec!["/tmp/one".to_string(), "/tmp/two".into(), "/tmp/three".into()];
    h.service.script_scan(
        ModuleKind::Junk,
        ScanScript::ReportThenGate(paths, gate.clone(), temp_only_tree()),
    );
    let junk = h.controller(ModuleKind::Junk);

    let handle = junk.spawn_scan();
    wait_for(|| {
        junk.progress()
            .map(|p| p.current_path == "/tmp/three")
            .unwrap_or(false)
    })
    .await;
    assert_eq!(junk.progress().unwrap().messages_seen, 3);
    assert!(junk.tree().is_none());

    gate.notify_one();
    handle.await.unwrap();
    let tree = junk.tree().unwrap();
    assert!(!tree.contains("/tmp/one"));
    assert_eq!(tree, temp_only_tree());
}

#[tokio::test]
async fn late_progress_from_old_scan_is_dropped() {
    let h = Harness::new();
    let slot = Arc::new(Mutex::new(None));
    h.service.script_scan(
        ModuleKind::Junk,
        ScanScript::CaptureSink(slot.clone(), temp_only_tree()),
    );
    let junk = h.controller(ModuleKind::Junk);
    junk.scan().await;
    let old_sink = slot.lock().unwrap().take().expect("sink captured");

    let gate = Arc::new(Notify::new());
    h.service.script_scan(
        ModuleKind::Junk,
        ScanScript::Gated(gate.clone(), Ok(junk_tree())),
    );
    let handle = junk.spawn_scan();
    wait_for(|| junk.status() == ModuleStatus::Scanning).await;

    old_sink.report("/late/path");
    sleep(Duration::from_millis(30)).await;
    assert!(junk.progress().is_none());

    gate.notify_one();
    handle.await.unwrap();
    assert_eq!(junk.tree(), Some(junk_tree()));
}

#[tokio::test]
async fn newer_scan_supersedes_older_one() {
    let h = Harness::new();
    let gate = Arc::new(Notify::new());
    h.service.script_scan(
        ModuleKind::Social,
        ScanScript::Gated(gate.clone(), Ok(junk_tree())),
    );
    let social = h.controller(ModuleKind::Social);
    let older = social.spawn_scan();
    wait_for(|| social.status() == ModuleStatus::Scanning).await;

    h.service
        .script_scan(ModuleKind::Social, ScanScript::Immediate(Ok(temp_only_tree())));
    assert_eq!(social.scan().await, ModuleStatus::Done);

    gate.notify_one();
    older.await.unwrap();
    assert_eq!(social.tree(), Some(temp_only_tree()));
    assert_eq!(social.status(), ModuleStatus::Done);
}

#[tokio::test]
async fn scan_all_fans_out_without_blocking() {
    let h = Harness::new();
    let gate = Arc::new(Notify::new());
    h.service.script_scan(
        ModuleKind::Junk,
        ScanScript::Gated(gate.clone(), Ok(junk_tree())),
    );
    h.service
        .script_scan(ModuleKind::Registry, ScanScript::Immediate(Ok(temp_only_tree())));
    let junk = h.controller(ModuleKind::Junk);
    let registry = h.controller(ModuleKind::Registry);
    let listeners = vec![junk.spawn_listener(), registry.spawn_listener()];

    h.store.trigger_scan_all();
    wait_for(|| registry.status() == ModuleStatus::Done).await;
    assert_eq!(junk.status(), ModuleStatus::Scanning);
    assert!(h.store.is_any_busy());

    gate.notify_one();
    wait_for(|| junk.status() == ModuleStatus::Done).await;
    assert!(!h.store.is_any_busy());

    for listener in listeners {
        listener.abort();
    }
}

#[tokio::test]
async fn listener_ignores_triggers_before_mount() {
    let h = Harness::new();
    h.service
        .script_scan(ModuleKind::Registry, ScanScript::Immediate(Ok(temp_only_tree())));
    h.store.trigger_scan_all();

    let registry = h.controller(ModuleKind::Registry);
    let listener = registry.spawn_listener();
    sleep(Duration::from_millis(30)).await;
    assert_eq!(registry.status(), ModuleStatus::Idle);

    h.store.trigger_scan_all();
    wait_for(|| registry.status() == ModuleStatus::Done).await;
    listener.abort();
}

#[tokio::test]
async fn selection_ops_ignore_unknown_ids() {
    let h = Harness::new();
    h.service
        .script_scan(ModuleKind::SystemSlim, ScanScript::Immediate(Ok(junk_tree())));
    let slim = h.controller(ModuleKind::SystemSlim);

    assert!(!slim.toggle_item("a"));
    slim.scan().await;
    assert!(slim.selection().is_empty());

    assert!(!slim.toggle_item("not-there"));
    assert!(slim.selection().is_empty());

    assert!(slim.toggle_item("a"));
    assert_eq!(
        slim.category_selection("Temp Files"),
        Some(CategorySelection::Some)
    );
    assert!(slim.toggle_category("Temp Files", true));
    assert_eq!(
        slim.category_selection("Temp Files"),
        Some(CategorySelection::All)
    );
    assert_eq!(
        slim.category_selection("Crash Dumps"),
        Some(CategorySelection::None)
    );
    assert!(!slim.toggle_category("Nope", true));
    assert_eq!(slim.category_selection("Nope"), None);

    slim.select_all(true);
    assert_eq!(slim.snapshot().selected_count, 4);
    slim.select_all(false);
    assert!(slim.selection().is_empty());
}

#[tokio::test]
async fn dropped_scan_future_leaves_scanning() {
    let h = Harness::new();
    h.service.script_scan(ModuleKind::Junk, ScanScript::IgnoresCancel);
    let junk = h.controller(ModuleKind::Junk);

    // the host gives up on the scan without calling cancel
    assert!(timeout(Duration::from_millis(50), junk.scan()).await.is_err());

    assert_eq!(junk.status(), ModuleStatus::Done);
    assert!(junk.tree().unwrap().is_empty());
    assert!(!junk.is_busy());
    assert!(!h.store.is_any_busy());
    assert!(h.store.operations().active().is_empty());

    h.service
        .script_scan(ModuleKind::Junk, ScanScript::Immediate(Ok(junk_tree())));
    assert_eq!(junk.scan().await, ModuleStatus::Done);
    assert_eq!(junk.tree(), Some(junk_tree()));
}

#[tokio::test]
async fn dropping_a_superseded_scan_keeps_the_newer_one() {
    let h = Harness::new();
    let gate = Arc::new(Notify::new());
    h.service.script_scan(
        ModuleKind::Leftovers,
        ScanScript::Gated(gate.clone(), Ok(temp_only_tree())),
    );
    let leftovers = h.controller(ModuleKind::Leftovers);
    let older = leftovers.spawn_scan();
    wait_for(|| leftovers.status() == ModuleStatus::Scanning).await;

    let newer = leftovers.spawn_scan();
    sleep(Duration::from_millis(10)).await;
    older.abort();
    let _ = older.await;
    assert_eq!(leftovers.status(), ModuleStatus::Scanning);

    gate.notify_one();
    assert_eq!(newer.await.unwrap(), ModuleStatus::Done);
    assert_eq!(leftovers.tree(), Some(temp_only_tree()));
}

#[tokio::test]
async fn reboot_pending_items_are_not_resent() {
    let h = Harness::new();
    h.service
        .script_scan(ModuleKind::Junk, ScanScript::Immediate(Ok(temp_only_tree())));
    h.service.script_delete(DeleteScript::Outcome(DeleteOutcome::new(vec![
        ItemOutcome::deleted("a", 100, 104),
        ItemOutcome::deferred("b", 200),
        ItemOutcome::failed("c", 300, FailureReason::PermissionDenied),
    ])));
    let junk = h.controller(ModuleKind::Junk);
    junk.scan().await;
    junk.select_all(true);
    junk.delete().await.unwrap();

    h.service.script_delete(DeleteScript::Outcome(DeleteOutcome::new(vec![
        ItemOutcome::failed("c", 300, FailureReason::PermissionDenied),
    ])));
    let retry = junk.delete().await.unwrap();
    assert_eq!(retry.reboot_pending_count, 0);
    assert_eq!(retry.failed_count, 1);

    let attempted = h.service.deleted_paths.lock().unwrap().clone();
    assert_eq!(attempted[1], vec!["c".to_string()]);

    // b stays visible and selected, but there is nothing left to send
    assert!(junk.tree().unwrap().contains("b"));
    assert!(junk.selection().contains("b"));
    assert!(junk.snapshot().reboot_pending.contains("b"));
    assert!(!junk.toggle_item("c"));
    assert_eq!(junk.delete().await, Err(ControllerError::EmptySelection));
    assert_eq!(h.service.deleted_paths.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn rescan_during_delete_keeps_new_results() {
    let h = Harness::new();
    h.service
        .script_scan(ModuleKind::Junk, ScanScript::Immediate(Ok(temp_only_tree())));
    let gate = Arc::new(Notify::new());
    h.service.script_delete(DeleteScript::Gated(
        gate.clone(),
        DeleteOutcome::new(vec![ItemOutcome::deleted("a", 100, 100)]),
    ));
    let junk = h.controller(ModuleKind::Junk);
    junk.scan().await;
    junk.select_all(true);

    let background = Arc::clone(&junk);
    let delete = tokio::spawn(async move { background.delete().await });
    wait_for(|| junk.is_deleting()).await;

    h.service
        .script_scan(ModuleKind::Junk, ScanScript::Immediate(Ok(junk_tree())));
    assert_eq!(junk.scan().await, ModuleStatus::Done);
    let selection_after_rescan = junk.selection();

    gate.notify_one();
    let summary = delete.await.unwrap().unwrap();
    assert_eq!(summary.success_count, 1);

    assert_eq!(junk.tree(), Some(junk_tree()));
    assert_eq!(junk.selection(), selection_after_rescan);
    assert_eq!(h.store.lifecycle(ModuleKind::Junk).total_size, 4600);
    assert_eq!(junk.snapshot().last_delete, Some(summary));
    assert!(!junk.is_deleting());
}
