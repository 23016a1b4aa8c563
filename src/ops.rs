use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use dashmap::DashMap;
use log::debug;
use tokio_util::sync::CancellationToken;

use crate::module::ModuleKind;

pub type OperationId = String;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Running,
    Cancelling,
    Completed,
    Canceled,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Scan,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpState {
    pub id: OperationId,
    pub kind: OperationKind,
    pub module: ModuleKind,
    pub started_at_ms: u128,
    pub details: Option<String>,
    pub status: OperationStatus,
}

struct OpEntry {
    state: OpState,
    token: CancellationToken,
    started: Instant,
}

/// In-flight scans and deletes across all modules.
///
/// Entries are dropped as soon as they finish; the module lifecycle is the
/// durable record.
#[derive(Clone, Default)]
pub struct OperationRegistry {
    inner: Arc<DashMap<OperationId, OpEntry>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, kind: OperationKind, module: ModuleKind) -> (OperationId, CancellationToken) {
        let id = uuid::Uuid::new_v4().to_string();
        let token = CancellationToken::new();
        let state = OpState {
            id: id.clone(),
            kind,
            module,
            started_at_ms: now_ms(),
            details: None,
            status: OperationStatus::Running,
        };
        self.inner.insert(
            id.clone(),
            OpEntry {
                state,
                token: token.clone(),
                started: Instant::now(),
            },
        );
        (id, token)
    }

    pub fn update(&self, id: &str, mut f: impl FnMut(&mut OpState)) {
        if let Some(mut entry) = self.inner.get_mut(id) {
            f(&mut entry.state);
        }
    }

    pub fn get(&self, id: &str) -> Option<OpState> {
        self.inner.get(id).map(|e| e.state.clone())
    }

    pub fn active(&self) -> Vec<OpState> {
        let mut ops: Vec<OpState> = self.inner.iter().map(|e| e.state.clone()).collect();
        ops.sort_by_key(|op| op.started_at_ms);
        ops
    }

    pub fn active_for(&self, module: ModuleKind) -> Vec<OpState> {
        self.active().into_iter().filter(|op| op.module == module).collect()
    }

    /// Fire the operation's token. False when it already finished.
    pub fn cancel(&self, id: &str) -> bool {
        match self.inner.get_mut(id) {
            Some(mut entry) => {
                entry.token.cancel();
                entry.state.status = OperationStatus::Cancelling;
                true
            }
            None => false,
        }
    }

    pub fn finish_success(&self, id: &str) {
        self.finish(id, OperationStatus::Completed);
    }

    pub fn finish_canceled(&self, id: &str) {
        self.finish(id, OperationStatus::Canceled);
    }

    pub fn finish_failed(&self, id: &str, msg: &str) {
        self.update(id, |s| s.details = Some(msg.to_string()));
        self.finish(id, OperationStatus::Failed);
    }

    fn finish(&self, id: &str, status: OperationStatus) {
        if let Some((_, entry)) = self.inner.remove(id) {
            debug!(
                "{:?} of {} finished as {:?} after {:?}",
                entry.state.kind,
                entry.state.module,
                status,
                entry.started.elapsed()
            );
        }
    }
}

fn now_ms() -> u128 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis()
}
