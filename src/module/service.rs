use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use super::kind::ModuleKind;
use super::progress::ProgressSink;
use crate::error::ServiceResult;
use crate::reconcile::DeleteOutcome;
use crate::result_tree::ResultTree;

/// Handed to the service for one scan call.
#[derive(Clone)]
pub struct ScanContext {
    /// Cancelled when the user stops the scan or a newer scan supersedes it.
    pub cancel: CancellationToken,
    pub progress: ProgressSink,
}

impl ScanContext {
    pub fn detached() -> Self {
        ScanContext {
            cancel: CancellationToken::new(),
            progress: ProgressSink::disabled(),
        }
    }
}

/// The external scanner/deleter the controllers drive.
///
/// A scan that honours cancellation should return whatever it found so far
/// rather than an error.
pub trait CleanupService: Send + Sync {
    fn scan(&self, module: ModuleKind, ctx: ScanContext) -> BoxFuture<'_, ServiceResult<ResultTree>>;

    /// Best-effort request to stop a running scan.
    fn cancel_scan(&self, module: ModuleKind) -> BoxFuture<'_, ServiceResult<()>>;

    fn delete(&self, module: ModuleKind, paths: Vec<String>) -> BoxFuture<'_, ServiceResult<DeleteOutcome>>;
}
