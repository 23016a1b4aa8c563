pub mod config;
pub mod dashboard;
pub mod error;
pub mod module;
pub mod ops;
pub mod reconcile;
pub mod result_tree;
pub mod selection;

#[cfg(feature = "local-service")]
pub mod backend;

pub use config::{DashboardConfig, DEFAULT_CONFIG};
pub use dashboard::{
    DashboardEvent, DashboardStore, DashboardTotals, HealthSignal, HealthSource, ModuleLifecycle,
    ModuleStatus,
};
pub use error::{ControllerError, ServiceError, ServiceResult};
pub use module::{
    CategorySelection, CleanupService, ModuleController, ModuleKind, ModuleSnapshot, ScanContext,
    SelectionPolicy,
};
pub use reconcile::{DeleteOutcome, DeleteSummary, FailureReason, ItemOutcome};
pub use result_tree::{build_tree, Category, Item, ResultTree, RiskLevel};
pub use selection::SelectionSet;

#[cfg(feature = "local-service")]
pub use backend::LocalCleanupService;
#[cfg(feature = "disk-health")]
pub use dashboard::DiskHealthMonitor;
