pub mod health;
mod store;


#[cfg(feature = "disk-health")]
pub use health::DiskHealthMonitor;
pub use health::{HealthSignal, HealthSource};
pub use store::{
    DashboardEvent, DashboardStore, DashboardTotals, ModuleLifecycle, ModuleStatus,
};
