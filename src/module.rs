mod controller;
mod kind;
pub mod policy;
pub mod progress;
pub mod service;

#[cfg(test)]
mod tests;

pub use controller::{CategorySelection, ModuleController, ModuleSnapshot};
pub use kind::ModuleKind;
pub use policy::{policy_for_module, SelectionPolicy};
pub use progress::{ProgressSink, ScanProgress};
pub use service::{CleanupService, ScanContext};
