//! Local filesystem implementation of [`CleanupService`](crate::module::CleanupService).

mod fs_ops;
mod local;


pub use local::LocalCleanupService;
