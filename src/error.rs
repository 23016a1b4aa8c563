use thiserror::Error;

use crate::module::ModuleKind;

/// Failure of a call across the cleanup service boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Module {0} is not handled by this service")]
    Unsupported(ModuleKind),

    #[error("Scan was cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(String),

    #[error("{0}")]
    Other(String),
}

impl From<std::io::Error> for ServiceError {
    fn from(err: std::io::Error) -> Self {
        ServiceError::Io(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ServiceError {
    fn from(err: tokio::task::JoinError) -> Self {
        ServiceError::Other(format!("worker task failed: {}", err))
    }
}

/// A controller call rejected before reaching the service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControllerError {
    #[error("Nothing is selected")]
    EmptySelection,

    #[error("Module has no scan results")]
    NoResults,

    #[error("A delete is already running for this module")]
    DeleteInFlight,

    #[error("Module {0} does not support cancellation")]
    CancelUnsupported(ModuleKind),
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;
