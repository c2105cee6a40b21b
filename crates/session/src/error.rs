use scanstitch_core::ParamError;
use thiserror::Error;

/// Errors that cross the session boundary.
///
/// Per-scan geometric failures never show up here; they degrade the scan's
/// alignment and are reported as status events instead.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ParamError),

    #[error("no reference scan has been added yet")]
    NoReferenceScan,

    #[error("IO error: {0}")]
    Io(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("registration worker has stopped")]
    WorkerStopped,
}

pub type Result<T> = std::result::Result<T, SessionError>;
