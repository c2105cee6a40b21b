use scanstitch_core::ParamError;
use thiserror::Error;

/// Failures of a single registration step.
///
/// Non-convergence of ICP is not an error; it is reported through
/// [`IcpResult::converged`](crate::IcpResult::converged).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistrationError {
    #[error("not enough correspondences: found {found}, need at least {required}")]
    InsufficientCorrespondences { found: usize, required: usize },

    #[error("cannot register an empty point cloud")]
    EmptyCloud,

    #[error("correspondences are degenerate (collinear or coincident points)")]
    Degenerate,

    #[error(transparent)]
    Parameter(#[from] ParamError),
}

pub type Result<T> = std::result::Result<T, RegistrationError>;
