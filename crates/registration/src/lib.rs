#![forbid(unsafe_code)]

pub mod correspondence;
pub mod error;
pub mod icp;
pub mod sample_consensus;
pub mod svd;
pub mod transform;

pub use correspondence::{
    compute_rmse, estimate_correspondences, find_correspondences, match_descriptors, Correspondence,
    CorrespondenceParams,
};
pub use error::{RegistrationError, Result};
pub use icp::{refine, IcpParams, IcpResult};
pub use sample_consensus::{reject_by_sample_consensus, Consensus, RejectionParams};
pub use svd::{estimate_transform_svd, SvdEstimate, MIN_CORRESPONDENCES};
pub use transform::{apply_transform, RigidTransform};
