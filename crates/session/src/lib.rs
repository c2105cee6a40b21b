//! Registration orchestration: scans in, one globally aligned cloud out.
//!
//! [`RegistrationSession`] owns every scan and its derived products and
//! chains each new scan onto the previous one:
//! denoise → downsample → normals/FPFH → correspondences → sample consensus
//! → SVD → ICP → post-refinement against all earlier scans. When a step
//! fails the scan is placed by its rotation metadata alone (see
//! [`FallbackPolicy`]) and a [`StatusEvent`] says so.

pub mod capture;
pub mod config;
pub mod error;
mod pipeline;
pub mod session;
pub mod stage;
pub mod status;

pub use capture::{FrameSender, RegistrationWorker, ScanFrame, DEFAULT_QUEUE_CAPACITY};
pub use config::{
    FallbackPolicy, FilterBox, IcpSection, RegistrationConfig, RejectionSection, RotationAxis,
};
pub use error::{Result, SessionError};
pub use session::RegistrationSession;
pub use stage::ScanStage;
pub use status::{Severity, StatusEvent};
