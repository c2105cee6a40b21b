#![forbid(unsafe_code)]
//! Multi-scan point cloud registration.
//!
//! Re-exports the workspace crates under one roof so applications can depend
//! on a single package.

pub use scanstitch_core as core;
pub use scanstitch_features as features;
pub use scanstitch_filters as filters;
pub use scanstitch_io as io;
pub use scanstitch_registration as registration;
pub use scanstitch_session as session;
pub use scanstitch_spatial as spatial;

pub use scanstitch_core::{Aabb, Colors, Normals, PointCloud};
pub use scanstitch_registration::RigidTransform;
pub use scanstitch_session::{
    RegistrationConfig, RegistrationSession, RegistrationWorker, ScanFrame, Severity, StatusEvent,
};
