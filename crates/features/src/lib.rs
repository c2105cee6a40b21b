#![forbid(unsafe_code)]

pub mod fpfh;
pub mod normals;

pub use fpfh::{compute_fpfh, Descriptor, FPFH_BINS};
pub use normals::{estimate_normals, estimate_normals_with_viewpoint, MIN_NEIGHBOURS};
