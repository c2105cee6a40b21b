#![forbid(unsafe_code)]

pub mod bbox;
pub mod cloud;
pub mod error;
pub mod point;

pub use bbox::Aabb;
pub use cloud::{Colors, Normals, PointCloud};
pub use error::{ensure_at_least, ensure_positive, ParamError};
pub use point::{PointXYZI, PointXYZRGB};
