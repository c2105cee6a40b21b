#![forbid(unsafe_code)]

pub mod color;
pub mod crop_box;
pub mod statistical_outlier;
pub mod voxel_downsample;

pub use color::{grey_from_intensity, intensity_from_rgb, luminance, strip_colors, to_xyzi};
pub use crop_box::{crop_box, remove_non_finite};
pub use statistical_outlier::statistical_outlier_removal;
pub use voxel_downsample::voxel_downsample;
