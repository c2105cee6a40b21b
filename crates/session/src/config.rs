//! Session configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use scanstitch_core::{ensure_at_least, ensure_positive, Aabb, ParamError};
use scanstitch_registration::{CorrespondenceParams, IcpParams, RejectionParams};

use crate::error::{Result, SessionError};

/// What a scan's pose becomes when correspondence, SVD or ICP fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Pure rotation compensation from the scan's rotation metadata.
    #[default]
    RotationCompensation,
    /// Rotation compensation plus the correction the previous scan received
    /// on top of its own compensation.
    PreviousCorrection,
}

/// Axis the scanned object (or the sensor) turns about between scans.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RotationAxis {
    /// A point on the axis, e.g. the turntable centre in sensor coordinates
    pub origin: [f32; 3],
    /// Axis direction (need not be unit length)
    pub direction: [f32; 3],
}

impl Default for RotationAxis {
    /// The sensor's vertical Y axis through its origin.
    fn default() -> Self {
        Self {
            origin: [0.0, 0.0, 0.0],
            direction: [0.0, 1.0, 0.0],
        }
    }
}

/// Ingestion crop region, inclusive on every axis.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilterBox {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl FilterBox {
    pub fn to_aabb(&self) -> Aabb {
        Aabb::new(self.min, self.max)
    }
}

/// ICP stopping criteria.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IcpSection {
    pub max_iterations: usize,
    pub transformation_epsilon: f32,
    pub fitness_epsilon: f32,
}

impl Default for IcpSection {
    fn default() -> Self {
        let p = IcpParams::default();
        Self {
            max_iterations: p.max_iterations,
            transformation_epsilon: p.transformation_epsilon,
            fitness_epsilon: p.fitness_epsilon,
        }
    }
}

/// Sample-consensus correspondence rejection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RejectionSection {
    pub inlier_threshold: f32,
    pub max_iterations: usize,
    pub seed: u64,
}

impl Default for RejectionSection {
    fn default() -> Self {
        let p = RejectionParams::default();
        Self {
            inlier_threshold: p.inlier_threshold,
            max_iterations: p.max_iterations,
            seed: p.seed,
        }
    }
}

/// Everything a [`RegistrationSession`](crate::RegistrationSession) needs.
///
/// Distances are in the sensor's units (metres for depth cameras).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    /// Neighbourhood radius for normal estimation
    pub normal_radius: f32,
    /// Neighbourhood radius for FPFH descriptors; larger than `normal_radius`
    pub feature_radius: f32,
    pub voxel_side_length: f32,
    /// Correspondence distance for the SVD initial alignment
    pub svd_max_distance: f32,
    pub icp_max_correspondence_distance: f32,
    /// Correspondence distance for the refinement against all earlier scans
    pub post_icp_max_correspondence_distance: f32,
    /// Register each scan as it arrives; otherwise wait for
    /// `process_and_get_aligned_cloud`
    pub register_in_real_time: bool,
    /// Match by FPFH descriptor instead of by position + normal
    pub use_feature_correspondences: bool,
    /// Drop raw points outside this box at ingestion
    pub filter_box: Option<FilterBox>,
    pub outlier_neighbors: usize,
    pub outlier_std_multiplier: f32,
    pub rotation_axis: RotationAxis,
    /// Rotation applied to the reference scan
    pub initial_rotation_degrees: f32,
    pub fallback_policy: FallbackPolicy,
    /// Keep an ICP result that hit the iteration cap (a warning is still
    /// emitted); otherwise fall back
    pub accept_unconverged_refinement: bool,
    pub max_normal_angle_degrees: f32,
    pub icp: IcpSection,
    pub rejection: RejectionSection,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            normal_radius: 0.02,
            feature_radius: 0.05,
            voxel_side_length: 0.01,
            svd_max_distance: 0.05,
            icp_max_correspondence_distance: 0.02,
            post_icp_max_correspondence_distance: 0.005,
            register_in_real_time: true,
            use_feature_correspondences: false,
            filter_box: None,
            outlier_neighbors: 8,
            outlier_std_multiplier: 2.5,
            rotation_axis: RotationAxis::default(),
            initial_rotation_degrees: 0.0,
            fallback_policy: FallbackPolicy::default(),
            accept_unconverged_refinement: true,
            max_normal_angle_degrees: 45.0,
            icp: IcpSection::default(),
            rejection: RejectionSection::default(),
        }
    }
}

impl RegistrationConfig {
    /// Load configuration from a JSON file and validate it.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| SessionError::Io(e.to_string()))?;
        Self::from_json(&contents)
    }

    /// Parse from a JSON string; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| SessionError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| SessionError::Parse(e.to_string()))
    }

    /// Reject non-positive radii, distances and multipliers, zero counts, a
    /// zero-length rotation axis and an inverted filter box.
    pub fn validate(&self) -> std::result::Result<(), ParamError> {
        ensure_positive("normal_radius", self.normal_radius)?;
        ensure_positive("feature_radius", self.feature_radius)?;
        ensure_positive("voxel_side_length", self.voxel_side_length)?;
        ensure_positive("svd_max_distance", self.svd_max_distance)?;
        ensure_positive("icp_max_correspondence_distance", self.icp_max_correspondence_distance)?;
        ensure_positive(
            "post_icp_max_correspondence_distance",
            self.post_icp_max_correspondence_distance,
        )?;
        ensure_at_least("outlier_neighbors", self.outlier_neighbors, 1)?;
        ensure_positive("outlier_std_multiplier", self.outlier_std_multiplier)?;
        ensure_positive("max_normal_angle_degrees", self.max_normal_angle_degrees)?;
        ensure_at_least("icp.max_iterations", self.icp.max_iterations, 1)?;
        ensure_positive("icp.transformation_epsilon", self.icp.transformation_epsilon)?;
        ensure_positive("icp.fitness_epsilon", self.icp.fitness_epsilon)?;
        ensure_positive("rejection.inlier_threshold", self.rejection.inlier_threshold)?;
        ensure_at_least("rejection.max_iterations", self.rejection.max_iterations, 1)?;

        if !self.initial_rotation_degrees.is_finite() {
            return Err(ParamError::Invalid {
                name: "initial_rotation_degrees",
                reason: "must be finite".into(),
            });
        }

        let axis = &self.rotation_axis;
        let len_sq: f32 = axis.direction.iter().map(|d| d * d).sum();
        if !(len_sq.is_finite() && len_sq > 0.0) || !axis.origin.iter().all(|o| o.is_finite()) {
            return Err(ParamError::Invalid {
                name: "rotation_axis",
                reason: "direction must be non-zero and all components finite".into(),
            });
        }

        if let Some(b) = &self.filter_box {
            if b.to_aabb().is_empty() {
                return Err(ParamError::Invalid {
                    name: "filter_box",
                    reason: format!("min {:?} must not exceed max {:?}", b.min, b.max),
                });
            }
        }

        Ok(())
    }

    pub fn correspondence_params(&self) -> CorrespondenceParams {
        CorrespondenceParams {
            max_distance: self.svd_max_distance,
            max_normal_angle_degrees: self.max_normal_angle_degrees,
            ..CorrespondenceParams::default()
        }
    }

    pub fn rejection_params(&self) -> RejectionParams {
        RejectionParams {
            inlier_threshold: self.rejection.inlier_threshold,
            max_iterations: self.rejection.max_iterations,
            seed: self.rejection.seed,
        }
    }

    /// ICP parameters for the pairwise pass.
    pub fn icp_params(&self) -> IcpParams {
        self.icp_params_with_distance(self.icp_max_correspondence_distance)
    }

    /// ICP parameters for the pass against the composite of earlier scans.
    pub fn post_icp_params(&self) -> IcpParams {
        self.icp_params_with_distance(self.post_icp_max_correspondence_distance)
    }

    fn icp_params_with_distance(&self, max_correspondence_distance: f32) -> IcpParams {
        IcpParams {
            max_iterations: self.icp.max_iterations,
            transformation_epsilon: self.icp.transformation_epsilon,
            fitness_epsilon: self.icp.fitness_epsilon,
            max_correspondence_distance,
        }
    }
}
