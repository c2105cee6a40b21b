//! Per-scan processing behind [`RegistrationSession`](crate::RegistrationSession).
//!
//! Everything here is computed from borrowed state and returned as plain
//! values; the session commits the results in one write.

use std::fmt;

use scanstitch_core::{Normals, PointCloud};
use scanstitch_features::{compute_fpfh, estimate_normals, Descriptor};
use scanstitch_filters::{
    crop_box, remove_non_finite, statistical_outlier_removal, voxel_downsample,
};
use scanstitch_registration::{
    apply_transform, estimate_correspondences, estimate_transform_svd, match_descriptors, refine,
    reject_by_sample_consensus, Correspondence, RegistrationError, RigidTransform,
    MIN_CORRESPONDENCES,
};

use crate::config::{FallbackPolicy, RegistrationConfig};
use crate::error::Result;
use crate::stage::ScanStage;
use crate::status::StatusEvent;

/// One ingested scan and everything derived from it.
#[derive(Clone, Debug)]
pub(crate) struct ScanRecord {
    pub index: usize,
    /// Points as captured, after the ingestion filter.
    pub raw: PointCloud,
    /// Rotation of this scan relative to the reference pose, in degrees.
    pub accumulated_degrees: f32,
    pub compensation: RigidTransform,
    pub compensated: PointCloud,
    /// Denoised and voxel-reduced `raw`, sensor frame, normals attached.
    pub downsampled: PointCloud,
    pub descriptors: Vec<Descriptor>,
    pub stage: ScanStage,
    pub placement: Option<Placement>,
}

/// Where a scan ended up in the global frame.
#[derive(Clone, Debug)]
pub(crate) struct Placement {
    pub pose: RigidTransform,
    /// Part of `pose` found by registration, applied after `compensation`.
    pub correction: RigidTransform,
    /// Consensus correspondences against the previous scan.
    pub correspondences: Vec<Correspondence>,
    pub aligned: PointCloud,
    pub aligned_downsampled: PointCloud,
    /// Stage registration could not reach; `Some` means the fallback
    /// policy placed the scan.
    pub failed_at: Option<ScanStage>,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct SessionState {
    pub scans: Vec<ScanRecord>,
    pub accumulated_degrees: f32,
    pub rough_composite: PointCloud,
    pub composite: PointCloud,
    /// Downsampled scans in the global frame; target of the post pass.
    pub downsampled_composite: PointCloud,
}

impl SessionState {
    /// Index of the first scan not yet composed.
    pub fn first_pending(&self) -> usize {
        self.scans
            .iter()
            .position(|s| s.placement.is_none())
            .unwrap_or(self.scans.len())
    }

    pub fn push_scan(&mut self, scan: ScanRecord) {
        self.accumulated_degrees = scan.accumulated_degrees;
        self.rough_composite.extend_from(&scan.compensated);
        self.scans.push(scan);
    }

    /// Commit placements computed by [`compose`], in order.
    pub fn commit(&mut self, placements: Vec<(usize, Placement)>) {
        for (index, placement) in placements {
            self.composite.extend_from(&placement.aligned);
            self.downsampled_composite.extend_from(&placement.aligned_downsampled);
            let scan = &mut self.scans[index];
            scan.stage = ScanStage::Composed;
            scan.placement = Some(placement);
        }
    }
}

/// Ingested → FeatureReady for one cloud.
///
/// Non-finite points and points outside the filter box are dropped before
/// anything else sees them.
pub(crate) fn prepare_scan(
    index: usize,
    cloud: &PointCloud,
    accumulated_degrees: f32,
    config: &RegistrationConfig,
) -> Result<ScanRecord> {
    let mut progress = Progress::new(index, ScanStage::Empty);
    let finite = remove_non_finite(cloud);
    let raw = match &config.filter_box {
        Some(bounds) => crop_box(&finite, &bounds.to_aabb()),
        None => finite,
    };
    progress.advance(ScanStage::Ingested);
    if raw.len() < cloud.len() {
        log::debug!(
            "scan {}: dropped {} of {} points at ingestion",
            index,
            cloud.len() - raw.len(),
            cloud.len()
        );
    }

    let axis = &config.rotation_axis;
    let compensation = RigidTransform::rotation_about_axis(
        axis.origin,
        axis.direction,
        config.initial_rotation_degrees - accumulated_degrees,
    );
    let compensated = apply_transform(&raw, &compensation);

    let denoised =
        statistical_outlier_removal(&raw, config.outlier_neighbors, config.outlier_std_multiplier)?;
    let mut downsampled = voxel_downsample(&denoised, config.voxel_side_length)?;
    progress.advance(ScanStage::Preprocessed);
    let normals = estimate_normals(&downsampled, config.normal_radius)?;
    let descriptors = compute_fpfh(&downsampled, &normals, config.feature_radius)?;
    downsampled.normals = Some(normals);
    progress.advance(ScanStage::FeatureReady);

    log::debug!(
        "scan {}: {} raw points, {} after denoise, {} downsampled",
        index,
        raw.len(),
        denoised.len(),
        downsampled.len()
    );

    Ok(ScanRecord {
        index,
        raw,
        accumulated_degrees,
        compensation,
        compensated,
        downsampled,
        descriptors,
        stage: progress.stage,
        placement: None,
    })
}

/// Furthest stage one scan has reached while it is being processed.
struct Progress {
    index: usize,
    stage: ScanStage,
}

impl Progress {
    fn new(index: usize, stage: ScanStage) -> Self {
        Self { index, stage }
    }

    fn advance(&mut self, stage: ScanStage) {
        log::trace!("scan {}: {:?} -> {:?}", self.index, self.stage, stage);
        self.stage = stage;
    }

    /// Failure while trying to reach the stage after the current one.
    fn fail(&self, reason: impl Into<Degradation>) -> Failure {
        Failure {
            stage: self.stage.next(),
            reason: reason.into(),
        }
    }
}

/// The composed scan a new scan registers against.
struct Anchor<'a> {
    aligned_downsampled: PointCloud,
    descriptors: &'a [Descriptor],
    correction: RigidTransform,
}

/// Place every scan in `pending` (consecutive, in index order) after the
/// last composed scan of `state`.
pub(crate) fn compose(
    state: &SessionState,
    pending: &[&ScanRecord],
    config: &RegistrationConfig,
    events: &mut Vec<StatusEvent>,
) -> Vec<(usize, Placement)> {
    let mut anchor = state
        .scans
        .iter()
        .rev()
        .find_map(|s| s.placement.as_ref().map(|p| (s, p)))
        .map(|(s, p)| Anchor {
            aligned_downsampled: p.aligned_downsampled.clone(),
            descriptors: &s.descriptors,
            correction: p.correction,
        });
    let mut composite = state.downsampled_composite.clone();
    let mut placements = Vec::with_capacity(pending.len());

    for &scan in pending {
        let placement = match &anchor {
            None => place(scan, RigidTransform::identity(), Vec::new(), None),
            Some(anchor) => register(scan, anchor, &composite, config, events),
        };
        composite.extend_from(&placement.aligned_downsampled);
        anchor = Some(Anchor {
            aligned_downsampled: placement.aligned_downsampled.clone(),
            descriptors: &scan.descriptors,
            correction: placement.correction,
        });
        placements.push((scan.index, placement));
    }
    placements
}

/// Why a scan fell back to its rotation-only placement.
#[derive(Debug)]
enum Degradation {
    TooFewCorrespondences { found: usize },
    Registration(RegistrationError),
    NotConverged { iterations: usize },
}

impl From<RegistrationError> for Degradation {
    fn from(e: RegistrationError) -> Self {
        Degradation::Registration(e)
    }
}

/// A [`Degradation`] and the stage it kept the scan from reaching.
#[derive(Debug)]
struct Failure {
    stage: ScanStage,
    reason: Degradation,
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Degradation::TooFewCorrespondences { found } => {
                write!(f, "only {} consistent correspondences", found)
            }
            Degradation::Registration(e) => write!(f, "{}", e),
            Degradation::NotConverged { iterations } => {
                write!(f, "ICP did not converge in {} iterations", iterations)
            }
        }
    }
}

/// Correlated → Aligned → Refined for one scan, falling back per
/// `config.fallback_policy` when any step fails.
fn register(
    scan: &ScanRecord,
    anchor: &Anchor<'_>,
    composite: &PointCloud,
    config: &RegistrationConfig,
    events: &mut Vec<StatusEvent>,
) -> Placement {
    let source = apply_transform(&scan.downsampled, &scan.compensation);

    match align(scan, &source, anchor, composite, config, events) {
        Ok((correction, correspondences)) => {
            events.push(StatusEvent::info(
                Some(scan.index),
                format!(
                    "scan {} registered with {} correspondences",
                    scan.index,
                    correspondences.len()
                ),
            ));
            place(scan, correction, correspondences, None)
        }
        Err(failure) => {
            let (correction, label) = match config.fallback_policy {
                FallbackPolicy::RotationCompensation => {
                    (RigidTransform::identity(), "rotation compensation")
                }
                FallbackPolicy::PreviousCorrection => (anchor.correction, "previous correction"),
            };
            events.push(StatusEvent::warning(
                Some(scan.index),
                format!(
                    "scan {}: {} (failed at {:?}); placed by {}",
                    scan.index, failure.reason, failure.stage, label
                ),
            ));
            place(scan, correction, Vec::new(), Some(failure.stage))
        }
    }
}

fn align(
    scan: &ScanRecord,
    source: &PointCloud,
    anchor: &Anchor<'_>,
    composite: &PointCloud,
    config: &RegistrationConfig,
    events: &mut Vec<StatusEvent>,
) -> std::result::Result<(RigidTransform, Vec<Correspondence>), Failure> {
    let target = &anchor.aligned_downsampled;
    let mut progress = Progress::new(scan.index, scan.stage);

    let candidates = if config.use_feature_correspondences {
        match_descriptors(&scan.descriptors, anchor.descriptors, true)
    } else {
        let unknown = Normals::with_capacity(0);
        estimate_correspondences(
            source,
            target,
            source.normals.as_ref().unwrap_or(&unknown),
            target.normals.as_ref().unwrap_or(&unknown),
            &config.correspondence_params(),
        )
        .map_err(|e| progress.fail(e))?
    };

    let consensus =
        reject_by_sample_consensus(&candidates, source, target, &config.rejection_params())
            .map_err(|e| progress.fail(e))?;
    if consensus.inliers.len() < MIN_CORRESPONDENCES {
        return Err(progress.fail(Degradation::TooFewCorrespondences {
            found: consensus.inliers.len(),
        }));
    }
    progress.advance(ScanStage::Correlated);
    log::debug!(
        "scan {}: {} of {} correspondences survive rejection",
        scan.index,
        consensus.inliers.len(),
        candidates.len()
    );

    let initial = estimate_transform_svd(&consensus.inliers, source, target)
        .map_err(|e| progress.fail(e))?;
    log::debug!("scan {}: SVD residual {:.5}", scan.index, initial.residual);
    progress.advance(ScanStage::Aligned);

    let pairwise = refine(source, target, &initial.transform, &config.icp_params())
        .map_err(|e| progress.fail(e))?;
    if !pairwise.converged {
        if !config.accept_unconverged_refinement {
            return Err(progress.fail(Degradation::NotConverged {
                iterations: pairwise.num_iterations,
            }));
        }
        events.push(StatusEvent::warning(
            Some(scan.index),
            format!(
                "scan {}: ICP stopped after {} iterations without converging (rmse {:.4})",
                scan.index, pairwise.num_iterations, pairwise.rmse
            ),
        ));
    }

    progress.advance(ScanStage::Refined);

    let mut correction = pairwise.transform;
    match refine(source, composite, &correction, &config.post_icp_params()) {
        Ok(post) if post.converged && post.fitness > 0.0 => correction = post.transform,
        Ok(post) => log::debug!(
            "scan {}: post refinement kept pairwise result (fitness {:.3})",
            scan.index,
            post.fitness
        ),
        Err(e) => log::debug!("scan {}: post refinement skipped: {}", scan.index, e),
    }

    Ok((correction, consensus.inliers))
}

fn place(
    scan: &ScanRecord,
    correction: RigidTransform,
    correspondences: Vec<Correspondence>,
    failed_at: Option<ScanStage>,
) -> Placement {
    let pose = scan.compensation.compose(&correction);
    Placement {
        pose,
        correction,
        correspondences,
        aligned: apply_transform(&scan.raw, &pose),
        aligned_downsampled: apply_transform(&scan.downsampled, &pose),
        failed_at,
    }
}
