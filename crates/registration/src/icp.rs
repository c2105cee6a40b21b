use scanstitch_core::{ensure_at_least, ensure_positive, PointCloud};
use scanstitch_spatial::KdTree;

use crate::correspondence::{compute_rmse, find_correspondences, Correspondence};
use crate::error::{RegistrationError, Result};
use crate::svd::{solve_rigid, MIN_CORRESPONDENCES};
use crate::transform::{apply_transform, RigidTransform};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IcpParams {
    pub max_iterations: usize,
    /// Converged once an incremental step moves less than this (translation
    /// in metres and rotation in radians).
    pub transformation_epsilon: f32,
    /// Converged once the RMSE changes by less than this between iterations.
    pub fitness_epsilon: f32,
    pub max_correspondence_distance: f32,
}

impl Default for IcpParams {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            transformation_epsilon: 1e-6,
            fitness_epsilon: 1e-6,
            max_correspondence_distance: 0.02,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IcpResult {
    /// Full transform from the source frame to the target frame, initial
    /// guess included.
    pub transform: RigidTransform,
    /// Share of source points with a correspondence at the final pose.
    pub fitness: f32,
    pub rmse: f32,
    pub converged: bool,
    pub num_iterations: usize,
}

/// Point-to-point ICP starting from `initial_guess`.
///
/// Each iteration pairs every transformed source point with its nearest
/// target point within `max_correspondence_distance`, solves the
/// incremental rigid transform by SVD and composes it onto the running
/// transform. Stops when the increment or the RMSE change drops below its
/// epsilon, or at `max_iterations`. A source already aligned to within
/// `fitness_epsilon` RMSE takes zero iterations. Running out of iterations,
/// or of correspondences, is reported through `converged == false`.
pub fn refine(
    source: &PointCloud,
    target: &PointCloud,
    initial_guess: &RigidTransform,
    params: &IcpParams,
) -> Result<IcpResult> {
    let max_distance =
        ensure_positive("max_correspondence_distance", params.max_correspondence_distance)?;
    ensure_at_least("max_iterations", params.max_iterations, 1)?;
    if source.is_empty() || target.is_empty() {
        return Err(RegistrationError::EmptyCloud);
    }

    let target_tree = KdTree::build(target);

    let mut cumulative = *initial_guess;
    let mut current = apply_transform(source, &cumulative);

    let mut correspondences = find_correspondences(&current, &target_tree, max_distance);
    let mut rmse = compute_rmse(&correspondences);

    if correspondences.len() >= MIN_CORRESPONDENCES && rmse <= params.fitness_epsilon {
        log::debug!("ICP: already aligned (rmse {:.2e})", rmse);
        return Ok(summarize(source, cumulative, &correspondences, true, 0));
    }

    let mut converged = false;
    let mut num_iterations = 0;

    for _ in 0..params.max_iterations {
        if correspondences.len() < MIN_CORRESPONDENCES {
            log::debug!("ICP: only {} correspondences, stopping", correspondences.len());
            break;
        }
        num_iterations += 1;

        let Some(incremental) = solve_pairs(&current, target, &correspondences) else {
            log::debug!("ICP: degenerate correspondences, stopping");
            break;
        };

        cumulative = cumulative.compose(&incremental);
        current = apply_transform(&current, &incremental);

        let prev_rmse = rmse;
        correspondences = find_correspondences(&current, &target_tree, max_distance);
        rmse = compute_rmse(&correspondences);

        let step_small = incremental.translation_norm() < params.transformation_epsilon
            && incremental.rotation_angle_degrees().to_radians() < params.transformation_epsilon;
        let fitness_stalled = (prev_rmse - rmse).abs() < params.fitness_epsilon;

        if step_small || fitness_stalled {
            converged = correspondences.len() >= MIN_CORRESPONDENCES;
            break;
        }
    }

    if !converged {
        log::debug!("ICP: no convergence after {} iterations (rmse {:.5})", num_iterations, rmse);
    }

    Ok(summarize(source, cumulative, &correspondences, converged, num_iterations))
}

fn solve_pairs(
    source: &PointCloud,
    target: &PointCloud,
    correspondences: &[Correspondence],
) -> Option<RigidTransform> {
    let (src, tgt): (Vec<[f32; 3]>, Vec<[f32; 3]>) = correspondences
        .iter()
        .map(|c| (source.point(c.source_index), target.point(c.target_index)))
        .unzip();
    solve_rigid(&src, &tgt)
}

fn summarize(
    source: &PointCloud,
    transform: RigidTransform,
    correspondences: &[Correspondence],
    converged: bool,
    num_iterations: usize,
) -> IcpResult {
    IcpResult {
        transform,
        fitness: correspondences.len() as f32 / source.len() as f32,
        rmse: compute_rmse(correspondences),
        converged,
        num_iterations,
    }
}
