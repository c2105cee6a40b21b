use rayon::prelude::*;
use scanstitch_core::{ensure_at_least, ensure_positive, ParamError, PointCloud};
use scanstitch_spatial::KdTree;

/// Drop points whose mean distance to their `k` nearest neighbours exceeds
/// `global_mean + std_mul * global_stddev`.
///
/// Non-finite points are always dropped. Ties in the neighbour search are
/// broken by the kd-tree deterministically, so identical input gives
/// identical output.
pub fn statistical_outlier_removal(
    cloud: &PointCloud,
    k: usize,
    std_mul: f32,
) -> Result<PointCloud, ParamError> {
    let k = ensure_at_least("outlier_neighbors", k, 1)?;
    let std_mul = ensure_positive("outlier_std_multiplier", std_mul)?;

    if cloud.is_empty() {
        return Ok(PointCloud::new());
    }

    // Single point: no neighbors to compare against, keep it
    if cloud.len() == 1 {
        return Ok(if cloud.is_finite_at(0) {
            cloud.clone()
        } else {
            PointCloud::new()
        });
    }

    let tree = KdTree::build(cloud);

    // knn returns the query point itself as the nearest (distance 0), so
    // request k+1 neighbors and skip the self-match.
    let mean_dists: Vec<f32> = (0..cloud.len())
        .into_par_iter()
        .map(|i| {
            if !cloud.is_finite_at(i) {
                return f32::INFINITY;
            }
            let (_, dists) = tree.knn(&cloud.point(i), k + 1);
            let neighbor_dists = if dists.len() > 1 { &dists[1..] } else { &dists[..] };
            if neighbor_dists.is_empty() {
                return f32::INFINITY;
            }
            neighbor_dists.iter().sum::<f32>() / neighbor_dists.len() as f32
        })
        .collect();

    let finite_dists: Vec<f32> = mean_dists.iter().copied().filter(|d| d.is_finite()).collect();

    if finite_dists.is_empty() {
        return Ok(PointCloud::new());
    }

    let n = finite_dists.len() as f32;
    let global_mean: f32 = finite_dists.iter().sum::<f32>() / n;
    let variance: f32 = finite_dists
        .iter()
        .map(|d| (d - global_mean).powi(2))
        .sum::<f32>()
        / n;
    let threshold = global_mean + std_mul * variance.sqrt();

    let keep: Vec<usize> = (0..cloud.len())
        .filter(|&i| mean_dists[i] <= threshold)
        .collect();

    log::debug!(
        "outlier removal kept {}/{} points (threshold {:.5})",
        keep.len(),
        cloud.len(),
        threshold
    );

    Ok(cloud.select(&keep))
}
