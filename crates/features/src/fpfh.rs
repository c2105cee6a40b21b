//! Fast Point Feature Histograms.
//!
//! Each point gets a 33-bin descriptor: three 11-bin histograms of the
//! Darboux-frame angles between the point's normal and each radius
//! neighbour's normal. A point's simplified histogram (SPFH) is first built
//! from its own neighbourhood, then blended with its neighbours' SPFHs
//! weighted by inverse distance.

use rayon::prelude::*;
use scanstitch_core::{ensure_positive, Normals, ParamError, PointCloud};
use scanstitch_spatial::KdTree;
use std::f32::consts::PI;

const BINS_PER_FEATURE: usize = 11;
pub const FPFH_BINS: usize = 3 * BINS_PER_FEATURE;

pub type Descriptor = [f32; FPFH_BINS];

/// Compute one FPFH descriptor per point.
///
/// Points with a flagged normal, and points with no usable neighbour, get an
/// all-zero descriptor. Each sub-histogram of a non-zero descriptor sums to
/// 100 from the point's own SPFH plus 100 from its weighted neighbours, so
/// 200 in total. When every neighbour's SPFH is blank only the first 100
/// remains.
pub fn compute_fpfh(
    cloud: &PointCloud,
    normals: &Normals,
    radius: f32,
) -> Result<Vec<Descriptor>, ParamError> {
    let radius = ensure_positive("feature_radius", radius)?;
    if normals.len() != cloud.len() {
        return Err(ParamError::Invalid {
            name: "normals",
            reason: format!("{} normals for {} points", normals.len(), cloud.len()),
        });
    }
    if cloud.is_empty() {
        return Ok(Vec::new());
    }

    let tree = KdTree::build(cloud);
    let points = cloud.to_points();

    // Neighbours with a valid normal, self excluded.
    let neighbourhoods: Vec<Vec<(usize, f32)>> = points
        .par_iter()
        .enumerate()
        .map(|(i, p)| {
            if !normals.is_valid(i) {
                return Vec::new();
            }
            tree.radius_search_with_distances(p, radius)
                .into_iter()
                .filter(|&(j, d)| j != i && d > 0.0 && normals.is_valid(j))
                .collect()
        })
        .collect();

    let spfh: Vec<Descriptor> = (0..points.len())
        .into_par_iter()
        .map(|i| simplified_histogram(i, &points, normals, &neighbourhoods[i]))
        .collect();

    let descriptors: Vec<Descriptor> = (0..points.len())
        .into_par_iter()
        .map(|i| weighted_histogram(i, &spfh, &neighbourhoods[i]))
        .collect();

    let described = descriptors.iter().filter(|d| d.iter().any(|&v| v > 0.0)).count();
    log::debug!("computed {}/{} FPFH descriptors (radius {})", described, points.len(), radius);

    Ok(descriptors)
}

fn simplified_histogram(
    i: usize,
    points: &[[f32; 3]],
    normals: &Normals,
    neighbours: &[(usize, f32)],
) -> Descriptor {
    let mut hist = [0.0f32; FPFH_BINS];
    let mut used = 0usize;

    for &(j, _) in neighbours {
        let features = pair_features(points[i], normals.get(i), points[j], normals.get(j));
        let Some([f1, f2, f3]) = features else {
            continue;
        };
        hist[bin_angle(f1)] += 1.0;
        hist[BINS_PER_FEATURE + bin_unit(f2)] += 1.0;
        hist[2 * BINS_PER_FEATURE + bin_unit(f3)] += 1.0;
        used += 1;
    }

    if used > 0 {
        let incr = 100.0 / used as f32;
        for h in &mut hist {
            *h *= incr;
        }
    }
    hist
}

fn weighted_histogram(i: usize, spfh: &[Descriptor], neighbours: &[(usize, f32)]) -> Descriptor {
    let own = &spfh[i];
    if own.iter().all(|&v| v == 0.0) {
        return [0.0; FPFH_BINS];
    }

    let mut acc = [0.0f32; FPFH_BINS];
    for &(j, d) in neighbours {
        let w = 1.0 / d;
        for (a, s) in acc.iter_mut().zip(spfh[j].iter()) {
            *a += w * s;
        }
    }

    let mut out = *own;
    for sub in 0..3 {
        let range = sub * BINS_PER_FEATURE..(sub + 1) * BINS_PER_FEATURE;
        let sum: f32 = acc[range.clone()].iter().sum();
        if sum > 0.0 {
            let scale = 100.0 / sum;
            for b in range {
                out[b] += acc[b] * scale;
            }
        }
    }
    out
}

/// Darboux-frame angles `(alpha, phi, theta)` for a point pair.
///
/// The source is whichever point's normal makes the smaller angle with the
/// connecting line, so the features are symmetric in the pair. `None` for
/// coincident points or a normal parallel to the connecting line.
fn pair_features(p1: [f32; 3], n1: [f32; 3], p2: [f32; 3], n2: [f32; 3]) -> Option<[f32; 3]> {
    let mut dp = sub(p2, p1);
    let dist = norm(dp);
    if dist <= f32::EPSILON {
        return None;
    }

    let angle1 = dot(n1, dp) / dist;
    let angle2 = dot(n2, dp) / dist;

    let (u, n_target, f3) = if angle1.abs().acos() > angle2.abs().acos() {
        dp = [-dp[0], -dp[1], -dp[2]];
        (n2, n1, -angle2)
    } else {
        (n1, n2, angle1)
    };

    let v = cross(dp, u);
    let v_norm = norm(v);
    if v_norm <= f32::EPSILON {
        return None;
    }
    let v = [v[0] / v_norm, v[1] / v_norm, v[2] / v_norm];
    let w = cross(u, v);

    let f2 = dot(v, n_target);
    let f1 = dot(w, n_target).atan2(dot(u, n_target));

    Some([f1, f2, f3])
}

#[inline]
fn bin_angle(a: f32) -> usize {
    let b = ((a + PI) / (2.0 * PI) * BINS_PER_FEATURE as f32).floor();
    (b.max(0.0) as usize).min(BINS_PER_FEATURE - 1)
}

#[inline]
fn bin_unit(c: f32) -> usize {
    let b = ((c + 1.0) * 0.5 * BINS_PER_FEATURE as f32).floor();
    (b.max(0.0) as usize).min(BINS_PER_FEATURE - 1)
}

#[inline]
fn sub(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
fn dot(a: [f32; 3], b: [f32; 3]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
fn cross(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

#[inline]
fn norm(a: [f32; 3]) -> f32 {
    dot(a, a).sqrt()
}
