use nalgebra::{Matrix3, Vector3, SVD};
use scanstitch_core::PointCloud;

use crate::correspondence::Correspondence;
use crate::error::{RegistrationError, Result};
use crate::transform::RigidTransform;

/// Fewest correspondences that pin down a rigid transform.
pub const MIN_CORRESPONDENCES: usize = 3;

/// Closed-form alignment of matched pairs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SvdEstimate {
    pub transform: RigidTransform,
    /// RMS distance between transformed source points and their targets.
    pub residual: f32,
    /// Correspondences that took part (in range and finite).
    pub used: usize,
}

/// Least-squares rigid transform taking `source` points onto their matched
/// `target` points (centroid alignment + SVD of the cross-covariance).
///
/// Correspondences whose indices are out of range or whose points are not
/// finite are ignored. Fails with `InsufficientCorrespondences` below three
/// usable pairs and with `Degenerate` when the source points are collinear.
pub fn estimate_transform_svd(
    correspondences: &[Correspondence],
    source: &PointCloud,
    target: &PointCloud,
) -> Result<SvdEstimate> {
    let (src, tgt): (Vec<[f32; 3]>, Vec<[f32; 3]>) = correspondences
        .iter()
        .filter(|c| c.source_index < source.len() && c.target_index < target.len())
        .filter(|c| source.is_finite_at(c.source_index) && target.is_finite_at(c.target_index))
        .map(|c| (source.point(c.source_index), target.point(c.target_index)))
        .unzip();

    if src.len() < MIN_CORRESPONDENCES {
        return Err(RegistrationError::InsufficientCorrespondences {
            found: src.len(),
            required: MIN_CORRESPONDENCES,
        });
    }

    let transform = solve_rigid(&src, &tgt).ok_or(RegistrationError::Degenerate)?;

    let sum_sq: f64 = src
        .iter()
        .zip(&tgt)
        .map(|(s, t)| {
            let p = transform.apply_to_point(s);
            (0..3).map(|a| ((p[a] - t[a]) as f64).powi(2)).sum::<f64>()
        })
        .sum();
    let residual = (sum_sq / src.len() as f64).sqrt() as f32;

    Ok(SvdEstimate {
        transform,
        residual,
        used: src.len(),
    })
}

/// Kabsch solution for paired point sets of equal length. `None` when fewer
/// than three pairs are given or the source points do not span a plane.
pub(crate) fn solve_rigid(src: &[[f32; 3]], tgt: &[[f32; 3]]) -> Option<RigidTransform> {
    let n = src.len().min(tgt.len());
    if n < MIN_CORRESPONDENCES {
        return None;
    }

    let mut src_centroid = Vector3::<f64>::zeros();
    let mut tgt_centroid = Vector3::<f64>::zeros();
    for i in 0..n {
        src_centroid += to_v64(&src[i]);
        tgt_centroid += to_v64(&tgt[i]);
    }
    src_centroid /= n as f64;
    tgt_centroid /= n as f64;

    // H = sum (src_i - src_centroid)(tgt_i - tgt_centroid)^T
    let mut h = Matrix3::<f64>::zeros();
    let mut spread = 0.0f64;
    for i in 0..n {
        let s = to_v64(&src[i]) - src_centroid;
        let t = to_v64(&tgt[i]) - tgt_centroid;
        spread += s.norm_squared();
        h += s * t.transpose();
    }
    if spread <= f64::EPSILON {
        return None;
    }

    let svd = SVD::new(h, true, true);
    let u = svd.u?;
    let mut v_t = svd.v_t?;
    let sv = svd.singular_values;

    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| sv[b].total_cmp(&sv[a]));
    // Collinear sources leave rotation about the line undetermined.
    if sv[order[1]] <= 1e-9 * sv[order[0]].max(f64::MIN_POSITIVE) {
        return None;
    }

    // Reflection: flip the axis of the smallest singular value.
    if (v_t.transpose() * u.transpose()).determinant() < 0.0 {
        let k = order[2];
        for c in 0..3 {
            v_t[(k, c)] = -v_t[(k, c)];
        }
    }

    let rotation = v_t.transpose() * u.transpose();
    let translation = tgt_centroid - rotation * src_centroid;

    Some(RigidTransform::from_matrix3_f64(&rotation, &translation))
}

#[inline]
fn to_v64(p: &[f32; 3]) -> Vector3<f64> {
    Vector3::new(p[0] as f64, p[1] as f64, p[2] as f64)
}
