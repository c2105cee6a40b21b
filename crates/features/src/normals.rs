use rayon::prelude::*;
use scanstitch_core::{ensure_positive, Normals, ParamError, PointCloud};
use scanstitch_spatial::KdTree;

/// Fewest points (query included) a neighbourhood needs for a plane fit.
pub const MIN_NEIGHBOURS: usize = 3;

/// Estimate surface normals by PCA over every neighbour within `radius`.
///
/// Normals are oriented toward the sensor origin. See
/// [`estimate_normals_with_viewpoint`].
pub fn estimate_normals(cloud: &PointCloud, radius: f32) -> Result<Normals, ParamError> {
    estimate_normals_with_viewpoint(cloud, radius, [0.0, 0.0, 0.0])
}

/// Same as [`estimate_normals`] but orients normals toward `viewpoint`.
///
/// Points whose neighbourhood holds fewer than [`MIN_NEIGHBOURS`] points, and
/// non-finite points, get [`Normals::FLAGGED`]. The result always has one
/// entry per input point.
pub fn estimate_normals_with_viewpoint(
    cloud: &PointCloud,
    radius: f32,
    viewpoint: [f32; 3],
) -> Result<Normals, ParamError> {
    let radius = ensure_positive("normal_radius", radius)?;

    if cloud.is_empty() {
        return Ok(Normals::with_capacity(0));
    }

    let tree = KdTree::build(cloud);
    let points = cloud.to_points();

    let normals_vec: Vec<[f32; 3]> = points
        .par_iter()
        .map(|point| {
            let indices = tree.radius_search(point, radius);
            if indices.len() < MIN_NEIGHBOURS {
                return Normals::FLAGGED;
            }
            fit_normal(&points, &indices, point, viewpoint)
        })
        .collect();

    let normals = Normals::from_vectors(&normals_vec);
    log::debug!(
        "estimated {}/{} normals (radius {})",
        normals.valid_count(),
        normals.len(),
        radius
    );
    Ok(normals)
}

fn fit_normal(
    points: &[[f32; 3]],
    indices: &[usize],
    point: &[f32; 3],
    viewpoint: [f32; 3],
) -> [f32; 3] {
    let count = indices.len() as f64;

    let mut c = [0.0f64; 3];
    for &idx in indices {
        c[0] += points[idx][0] as f64;
        c[1] += points[idx][1] as f64;
        c[2] += points[idx][2] as f64;
    }
    c[0] /= count;
    c[1] /= count;
    c[2] /= count;

    // Upper triangle of the symmetric covariance.
    let mut c00 = 0.0f64;
    let mut c01 = 0.0f64;
    let mut c02 = 0.0f64;
    let mut c11 = 0.0f64;
    let mut c12 = 0.0f64;
    let mut c22 = 0.0f64;
    for &idx in indices {
        let dx = points[idx][0] as f64 - c[0];
        let dy = points[idx][1] as f64 - c[1];
        let dz = points[idx][2] as f64 - c[2];
        c00 += dx * dx;
        c01 += dx * dy;
        c02 += dx * dz;
        c11 += dy * dy;
        c12 += dy * dz;
        c22 += dz * dz;
    }

    let (mut nx, mut ny, mut nz) = smallest_eigenvector_3x3(c00, c01, c02, c11, c12, c22);

    let vx = viewpoint[0] - point[0];
    let vy = viewpoint[1] - point[1];
    let vz = viewpoint[2] - point[2];
    if nx * vx + ny * vy + nz * vz < 0.0 {
        nx = -nx;
        ny = -ny;
        nz = -nz;
    }

    [nx, ny, nz]
}

/// Unit eigenvector of the smallest eigenvalue of a 3x3 symmetric matrix.
///
/// Eigenvalues come from Cardano's closed form; the eigenvector is the cross
/// product of two rows of `A - λI`. Falls back to `+z` when the matrix is
/// (near) isotropic.
#[inline]
fn smallest_eigenvector_3x3(
    a00: f64,
    a01: f64,
    a02: f64,
    a11: f64,
    a12: f64,
    a22: f64,
) -> (f32, f32, f32) {
    let m = (a00 + a11 + a22) / 3.0;

    let b00 = a00 - m;
    let b11 = a11 - m;
    let b22 = a22 - m;

    let q = (b00 * (b11 * b22 - a12 * a12) - a01 * (a01 * b22 - a12 * a02)
        + a02 * (a01 * a12 - b11 * a02))
        / 2.0;

    let p = (b00 * b00 + b11 * b11 + b22 * b22 + 2.0 * (a01 * a01 + a02 * a02 + a12 * a12)) / 6.0;
    let pp = p.max(0.0);

    if pp < 1e-30 {
        return (0.0, 0.0, 1.0);
    }

    let det_ratio = (q / (pp * pp.sqrt())).clamp(-1.0, 1.0);
    let phi = det_ratio.acos() / 3.0;

    // eig0 <= eig1 <= eig2; a covariance is positive semi-definite so the
    // smallest is eig0.
    let lambda = m + 2.0 * pp.sqrt() * (phi + 2.0 * std::f64::consts::FRAC_PI_3).cos();

    let r00 = a00 - lambda;
    let r11 = a11 - lambda;
    let r22 = a22 - lambda;

    let candidates = [
        // rows 0 x 1
        [a01 * a12 - r11 * a02, a02 * a01 - a12 * r00, r00 * r11 - a01 * a01],
        // rows 0 x 2
        [a01 * r22 - a12 * a02, a02 * a02 - r22 * r00, r00 * a12 - a01 * a02],
        // rows 1 x 2
        [r11 * r22 - a12 * a12, a12 * a02 - r22 * a01, a01 * a12 - r11 * a02],
    ];

    // The longest cross product is the best conditioned one.
    let best = candidates
        .iter()
        .map(|e| (e, e[0] * e[0] + e[1] * e[1] + e[2] * e[2]))
        .fold((&candidates[0], 0.0f64), |acc, cur| if cur.1 > acc.1 { cur } else { acc });

    if best.1 < 1e-30 {
        return (0.0, 0.0, 1.0);
    }
    let inv = 1.0 / best.1.sqrt();
    let e = best.0;
    ((e[0] * inv) as f32, (e[1] * inv) as f32, (e[2] * inv) as f32)
}
