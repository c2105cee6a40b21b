use rayon::prelude::*;
use scanstitch_core::{ensure_at_least, ensure_positive, Normals, PointCloud};
use scanstitch_features::Descriptor;
use scanstitch_spatial::KdTree;

use crate::error::Result;

/// A proposed pairing of `source[source_index]` with `target[target_index]`.
///
/// `distance` is the match quality: Euclidean distance for spatial matches,
/// descriptor distance for feature matches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    pub source_index: usize,
    pub target_index: usize,
    pub distance: f32,
}

/// Nearest-neighbour pairing used inside ICP.
///
/// For each point in `source`, the nearest neighbor in `target_tree` is found.
/// Only correspondences with distance <= `max_distance` are returned.
pub fn find_correspondences(
    source: &PointCloud,
    target_tree: &KdTree,
    max_distance: f32,
) -> Vec<Correspondence> {
    (0..source.len())
        .into_par_iter()
        .filter_map(|i| {
            let (target_index, distance) = target_tree.nearest(&source.point(i))?;
            (distance <= max_distance).then_some(Correspondence {
                source_index: i,
                target_index,
                distance,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrespondenceParams {
    /// Matches farther apart than this are rejected.
    pub max_distance: f32,
    /// Spatial candidates examined per source point.
    pub candidates: usize,
    /// Candidates whose normal deviates more than this are skipped.
    pub max_normal_angle_degrees: f32,
}

impl Default for CorrespondenceParams {
    fn default() -> Self {
        Self {
            max_distance: 0.05,
            candidates: 5,
            max_normal_angle_degrees: 45.0,
        }
    }
}

/// Pair each source point with a target point using both position and
/// normal orientation.
///
/// Up to `candidates` target points within `max_distance` are considered;
/// candidates whose normal is more than `max_normal_angle_degrees` away from
/// the source normal are skipped (normals are compared up to sign), and the
/// remaining one with the lowest `distance + max_distance * (1 - |cos|)`
/// wins. A flagged normal on either side makes the pair position-only.
/// At most one match per source point; target points may repeat.
pub fn estimate_correspondences(
    source: &PointCloud,
    target: &PointCloud,
    source_normals: &Normals,
    target_normals: &Normals,
    params: &CorrespondenceParams,
) -> Result<Vec<Correspondence>> {
    let max_distance = ensure_positive("max_distance", params.max_distance)?;
    let candidates = ensure_at_least("candidates", params.candidates, 1)?;
    let min_cos = params.max_normal_angle_degrees.clamp(0.0, 90.0).to_radians().cos();

    if source.is_empty() || target.is_empty() {
        return Ok(Vec::new());
    }

    let tree = KdTree::build(target);

    let matches: Vec<Correspondence> = (0..source.len())
        .into_par_iter()
        .filter_map(|i| {
            let p = source.point(i);
            let (indices, distances) = tree.knn_within(&p, candidates, max_distance);
            let source_normal = normal_at(source_normals, i);

            let mut best: Option<(f32, Correspondence)> = None;
            for (&j, &d) in indices.iter().zip(&distances) {
                let cos = match (source_normal, normal_at(target_normals, j)) {
                    (Some(a), Some(b)) => (a[0] * b[0] + a[1] * b[1] + a[2] * b[2]).abs(),
                    _ => 1.0,
                };
                if cos < min_cos {
                    continue;
                }
                let score = d + max_distance * (1.0 - cos);
                if best.map_or(true, |(s, _)| score < s) {
                    best = Some((
                        score,
                        Correspondence {
                            source_index: i,
                            target_index: j,
                            distance: d,
                        },
                    ));
                }
            }
            best.map(|(_, c)| c)
        })
        .collect();

    log::debug!(
        "{} spatial correspondences from {} source points",
        matches.len(),
        source.len()
    );
    Ok(matches)
}

/// Pair points by nearest neighbour in descriptor space.
///
/// All-zero descriptors (points without a usable neighbourhood) never match.
/// With `reciprocal`, a pair is kept only if each side is the other's
/// nearest descriptor.
pub fn match_descriptors(
    source: &[Descriptor],
    target: &[Descriptor],
    reciprocal: bool,
) -> Vec<Correspondence> {
    let forward = nearest_descriptors(source, target);
    if !reciprocal {
        return forward;
    }

    let backward = nearest_descriptors(target, source);
    let mut best_source_for: Vec<Option<usize>> = vec![None; target.len()];
    for c in &backward {
        best_source_for[c.source_index] = Some(c.target_index);
    }

    forward
        .into_iter()
        .filter(|c| best_source_for[c.target_index] == Some(c.source_index))
        .collect()
}

fn nearest_descriptors(from: &[Descriptor], to: &[Descriptor]) -> Vec<Correspondence> {
    let usable: Vec<usize> = (0..to.len()).filter(|&j| !is_blank(&to[j])).collect();
    if usable.is_empty() {
        return Vec::new();
    }

    (0..from.len())
        .into_par_iter()
        .filter(|&i| !is_blank(&from[i]))
        .map(|i| {
            let mut best_j = usable[0];
            let mut best_d = f32::INFINITY;
            for &j in &usable {
                let d = descriptor_distance_sq(&from[i], &to[j]);
                if d < best_d {
                    best_d = d;
                    best_j = j;
                }
            }
            Correspondence {
                source_index: i,
                target_index: best_j,
                distance: best_d.sqrt(),
            }
        })
        .collect()
}

#[inline]
fn is_blank(d: &Descriptor) -> bool {
    d.iter().all(|&v| v == 0.0)
}

#[inline]
fn descriptor_distance_sq(a: &Descriptor, b: &Descriptor) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[inline]
fn normal_at(normals: &Normals, i: usize) -> Option<[f32; 3]> {
    (i < normals.len() && normals.is_valid(i)).then(|| normals.get(i))
}

/// Root mean square of the correspondence distances; 0 for an empty set.
pub fn compute_rmse(correspondences: &[Correspondence]) -> f32 {
    if correspondences.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = correspondences.iter().map(|c| c.distance * c.distance).sum();
    (sum_sq / correspondences.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanstitch_features::FPFH_BINS;

    fn line(xs: &[f32]) -> PointCloud {
        PointCloud::from_xyz(xs.to_vec(), vec![0.0; xs.len()], vec![0.0; xs.len()])
    }

    #[test]
    fn find_correspondences_identical_clouds() {
        let cloud = line(&[0.0, 1.0, 2.0]);
        let tree = KdTree::build(&cloud);
        let corrs = find_correspondences(&cloud, &tree, f32::INFINITY);

        assert_eq!(corrs.len(), 3);
        for c in &corrs {
            assert_eq!(c.source_index, c.target_index);
            assert!(c.distance.abs() < 1e-6);
        }
    }

    #[test]
    fn find_correspondences_with_max_distance() {
        let source = line(&[0.0, 1.0, 10.0]);
        let tree = KdTree::build(&line(&[0.0, 1.0, 2.0]));

        // x=10 is 8 away from its nearest target.
        let corrs = find_correspondences(&source, &tree, 3.0);
        assert_eq!(corrs.len(), 2);
        assert_eq!(corrs[0].source_index, 0);
        assert_eq!(corrs[1].source_index, 1);
    }

    #[test]
    fn find_correspondences_empty_inputs() {
        let tree = KdTree::build(&line(&[1.0]));
        assert!(find_correspondences(&PointCloud::new(), &tree, f32::INFINITY).is_empty());
        let empty_tree = KdTree::build(&PointCloud::new());
        assert!(find_correspondences(&line(&[1.0]), &empty_tree, f32::INFINITY).is_empty());
    }

    #[test]
    fn normals_break_ties_between_candidates() {
        // Two targets equidistant from the source; only one shares its normal.
        let source = line(&[0.0]);
        let target = PointCloud::from_xyz(vec![0.0, 0.0], vec![0.01, -0.01], vec![0.0, 0.0]);
        let sn = Normals::from_vectors(&[[0.0, 0.0, 1.0]]);
        let tn = Normals::from_vectors(&[[1.0, 0.0, 0.0], [0.0, 0.0, -1.0]]);

        let params = CorrespondenceParams {
            max_distance: 0.1,
            candidates: 2,
            max_normal_angle_degrees: 30.0,
        };
        let corrs = estimate_correspondences(&source, &target, &sn, &tn, &params).unwrap();
        assert_eq!(corrs.len(), 1);
        assert_eq!(corrs[0].target_index, 1);
    }

    #[test]
    fn incompatible_normals_yield_no_match() {
        let source = line(&[0.0]);
        let target = line(&[0.01]);
        let sn = Normals::from_vectors(&[[0.0, 0.0, 1.0]]);
        let tn = Normals::from_vectors(&[[1.0, 0.0, 0.0]]);
        let params = CorrespondenceParams::default();
        let corrs = estimate_correspondences(&source, &target, &sn, &tn, &params).unwrap();
        assert!(corrs.is_empty());
    }

    #[test]
    fn flagged_normals_fall_back_to_distance() {
        let source = line(&[0.0, 5.0]);
        let target = line(&[0.01, 5.5]);
        let sn = Normals::from_vectors(&[Normals::FLAGGED, Normals::FLAGGED]);
        let tn = Normals::from_vectors(&[[1.0, 0.0, 0.0], [1.0, 0.0, 0.0]]);
        let params = CorrespondenceParams::default();
        let corrs = estimate_correspondences(&source, &target, &sn, &tn, &params).unwrap();
        assert_eq!(corrs.len(), 1);
        assert_eq!(corrs[0].source_index, 0);
    }

    #[test]
    fn estimate_rejects_bad_max_distance() {
        let cloud = line(&[0.0]);
        let n = Normals::from_vectors(&[[0.0, 0.0, 1.0]]);
        let params = CorrespondenceParams {
            max_distance: 0.0,
            ..CorrespondenceParams::default()
        };
        assert!(estimate_correspondences(&cloud, &cloud, &n, &n, &params).is_err());
    }

    #[test]
    fn descriptor_matching_prefers_mutual_nearest() {
        let mut a = [[0.0f32; FPFH_BINS]; 2];
        let mut b = [[0.0f32; FPFH_BINS]; 3];
        a[0][0] = 10.0;
        a[1][5] = 10.0;
        b[0][5] = 9.0;
        b[1][0] = 9.5;
        b[2][0] = 3.0;

        let corrs = match_descriptors(&a, &b, true);
        assert_eq!(corrs.len(), 2);
        assert_eq!((corrs[0].source_index, corrs[0].target_index), (0, 1));
        assert_eq!((corrs[1].source_index, corrs[1].target_index), (1, 0));
    }

    #[test]
    fn blank_descriptors_never_match() {
        let a = [[0.0f32; FPFH_BINS]; 2];
        let mut b = [[0.0f32; FPFH_BINS]; 1];
        b[0][1] = 1.0;
        assert!(match_descriptors(&a, &b, false).is_empty());
    }

    #[test]
    fn rmse_of_known_distances() {
        let corrs = [
            Correspondence { source_index: 0, target_index: 0, distance: 3.0 },
            Correspondence { source_index: 1, target_index: 1, distance: 4.0 },
        ];
        assert!((compute_rmse(&corrs) - 12.5f32.sqrt()).abs() < 1e-6);
    }
}
