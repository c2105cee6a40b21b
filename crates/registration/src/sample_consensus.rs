use rand::prelude::*;
use rand::rngs::StdRng;
use scanstitch_core::{ensure_at_least, ensure_positive, PointCloud};

use crate::correspondence::Correspondence;
use crate::error::Result;
use crate::svd::{solve_rigid, MIN_CORRESPONDENCES};
use crate::transform::RigidTransform;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RejectionParams {
    /// A pair is an inlier when the candidate transform brings the source
    /// point within this distance of its target.
    pub inlier_threshold: f32,
    pub max_iterations: usize,
    pub seed: u64,
}

impl Default for RejectionParams {
    fn default() -> Self {
        Self {
            inlier_threshold: 0.05,
            max_iterations: 1000,
            seed: 0x5ca9_5717,
        }
    }
}

/// Outcome of sample-consensus rejection.
#[derive(Debug, Clone, PartialEq)]
pub struct Consensus {
    /// Surviving correspondences, in their input order.
    pub inliers: Vec<Correspondence>,
    /// Model fitted to the winning minimal sample; `None` when the input was
    /// too small to sample or no sample produced a model.
    pub model: Option<RigidTransform>,
}

/// Keep the largest set of correspondences that agree on one rigid
/// transform.
///
/// Minimal samples of three pairs are drawn from a seeded RNG (identical
/// input and seed give identical output), a transform is fitted to each, and
/// the pairs it maps within `inlier_threshold` are counted. With fewer than
/// three correspondences there is nothing to sample and all are returned.
/// When every sample is degenerate no pair can be vouched for and the
/// result is empty.
pub fn reject_by_sample_consensus(
    correspondences: &[Correspondence],
    source: &PointCloud,
    target: &PointCloud,
    params: &RejectionParams,
) -> Result<Consensus> {
    let threshold = ensure_positive("inlier_threshold", params.inlier_threshold)?;
    let iterations = ensure_at_least("max_iterations", params.max_iterations, 1)?;

    let n = correspondences.len();
    if n < MIN_CORRESPONDENCES {
        return Ok(Consensus {
            inliers: correspondences.to_vec(),
            model: None,
        });
    }

    let pairs: Vec<([f32; 3], [f32; 3])> = correspondences
        .iter()
        .map(|c| (source.point(c.source_index), target.point(c.target_index)))
        .collect();

    // Pre-generate all samples so the draw is independent of early exits.
    let mut rng = StdRng::seed_from_u64(params.seed);
    let samples: Vec<[usize; 3]> = (0..iterations)
        .filter_map(|_| sample_three_distinct(n, &mut rng))
        .collect();

    let mut best_model: Option<RigidTransform> = None;
    let mut best_count = 0usize;

    for (iter, sample) in samples.iter().enumerate() {
        let src = sample.map(|k| pairs[k].0);
        let tgt = sample.map(|k| pairs[k].1);
        let Some(model) = solve_rigid(&src, &tgt) else {
            continue;
        };

        let count = pairs.iter().filter(|(s, t)| is_inlier(&model, s, t, threshold)).count();
        if count > best_count {
            best_count = count;
            best_model = Some(model);

            // Adaptive early termination at 99.9% confidence.
            let w = best_count as f64 / n as f64;
            if w >= 1.0 {
                break;
            }
            let needed = (1.0 - 0.999f64).ln() / (1.0 - w.powi(3)).ln();
            if (iter as f64) > needed {
                break;
            }
        }
    }

    let Some(model) = best_model else {
        log::debug!("sample consensus: every sample of {} pairs was degenerate", n);
        return Ok(Consensus {
            inliers: Vec::new(),
            model: None,
        });
    };

    let inliers: Vec<Correspondence> = correspondences
        .iter()
        .zip(&pairs)
        .filter(|(_, (s, t))| is_inlier(&model, s, t, threshold))
        .map(|(c, _)| *c)
        .collect();

    log::debug!("sample consensus kept {}/{} correspondences", inliers.len(), n);

    Ok(Consensus {
        inliers,
        model: Some(model),
    })
}

#[inline]
fn is_inlier(model: &RigidTransform, s: &[f32; 3], t: &[f32; 3], threshold: f32) -> bool {
    let p = model.apply_to_point(s);
    let d2 = (p[0] - t[0]).powi(2) + (p[1] - t[1]).powi(2) + (p[2] - t[2]).powi(2);
    d2 <= threshold * threshold
}

/// Samples 3 distinct indices in [0, n).
fn sample_three_distinct(n: usize, rng: &mut StdRng) -> Option<[usize; 3]> {
    if n < 3 {
        return None;
    }
    let i0 = rng.gen_range(0..n);
    let mut i1 = rng.gen_range(0..n);
    let mut attempts = 0;
    while i1 == i0 {
        if attempts > 100 {
            return None;
        }
        i1 = rng.gen_range(0..n);
        attempts += 1;
    }
    let mut i2 = rng.gen_range(0..n);
    attempts = 0;
    while i2 == i0 || i2 == i1 {
        if attempts > 100 {
            return None;
        }
        i2 = rng.gen_range(0..n);
        attempts += 1;
    }
    Some([i0, i1, i2])
}
