#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use scanstitch::PointCloud;

/// Three orthogonal, differently sized faces meeting near the origin: the
/// smallest shape that pins down all six degrees of freedom.
///
/// Points get a 1e-4 jitter off their face so no two share a coordinate.
pub fn box_corner(n: usize, seed: u64) -> PointCloud {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut pts = Vec::with_capacity(n);
    for k in 0..n {
        let u = rng.gen_range(0.0f32..1.0);
        let v = rng.gen_range(0.0f32..1.0);
        let jitter = rng.gen_range(-1e-4f32..1e-4);
        pts.push(match k % 3 {
            // floor
            0 => [u * 0.8 - 0.4, jitter - 0.2, v * 0.6 - 0.3],
            // back wall
            1 => [u * 0.8 - 0.4, v * 0.5 - 0.2, jitter - 0.3],
            // side wall
            _ => [jitter - 0.4, v * 0.5 - 0.2, u * 0.6 - 0.3],
        });
    }
    PointCloud::from_points(&pts)
}

/// A single flat patch one metre in front of the sensor, 80 x 60 cm.
///
/// Points are scattered at random. A regular grid lets a copy slide along
/// the plane by whole grid steps and still match, so it cannot pin down
/// in-plane motion.
pub fn planar_patch(n: usize, seed: u64) -> PointCloud {
    let mut rng = StdRng::seed_from_u64(seed);
    let pts: Vec<[f32; 3]> = (0..n)
        .map(|_| {
            [
                rng.gen_range(-0.4f32..0.4),
                rng.gen_range(-0.3f32..0.3),
                1.0 + rng.gen_range(-1e-4f32..1e-4),
            ]
        })
        .collect();
    PointCloud::from_points(&pts)
}

/// Points scattered so sparsely that nothing has a neighbour nearby.
pub fn sparse_points(n: usize, seed: u64) -> PointCloud {
    let mut rng = StdRng::seed_from_u64(seed);
    let pts: Vec<[f32; 3]> = (0..n)
        .map(|_| {
            [
                rng.gen_range(-50.0f32..50.0),
                rng.gen_range(-50.0f32..50.0),
                rng.gen_range(-50.0f32..50.0),
            ]
        })
        .collect();
    PointCloud::from_points(&pts)
}

pub fn uniform_cube(n: usize, side: f32, seed: u64) -> PointCloud {
    let mut rng = StdRng::seed_from_u64(seed);
    let pts: Vec<[f32; 3]> = (0..n)
        .map(|_| [rng.gen_range(0.0..side), rng.gen_range(0.0..side), rng.gen_range(0.0..side)])
        .collect();
    PointCloud::from_points(&pts)
}
