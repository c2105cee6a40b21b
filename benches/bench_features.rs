use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use scanstitch::features::{compute_fpfh, estimate_normals};
use scanstitch::PointCloud;

/// A wavy surface patch sampled like a downsampled depth scan.
fn surface(n: usize, seed: u64) -> PointCloud {
    let mut rng = StdRng::seed_from_u64(seed);
    let pts: Vec<[f32; 3]> = (0..n)
        .map(|_| {
            let x = rng.gen_range(-0.5f32..0.5);
            let y = rng.gen_range(-0.5f32..0.5);
            [x, y, 2.0 + 0.05 * (8.0 * x).sin() * (6.0 * y).cos()]
        })
        .collect();
    PointCloud::from_points(&pts)
}

fn bench_normals(c: &mut Criterion) {
    let mut group = c.benchmark_group("estimate_normals_r2cm");
    for size in [5_000, 20_000] {
        let cloud = surface(size, 42);
        group.bench_with_input(BenchmarkId::from_parameter(size), &cloud, |b, cloud| {
            b.iter(|| estimate_normals(cloud, 0.02))
        });
    }
    group.finish();
}

fn bench_fpfh(c: &mut Criterion) {
    let mut group = c.benchmark_group("fpfh_r5cm");
    for size in [5_000, 20_000] {
        let cloud = surface(size, 42);
        let normals = estimate_normals(&cloud, 0.02).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(size), &cloud, |b, cloud| {
            b.iter(|| compute_fpfh(cloud, &normals, 0.05))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_normals, bench_fpfh);
criterion_main!(benches);
