use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use scanstitch::registration::apply_transform;
use scanstitch::{PointCloud, RegistrationConfig, RegistrationSession, RigidTransform};

/// Turntable object: a bumpy cylinder wall 20 cm across.
fn turntable_object(n: usize, seed: u64) -> PointCloud {
    let mut rng = StdRng::seed_from_u64(seed);
    let pts: Vec<[f32; 3]> = (0..n)
        .map(|_| {
            let a = rng.gen_range(0.0f32..std::f32::consts::TAU);
            let h = rng.gen_range(0.0f32..0.3);
            let r = 0.1 + 0.01 * (5.0 * a).sin() * (20.0 * h).cos();
            [r * a.cos(), h, r * a.sin()]
        })
        .collect();
    PointCloud::from_points(&pts)
}

fn bench_second_scan(c: &mut Criterion) {
    let first = turntable_object(20_000, 1);
    let second = apply_transform(
        &turntable_object(20_000, 2),
        &RigidTransform::rotation_about_axis([0.0; 3], [0.0, 1.0, 0.0], 10.0),
    );

    c.bench_function("session_register_second_scan_20k", |b| {
        b.iter_batched(
            || {
                let session = RegistrationSession::new(RegistrationConfig::default()).unwrap();
                session.add_next_point_cloud(&first, None).unwrap();
                session
            },
            |session| session.add_next_point_cloud(&second, Some(10.0)).unwrap(),
            BatchSize::LargeInput,
        )
    });
}

criterion_group!(benches, bench_second_scan);
criterion_main!(benches);
