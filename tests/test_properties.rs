//! Whole-pipeline properties of the registration session.

mod common;

use approx::assert_relative_eq;
use scanstitch::filters::voxel_downsample;
use scanstitch::registration::{
    apply_transform, estimate_transform_svd, refine, Correspondence, IcpParams, RigidTransform,
};
use scanstitch::session::{FallbackPolicy, FilterBox, ScanStage};
use scanstitch::{RegistrationConfig, RegistrationSession, Severity};

use common::{box_corner, sparse_points, uniform_cube};

#[test]
fn downsampling_is_a_fixed_point() {
    let cloud = uniform_cube(5000, 1.0, 3);
    let once = voxel_downsample(&cloud, 0.1).unwrap();
    let twice = voxel_downsample(&once, 0.1).unwrap();
    assert!(once.len() < cloud.len());
    assert_eq!(twice.len(), once.len());
    for (a, b) in once.iter_points().zip(twice.iter_points()) {
        for axis in 0..3 {
            assert_relative_eq!(a[axis], b[axis], epsilon = 1e-6);
        }
    }
}

#[test]
fn svd_round_trip_needs_no_refinement() {
    let source = box_corner(600, 1);
    let truth = RigidTransform::rotation_about_axis([0.1, 0.0, 0.0], [0.2, 1.0, 0.1], 17.0)
        .compose(&RigidTransform::from_translation([0.05, -0.02, 0.3]));
    let target = apply_transform(&source, &truth);

    let pairs: Vec<Correspondence> = (0..source.len())
        .map(|i| Correspondence {
            source_index: i,
            target_index: i,
            distance: 0.0,
        })
        .collect();
    let estimate = estimate_transform_svd(&pairs, &source, &target).unwrap();
    assert!(estimate.residual < 1e-5, "residual {}", estimate.residual);
    for r in 0..3 {
        for c in 0..3 {
            assert_relative_eq!(
                estimate.transform.rotation[r][c],
                truth.rotation[r][c],
                epsilon = 1e-5
            );
        }
        assert_relative_eq!(
            estimate.transform.translation[r],
            truth.translation[r],
            epsilon = 1e-5
        );
    }

    let params = IcpParams {
        fitness_epsilon: 1e-5,
        ..IcpParams::default()
    };
    let refined = refine(&source, &target, &estimate.transform, &params).unwrap();
    assert!(refined.converged);
    assert_eq!(refined.num_iterations, 0);
    assert_eq!(refined.transform, estimate.transform);
}

#[test]
fn derived_state_grows_with_every_scan() {
    let session = RegistrationSession::new(RegistrationConfig::default()).unwrap();
    let mut composite_len = 0;
    for n in 1..=4 {
        let cloud = box_corner(900, n as u64);
        session.add_next_point_cloud(&cloud, Some(2.0)).unwrap();

        assert_eq!(session.len(), n);
        assert_eq!(session.rotation_compensated_clouds().len(), n);
        assert_eq!(session.aligned_clouds().len(), n);
        assert_eq!(session.transforms().len(), n);
        assert_eq!(session.stage(n - 1), ScanStage::Composed);

        let len = session.aligned_cloud().len();
        assert!(len >= composite_len);
        composite_len = len;
    }
    assert_eq!(composite_len, 4 * 900);
    assert_eq!(session.roughly_aligned_cloud().len(), 4 * 900);
}

#[test]
fn scan_without_correspondences_gets_rotation_compensation() {
    let config = RegistrationConfig {
        svd_max_distance: 1e-4,
        ..RegistrationConfig::default()
    };
    let session = RegistrationSession::new(config).unwrap();
    let events = session.subscribe();

    session.add_next_point_cloud(&sparse_points(50, 1), None).unwrap();
    session.add_next_point_cloud(&sparse_points(50, 2), Some(30.0)).unwrap();

    let expected = RigidTransform::rotation_about_axis([0.0; 3], [0.0, 1.0, 0.0], -30.0);
    assert_eq!(session.transforms()[1], expected);
    assert_eq!(session.used_fallback(1), Some(true));
    assert_eq!(session.failed_stage(1), Some(ScanStage::Correlated));
    assert_eq!(session.correspondences(1), Some(Vec::new()));

    let degraded: Vec<_> = events
        .try_iter()
        .filter(|e| e.severity == Severity::Warning && e.scan_index == Some(1))
        .collect();
    assert_eq!(degraded.len(), 1);
    assert_eq!(degraded[0].severity.color_rgb(), Severity::Warning.color_rgb());
}

#[test]
fn previous_correction_policy_reuses_last_correction() {
    let config = RegistrationConfig {
        fallback_policy: FallbackPolicy::PreviousCorrection,
        ..RegistrationConfig::default()
    };
    let session = RegistrationSession::new(config).unwrap();

    let corner = box_corner(1500, 9);
    session.add_next_point_cloud(&corner, None).unwrap();
    let nudged = apply_transform(&corner, &RigidTransform::from_translation([0.003, 0.0, 0.0]));
    session.add_next_point_cloud(&nudged, None).unwrap();
    assert_eq!(session.used_fallback(1), Some(false));

    let shift = RigidTransform::from_translation([500.0, 0.0, 0.0]);
    let far = apply_transform(&sparse_points(50, 4), &shift);
    session.add_next_point_cloud(&far, Some(20.0)).unwrap();
    assert_eq!(session.used_fallback(2), Some(true));

    // Scan 1 had no rotation, so its pose is exactly its correction.
    let correction = session.transforms()[1];
    let compensation = RigidTransform::rotation_about_axis([0.0; 3], [0.0, 1.0, 0.0], -20.0);
    assert_eq!(session.transforms()[2], compensation.compose(&correction));
}

#[test]
fn filter_box_bounds_every_ingested_point() {
    let bounds = FilterBox {
        min: [-0.45, -0.25, -0.35],
        max: [0.2, 0.1, 0.2],
    };
    let config = RegistrationConfig {
        filter_box: Some(bounds),
        ..RegistrationConfig::default()
    };
    let session = RegistrationSession::new(config).unwrap();
    let cloud = box_corner(1200, 5);
    session.add_next_point_cloud(&cloud, None).unwrap();

    let stored = &session.rotation_compensated_clouds()[0];
    assert!(!stored.is_empty());
    assert!(stored.len() < cloud.len());
    let aabb = bounds.to_aabb();
    assert!(stored.iter_points().all(|p| aabb.contains(&p)));

    session.set_filter_box(None).unwrap();
    session.add_next_point_cloud(&cloud, None).unwrap();
    assert_eq!(session.rotation_compensated_clouds()[1].len(), cloud.len());
}

#[test]
fn read_views_do_not_mutate() {
    let config = RegistrationConfig {
        register_in_real_time: false,
        ..RegistrationConfig::default()
    };
    let session = RegistrationSession::new(config).unwrap();
    session.add_next_point_cloud(&box_corner(600, 6), None).unwrap();

    let _ = session.aligned_cloud();
    let _ = session.roughly_aligned_cloud();
    let _ = session.transforms();
    assert_eq!(session.stage(0), ScanStage::FeatureReady);
    assert!(session.last_downsampled_cloud().is_some());

    session.process_and_get_aligned_cloud().unwrap();
    assert_eq!(session.stage(0), ScanStage::Composed);
}
