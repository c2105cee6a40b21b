mod common;

use scanstitch::features::{compute_fpfh, estimate_normals, FPFH_BINS};
use scanstitch::filters::{
    crop_box, intensity_from_rgb, statistical_outlier_removal, voxel_downsample,
};
use scanstitch::registration::{
    apply_transform, estimate_correspondences, estimate_transform_svd, refine,
    reject_by_sample_consensus, CorrespondenceParams, IcpParams, RejectionParams, RigidTransform,
};
use scanstitch::{Aabb, Colors, PointCloud};

use common::box_corner;

/// End-to-end pairwise pipeline: crop → denoise → downsample → normals →
/// correspondences → consensus → SVD → ICP
#[test]
fn pairwise_pipeline_recovers_small_motion() {
    let mut scene = box_corner(3000, 7);
    // A few far-off stragglers the outlier filter has to remove.
    for k in 0..5 {
        scene.x.push(3.0 + k as f32);
        scene.y.push(3.0);
        scene.z.push(-3.0);
    }

    let truth = RigidTransform::rotation_about_axis([0.0; 3], [0.0, 1.0, 0.0], 2.0)
        .compose(&RigidTransform::from_translation([0.01, 0.0, -0.005]));
    let moved = apply_transform(&scene, &truth);

    let prepare = |cloud: &PointCloud| {
        let cropped = crop_box(cloud, &Aabb::new([-1.0; 3], [1.0; 3]));
        let denoised = statistical_outlier_removal(&cropped, 8, 2.0).unwrap();
        voxel_downsample(&denoised, 0.01).unwrap()
    };
    let source = prepare(&scene);
    let target = prepare(&moved);
    assert!(source.iter_points().all(|p| p[0] < 1.0));

    let source_normals = estimate_normals(&source, 0.05).unwrap();
    let target_normals = estimate_normals(&target, 0.05).unwrap();
    assert!(source_normals.valid_count() > source.len() / 2);

    let descriptors = compute_fpfh(&source, &source_normals, 0.1).unwrap();
    assert_eq!(descriptors.len(), source.len());
    assert!(descriptors.iter().all(|d| d.len() == FPFH_BINS));

    let corrs = estimate_correspondences(
        &source,
        &target,
        &source_normals,
        &target_normals,
        &CorrespondenceParams::default(),
    )
    .unwrap();
    assert!(corrs.len() > source.len() / 2);

    let consensus =
        reject_by_sample_consensus(&corrs, &source, &target, &RejectionParams::default()).unwrap();
    let initial = estimate_transform_svd(&consensus.inliers, &source, &target).unwrap();

    let params = IcpParams {
        max_correspondence_distance: 0.05,
        ..IcpParams::default()
    };
    let result = refine(&source, &target, &initial.transform, &params).unwrap();

    let error = result.transform.compose(&truth.inverse());
    assert!(error.translation_norm() < 5e-3, "{:?}", error);
    assert!(error.rotation_angle_degrees() < 0.5);
}

#[test]
fn colored_scan_converts_to_intensity() {
    let mut cloud = box_corner(90, 8);
    let mut colors = Colors::with_capacity(cloud.len());
    for i in 0..cloud.len() {
        colors.push(if i % 2 == 0 { [255, 255, 255] } else { [0, 0, 0] });
    }
    cloud = cloud.with_colors(colors);

    let grey = intensity_from_rgb(&cloud);
    let intensity = grey.intensity.as_ref().unwrap();
    assert_eq!(intensity.len(), cloud.len());
    assert!(intensity.iter().step_by(2).all(|&v| v > 0.99 * intensity[0]));
    assert!(intensity.iter().skip(1).step_by(2).all(|&v| v == 0.0));
}
