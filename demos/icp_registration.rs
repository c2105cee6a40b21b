use scanstitch::registration::{apply_transform, refine, IcpParams};
use scanstitch::{PointCloud, RigidTransform};

fn main() {
    // A ramp with a bump so the alignment is not ambiguous along any axis
    let mut pts = Vec::new();
    for i in 0..30 {
        for j in 0..30 {
            let x = i as f32 * 0.02;
            let y = j as f32 * 0.02;
            let bump = 0.05 * (-((x - 0.3).powi(2) + (y - 0.2).powi(2)) / 0.01).exp();
            pts.push([x, y, 0.2 * x + bump]);
        }
    }
    let source = PointCloud::from_points(&pts);
    println!("Source: {} points", source.len());

    let motion = RigidTransform::rotation_about_axis([0.3, 0.3, 0.0], [0.0, 0.0, 1.0], 4.0)
        .compose(&RigidTransform::from_translation([0.02, -0.01, 0.0]));
    let target = apply_transform(&source, &motion);
    println!("Target: source rotated 4 deg about z and shifted by [0.02, -0.01, 0.0]");

    let params = IcpParams {
        max_iterations: 100,
        max_correspondence_distance: 0.1,
        ..IcpParams::default()
    };
    let result = match refine(&source, &target, &RigidTransform::identity(), &params) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("ICP failed: {e}");
            return;
        }
    };
    println!("ICP converged: {}", result.converged);
    println!("ICP iterations: {}", result.num_iterations);
    println!("ICP RMSE: {:.6}", result.rmse);
    println!("ICP fitness: {:.4}", result.fitness);
    println!(
        "Recovered rotation: {:.3} deg, translation: [{:.4}, {:.4}, {:.4}]",
        result.transform.rotation_angle_degrees(),
        result.transform.translation[0],
        result.transform.translation[1],
        result.transform.translation[2]
    );

    let aligned = apply_transform(&source, &result.transform);
    println!("Aligned first point: {:?}", aligned.point(0));
    println!("Target first point: {:?}", target.point(0));
}
