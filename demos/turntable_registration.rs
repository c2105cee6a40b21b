//! Feeds synthetic turntable scans through a background registration worker
//! and writes the stitched model to a PCD file.
//!
//! Usage: `cargo run --example turntable_registration [output.pcd]`

use std::sync::Arc;

use scanstitch::io::write_pcd;
use scanstitch::registration::apply_transform;
use scanstitch::session::DEFAULT_QUEUE_CAPACITY;
use scanstitch::{
    PointCloud, RegistrationConfig, RegistrationSession, RegistrationWorker, RigidTransform,
    ScanFrame, Severity,
};

const STEP_DEGREES: f32 = 15.0;
const SCANS: usize = 6;

/// Front half of a bumpy vase as seen by a sensor looking down -z.
fn scan_of_vase(turn_degrees: f32, seed: u32) -> PointCloud {
    let turn = RigidTransform::rotation_about_axis([0.0; 3], [0.0, 1.0, 0.0], turn_degrees);
    let mut pts = Vec::new();
    for i in 0..120 {
        let a = i as f32 / 120.0 * std::f32::consts::TAU;
        for j in 0..40 {
            let h = j as f32 * 0.0075;
            let r = 0.08 + 0.03 * (h * 10.0).sin() + 0.008 * (5.0 * a).cos();
            let p = turn.apply_to_point(&[r * a.cos(), h, r * a.sin()]);
            if p[2] > 0.0 {
                // Small deterministic jitter so consecutive scans never share samples
                let n = ((i * 40 + j) as u32).wrapping_mul(2_654_435_761).wrapping_add(seed) % 1000;
                pts.push([p[0], p[1], p[2] + n as f32 * 1e-6]);
            }
        }
    }
    PointCloud::from_points(&pts)
}

fn main() {
    let output = std::env::args().nth(1).unwrap_or_else(|| "turntable.pcd".to_string());

    let config = RegistrationConfig {
        normal_radius: 0.02,
        feature_radius: 0.05,
        voxel_side_length: 0.005,
        svd_max_distance: 0.05,
        ..RegistrationConfig::default()
    };
    let session = match RegistrationSession::new(config) {
        Ok(session) => Arc::new(session),
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            return;
        }
    };

    let events = session.subscribe();
    let printer = std::thread::spawn(move || {
        for event in events {
            let tag = match event.severity {
                Severity::Info => "info",
                Severity::Warning => "warn",
                Severity::Error => "error",
            };
            match event.scan_index {
                Some(i) => println!("[{tag}] scan {i}: {}", event.message),
                None => println!("[{tag}] {}", event.message),
            }
        }
    });

    let spawned = RegistrationWorker::spawn(Arc::clone(&session), DEFAULT_QUEUE_CAPACITY);
    let (worker, frames) = match spawned {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("could not start worker: {e}");
            return;
        }
    };

    for k in 0..SCANS {
        let turn = k as f32 * STEP_DEGREES;
        // Object drifts a little on the plate between scans
        let drift = RigidTransform::from_translation([0.002 * k as f32, 0.0, 0.0]);
        let scan = apply_transform(&scan_of_vase(turn, k as u32), &drift);
        let delta = if k == 0 { None } else { Some(STEP_DEGREES) };
        if let Err(e) = frames.submit(ScanFrame::new(scan, delta)) {
            eprintln!("worker stopped early: {e}");
            break;
        }
    }
    drop(frames);

    match worker.join() {
        Ok(n) => println!("registered {n} scans"),
        Err(e) => eprintln!("worker failed: {e}"),
    }

    for (i, pose) in session.transforms().iter().enumerate() {
        println!(
            "scan {i}: pose rotation {:.2} deg, translation [{:.4}, {:.4}, {:.4}]",
            pose.rotation_angle_degrees(),
            pose.translation[0],
            pose.translation[1],
            pose.translation[2]
        );
    }

    let model = session.aligned_cloud();
    match write_pcd(&output, &model) {
        Ok(()) => println!("wrote {} points to {output}", model.len()),
        Err(e) => eprintln!("could not write {output}: {e}"),
    }

    drop(session);
    let _ = printer.join();
}
