//! Capture thread → registration worker hand-off.

mod common;

use std::sync::Arc;
use std::thread;

use scanstitch::session::{FrameSender, DEFAULT_QUEUE_CAPACITY};
use scanstitch::{RegistrationConfig, RegistrationSession, RegistrationWorker, ScanFrame, Severity};

use common::box_corner;

fn capture(frames: FrameSender, count: usize) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        for k in 0..count {
            frames
                .submit(ScanFrame::new(box_corner(300, k as u64), Some(3.0)))
                .unwrap();
        }
    })
}

#[test]
fn frames_from_capture_thread_are_registered_in_order() {
    let session = Arc::new(RegistrationSession::new(RegistrationConfig::default()).unwrap());
    let events = session.subscribe();
    let (worker, frames) =
        RegistrationWorker::spawn(Arc::clone(&session), DEFAULT_QUEUE_CAPACITY).unwrap();

    capture(frames, 5).join().unwrap();
    assert_eq!(worker.join().unwrap(), 5);

    assert_eq!(session.len(), 5);
    assert_eq!(session.transforms().len(), 5);
    assert_eq!(session.accumulated_rotation_degrees(), 15.0);

    let ingested: Vec<usize> = events
        .try_iter()
        .filter(|e| e.severity == Severity::Info && e.message.contains("ingested"))
        .filter_map(|e| e.scan_index)
        .collect();
    assert_eq!(ingested, vec![0, 1, 2, 3, 4]);
}

#[test]
fn readers_see_whole_scans_while_the_worker_runs() {
    let session = Arc::new(RegistrationSession::new(RegistrationConfig::default()).unwrap());
    let (worker, frames) = RegistrationWorker::spawn(Arc::clone(&session), 2).unwrap();
    let producer = capture(frames, 4);

    let reader = {
        let session = Arc::clone(&session);
        thread::spawn(move || {
            loop {
                let composite = session.aligned_cloud().len();
                assert_eq!(composite % 300, 0);
                if session.transforms().len() == 4 {
                    break;
                }
                thread::yield_now();
            }
        })
    };

    producer.join().unwrap();
    worker.join().unwrap();
    reader.join().unwrap();
    assert_eq!(session.aligned_cloud().len(), 4 * 300);
}
