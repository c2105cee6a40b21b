//! Capture → registration hand-off.
//!
//! A capture loop must not wait for registration, which can take several
//! frame intervals. Frames go through a bounded queue to a dedicated worker
//! thread that feeds them to the session one at a time.
//!
//! ```ignore
//! let session = Arc::new(RegistrationSession::new(config)?);
//! let (worker, frames) = RegistrationWorker::spawn(Arc::clone(&session), 4)?;
//!
//! // capture thread
//! frames.try_submit(ScanFrame::new(cloud, Some(15.0)));
//!
//! drop(frames);
//! worker.join()?;
//! let composite = session.aligned_cloud();
//! ```

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use scanstitch_core::PointCloud;

use crate::error::{Result, SessionError};
use crate::session::RegistrationSession;
use crate::status::StatusEvent;

/// Default queue length: a few scans, so stale frames are dropped rather
/// than registered late.
pub const DEFAULT_QUEUE_CAPACITY: usize = 4;

/// One captured scan plus its rotation metadata.
#[derive(Clone, Debug)]
pub struct ScanFrame {
    pub cloud: PointCloud,
    /// Rotation since the previous frame, in degrees.
    pub rotation_degrees: Option<f32>,
}

impl ScanFrame {
    pub fn new(cloud: PointCloud, rotation_degrees: Option<f32>) -> Self {
        Self {
            cloud,
            rotation_degrees,
        }
    }
}

/// Producer side of the worker queue. Cloneable; the worker stops once every
/// clone is dropped and the queue is drained.
#[derive(Clone)]
pub struct FrameSender {
    tx: Sender<ScanFrame>,
}

impl FrameSender {
    /// Queue a frame without blocking. Returns `false` if the frame was
    /// dropped because the queue is full or the worker is gone.
    pub fn try_submit(&self, frame: ScanFrame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::debug!("registration queue full, dropping frame");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Queue a frame, waiting for space.
    pub fn submit(&self, frame: ScanFrame) -> Result<()> {
        self.tx.send(frame).map_err(|_| SessionError::WorkerStopped)
    }

    pub fn queued(&self) -> usize {
        self.tx.len()
    }
}

/// Thread that drains a [`FrameSender`] queue into a session.
pub struct RegistrationWorker {
    handle: JoinHandle<usize>,
}

impl RegistrationWorker {
    /// Spawn the worker with a queue of `capacity` frames (at least one).
    pub fn spawn(
        session: Arc<RegistrationSession>,
        capacity: usize,
    ) -> Result<(Self, FrameSender)> {
        let (tx, rx) = bounded(capacity.max(1));
        let handle = thread::Builder::new()
            .name("registration".into())
            .spawn(move || run_worker(&session, rx))
            .map_err(|e| SessionError::Io(e.to_string()))?;
        Ok((Self { handle }, FrameSender { tx }))
    }

    /// Wait for the worker to drain its queue and exit. Returns the number
    /// of frames it ingested.
    pub fn join(self) -> Result<usize> {
        self.handle.join().map_err(|_| SessionError::WorkerStopped)
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

fn run_worker(session: &RegistrationSession, rx: Receiver<ScanFrame>) -> usize {
    log::info!("registration worker started");
    let mut ingested = 0;
    for frame in rx {
        match session.add_next_point_cloud(&frame.cloud, frame.rotation_degrees) {
            Ok(_) => ingested += 1,
            Err(e) => session.emit(StatusEvent::error(None, format!("frame rejected: {}", e))),
        }
    }
    log::info!("registration worker stopped after {} frames", ingested);
    ingested
}
