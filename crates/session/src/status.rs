//! Status notifications for the GUI side.

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    /// Display color for status lines: green, orange, red.
    pub fn color_rgb(self) -> [u8; 3] {
        match self {
            Severity::Info => [0, 160, 0],
            Severity::Warning => [255, 140, 0],
            Severity::Error => [220, 0, 0],
        }
    }
}

/// One status line: what happened, to which scan, how bad.
#[derive(Clone, Debug, PartialEq)]
pub struct StatusEvent {
    pub scan_index: Option<usize>,
    pub message: String,
    pub severity: Severity,
}

impl StatusEvent {
    pub fn info(scan_index: Option<usize>, message: impl Into<String>) -> Self {
        Self {
            scan_index,
            message: message.into(),
            severity: Severity::Info,
        }
    }

    pub fn warning(scan_index: Option<usize>, message: impl Into<String>) -> Self {
        Self {
            scan_index,
            message: message.into(),
            severity: Severity::Warning,
        }
    }

    pub fn error(scan_index: Option<usize>, message: impl Into<String>) -> Self {
        Self {
            scan_index,
            message: message.into(),
            severity: Severity::Error,
        }
    }
}

/// Fan-out of status events to any number of subscribers.
///
/// Subscribers that dropped their receiver are pruned on the next emit.
#[derive(Default)]
pub(crate) struct StatusBus {
    subscribers: Mutex<Vec<Sender<StatusEvent>>>,
}

impl StatusBus {
    pub(crate) fn subscribe(&self) -> Receiver<StatusEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub(crate) fn emit(&self, event: StatusEvent) {
        match event.severity {
            Severity::Info => log::info!("{}", event.message),
            Severity::Warning => log::warn!("{}", event.message),
            Severity::Error => log::error!("{}", event.message),
        }
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}
