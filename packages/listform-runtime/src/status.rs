//! [`StatusDisplay`] implementations.

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::traits::StatusDisplay;

/// Status surface that writes to the `tracing` log. Used by the CLI.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingStatus;

impl StatusDisplay for TracingStatus {
    fn show(&self, success: bool, message: &str) {
        if success {
            info!(target: "listform::status", "{message}");
        } else {
            warn!(target: "listform::status", "{message}");
        }
    }

    fn hide(&self) {
        info!(target: "listform::status", "status hidden");
    }

    fn alert(&self, message: &str) {
        error!(target: "listform::status", "{message}");
    }
}

/// Event recorded by [`MemoryStatus`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    Show { success: bool, message: String },
    Hide,
    Alert(String),
}

/// Status surface that records every call.
#[derive(Debug, Default)]
pub struct MemoryStatus {
    events: Mutex<Vec<StatusEvent>>,
}

impl MemoryStatus {
    #[must_use]
    pub fn events(&self) -> Vec<StatusEvent> {
        self.events.lock().clone()
    }

    /// `(success, message)` pairs of every `show` call.
    #[must_use]
    pub fn shown(&self) -> Vec<(bool, String)> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                StatusEvent::Show { success, message } => Some((*success, message.clone())),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn alerts(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                StatusEvent::Alert(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn hidden(&self) -> bool {
        self.events.lock().contains(&StatusEvent::Hide)
    }
}

impl StatusDisplay for MemoryStatus {
    fn show(&self, success: bool, message: &str) {
        self.events.lock().push(StatusEvent::Show {
            success,
            message: message.to_string(),
        });
    }

    fn hide(&self) {
        self.events.lock().push(StatusEvent::Hide);
    }

    fn alert(&self, message: &str) {
        self.events.lock().push(StatusEvent::Alert(message.to_string()));
    }
}
