//! Progress notification channel
//!
//! A push channel of plain strings: one notification per orchestrator state
//! transition and per agent unit completion. Display-only, no control
//! semantics.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Engine-side sender half
#[derive(Clone)]
pub struct ProgressSender {
    tx: mpsc::UnboundedSender<String>,
}

impl ProgressSender {
    /// Push one notification; receivers that went away are ignored
    pub fn notify(&self, message: impl Into<String>) {
        let _ = self.tx.send(message.into());
    }
}

/// Client-side channel for receiving progress notifications
#[derive(Clone)]
pub struct ProgressChannel {
    rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
}

impl ProgressChannel {
    /// Create a new channel pair
    ///
    /// Returns the client channel and the engine-side sender
    pub fn new() -> (Self, ProgressSender) {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Self {
            rx: Arc::new(Mutex::new(rx)),
        };
        (channel, ProgressSender { tx })
    }

    /// Try to receive a notification (non-blocking)
    pub fn try_recv(&self) -> Option<String> {
        self.rx.lock().try_recv().ok()
    }

    /// Receive a notification, waiting until one arrives
    pub async fn recv(&self) -> Option<String> {
        // The mutex is held across the await; with one consumer per channel
        // clone this is the intended single-reader behavior
        let mut guard = self.rx.lock();
        guard.recv().await
    }

    /// Drain every notification queued so far
    pub fn drain(&self) -> Vec<String> {
        let mut guard = self.rx.lock();
        let mut out = Vec::new();
        while let Ok(message) = guard.try_recv() {
            out.push(message);
        }
        out
    }
}
