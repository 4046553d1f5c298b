//! User-visible notifications
//!
//! The layer never renders anything itself; it hands [`Notice`]s to a
//! [`Notifier`] supplied by the UI. [`LogNotifier`] is the fallback when no
//! UI is attached.

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::RequestError;

/// Something the kiosk operator or customer should be told about
#[derive(Debug, Clone)]
pub enum Notice {
    /// A foreground request failed after classification
    RequestFailed { endpoint: String, error: RequestError },
    /// A drain pass delivered queued operations
    SyncCompleted { synced: usize },
    /// A drain pass stopped with operations still queued
    SyncHalted { remaining: usize, error: RequestError },
    /// The offline queue could not be persisted; it will not survive a restart
    QueueNotDurable { reason: String },
}

/// Receiver of notices
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Writes notices to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: Notice) {
        match notice {
            Notice::RequestFailed { endpoint, error } => {
                warn!("Request to {} failed: {}", endpoint, error)
            }
            Notice::SyncCompleted { synced } => info!("Synced {} queued operation(s)", synced),
            Notice::SyncHalted { remaining, error } => {
                warn!("Sync halted with {} operation(s) queued: {}", remaining, error)
            }
            Notice::QueueNotDurable { reason } => {
                warn!("Offline queue is memory-only: {}", reason)
            }
        }
    }
}

/// Forwards notices to an async consumer
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Notice>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notice: Notice) {
        // Receiver gone means nobody is listening; nothing to do
        let _ = self.tx.send(notice);
    }
}
