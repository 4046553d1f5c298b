//! Connectivity monitor
//!
//! Single writer of the process-wide [`ConnectionState`]. Platform signals
//! (see [`crate::probe`]) call [`ConnectivityMonitor::report`]; the sync
//! manager and realtime channel read the state or subscribe to changes.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;

use crate::observer::{Observers, Subscription};

/// Online/offline state of the kiosk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Online,
    Offline,
}

impl ConnectionState {
    pub fn is_online(self) -> bool {
        matches!(self, ConnectionState::Online)
    }

    pub fn from_online(online: bool) -> Self {
        if online {
            ConnectionState::Online
        } else {
            ConnectionState::Offline
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Online => write!(f, "online"),
            ConnectionState::Offline => write!(f, "offline"),
        }
    }
}

/// Tracks connectivity and notifies subscribers on every transition
pub struct ConnectivityMonitor {
    state: watch::Sender<ConnectionState>,
    observers: Observers<ConnectionState>,
}

impl ConnectivityMonitor {
    /// Create a monitor seeded with the platform's current state
    pub fn new(initial: ConnectionState) -> Self {
        let (state, _) = watch::channel(initial);
        Self {
            state,
            observers: Observers::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.state().is_online()
    }

    /// Subscribe to transitions
    ///
    /// Callbacks run synchronously on the reporting task, in subscription
    /// order, and only when the state actually changes.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ConnectionState) + Send + Sync + 'static,
    {
        self.observers.subscribe(callback)
    }

    /// Watch receiver for async consumers that need to await a transition
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Record a platform connectivity signal
    ///
    /// Returns `true` when the state changed. Repeating the current state
    /// has no side effect.
    pub fn report(&self, state: ConnectionState) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });

        if changed {
            info!("Connectivity changed: {}", state);
            self.observers.notify(&state);
        }

        changed
    }

    pub fn set_online(&self, online: bool) -> bool {
        self.report(ConnectionState::from_online(online))
    }
}
