//! Durable offline operation queue
//!
//! Orders and feedback submitted while the kiosk cannot reach the backend
//! are appended here and drained by [`crate::sync::SyncManager`]. The whole
//! queue is written to the store as one JSON array after every mutation;
//! that snapshot is the single source of truth across restarts.
//!
//! Bounds:
//! - at most `max_size` entries, the oldest evicted first
//! - entries older than `max_age` are pruned when the queue is opened

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::notify::{LogNotifier, Notice, Notifier};
use crate::storage::{KeyValueStore, StorageError};

/// Store key holding the queue snapshot
pub const QUEUE_KEY: &str = "offline_queue";

/// Type of a queued operation, which decides where it is delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Order,
    Feedback,
}

impl OperationKind {
    /// Endpoint the operation is posted to
    pub fn endpoint(self) -> &'static str {
        match self {
            OperationKind::Order => "/orders",
            OperationKind::Feedback => "/feedback",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Order => write!(f, "order"),
            OperationKind::Feedback => write!(f, "feedback"),
        }
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "order" => Ok(OperationKind::Order),
            "feedback" => Ok(OperationKind::Feedback),
            other => Err(format!(
                "unknown operation kind '{}' (expected order or feedback)",
                other
            )),
        }
    }
}

/// One pending operation
///
/// `payload` is opaque to this layer; it is sent as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedOperation {
    pub id: String,
    pub kind: OperationKind,
    pub payload: Value,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub enqueued_at: DateTime<Utc>,
}

/// Size and age bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueLimits {
    pub max_size: usize,
    pub max_age: Duration,
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self {
            max_size: 50,
            max_age: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

struct QueueState {
    ops: VecDeque<QueuedOperation>,
    durable: bool,
}

/// Bounded, age-limited FIFO queue persisted through a [`KeyValueStore`]
///
/// Persistence failures never fail an operation: the queue keeps working
/// in memory, [`OfflineQueue::is_durable`] turns false and a
/// [`Notice::QueueNotDurable`] is sent once per failure streak.
pub struct OfflineQueue {
    store: Arc<dyn KeyValueStore>,
    limits: QueueLimits,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    state: Mutex<QueueState>,
}

impl OfflineQueue {
    /// Open the queue with the system clock and log notifications
    pub fn open(store: Arc<dyn KeyValueStore>, limits: QueueLimits) -> Self {
        Self::open_with(store, limits, Arc::new(SystemClock), Arc::new(LogNotifier))
    }

    /// Open the queue: load the snapshot, prune expired entries, re-persist
    pub fn open_with(
        store: Arc<dyn KeyValueStore>,
        limits: QueueLimits,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let ops = match load_snapshot(store.as_ref()) {
            Ok(ops) => ops,
            Err(e) => {
                warn!("Starting with an empty offline queue: {}", e);
                if let Some(hint) = e.recovery_suggestion() {
                    warn!("{}", hint);
                }
                VecDeque::new()
            }
        };

        let queue = Self {
            store,
            limits,
            clock,
            notifier,
            state: Mutex::new(QueueState { ops, durable: true }),
        };

        {
            let mut state = queue.lock();
            let loaded = state.ops.len();
            queue.prune_locked(&mut state);
            queue.evict_locked(&mut state);
            info!(
                "Offline queue opened: {} loaded, {} kept",
                loaded,
                state.ops.len()
            );
            queue.persist_locked(&mut state);
        }

        queue
    }

    /// Append an operation and persist; returns the new operation id
    pub fn enqueue(&self, kind: OperationKind, payload: Value) -> String {
        let op = QueuedOperation {
            id: Uuid::new_v4().to_string(),
            kind,
            payload,
            enqueued_at: self.clock.utc_now(),
        };
        let id = op.id.clone();

        let mut state = self.lock();
        state.ops.push_back(op);
        debug!("Enqueued {} {} ({} pending)", kind, id, state.ops.len());
        self.evict_locked(&mut state);
        self.persist_locked(&mut state);

        id
    }

    /// Remove the operation with `id`; returns whether it was present
    pub fn dequeue(&self, id: &str) -> bool {
        let mut state = self.lock();
        let Some(position) = state.ops.iter().position(|op| op.id == id) else {
            return false;
        };
        state.ops.remove(position);
        debug!("Dequeued {} ({} pending)", id, state.ops.len());
        self.persist_locked(&mut state);
        true
    }

    /// Head of the queue, without removing it
    pub fn peek(&self) -> Option<QueuedOperation> {
        self.lock().ops.front().cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().ops.is_empty()
    }

    /// Copy of every pending operation, head first
    pub fn snapshot(&self) -> Vec<QueuedOperation> {
        self.lock().ops.iter().cloned().collect()
    }

    /// Whether the last write reached the store
    pub fn is_durable(&self) -> bool {
        self.lock().durable
    }

    /// Drop entries older than the age limit; returns how many were removed
    pub fn prune_expired(&self) -> usize {
        let mut state = self.lock();
        let removed = self.prune_locked(&mut state);
        if removed > 0 {
            self.persist_locked(&mut state);
        }
        removed
    }

    pub fn limits(&self) -> QueueLimits {
        self.limits
    }

    fn prune_locked(&self, state: &mut QueueState) -> usize {
        let now = self.clock.utc_now();
        let max_age = chrono::Duration::from_std(self.limits.max_age)
            .unwrap_or(chrono::Duration::MAX);
        let before = state.ops.len();

        state.ops.retain(|op| now - op.enqueued_at <= max_age);

        let removed = before - state.ops.len();
        if removed > 0 {
            info!("Pruned {} expired operation(s) from offline queue", removed);
        }
        removed
    }

    fn evict_locked(&self, state: &mut QueueState) {
        while state.ops.len() > self.limits.max_size {
            if let Some(evicted) = state.ops.pop_front() {
                warn!(
                    "Offline queue full ({}), evicted oldest {} {}",
                    self.limits.max_size, evicted.kind, evicted.id
                );
            }
        }
    }

    /// Write the full snapshot; the caller holds the lock so writes land
    /// in mutation order
    fn persist_locked(&self, state: &mut QueueState) {
        let result = serde_json::to_string(&state.ops)
            .map_err(StorageError::from)
            .and_then(|json| self.store.set(QUEUE_KEY, &json));

        match result {
            Ok(()) => {
                if !state.durable {
                    info!("Offline queue persistence recovered");
                }
                state.durable = true;
            }
            Err(e) => {
                warn!("Failed to persist offline queue: {}", e);
                if state.durable {
                    self.notifier.notify(Notice::QueueNotDurable {
                        reason: not_durable_reason(&e),
                    });
                }
                state.durable = false;
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Operator-facing wording for a failed snapshot write
fn not_durable_reason(error: &StorageError) -> String {
    match error.recovery_suggestion() {
        Some(suggestion) if error.is_recoverable() => {
            format!(
                "{} {} Pending operations are kept in memory until then.",
                error, suggestion
            )
        }
        _ => format!("{} Pending operations will not survive a restart.", error),
    }
}

fn load_snapshot(store: &dyn KeyValueStore) -> Result<VecDeque<QueuedOperation>, StorageError> {
    let Some(json) = store.get(QUEUE_KEY)? else {
        return Ok(VecDeque::new());
    };

    serde_json::from_str(&json).map_err(|e| StorageError::Corrupt {
        key: QUEUE_KEY.to_string(),
        details: e.to_string(),
    })
}
