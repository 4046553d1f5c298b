//! Offline queue draining
//!
//! [`SyncManager`] delivers queued operations one at a time, head first.
//! An operation leaves the queue only after the server accepted it, so
//! delivery is at-least-once: a crash between acceptance and dequeue
//! resends it on the next pass with the same idempotency key.
//!
//! A pass ends when the queue is empty, connectivity drops, an operation is
//! rejected outright, or `max_consecutive_failures` retry rounds fail in a
//! row. Failure counts live only for the duration of a pass.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::connectivity::{ConnectionState, ConnectivityMonitor};
use crate::error::RequestError;
use crate::notify::{Notice, Notifier};
use crate::observer::Subscription;
use crate::queue::{OfflineQueue, QueuedOperation};
use crate::retry::{retry_with_backoff, RetryPolicy};

/// Default number of failed retry rounds before a pass gives up
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Delivers one queued operation to the backend
pub trait OperationDispatcher: Send + Sync {
    fn dispatch(
        &self,
        op: &QueuedOperation,
    ) -> impl Future<Output = Result<(), RequestError>> + Send;
}

/// Why a drain pass ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The queue is empty
    Drained,
    /// Connectivity was lost, before or during the pass
    Offline,
    /// The head operation failed `max_consecutive_failures` times
    FailureLimit,
    /// The server rejected the head operation as invalid; it stays queued
    Rejected,
    /// Another pass was already running; this call did nothing
    AlreadyRunning,
}

/// Outcome of one call to [`SyncManager::start`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub synced: usize,
    pub remaining: usize,
    pub stop: StopReason,
}

pub struct SyncManager<D> {
    queue: Arc<OfflineQueue>,
    monitor: Arc<ConnectivityMonitor>,
    dispatcher: Arc<D>,
    notifier: Arc<dyn Notifier>,
    retry: RetryPolicy,
    max_consecutive_failures: u32,
    draining: AtomicBool,
}

impl<D: OperationDispatcher + 'static> SyncManager<D> {
    pub fn new(
        queue: Arc<OfflineQueue>,
        monitor: Arc<ConnectivityMonitor>,
        dispatcher: Arc<D>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            queue,
            monitor,
            dispatcher,
            notifier,
            retry: RetryPolicy::default(),
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            draining: AtomicBool::new(false),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_consecutive_failures(mut self, max: u32) -> Self {
        self.max_consecutive_failures = max.max(1);
        self
    }

    pub fn queue(&self) -> &OfflineQueue {
        &self.queue
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Run one drain pass
    ///
    /// Returns at once with [`StopReason::AlreadyRunning`] if a pass is in
    /// progress.
    pub async fn start(&self) -> DrainReport {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Drain already in progress");
            return DrainReport {
                synced: 0,
                remaining: self.queue.len(),
                stop: StopReason::AlreadyRunning,
            };
        }

        let _guard = DrainGuard(&self.draining);
        let (report, error) = self.drain().await;

        if report.synced > 0 {
            self.notifier.notify(Notice::SyncCompleted {
                synced: report.synced,
            });
        }
        if let Some(error) = error {
            self.notifier.notify(Notice::SyncHalted {
                remaining: report.remaining,
                error,
            });
        }

        report
    }

    /// Drain automatically whenever connectivity comes back
    ///
    /// Each online transition with a non-empty queue spawns a pass on the
    /// current tokio runtime.
    pub fn watch_connectivity(self: &Arc<Self>) -> Subscription {
        let manager = Arc::downgrade(self);
        self.monitor.subscribe(move |state| {
            if !state.is_online() {
                return;
            }
            let Some(manager) = manager.upgrade() else {
                return;
            };
            if manager.queue.is_empty() {
                return;
            }

            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    debug!("Back online with {} queued, draining", manager.queue.len());
                    handle.spawn(async move {
                        manager.start().await;
                    });
                }
                Err(_) => warn!("Back online outside a runtime, queue not drained"),
            }
        })
    }

    async fn drain(&self) -> (DrainReport, Option<RequestError>) {
        let mut connectivity = self.monitor.watch();
        let mut synced = 0;
        let mut failures = 0;
        let mut last_error = None;

        if !self.queue.is_empty() {
            info!("Draining {} queued operation(s)", self.queue.len());
        }

        let stop = loop {
            if !self.monitor.is_online() {
                break StopReason::Offline;
            }
            let Some(op) = self.queue.peek() else {
                break StopReason::Drained;
            };

            let outcome = tokio::select! {
                result = self.deliver(&op) => Some(result),
                _ = wait_offline(&mut connectivity) => None,
            };

            match outcome {
                None => break StopReason::Offline,
                Some(Ok(())) => {
                    self.queue.dequeue(&op.id);
                    synced += 1;
                    failures = 0;
                }
                Some(Err(err)) if !err.is_retryable() => {
                    warn!("{} {} rejected: {}", op.kind, op.id, err);
                    last_error = Some(err);
                    break StopReason::Rejected;
                }
                Some(Err(err)) => {
                    failures += 1;
                    warn!(
                        "{} {} failed ({}/{}): {}",
                        op.kind, op.id, failures, self.max_consecutive_failures, err
                    );
                    last_error = Some(err);
                    if failures >= self.max_consecutive_failures {
                        break StopReason::FailureLimit;
                    }
                }
            }
        };

        let remaining = self.queue.len();
        let error = match stop {
            StopReason::FailureLimit | StopReason::Rejected => last_error,
            _ => None,
        };

        match stop {
            StopReason::Drained => info!("Drain finished: {} synced", synced),
            StopReason::Offline => info!(
                "Drain paused offline: {} synced, {} remaining",
                synced, remaining
            ),
            _ => warn!(
                "Drain halted ({:?}): {} synced, {} remaining",
                stop, synced, remaining
            ),
        }

        (
            DrainReport {
                synced,
                remaining,
                stop,
            },
            error,
        )
    }

    async fn deliver(&self, op: &QueuedOperation) -> Result<(), RequestError> {
        let dispatcher = self.dispatcher.as_ref();
        retry_with_backoff(&self.retry, move |attempt| {
            debug!("Sending {} {} (attempt {})", op.kind, op.id, attempt);
            dispatcher.dispatch(op)
        })
        .await
    }
}

struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

async fn wait_offline(connectivity: &mut watch::Receiver<ConnectionState>) {
    let offline = connectivity
        .wait_for(|state| !state.is_online())
        .await
        .is_ok();
    if !offline {
        // Monitor dropped; nothing will ever report offline
        std::future::pending::<()>().await;
    }
}
