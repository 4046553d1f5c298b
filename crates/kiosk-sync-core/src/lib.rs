//! Kiosk Sync Core Library
//!
//! The resilient networking layer of an unattended ordering kiosk. It keeps
//! orders and feedback flowing to the backend across flaky connectivity:
//! nothing entered offline is lost, and the backend is never flooded with
//! retries when it comes back.
//!
//! # Architecture
//!
//! - **ConnectivityMonitor**: single source of the online/offline state
//! - **RateLimiter**: per-endpoint token buckets gating every request
//! - **RequestClient**: HTTP calls with a fixed error taxonomy
//! - **OfflineQueue**: bounded, age-limited FIFO persisted across restarts
//! - **SyncManager**: drains the queue in order with bounded retries
//! - **RealtimeChannel**: push updates with heartbeat and reconnect
//!
//! Delivery of queued operations is at-least-once. Each one is sent with an
//! `Idempotency-Key` header so the backend can drop duplicates.
//!
//! # Quick Start
//!
//! ```text
//! let config = Config::load()?;
//! let mut services = Services::build(config, Arc::new(LogNotifier))?;
//! services.probe_now().await;
//! services.spawn_background();
//!
//! // Works the same online or offline
//! services.queue.enqueue(OperationKind::Order, json!({"items": [...]}));
//! ```
//!
//! # Modules
//!
//! - `services`: builds everything from a `Config` (main entry point)
//! - `connectivity`, `probe`: online/offline state and how it is detected
//! - `rate_limiter`, `client`, `retry`, `error`: outbound requests
//! - `queue`, `storage`, `sync`: offline operations and their delivery
//! - `realtime`: the push channel
//! - `config`, `notify`, `clock`, `observer`: supporting pieces

pub mod client;
pub mod clock;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod notify;
pub mod observer;
pub mod probe;
pub mod queue;
pub mod rate_limiter;
pub mod realtime;
pub mod retry;
pub mod services;
pub mod storage;
pub mod sync;

pub use client::{ApiResponse, RequestClient, RequestOptions};
pub use clock::{Clock, MockClock, SystemClock};
pub use config::{Config, ConfigError, QueueBackend};
pub use connectivity::{ConnectionState, ConnectivityMonitor};
pub use error::{ErrorKind, RateLimitInfo, RequestError, RetryHint};
pub use notify::{ChannelNotifier, LogNotifier, Notice, Notifier};
pub use observer::{Observers, Subscription};
pub use queue::{OfflineQueue, OperationKind, QueueLimits, QueuedOperation};
pub use rate_limiter::{BucketLimits, RateLimiter};
pub use realtime::{ChannelMessage, ChannelSettings, ChannelStatus, MessageType, RealtimeChannel};
pub use retry::{retry_with_backoff, RetryPolicy};
pub use services::Services;
pub use storage::{FileStore, KeyValueStore, MemoryStore, SqliteStore, StorageError};
pub use sync::{DrainReport, OperationDispatcher, StopReason, SyncManager};
