//! Service assembly
//!
//! Builds every component once from a validated [`Config`] and hands out
//! shared references. An invalid configuration stops here, before any
//! socket is opened.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::client::RequestClient;
use crate::config::{Config, QueueBackend};
use crate::connectivity::{ConnectionState, ConnectivityMonitor};
use crate::notify::{Notice, Notifier};
use crate::observer::Subscription;
use crate::probe::{probe_once, probe_target, spawn_reachability_probe};
use crate::queue::OfflineQueue;
use crate::rate_limiter::RateLimiter;
use crate::realtime::{RealtimeChannel, WebSocketConnector};
use crate::storage::{FileStore, KeyValueStore, MemoryStore, SqliteStore};
use crate::sync::SyncManager;

/// The assembled networking layer
pub struct Services {
    pub config: Config,
    pub monitor: Arc<ConnectivityMonitor>,
    pub limiter: Arc<RateLimiter>,
    pub client: Arc<RequestClient>,
    pub queue: Arc<OfflineQueue>,
    pub sync: Arc<SyncManager<RequestClient>>,
    pub channel: Arc<RealtimeChannel>,
    probe_target: Option<String>,
    probe: Option<JoinHandle<()>>,
    auto_sync: Option<Subscription>,
}

impl Services {
    /// Build every component without touching the network
    ///
    /// Connectivity starts out offline until [`Services::probe_now`] runs.
    pub fn build(config: Config, notifier: Arc<dyn Notifier>) -> Result<Self> {
        config.validate().context("Invalid configuration")?;
        let base_url = config.base_url()?;

        let monitor = Arc::new(ConnectivityMonitor::new(ConnectionState::Offline));
        let limiter = Arc::new(RateLimiter::new(config.bucket_limits()));
        let client = Arc::new(RequestClient::from_config(
            &config,
            Arc::clone(&limiter),
            Arc::clone(&notifier),
        )?);

        let store = open_store(&config, notifier.as_ref());
        let queue = Arc::new(OfflineQueue::open_with(
            store,
            config.queue_limits(),
            Arc::new(crate::clock::SystemClock),
            Arc::clone(&notifier),
        ));

        let sync = Arc::new(
            SyncManager::new(
                Arc::clone(&queue),
                Arc::clone(&monitor),
                Arc::clone(&client),
                notifier,
            )
            .with_retry(config.retry_policy())
            .with_max_consecutive_failures(config.max_consecutive_failures),
        );

        let channel = Arc::new(RealtimeChannel::new(
            config.channel_settings(),
            WebSocketConnector,
            Arc::clone(&monitor),
        ));

        Ok(Self {
            probe_target: probe_target(&base_url),
            config,
            monitor,
            limiter,
            client,
            queue,
            sync,
            channel,
            probe: None,
            auto_sync: None,
        })
    }

    /// Probe the backend once and record the result
    pub async fn probe_now(&self) -> ConnectionState {
        let state = match self.probe_target {
            Some(ref target) => probe_once(target, self.config.request_timeout()).await,
            None => ConnectionState::Offline,
        };
        self.monitor.report(state);
        state
    }

    /// Drain on every reconnect and keep probing in the background
    ///
    /// Operations persisted before a restart are drained right away if the
    /// backend is already reachable. Must be called within a tokio runtime.
    pub fn spawn_background(&mut self) {
        if self.auto_sync.is_none() {
            self.auto_sync = Some(self.sync.watch_connectivity());

            if self.monitor.is_online() && !self.queue.is_empty() {
                info!(
                    "{} operation(s) pending from before start, draining",
                    self.queue.len()
                );
                let sync = Arc::clone(&self.sync);
                tokio::spawn(async move {
                    sync.start().await;
                });
            }
        }

        if self.probe.is_none() {
            if let Some(ref target) = self.probe_target {
                self.probe = Some(spawn_reachability_probe(
                    Arc::clone(&self.monitor),
                    target.clone(),
                    self.config.probe_interval(),
                    self.config.request_timeout(),
                ));
            }
        }
    }

    /// Open the push channel if it is enabled
    pub fn connect_realtime(&self) {
        match self.config.realtime_url() {
            Some(url) => self.channel.connect(&url),
            None => info!("No push channel URL, realtime updates disabled"),
        }
    }

    /// Stop background work and close the push channel
    pub async fn shutdown(mut self) {
        if let Some(subscription) = self.auto_sync.take() {
            subscription.unsubscribe();
        }
        if let Some(probe) = self.probe.take() {
            probe.abort();
        }
        self.channel.disconnect().await;
    }
}

/// Open the configured store, degrading to memory when it is unusable
fn open_store(config: &Config, notifier: &dyn Notifier) -> Arc<dyn KeyValueStore> {
    match config.queue_backend {
        QueueBackend::File => Arc::new(FileStore::new(config.data_dir.clone())),
        QueueBackend::Sqlite => match SqliteStore::open(&config.sqlite_path()) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                warn!("Cannot open queue database: {}", e);
                notifier.notify(Notice::QueueNotDurable {
                    reason: e.to_string(),
                });
                Arc::new(MemoryStore::new())
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::LogNotifier;
    use crate::queue::OperationKind;
    use tempfile::TempDir;

    fn config(temp: &TempDir, backend: QueueBackend) -> Config {
        Config {
            base_url: Some("http://127.0.0.1:9".to_string()),
            data_dir: temp.path().to_path_buf(),
            queue_backend: backend,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_missing_base_url_is_fatal() {
        let temp = TempDir::new().unwrap();
        let config = Config {
            base_url: None,
            ..config(&temp, QueueBackend::File)
        };

        let err = Services::build(config, Arc::new(LogNotifier))
            .err()
            .unwrap();
        assert!(format!("{:#}", err).contains("base_url is not configured"));
        assert!(std::fs::read_dir(temp.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn test_queue_survives_rebuild() {
        for backend in [QueueBackend::File, QueueBackend::Sqlite] {
            let temp = TempDir::new().unwrap();

            let services = Services::build(config(&temp, backend), Arc::new(LogNotifier)).unwrap();
            services
                .queue
                .enqueue(OperationKind::Order, serde_json::json!({"items": [1, 2]}));
            drop(services);

            let services = Services::build(config(&temp, backend), Arc::new(LogNotifier)).unwrap();
            assert_eq!(services.queue.len(), 1, "backend {:?}", backend);
            assert!(services.queue.is_durable());
        }
    }

    #[tokio::test]
    async fn test_pending_queue_drained_at_startup() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let config = Config {
            base_url: Some(server.uri()),
            ..config(&temp, QueueBackend::File)
        };

        let id = {
            let services = Services::build(config.clone(), Arc::new(LogNotifier)).unwrap();
            services
                .queue
                .enqueue(OperationKind::Order, serde_json::json!({"items": ["fries"]}))
        };

        // Restarted while the backend stays reachable: no offline to
        // online transition happens after the background tasks subscribe.
        let mut services = Services::build(config, Arc::new(LogNotifier)).unwrap();
        assert_eq!(services.queue.len(), 1);
        assert_eq!(services.probe_now().await, ConnectionState::Online);
        services.spawn_background();

        let drained = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while !services.queue.is_empty() {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            }
        })
        .await;
        assert!(drained.is_ok(), "pending order was not sent after restart");

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].headers.get("Idempotency-Key").unwrap().to_str().unwrap(),
            id
        );
        services.shutdown().await;
    }

    #[tokio::test]
    async fn test_probe_updates_monitor() {
        let temp = TempDir::new().unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = Config {
            base_url: Some(format!("http://{}", listener.local_addr().unwrap())),
            ..config(&temp, QueueBackend::File)
        };

        let services = Services::build(config, Arc::new(LogNotifier)).unwrap();
        assert!(!services.monitor.is_online());

        assert_eq!(services.probe_now().await, ConnectionState::Online);
        assert!(services.monitor.is_online());
        services.shutdown().await;
    }
}
