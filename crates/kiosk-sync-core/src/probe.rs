//! Reachability probe
//!
//! The kiosk has no OS connectivity events to subscribe to, so
//! connectivity is inferred by opening a TCP connection to the backend
//! host. The probe only ever reports to the [`ConnectivityMonitor`]; it
//! never decides anything itself.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::connectivity::{ConnectionState, ConnectivityMonitor};

/// `host:port` to probe for a backend URL
pub fn probe_target(base_url: &Url) -> Option<String> {
    let host = base_url.host_str()?;
    let port = base_url.port_or_known_default()?;
    Some(format!("{}:{}", host, port))
}

/// Try one TCP connection to `target`
pub async fn probe_once(target: &str, timeout: Duration) -> ConnectionState {
    match tokio::time::timeout(timeout, TcpStream::connect(target)).await {
        Ok(Ok(_)) => ConnectionState::Online,
        Ok(Err(e)) => {
            debug!("Probe of {} failed: {}", target, e);
            ConnectionState::Offline
        }
        Err(_) => {
            debug!("Probe of {} timed out after {:?}", target, timeout);
            ConnectionState::Offline
        }
    }
}

/// Probe `target` every `interval` and report the result to `monitor`
///
/// The monitor ignores repeats, so subscribers only hear transitions.
pub fn spawn_reachability_probe(
    monitor: Arc<ConnectivityMonitor>,
    target: String,
    interval: Duration,
    timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let state = probe_once(&target, timeout).await;
            monitor.report(state);
        }
    })
}
