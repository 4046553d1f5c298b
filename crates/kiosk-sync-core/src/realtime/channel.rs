//! Self-healing push channel
//!
//! One background task owns the connection. It moves through
//! `Connecting -> Connected -> Reconnecting -> Connecting ...`, sends a ping
//! every heartbeat interval while connected, and backs off exponentially
//! between attempts. After `max_attempts` consecutive failures it stops
//! and the channel stays `Disconnected` until [`RealtimeChannel::connect`]
//! is called again.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::{future, Sink, SinkExt, Stream, StreamExt};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};

use super::message::{ChannelMessage, MessageType};
use crate::connectivity::{ConnectionState, ConnectivityMonitor};
use crate::observer::{Observers, Subscription};

/// How long `disconnect` waits for the task to close the socket
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Push channel errors
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Failed to connect: {0}")]
    Connect(String),

    #[error("WebSocket error: {0}")]
    Transport(#[from] tungstenite::Error),

    #[error("Connection closed")]
    Closed,
}

/// Outbound half of a connection, carrying text frames
pub type FrameSink = Pin<Box<dyn Sink<String, Error = ChannelError> + Send>>;

/// Inbound half of a connection, yielding text frames
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, ChannelError>> + Send>>;

/// An established connection
pub struct Connection {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Opens connections for the channel task
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, url: &str) -> impl Future<Output = Result<Connection, ChannelError>> + Send;
}

/// WebSocket transport
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<Connection, ChannelError> {
        let (ws_stream, _) = connect_async(url).await?;
        let (write, read) = ws_stream.split();

        let sink = write.with(|text: String| future::ready(Ok::<_, ChannelError>(Message::Text(text))));
        let stream = read.filter_map(|frame| {
            future::ready(match frame {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Binary(data)) => String::from_utf8(data).ok().map(Ok),
                Ok(Message::Close(_)) => Some(Err(ChannelError::Closed)),
                // Protocol-level ping/pong are answered by tungstenite
                Ok(_) => None,
                Err(e) => Some(Err(e.into())),
            })
        });

        Ok(Connection {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

/// Reconnect and heartbeat tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSettings {
    /// When false, `connect` does nothing
    pub enabled: bool,
    pub heartbeat_interval: Duration,
    /// Delay before the first reconnect
    pub base_delay: Duration,
    /// Upper bound for any reconnect delay
    pub max_delay: Duration,
    /// Consecutive failures before giving up
    pub max_attempts: u32,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            heartbeat_interval: Duration::from_secs(30),
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl ChannelSettings {
    /// `base · 2^step`, capped at `max_delay`
    pub fn reconnect_delay(&self, step: u32) -> Duration {
        let factor = 2u32.checked_pow(step).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    /// Not connected, not trying
    Disconnected,
    /// Attempting to connect, or waiting for connectivity to do so
    Connecting,
    Connected,
    /// Waiting out the backoff delay
    Reconnecting,
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelStatus::Disconnected => write!(f, "disconnected"),
            ChannelStatus::Connecting => write!(f, "connecting"),
            ChannelStatus::Connected => write!(f, "connected"),
            ChannelStatus::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// Commands sent to the channel task
#[derive(Debug)]
enum ChannelCommand {
    Send(ChannelMessage),
    Shutdown,
}

struct ChannelTask {
    commands: mpsc::Sender<ChannelCommand>,
    handle: JoinHandle<()>,
}

/// Push-update channel with reconnect, heartbeat and typed dispatch
pub struct RealtimeChannel<C: Connector = WebSocketConnector> {
    settings: ChannelSettings,
    connector: Arc<C>,
    monitor: Arc<ConnectivityMonitor>,
    handlers: Observers<ChannelMessage>,
    status: Arc<watch::Sender<ChannelStatus>>,
    attempt: Arc<AtomicU32>,
    task: Mutex<Option<ChannelTask>>,
}

impl<C: Connector> RealtimeChannel<C> {
    pub fn new(settings: ChannelSettings, connector: C, monitor: Arc<ConnectivityMonitor>) -> Self {
        let (status, _) = watch::channel(ChannelStatus::Disconnected);
        Self {
            settings,
            connector: Arc::new(connector),
            monitor,
            handlers: Observers::new(),
            status: Arc::new(status),
            attempt: Arc::new(AtomicU32::new(0)),
            task: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> ChannelSettings {
        self.settings
    }

    /// Open the channel to `url`
    ///
    /// Does nothing when the channel is disabled or `url` is empty.
    /// Otherwise any running task is replaced and the attempt counter
    /// starts again from zero. Must be called within a tokio runtime.
    pub fn connect(&self, url: &str) {
        if !self.settings.enabled {
            debug!("Push channel disabled, not connecting");
            return;
        }
        if url.trim().is_empty() {
            debug!("No push channel URL configured, not connecting");
            return;
        }

        if let Some(previous) = self.lock_task().take() {
            previous.handle.abort();
        }

        self.attempt.store(0, Ordering::SeqCst);
        self.status.send_replace(ChannelStatus::Connecting);

        let (commands, command_rx) = mpsc::channel(16);
        let ctx = TaskContext {
            url: url.to_string(),
            settings: self.settings,
            connector: Arc::clone(&self.connector),
            monitor: Arc::clone(&self.monitor),
            handlers: self.handlers.clone(),
            status: Arc::clone(&self.status),
            attempt: Arc::clone(&self.attempt),
        };
        let handle = tokio::spawn(channel_task_loop(ctx, command_rx));

        *self.lock_task() = Some(ChannelTask { commands, handle });
    }

    /// Close the connection and stop reconnecting
    pub async fn disconnect(&self) {
        let task = self.lock_task().take();

        if let Some(task) = task {
            let _ = task.commands.try_send(ChannelCommand::Shutdown);
            let mut handle = task.handle;
            if tokio::time::timeout(CLOSE_TIMEOUT, &mut handle).await.is_err() {
                warn!("Push channel did not close in time, aborting");
                handle.abort();
            }
        }

        self.status.send_replace(ChannelStatus::Disconnected);
        info!("Push channel disconnected");
    }

    /// Queue an outbound message; dropped unless a connection is up
    ///
    /// Returns false when the channel is not `Connected`.
    pub fn send(&self, message: ChannelMessage) -> bool {
        if self.status() != ChannelStatus::Connected {
            debug!("Push channel not connected, dropping outbound {}", message.kind);
            return false;
        }
        self.lock_task()
            .as_ref()
            .is_some_and(|task| task.commands.try_send(ChannelCommand::Send(message)).is_ok())
    }

    /// Register a handler for one message type
    pub fn on<F>(&self, kind: MessageType, handler: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.handlers.subscribe(move |message: &ChannelMessage| {
            if message.kind == kind {
                handler(&message.data);
            }
        })
    }

    pub fn status(&self) -> ChannelStatus {
        *self.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ChannelStatus> {
        self.status.subscribe()
    }

    /// Consecutive failed attempts since the last successful connection
    pub fn attempt(&self) -> u32 {
        self.attempt.load(Ordering::SeqCst)
    }

    fn lock_task(&self) -> MutexGuard<'_, Option<ChannelTask>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C: Connector> Drop for RealtimeChannel<C> {
    fn drop(&mut self) {
        let task = self
            .task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.handle.abort();
        }
    }
}

struct TaskContext<C> {
    url: String,
    settings: ChannelSettings,
    connector: Arc<C>,
    monitor: Arc<ConnectivityMonitor>,
    handlers: Observers<ChannelMessage>,
    status: Arc<watch::Sender<ChannelStatus>>,
    attempt: Arc<AtomicU32>,
}

impl<C> TaskContext<C> {
    fn set_status(&self, status: ChannelStatus) {
        self.status.send_replace(status);
    }

    /// Dispatch an inbound frame; returns the reply to send, if any
    fn dispatch(&self, text: &str) -> Option<ChannelMessage> {
        let message = match ChannelMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                debug!("Dropping malformed push message: {}", e);
                return None;
            }
        };

        debug!("Push message: {}", message.kind);
        self.handlers.notify(&message);

        if message.kind == MessageType::Ping {
            Some(ChannelMessage::pong())
        } else {
            None
        }
    }
}

/// Why a connection ended
enum Exit {
    Shutdown,
    Lost,
}

/// Main channel task loop with reconnection
async fn channel_task_loop<C: Connector>(
    ctx: TaskContext<C>,
    mut commands: mpsc::Receiver<ChannelCommand>,
) {
    let mut connectivity = ctx.monitor.watch();

    loop {
        // Waiting for connectivity does not spend an attempt
        if !ctx.monitor.is_online() {
            debug!("Offline, push channel waiting for connectivity");
            tokio::select! {
                _ = wait_online(&mut connectivity) => {}
                _ = shutdown_requested(&mut commands) => break,
            }
        }

        ctx.set_status(ChannelStatus::Connecting);
        let connected = tokio::select! {
            result = ctx.connector.connect(&ctx.url) => result,
            _ = shutdown_requested(&mut commands) => break,
        };

        let exit = match connected {
            Ok(connection) => {
                ctx.attempt.store(0, Ordering::SeqCst);
                ctx.set_status(ChannelStatus::Connected);
                info!("Push channel connected to {}", ctx.url);
                run_connection(&ctx, connection, &mut commands).await
            }
            Err(e) => {
                warn!("Push channel connection failed: {}", e);
                Exit::Lost
            }
        };

        if let Exit::Shutdown = exit {
            break;
        }

        let failures = ctx.attempt.load(Ordering::SeqCst).saturating_add(1);
        ctx.attempt.store(failures, Ordering::SeqCst);
        if failures >= ctx.settings.max_attempts {
            warn!(
                "Push channel giving up after {} consecutive failures",
                failures
            );
            break;
        }

        let delay = ctx.settings.reconnect_delay(failures - 1);
        ctx.set_status(ChannelStatus::Reconnecting);
        info!(
            "Push channel reconnecting in {:?} ({}/{})",
            delay, failures, ctx.settings.max_attempts
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_requested(&mut commands) => break,
        }
    }

    ctx.set_status(ChannelStatus::Disconnected);
}

/// Pump one connection until it drops or shutdown is requested
async fn run_connection<C>(
    ctx: &TaskContext<C>,
    connection: Connection,
    commands: &mut mpsc::Receiver<ChannelCommand>,
) -> Exit {
    let Connection {
        mut sink,
        mut stream,
    } = connection;

    let period = ctx.settings.heartbeat_interval.max(Duration::from_millis(1));
    let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let outbound = tokio::select! {
            _ = heartbeat.tick() => {
                debug!("Sending heartbeat");
                ChannelMessage::ping()
            }
            cmd = commands.recv() => match cmd {
                Some(ChannelCommand::Send(message)) => message,
                Some(ChannelCommand::Shutdown) | None => {
                    sink.close().await.ok();
                    return Exit::Shutdown;
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(text)) => match ctx.dispatch(&text) {
                    Some(reply) => reply,
                    None => continue,
                },
                Some(Err(ChannelError::Closed)) | None => {
                    info!("Push channel closed by server");
                    return Exit::Lost;
                }
                Some(Err(e)) => {
                    warn!("Push channel error: {}", e);
                    return Exit::Lost;
                }
            },
        };

        if let Err(e) = sink.send(outbound.encode()).await {
            warn!("Push channel send failed: {}", e);
            return Exit::Lost;
        }
    }
}

async fn wait_online(connectivity: &mut watch::Receiver<ConnectionState>) {
    let online = connectivity
        .wait_for(|state| state.is_online())
        .await
        .is_ok();
    if !online {
        future::pending::<()>().await;
    }
}

/// Resolves on `Shutdown` or when every handle is gone
///
/// Outbound messages arriving while there is no connection are dropped.
async fn shutdown_requested(commands: &mut mpsc::Receiver<ChannelCommand>) {
    loop {
        match commands.recv().await {
            Some(ChannelCommand::Send(message)) => {
                debug!("Not connected, dropping outbound {}", message.kind);
            }
            Some(ChannelCommand::Shutdown) | None => return,
        }
    }
}
