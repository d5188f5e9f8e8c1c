//! # WebSocket Transport
//!
//! [`SyncChannel`] over a WebSocket, with automatic reconnection and backoff.
//!
//! ## Connection Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    WebSocket Connection States                          │
//! │                                                                         │
//! │  ┌────────────┐    connect()    ┌────────────┐                         │
//! │  │Disconnected│ ──────────────► │ Connecting │ ◄──────────────┐        │
//! │  └────────────┘                 └─────┬──────┘                │        │
//! │                                       │                       │        │
//! │                             success   │   failure             │        │
//! │                         ┌─────────────┴─────┐                 │        │
//! │                         ▼                   ▼                 │        │
//! │                  ┌────────────┐    ┌─────────────────┐  timer │        │
//! │                  │ Connected  │───►│ Reconnecting{n} │────────┘        │
//! │                  └────────────┘    └────────┬────────┘                 │
//! │                   link lost:                │ n > max_retries, or a    │
//! │                   queued commands           │ non-retryable error      │
//! │                   are discarded             ▼                          │
//! │                                      ┌────────────┐                    │
//! │                                      │   Failed   │                    │
//! │                                      └────────────┘                    │
//! │                                                                         │
//! │  BACKOFF STRATEGY (Exponential with Jitter)                            │
//! │  ───────────────────────────────────────────                           │
//! │  Attempt 1: 500ms                                                       │
//! │  Attempt 2: 1s                                                          │
//! │  Attempt 3: 2s                                                          │
//! │  ...                                                                    │
//! │  Max: 30s                                                               │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Commands are never replayed after a reconnect. Anything still queued
//! when the link drops is counted, logged and discarded, and `send` refuses
//! new commands until the link is back.

use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use futures_util::{SinkExt, StreamExt};
use servo_core::Command;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::channel::{ConnectionState, Inbound, SyncChannel, CHANNEL_BUFFER};
use crate::config::PanelConfig;
use crate::error::{SyncError, SyncResult};
use crate::protocol::ServerEvent;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Transport Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// WebSocket URL of the controller.
    pub url: String,

    pub connect_timeout: Duration,

    pub initial_backoff: Duration,

    pub max_backoff: Duration,

    /// Maximum reconnection attempts (0 = infinite).
    pub max_retries: u32,

    /// Ping interval for keepalive.
    pub ping_interval: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            url: String::new(),
            connect_timeout: Duration::from_secs(10),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            max_retries: 0, // Infinite
            ping_interval: Duration::from_secs(30),
        }
    }
}

impl From<&PanelConfig> for TransportConfig {
    fn from(config: &PanelConfig) -> Self {
        let controller = &config.controller;
        TransportConfig {
            url: controller.url.clone(),
            connect_timeout: Duration::from_secs(controller.connect_timeout_secs),
            initial_backoff: Duration::from_millis(controller.initial_backoff_ms),
            max_backoff: Duration::from_secs(controller.max_backoff_secs),
            max_retries: controller.max_retries,
            ping_interval: Duration::from_secs(controller.ping_interval_secs),
        }
    }
}

// =============================================================================
// WebSocket Channel
// =============================================================================

/// Panel side of the controller link.
///
/// ## Usage
/// ```rust,ignore
/// let mut channel = WsChannel::new(TransportConfig {
///     url: "ws://robot.local:5000/ws".into(),
///     ..Default::default()
/// });
///
/// let mut inbound = channel.connect()?;
/// channel.send(Command::GetPositions)?;
///
/// while let Some(item) = inbound.recv().await {
///     println!("{:?}", item);
/// }
/// ```
pub struct WsChannel {
    config: TransportConfig,
    outgoing_tx: mpsc::Sender<Command>,
    outgoing_rx: Option<mpsc::Receiver<Command>>,
    state: Arc<watch::Sender<ConnectionState>>,
    shutdown_tx: mpsc::Sender<()>,
    shutdown_rx: Option<mpsc::Receiver<()>>,
}

impl WsChannel {
    pub fn new(config: TransportConfig) -> Self {
        let (outgoing_tx, outgoing_rx) = mpsc::channel(CHANNEL_BUFFER);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        WsChannel {
            config,
            outgoing_tx,
            outgoing_rx: Some(outgoing_rx),
            state: Arc::new(state),
            shutdown_tx,
            shutdown_rx: Some(shutdown_rx),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Watches link transitions without consuming the inbound stream.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }
}

impl SyncChannel for WsChannel {
    /// Spawns the background task. Must be called inside a Tokio runtime.
    fn connect(&mut self) -> SyncResult<mpsc::Receiver<Inbound>> {
        url::Url::parse(&self.config.url)?;

        let (outgoing_rx, shutdown_rx) = match (self.outgoing_rx.take(), self.shutdown_rx.take()) {
            (Some(outgoing), Some(shutdown)) => (outgoing, shutdown),
            _ => return Err(SyncError::AlreadyConnected),
        };
        let (incoming_tx, incoming_rx) = mpsc::channel(CHANNEL_BUFFER);

        let transport = Transport {
            config: self.config.clone(),
            state: self.state.clone(),
            outgoing_rx,
            incoming_tx,
            shutdown_rx,
        };
        tokio::spawn(transport.run());

        Ok(incoming_rx)
    }

    fn send(&self, command: Command) -> SyncResult<()> {
        if !self.state().is_connected() {
            debug!(command = command.event_name(), "Link down, command dropped");
            return Err(SyncError::Disconnected);
        }
        self.outgoing_tx.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SyncError::ChannelError("outgoing queue full".into()),
            mpsc::error::TrySendError::Closed(_) => SyncError::ShuttingDown,
        })
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn shutdown(&self) {
        let _ = self.shutdown_tx.try_send(());
    }
}

// =============================================================================
// Background Task
// =============================================================================

/// Why a connection loop ended.
enum LoopExit {
    /// Remote closed or the socket failed. Reconnect.
    Lost,
    /// Shutdown requested or the panel stopped listening.
    Stop,
}

struct Transport {
    config: TransportConfig,
    state: Arc<watch::Sender<ConnectionState>>,
    outgoing_rx: mpsc::Receiver<Command>,
    incoming_tx: mpsc::Sender<Inbound>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl Transport {
    async fn run(mut self) {
        info!(url = %self.config.url, "Transport starting");

        let mut backoff = self.create_backoff();
        let mut attempt = 0u32;

        loop {
            if self.shutdown_rx.try_recv().is_ok() {
                info!("Transport received shutdown signal");
                break;
            }

            if !self.set_state(ConnectionState::Connecting).await {
                break;
            }

            match self.connect_with_timeout().await {
                Ok(ws_stream) => {
                    info!("WebSocket connected");
                    backoff.reset();
                    attempt = 0;

                    if !self.set_state(ConnectionState::Connected).await {
                        break;
                    }

                    let exit = match self.connection_loop(ws_stream).await {
                        Ok(exit) => exit,
                        Err(e) => {
                            warn!(?e, "Connection loop ended");
                            LoopExit::Lost
                        }
                    };

                    self.discard_queued();
                    if let LoopExit::Stop = exit {
                        break;
                    }
                }
                Err(e) if !e.is_retryable() => {
                    error!(error = %e, config = e.is_config_error(), "Connection refused, not retrying");
                    self.set_state(ConnectionState::Failed).await;
                    info!("Transport stopped");
                    return;
                }
                Err(e) => {
                    error!(?e, "Failed to connect");
                }
            }

            attempt += 1;
            if self.config.max_retries > 0 && attempt > self.config.max_retries {
                error!(
                    max_retries = self.config.max_retries,
                    "Max reconnection attempts reached"
                );
                self.set_state(ConnectionState::Failed).await;
                info!("Transport stopped");
                return;
            }

            if !self.set_state(ConnectionState::Reconnecting { attempt }).await {
                break;
            }

            match backoff.next_backoff() {
                Some(duration) => {
                    debug!(?duration, attempt, "Waiting before reconnect");
                    tokio::select! {
                        _ = tokio::time::sleep(duration) => {}
                        _ = self.shutdown_rx.recv() => {
                            info!("Shutdown during backoff");
                            break;
                        }
                    }
                }
                None => {
                    error!("Backoff exhausted");
                    self.set_state(ConnectionState::Failed).await;
                    return;
                }
            }
        }

        self.set_state(ConnectionState::Disconnected).await;
        info!("Transport stopped");
    }

    /// Publishes a link transition. Returns false once nobody is listening.
    async fn set_state(&self, next: ConnectionState) -> bool {
        self.state.send_replace(next);
        self.incoming_tx.send(Inbound::Link(next)).await.is_ok()
    }

    /// Drops everything still queued for the old connection.
    fn discard_queued(&mut self) {
        let mut dropped = 0usize;
        while self.outgoing_rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            warn!(dropped, "Discarded commands queued across disconnect");
        }
    }

    async fn connect_with_timeout(&self) -> SyncResult<WsStream> {
        let connect_future = connect_async(self.config.url.as_str());

        match timeout(self.config.connect_timeout, connect_future).await {
            Ok(Ok((ws_stream, response))) => {
                debug!(status = ?response.status(), "WebSocket handshake complete");
                Ok(ws_stream)
            }
            Ok(Err(e)) => Err(SyncError::from(e)),
            Err(_) => Err(SyncError::Timeout(self.config.connect_timeout.as_secs())),
        }
    }

    async fn connection_loop(&mut self, ws_stream: WsStream) -> SyncResult<LoopExit> {
        let (mut write, mut read) = ws_stream.split();

        let mut ping_interval = tokio::time::interval(self.config.ping_interval);
        ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately.
        ping_interval.tick().await;

        loop {
            tokio::select! {
                Some(command) = self.outgoing_rx.recv() => {
                    let json = command.to_json()?;
                    debug!(command = command.event_name(), "Sending command");
                    write.send(WsMessage::Text(json.into())).await?;
                }

                frame = read.next() => {
                    let Some(result) = frame else {
                        info!("WebSocket stream ended");
                        self.state.send_replace(ConnectionState::Disconnected);
                        return Ok(LoopExit::Lost);
                    };
                    match result {
                        Ok(WsMessage::Text(text)) => {
                            match ServerEvent::from_json(text.as_str()) {
                                Ok(Some(event)) => {
                                    debug!(event = event.type_name(), "Received event");
                                    if self.incoming_tx.send(Inbound::Event(event)).await.is_err() {
                                        warn!("Inbound receiver dropped");
                                        return Ok(LoopExit::Stop);
                                    }
                                }
                                Ok(None) => {
                                    debug!("Ignoring unknown event");
                                }
                                Err(e) => {
                                    warn!(?e, "Failed to parse event");
                                }
                            }
                        }
                        Ok(WsMessage::Ping(data)) => {
                            write.send(WsMessage::Pong(data)).await?;
                        }
                        Ok(WsMessage::Pong(_)) => {
                            debug!("Received pong");
                        }
                        Ok(WsMessage::Close(frame)) => {
                            info!(?frame, "Received close frame");
                            self.state.send_replace(ConnectionState::Disconnected);
                            return Ok(LoopExit::Lost);
                        }
                        Ok(WsMessage::Binary(_)) => {
                            warn!("Received unexpected binary message");
                        }
                        Ok(WsMessage::Frame(_)) => {}
                        Err(e) => {
                            error!(?e, "WebSocket error");
                            self.state.send_replace(ConnectionState::Disconnected);
                            return Err(SyncError::from(e));
                        }
                    }
                }

                _ = ping_interval.tick() => {
                    write.send(WsMessage::Ping(Vec::new().into())).await?;
                    debug!("Sent ping");
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown signal received, closing connection");
                    let _ = write.send(WsMessage::Close(None)).await;
                    return Ok(LoopExit::Stop);
                }
            }
        }
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.config.initial_backoff,
            max_interval: self.config.max_backoff,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
