//! # Sync Channel
//!
//! The seam between the control agent and whatever carries events to and
//! from the controller.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           Channel Contract                              │
//! │                                                                         │
//! │   ControlAgent                         SyncChannel impl                 │
//! │   ────────────                         ────────────────                 │
//! │   connect()  ───────────────────────►  start link, hand back receiver   │
//! │   send(cmd)  ───────────────────────►  fire-and-forget, no ack          │
//! │                                                                         │
//! │   recv()     ◄───────────────────────  Inbound::Link(state)             │
//! │              ◄───────────────────────  Inbound::Event(ServerEvent)      │
//! │                                                                         │
//! │   One ordered stream per connection. Link transitions travel in the     │
//! │   same stream as events, so the agent sees them in arrival order.       │
//! │                                                                         │
//! │   IMPLEMENTATIONS                                                       │
//! │   • WsChannel (transport.rs)  WebSocket, reconnect with backoff         │
//! │   • MemoryChannel             in-process pair, far end plays controller │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use servo_core::Command;
use tokio::sync::{mpsc, watch};

use crate::error::{SyncError, SyncResult};
use crate::protocol::{EventKind, ServerEvent};

/// Buffer size for in-process channels.
pub const CHANNEL_BUFFER: usize = 256;

// =============================================================================
// Link State
// =============================================================================

/// Transport-level link state. Separate from the controller-reported
/// [`servo_core::ConnectionStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting out a backoff before the given attempt.
    Reconnecting { attempt: u32 },
    /// Retry limit reached; the transport has stopped.
    Failed,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Reconnecting { attempt } => write!(f, "reconnecting (attempt {})", attempt),
            ConnectionState::Failed => write!(f, "failed"),
        }
    }
}

/// One item on the inbound stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Event(ServerEvent),
    Link(ConnectionState),
}

// =============================================================================
// Channel Trait
// =============================================================================

/// Bidirectional event transport to the controller.
pub trait SyncChannel: Send + Sync + 'static {
    /// Starts the link. Returns the ordered inbound stream. Calling twice is
    /// an error.
    fn connect(&mut self) -> SyncResult<mpsc::Receiver<Inbound>>;

    /// Queues a command. Success means "accepted for sending", never
    /// "applied by the controller".
    fn send(&self, command: Command) -> SyncResult<()>;

    fn state(&self) -> ConnectionState;

    fn shutdown(&self);
}

// =============================================================================
// Event Router
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Box<dyn FnMut(&ServerEvent) + Send>;

/// Per-kind handler registry. Handlers for one kind run in registration
/// order, once per event.
#[derive(Default)]
pub struct EventRouter {
    handlers: HashMap<EventKind, Vec<(SubscriptionId, Handler)>>,
    next_id: u64,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&mut self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: FnMut(&ServerEvent) + Send + 'static,
    {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.handlers
            .entry(kind)
            .or_default()
            .push((id, Box::new(handler)));
        id
    }

    /// Returns false if the id was not registered.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        for handlers in self.handlers.values_mut() {
            if let Some(index) = handlers.iter().position(|(h, _)| *h == id) {
                handlers.remove(index);
                return true;
            }
        }
        false
    }

    /// Runs every handler registered for the event's kind. Returns how many
    /// ran.
    pub fn dispatch(&mut self, event: &ServerEvent) -> usize {
        match self.handlers.get_mut(&event.kind()) {
            Some(handlers) => {
                for (_, handler) in handlers.iter_mut() {
                    handler(event);
                }
                handlers.len()
            }
            None => 0,
        }
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }
}

impl fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRouter")
            .field("kinds", &self.handlers.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}

// =============================================================================
// In-Memory Channel
// =============================================================================

/// Panel side of an in-process channel pair.
pub struct MemoryChannel {
    commands: mpsc::Sender<Command>,
    inbound_tx: mpsc::Sender<Inbound>,
    inbound_rx: Option<mpsc::Receiver<Inbound>>,
    link: Arc<watch::Sender<ConnectionState>>,
}

/// Controller side of an in-process channel pair.
pub struct ControllerEnd {
    commands: mpsc::Receiver<Command>,
    inbound: mpsc::Sender<Inbound>,
    link: Arc<watch::Sender<ConnectionState>>,
}

impl MemoryChannel {
    pub fn pair() -> (MemoryChannel, ControllerEnd) {
        let (command_tx, command_rx) = mpsc::channel(CHANNEL_BUFFER);
        let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_BUFFER);
        let (link, _) = watch::channel(ConnectionState::Disconnected);
        let link = Arc::new(link);

        let channel = MemoryChannel {
            commands: command_tx,
            inbound_tx: inbound_tx.clone(),
            inbound_rx: Some(inbound_rx),
            link: link.clone(),
        };
        let controller = ControllerEnd {
            commands: command_rx,
            inbound: inbound_tx,
            link,
        };
        (channel, controller)
    }
}

impl SyncChannel for MemoryChannel {
    fn connect(&mut self) -> SyncResult<mpsc::Receiver<Inbound>> {
        let receiver = self.inbound_rx.take().ok_or(SyncError::AlreadyConnected)?;
        self.link.send_replace(ConnectionState::Connected);
        self.inbound_tx
            .try_send(Inbound::Link(ConnectionState::Connected))
            .map_err(|e| SyncError::ChannelError(e.to_string()))?;
        Ok(receiver)
    }

    fn send(&self, command: Command) -> SyncResult<()> {
        if !self.state().is_connected() {
            return Err(SyncError::Disconnected);
        }
        self.commands.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SyncError::ChannelError("command queue full".into()),
            mpsc::error::TrySendError::Closed(_) => SyncError::Disconnected,
        })
    }

    fn state(&self) -> ConnectionState {
        *self.link.borrow()
    }

    fn shutdown(&self) {
        self.link.send_replace(ConnectionState::Disconnected);
        let _ = self
            .inbound_tx
            .try_send(Inbound::Link(ConnectionState::Disconnected));
    }
}

impl ControllerEnd {
    /// Pushes an event to the panel.
    pub async fn emit(&self, event: ServerEvent) -> SyncResult<()> {
        self.inbound
            .send(Inbound::Event(event))
            .await
            .map_err(|_| SyncError::ChannelError("panel receiver dropped".into()))
    }

    /// Pushes a raw text frame, decoded the way a transport would. Unknown
    /// events are dropped and reported as `Ok(false)`.
    pub async fn emit_json(&self, text: &str) -> SyncResult<bool> {
        match ServerEvent::from_json(text)? {
            Some(event) => self.emit(event).await.map(|_| true),
            None => Ok(false),
        }
    }

    /// Drops the link. Commands still queued are discarded; returns how many.
    pub async fn drop_link(&mut self) -> usize {
        self.link.send_replace(ConnectionState::Disconnected);
        let dropped = self.drain_commands().len();
        let _ = self
            .inbound
            .send(Inbound::Link(ConnectionState::Disconnected))
            .await;
        dropped
    }

    pub async fn restore_link(&self) {
        self.link.send_replace(ConnectionState::Connected);
        let _ = self
            .inbound
            .send(Inbound::Link(ConnectionState::Connected))
            .await;
    }

    pub async fn next_command(&mut self) -> Option<Command> {
        self.commands.recv().await
    }

    pub fn try_next_command(&mut self) -> Option<Command> {
        self.commands.try_recv().ok()
    }

    pub fn drain_commands(&mut self) -> Vec<Command> {
        let mut drained = Vec::new();
        while let Ok(command) = self.commands.try_recv() {
            drained.push(command);
        }
        drained
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(
            ConnectionState::Reconnecting { attempt: 3 }.to_string(),
            "reconnecting (attempt 3)"
        );
        assert!(!ConnectionState::Failed.is_connected());
    }

    #[test]
    fn test_router_runs_handlers_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut router = EventRouter::new();

        let first = seen.clone();
        router.subscribe(EventKind::PositionUpdate, move |_| first.lock().unwrap().push("first"));
        let second = seen.clone();
        router.subscribe(EventKind::PositionUpdate, move |_| second.lock().unwrap().push("second"));

        assert_eq!(router.dispatch(&ServerEvent::position("A1", 1.0)), 2);
        assert_eq!(router.dispatch(&ServerEvent::WaveStarted), 0);
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_router_unsubscribe() {
        let mut router = EventRouter::new();
        let id = router.subscribe(EventKind::AllZeroed, |_| {});
        assert_eq!(router.subscriber_count(EventKind::AllZeroed), 1);

        assert!(router.unsubscribe(id));
        assert!(!router.unsubscribe(id));
        assert_eq!(router.dispatch(&ServerEvent::AllZeroed), 0);
    }

    #[tokio::test]
    async fn test_memory_channel_round_trip() {
        let (mut channel, mut controller) = MemoryChannel::pair();
        assert!(matches!(
            channel.send(Command::ZeroAll),
            Err(SyncError::Disconnected)
        ));

        let mut inbound = channel.connect().unwrap();
        assert_eq!(inbound.recv().await, Some(Inbound::Link(ConnectionState::Connected)));
        assert!(matches!(channel.connect(), Err(SyncError::AlreadyConnected)));

        channel.send(Command::set_position("A1", 10.0)).unwrap();
        assert_eq!(
            controller.next_command().await,
            Some(Command::set_position("A1", 10.0))
        );

        controller.emit(ServerEvent::position("A1", 10.0)).await.unwrap();
        assert_eq!(
            inbound.recv().await,
            Some(Inbound::Event(ServerEvent::position("A1", 10.0)))
        );
    }

    #[tokio::test]
    async fn test_drop_link_discards_queued_commands() {
        let (mut channel, mut controller) = MemoryChannel::pair();
        let mut inbound = channel.connect().unwrap();
        inbound.recv().await;

        channel.send(Command::WaveMotion).unwrap();
        channel.send(Command::ZeroAll).unwrap();
        assert_eq!(controller.drop_link().await, 2);
        assert_eq!(
            inbound.recv().await,
            Some(Inbound::Link(ConnectionState::Disconnected))
        );
        assert!(channel.send(Command::ZeroAll).is_err());

        controller.restore_link().await;
        assert_eq!(channel.state(), ConnectionState::Connected);
        assert!(controller.try_next_command().is_none());
    }

    #[tokio::test]
    async fn test_emit_json_skips_unknown_events() {
        let (mut channel, controller) = MemoryChannel::pair();
        let mut inbound = channel.connect().unwrap();
        inbound.recv().await;

        assert!(!controller.emit_json(r#"{"event":"banner","data":{}}"#).await.unwrap());
        assert!(controller.emit_json(r#"{"event":"all_zeroed","data":{}}"#).await.unwrap());
        assert_eq!(inbound.recv().await, Some(Inbound::Event(ServerEvent::AllZeroed)));
    }
}
