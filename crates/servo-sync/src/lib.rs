//! # servo-sync: Controller Link for the Servo Panel
//!
//! Everything between the panel state in `servo-core` and the controller
//! process: the wire protocol, the channel abstraction, the WebSocket
//! transport, and the single actor that owns the state.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Control Agent Architecture                       │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                 ControlAgent (single Tokio task)                 │  │
//! │  │                                                                  │  │
//! │  │  Owns ActuatorStateStore, BatchTracker, CommandDispatcher       │  │
//! │  │  Talks to the world only through AgentHandle and SyncChannel    │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ InboundHandler │  │  SyncChannel   │  │  PresetStore<B>        │    │
//! │  │                │  │                │  │                        │    │
//! │  │ Applies events │  │ WsChannel:     │  │ Any PresetBackend      │    │
//! │  │ Emits notices  │  │  reconnect +   │  │ (SQLite in servo-db,   │    │
//! │  │ Counts oddities│  │  backoff       │  │  memory in tests)      │    │
//! │  │                │  │ MemoryChannel  │  │                        │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  OUTPUTS (to a renderer):                                              │
//! │  • watch::Receiver<PanelSnapshot>  latest state, display order         │
//! │  • broadcast::Receiver<Notice>     operator messages                   │
//! │  • PanelObserver                   push-style hook                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`agent`] - `ControlAgent`, `AgentHandle`, builder
//! - [`channel`] - `SyncChannel` trait, event router, in-memory pair
//! - [`config`] - Panel configuration (TOML + environment)
//! - [`error`] - Sync error types
//! - [`inbound`] - Event application, panel state, notices
//! - [`protocol`] - Controller event types
//! - [`transport`] - WebSocket channel with reconnection
//!
//! ## Usage
//!
//! ```rust,ignore
//! use servo_core::MemoryBackend;
//! use servo_sync::{AgentBuilder, PanelConfig, TransportConfig, WsChannel};
//!
//! let config = PanelConfig::load_or_default(None);
//! let channel = WsChannel::new(TransportConfig::from(&config));
//!
//! let handle = AgentBuilder::new(channel, MemoryBackend::new())
//!     .with_config(&config)
//!     .spawn()?;
//!
//! handle.preview("Ellbogen", 30.0).await?;
//! handle.commit("Ellbogen").await?;
//!
//! let snapshot = handle.snapshot();
//! println!("{} ({})", snapshot.status_label, snapshot.link);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod agent;
pub mod channel;
pub mod config;
pub mod error;
pub mod inbound;
pub mod protocol;
pub mod transport;

// =============================================================================
// Re-exports
// =============================================================================

pub use agent::{AgentBuilder, AgentHandle, ControlAgent, NoOpObserver, PanelObserver};
pub use channel::{
    ConnectionState, ControllerEnd, EventRouter, Inbound, MemoryChannel, SubscriptionId,
    SyncChannel,
};
pub use config::{ClientConfig, ControlSettings, ControllerSettings, PanelConfig, StorageSettings};
pub use error::{SyncError, SyncResult};
pub use inbound::{InboundHandler, InboundStats, Notice, NoticeLevel, PanelSnapshot, PanelState};
pub use protocol::{EventKind, ServerEvent};
pub use transport::{TransportConfig, WsChannel};
