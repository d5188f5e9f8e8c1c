//! # servo-core: Pure State Machines for the Servo Panel
//!
//! This crate is the **heart** of the panel. It mirrors the controller's
//! actuator state, tracks cluster-wide batch operations, composes outbound
//! commands and manages named pose presets. None of it performs I/O.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Servo Panel Architecture                          │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              Operator surface (console / browser)               │   │
//! │  │      drag ──► release ──► fine-tune ──► presets ──► batch      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ intents                                │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               servo-sync (control agent + channel)              │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ servo-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   store   │  │   batch   │  │dispatcher │  │  presets  │  │   │
//! │  │   │ Actuators │  │  Tracker  │  │ Commands  │  │   Poses   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • NO LOGGING               │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Actuator records, connection status, view types
//! - [`groups`] - Display-only body-part classification
//! - [`store`] - [`ActuatorStateStore`], the single source of truth for rendering
//! - [`batch`] - [`BatchTracker`], enable/disable/motion state machine
//! - [`command`] - Outbound [`Command`] set and the [`CommandSink`] seam
//! - [`dispatcher`] - [`CommandDispatcher`], intents to commands
//! - [`presets`] - [`PresetStore`] over an injectable [`PresetBackend`]
//! - [`validation`] - Operator input parsing
//! - [`error`] - Domain error types
//!
//! Every mutating operation returns an outcome value instead of logging, so
//! callers decide how loudly to report stale or unknown updates.
//!
//! ## Example Usage
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use servo_core::{ActuatorSpec, ActuatorStateStore, CommandDispatcher, Command};
//!
//! let mut store = ActuatorStateStore::new();
//! let mut config = BTreeMap::new();
//! config.insert("A1".to_string(), ActuatorSpec::new("brick-a", 0, -90.0, 90.0, 0.0, true));
//! store.apply_config(config);
//!
//! let dispatcher = CommandDispatcher::default();
//! let mut sent: Vec<Command> = Vec::new();
//!
//! dispatcher.preview(&mut store, "A1", 45.0).unwrap();
//! assert!(sent.is_empty());
//!
//! dispatcher.commit(&mut store, "A1", &mut sent).unwrap();
//! assert_eq!(sent, vec![Command::set_position("A1", 45.0)]);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod batch;
pub mod command;
pub mod dispatcher;
pub mod error;
pub mod groups;
pub mod presets;
pub mod store;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use batch::{Affordances, BatchKind, BatchOperation, BatchTracker, ProgressOutcome};
pub use command::{Command, CommandSink};
pub use dispatcher::{BoundsPolicy, CommandDispatcher, FineTuneRequest};
pub use error::{CoreError, CoreResult, ValidationError};
pub use groups::{BodyPart, GroupTable, ServoGroup, Side};
pub use presets::{
    MemoryBackend, Pose, PresetBackend, PresetLoadReport, PresetRemoval, PresetSaved,
    PresetStore, SkipReason,
};
pub use store::{ActuatorStateStore, UpdateOutcome};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Key of the single durable record holding every preset.
///
/// Shared by all panels on a host, so concurrent writers race on it with
/// last-write-wins semantics.
pub const PRESET_RECORD_KEY: &str = "humanoid_presets";

/// Maximum length of a preset name, in characters.
pub const MAX_PRESET_NAME_LEN: usize = 64;
