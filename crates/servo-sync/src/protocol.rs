//! # Controller Protocol Events
//!
//! Events pushed by the controller over the channel.
//!
//! ## Event Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Controller → Panel Events                          │
//! │                                                                         │
//! │  SESSION                                                               │
//! │  ───────                                                               │
//! │  status          { connected, mock }                                   │
//! │  config          { servos: { name → {brick, channel, min_deg, ...} } } │
//! │                                                                         │
//! │  PER ACTUATOR (absolute values, optional seq)                          │
//! │  ────────────────────────────────────────────                          │
//! │  position_update { name, position_deg, ok, seq? }                      │
//! │  enable_update   { name, enabled, seq? }                               │
//! │  current_update  { total, currents: { name → mA } }                    │
//! │  positions       { name → degree }            (reply to get_positions) │
//! │                                                                         │
//! │  BATCH                                                                 │
//! │  ─────                                                                 │
//! │  enable_all_started { enabled, total }                                 │
//! │  motor_enabled      { name, enabled, progress, total }                 │
//! │  all_enabled        { enabled }                                        │
//! │  wave_started / wave_complete                                          │
//! │                                                                         │
//! │  ACKNOWLEDGEMENTS                                                      │
//! │  ────────────────                                                      │
//! │  all_zeroed, emergency_ack                                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Format
//! ```json
//! { "event": "position_update", "data": { "name": "Ellbogen", "position_deg": 45.0, "ok": true } }
//! ```
//!
//! Decoding goes through the event name first. Unknown event names are not an
//! error: [`ServerEvent::from_json`] returns `Ok(None)` so newer controllers can
//! add events without breaking older panels.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use servo_core::{ActuatorSpec, ConnectionStatus};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Event Kind
// =============================================================================

/// Event names, used for subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Config,
    Status,
    PositionUpdate,
    EnableUpdate,
    CurrentUpdate,
    MotorEnabled,
    EnableAllStarted,
    AllEnabled,
    Positions,
    WaveStarted,
    WaveComplete,
    AllZeroed,
    EmergencyAck,
}

impl EventKind {
    pub const ALL: [EventKind; 13] = [
        EventKind::Config,
        EventKind::Status,
        EventKind::PositionUpdate,
        EventKind::EnableUpdate,
        EventKind::CurrentUpdate,
        EventKind::MotorEnabled,
        EventKind::EnableAllStarted,
        EventKind::AllEnabled,
        EventKind::Positions,
        EventKind::WaveStarted,
        EventKind::WaveComplete,
        EventKind::AllZeroed,
        EventKind::EmergencyAck,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Config => "config",
            EventKind::Status => "status",
            EventKind::PositionUpdate => "position_update",
            EventKind::EnableUpdate => "enable_update",
            EventKind::CurrentUpdate => "current_update",
            EventKind::MotorEnabled => "motor_enabled",
            EventKind::EnableAllStarted => "enable_all_started",
            EventKind::AllEnabled => "all_enabled",
            EventKind::Positions => "positions",
            EventKind::WaveStarted => "wave_started",
            EventKind::WaveComplete => "wave_complete",
            EventKind::AllZeroed => "all_zeroed",
            EventKind::EmergencyAck => "emergency_ack",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Payloads
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigPayload {
    #[serde(alias = "servos")]
    pub actuators: BTreeMap<String, ActuatorSpec>,
}

fn default_ok() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub name: String,
    #[serde(default)]
    pub position_deg: f64,
    #[serde(default = "default_ok")]
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnableUpdate {
    pub name: String,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CurrentUpdate {
    #[serde(default)]
    pub total: Option<f64>,
    #[serde(default)]
    pub currents: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotorEnabled {
    pub name: String,
    pub enabled: bool,
    /// Controller-side counter. Informational; the tracker counts itself.
    #[serde(default)]
    pub progress: u32,
    #[serde(default)]
    pub total: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnableAllStarted {
    pub enabled: bool,
    pub total: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AllEnabled {
    pub enabled: bool,
}

// =============================================================================
// Server Event
// =============================================================================

/// One inbound event.
///
/// Serializes with the same `{ "event", "data" }` shape it is decoded from,
/// which lets tests and fake controllers produce real frames.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    Config(ConfigPayload),
    Status(ConnectionStatus),
    PositionUpdate(PositionUpdate),
    EnableUpdate(EnableUpdate),
    CurrentUpdate(CurrentUpdate),
    MotorEnabled(MotorEnabled),
    EnableAllStarted(EnableAllStarted),
    AllEnabled(AllEnabled),
    Positions(BTreeMap<String, f64>),
    WaveStarted,
    WaveComplete,
    AllZeroed,
    EmergencyAck,
}

#[derive(Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl ServerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ServerEvent::Config(_) => EventKind::Config,
            ServerEvent::Status(_) => EventKind::Status,
            ServerEvent::PositionUpdate(_) => EventKind::PositionUpdate,
            ServerEvent::EnableUpdate(_) => EventKind::EnableUpdate,
            ServerEvent::CurrentUpdate(_) => EventKind::CurrentUpdate,
            ServerEvent::MotorEnabled(_) => EventKind::MotorEnabled,
            ServerEvent::EnableAllStarted(_) => EventKind::EnableAllStarted,
            ServerEvent::AllEnabled(_) => EventKind::AllEnabled,
            ServerEvent::Positions(_) => EventKind::Positions,
            ServerEvent::WaveStarted => EventKind::WaveStarted,
            ServerEvent::WaveComplete => EventKind::WaveComplete,
            ServerEvent::AllZeroed => EventKind::AllZeroed,
            ServerEvent::EmergencyAck => EventKind::EmergencyAck,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.kind().as_str()
    }

    pub fn to_json(&self) -> SyncResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes one text frame. `Ok(None)` for event names this panel does
    /// not know.
    pub fn from_json(text: &str) -> SyncResult<Option<Self>> {
        let frame: RawFrame = serde_json::from_str(text)?;
        match EventKind::from_name(&frame.event) {
            Some(kind) => Self::from_parts(kind, frame.data).map(Some),
            None => Ok(None),
        }
    }

    /// Builds an event from its kind and `data` value. Acknowledgement and
    /// bracket events ignore their payload.
    pub fn from_parts(kind: EventKind, data: serde_json::Value) -> SyncResult<Self> {
        fn payload<T: DeserializeOwned>(kind: EventKind, data: serde_json::Value) -> SyncResult<T> {
            serde_json::from_value(data)
                .map_err(|e| SyncError::InvalidMessage(format!("{}: {}", kind, e)))
        }

        Ok(match kind {
            EventKind::Config => ServerEvent::Config(payload(kind, data)?),
            EventKind::Status => ServerEvent::Status(payload(kind, data)?),
            EventKind::PositionUpdate => ServerEvent::PositionUpdate(payload(kind, data)?),
            EventKind::EnableUpdate => ServerEvent::EnableUpdate(payload(kind, data)?),
            EventKind::CurrentUpdate => ServerEvent::CurrentUpdate(payload(kind, data)?),
            EventKind::MotorEnabled => ServerEvent::MotorEnabled(payload(kind, data)?),
            EventKind::EnableAllStarted => ServerEvent::EnableAllStarted(payload(kind, data)?),
            EventKind::AllEnabled => ServerEvent::AllEnabled(payload(kind, data)?),
            EventKind::Positions => ServerEvent::Positions(payload(kind, data)?),
            EventKind::WaveStarted => ServerEvent::WaveStarted,
            EventKind::WaveComplete => ServerEvent::WaveComplete,
            EventKind::AllZeroed => ServerEvent::AllZeroed,
            EventKind::EmergencyAck => ServerEvent::EmergencyAck,
        })
    }

    // =========================================================================
    // Constructors (fake controllers and tests)
    // =========================================================================

    pub fn position(name: &str, position_deg: f64) -> Self {
        ServerEvent::PositionUpdate(PositionUpdate {
            name: name.to_string(),
            position_deg,
            ok: true,
            seq: None,
            error: None,
        })
    }

    pub fn enabled(name: &str, enabled: bool) -> Self {
        ServerEvent::EnableUpdate(EnableUpdate {
            name: name.to_string(),
            enabled,
            seq: None,
        })
    }

    pub fn status(connected: bool, mock: bool) -> Self {
        ServerEvent::Status(ConnectionStatus { connected, mock })
    }

    pub fn config<I>(actuators: I) -> Self
    where
        I: IntoIterator<Item = (String, ActuatorSpec)>,
    {
        ServerEvent::Config(ConfigPayload {
            actuators: actuators.into_iter().collect(),
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_controller_config() {
        let text = r#"{"event":"config","data":{"servos":{
            "Ellbogen":{"brick":"XYZ","channel":2,"enabled":true,"position_deg":12.5,"min_deg":-90.0,"max_deg":90.0}
        }}}"#;

        let event = ServerEvent::from_json(text).unwrap().unwrap();
        let ServerEvent::Config(config) = event else {
            panic!("expected config");
        };
        let spec = &config.actuators["Ellbogen"];
        assert_eq!(spec.brick, "XYZ");
        assert_eq!(spec.position_deg, 12.5);
    }

    #[test]
    fn test_decode_position_update() {
        let text = r#"{"event":"position_update","data":{"name":"A1","ok":true,"position_deg":45.0}}"#;
        let event = ServerEvent::from_json(text).unwrap().unwrap();
        assert_eq!(event, ServerEvent::position("A1", 45.0));

        let text = r#"{"event":"position_update","data":{"name":"A1","ok":false,"position_deg":0.0,"seq":7}}"#;
        let Some(ServerEvent::PositionUpdate(update)) = ServerEvent::from_json(text).unwrap() else {
            panic!("expected position_update");
        };
        assert!(!update.ok);
        assert_eq!(update.seq, Some(7));
    }

    #[test]
    fn test_payloadless_events() {
        for (text, kind) in [
            (r#"{"event":"wave_started","data":{}}"#, EventKind::WaveStarted),
            (r#"{"event":"wave_complete"}"#, EventKind::WaveComplete),
            (r#"{"event":"all_zeroed","data":{}}"#, EventKind::AllZeroed),
            (r#"{"event":"emergency_ack","data":{"ok":true}}"#, EventKind::EmergencyAck),
        ] {
            let event = ServerEvent::from_json(text).unwrap().unwrap();
            assert_eq!(event.kind(), kind);
        }
    }

    #[test]
    fn test_positions_map() {
        let text = r#"{"event":"positions","data":{"A1":10.5,"A2":-3.0}}"#;
        let Some(ServerEvent::Positions(map)) = ServerEvent::from_json(text).unwrap() else {
            panic!("expected positions");
        };
        assert_eq!(map.len(), 2);
        assert_eq!(map["A2"], -3.0);
    }

    #[test]
    fn test_unknown_event_is_skipped() {
        let text = r#"{"event":"firmware_banner","data":{"v":"2"}}"#;
        assert!(ServerEvent::from_json(text).unwrap().is_none());
    }

    #[test]
    fn test_malformed_payload_is_invalid_message() {
        let text = r#"{"event":"enable_all_started","data":{"enabled":"yes"}}"#;
        let err = ServerEvent::from_json(text).unwrap_err();
        assert!(matches!(err, SyncError::InvalidMessage(ref m) if m.starts_with("enable_all_started")));

        assert!(matches!(
            ServerEvent::from_json("not json"),
            Err(SyncError::SerializationFailed(_))
        ));
    }

    #[test]
    fn test_encode_decode_agree() {
        let events = vec![
            ServerEvent::status(true, true),
            ServerEvent::enabled("A1", false),
            ServerEvent::MotorEnabled(MotorEnabled {
                name: "A1".into(),
                enabled: true,
                progress: 1,
                total: 14,
            }),
            ServerEvent::WaveComplete,
        ];
        for event in events {
            let text = event.to_json().unwrap();
            assert_eq!(ServerEvent::from_json(&text).unwrap(), Some(event));
        }
    }

    #[test]
    fn test_kind_names_round_trip() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_name(kind.as_str()), Some(kind));
        }
    }
}
