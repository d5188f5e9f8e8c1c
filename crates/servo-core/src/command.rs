//! # Outbound Commands
//!
//! Everything the panel can ask of the controller. Commands are
//! fire-and-forget: the effect comes back later as an ordinary inbound
//! update, never as a reply to the send.
//!
//! ## Wire Shape
//! ```json
//! { "event": "set_position", "data": { "name": "Ellbogen", "degree": 45.0 } }
//! { "event": "zero_all" }
//! ```

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum Command {
    SetPosition { name: String, degree: f64 },
    SetEnable { name: String, enable: bool },
    EmergencyStop,
    EnableAll { enable: bool },
    ZeroAll,
    WaveMotion,
    GetPositions,
}

impl Command {
    pub fn set_position(name: impl Into<String>, degree: f64) -> Self {
        Command::SetPosition {
            name: name.into(),
            degree,
        }
    }

    pub fn set_enable(name: impl Into<String>, enable: bool) -> Self {
        Command::SetEnable {
            name: name.into(),
            enable,
        }
    }

    /// Returns the event name used on the wire.
    pub fn event_name(&self) -> &'static str {
        match self {
            Command::SetPosition { .. } => "set_position",
            Command::SetEnable { .. } => "set_enable",
            Command::EmergencyStop => "emergency_stop",
            Command::EnableAll { .. } => "enable_all",
            Command::ZeroAll => "zero_all",
            Command::WaveMotion => "wave_motion",
            Command::GetPositions => "get_positions",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Where dispatched commands go.
///
/// The sync layer implements this over the live channel. Tests collect into
/// a `Vec<Command>`.
pub trait CommandSink {
    fn emit(&mut self, command: Command);
}

impl CommandSink for Vec<Command> {
    fn emit(&mut self, command: Command) {
        self.push(command);
    }
}
