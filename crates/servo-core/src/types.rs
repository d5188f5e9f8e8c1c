//! # Domain Types
//!
//! Actuator records and the read-only views handed to rendering.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  ActuatorSpec   │   │    Actuator     │   │  ActuatorView   │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  wire snapshot  │──►│  store record   │──►│  render copy    │       │
//! │  │  brick/channel  │   │  displayed      │   │  pending flag   │       │
//! │  │  min/max/pos    │   │  confirmed      │   │  group badge    │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐                             │
//! │  │ ActuatorAddress │   │ConnectionStatus │                             │
//! │  │  controller     │   │  connected      │                             │
//! │  │  channel        │   │  mock           │                             │
//! │  └─────────────────┘   └─────────────────┘                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual Angle Model
//! Every actuator carries two angles:
//! - `displayed_angle`: what the operator sees, may run ahead of the controller
//! - `confirmed_angle`: the last absolute value echoed by the controller
//!
//! An inbound absolute update always overwrites both.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::groups::ServoGroup;

// =============================================================================
// Address & Bounds
// =============================================================================

/// Physical address of an actuator. Immutable for the session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ActuatorAddress {
    /// Controller (brick) identifier.
    pub controller: String,
    /// Output channel on that controller.
    pub channel: u32,
}

/// Angular bounds in degrees, inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AngleBounds {
    pub min: f64,
    pub max: f64,
}

impl AngleBounds {
    pub fn new(min: f64, max: f64) -> Self {
        // A swapped range from the controller still describes the same interval
        if min <= max {
            AngleBounds { min, max }
        } else {
            AngleBounds { min: max, max: min }
        }
    }

    #[inline]
    pub fn contains(&self, angle: f64) -> bool {
        angle >= self.min && angle <= self.max
    }

    #[inline]
    pub fn clamp(&self, angle: f64) -> f64 {
        angle.clamp(self.min, self.max)
    }
}

impl Default for AngleBounds {
    fn default() -> Self {
        AngleBounds::new(-90.0, 90.0)
    }
}

// =============================================================================
// Actuator Spec (config snapshot entry)
// =============================================================================

fn default_min_deg() -> f64 {
    -90.0
}

fn default_max_deg() -> f64 {
    90.0
}

/// One actuator as announced by the controller's `config` snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActuatorSpec {
    pub brick: String,
    pub channel: u32,
    #[serde(default = "default_min_deg")]
    pub min_deg: f64,
    #[serde(default = "default_max_deg")]
    pub max_deg: f64,
    #[serde(default)]
    pub position_deg: f64,
    #[serde(default)]
    pub enabled: bool,
}

impl ActuatorSpec {
    pub fn new(
        brick: impl Into<String>,
        channel: u32,
        min_deg: f64,
        max_deg: f64,
        position_deg: f64,
        enabled: bool,
    ) -> Self {
        Self {
            brick: brick.into(),
            channel,
            min_deg,
            max_deg,
            position_deg,
            enabled,
        }
    }
}

// =============================================================================
// Actuator
// =============================================================================

/// A single actuator as mirrored by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Actuator {
    pub name: String,
    pub address: ActuatorAddress,
    pub bounds: AngleBounds,
    pub enabled: bool,
    pub displayed_angle: f64,
    pub confirmed_angle: f64,
    /// Last current reading in mA. Informational only.
    pub current_ma: Option<f64>,
    /// Display-only classification.
    pub group: Option<ServoGroup>,
    /// Highest sequence number applied, when the controller sends them.
    pub last_seq: Option<u64>,
}

impl Actuator {
    pub fn from_spec(name: impl Into<String>, spec: ActuatorSpec) -> Self {
        Self {
            name: name.into(),
            address: ActuatorAddress {
                controller: spec.brick,
                channel: spec.channel,
            },
            bounds: AngleBounds::new(spec.min_deg, spec.max_deg),
            enabled: spec.enabled,
            displayed_angle: spec.position_deg,
            confirmed_angle: spec.position_deg,
            current_ma: None,
            group: None,
            last_seq: None,
        }
    }

    /// True while a local change is waiting for the controller's echo.
    #[inline]
    pub fn is_pending(&self) -> bool {
        self.displayed_angle != self.confirmed_angle
    }

    pub fn view(&self) -> ActuatorView {
        ActuatorView {
            name: self.name.clone(),
            controller: self.address.controller.clone(),
            channel: self.address.channel,
            min_deg: self.bounds.min,
            max_deg: self.bounds.max,
            enabled: self.enabled,
            displayed_angle: self.displayed_angle,
            confirmed_angle: self.confirmed_angle,
            current_ma: self.current_ma,
            group: self.group,
            pending: self.is_pending(),
        }
    }
}

/// Read-only copy of an actuator for rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ActuatorView {
    pub name: String,
    pub controller: String,
    pub channel: u32,
    pub min_deg: f64,
    pub max_deg: f64,
    pub enabled: bool,
    pub displayed_angle: f64,
    pub confirmed_angle: f64,
    pub current_ma: Option<f64>,
    pub group: Option<ServoGroup>,
    pub pending: bool,
}

// =============================================================================
// Connection Status
// =============================================================================

/// Controller status as last reported over the channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ConnectionStatus {
    pub connected: bool,
    /// The controller is driving a simulated backend.
    #[serde(default)]
    pub mock: bool,
}

impl ConnectionStatus {
    /// Badge text shown to the operator.
    pub fn label(&self) -> &'static str {
        match (self.connected, self.mock) {
            (true, true) => "Mock Mode",
            (true, false) => "Connected",
            (false, _) => "Not Connected",
        }
    }

    /// The link dropped. `mock` keeps its last reported value.
    pub fn disconnected(self) -> Self {
        ConnectionStatus {
            connected: false,
            mock: self.mock,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_normalize_and_clamp() {
        let bounds = AngleBounds::new(90.0, -90.0);
        assert_eq!(bounds.min, -90.0);
        assert_eq!(bounds.max, 90.0);

        assert_eq!(bounds.clamp(120.0), 90.0);
        assert_eq!(bounds.clamp(-91.5), -90.0);
        assert_eq!(bounds.clamp(12.5), 12.5);
        assert!(bounds.contains(90.0));
        assert!(!bounds.contains(90.1));
    }

    #[test]
    fn test_from_spec_initializes_both_angles() {
        let actuator = Actuator::from_spec("A1", ActuatorSpec::new("XYZ", 3, -45.0, 45.0, 12.0, true));
        assert_eq!(actuator.displayed_angle, 12.0);
        assert_eq!(actuator.confirmed_angle, 12.0);
        assert_eq!(actuator.address.controller, "XYZ");
        assert_eq!(actuator.address.channel, 3);
        assert!(!actuator.is_pending());
    }

    #[test]
    fn test_spec_deserializes_controller_snapshot() {
        let json = r#"{"brick":"2Xa","channel":5,"enabled":false,"position_deg":-12.5,"min_deg":-90.0,"max_deg":90.0}"#;
        let spec: ActuatorSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec, ActuatorSpec::new("2Xa", 5, -90.0, 90.0, -12.5, false));

        // Missing bounds fall back to the controller's default range
        let spec: ActuatorSpec = serde_json::from_str(r#"{"brick":"b","channel":0}"#).unwrap();
        assert_eq!(spec.min_deg, -90.0);
        assert_eq!(spec.max_deg, 90.0);
    }

    #[test]
    fn test_connection_labels() {
        let status = ConnectionStatus {
            connected: true,
            mock: true,
        };
        assert_eq!(status.label(), "Mock Mode");

        let dropped = status.disconnected();
        assert_eq!(dropped.label(), "Not Connected");
        assert!(dropped.mock);

        assert_eq!(ConnectionStatus::default().label(), "Not Connected");
    }
}
