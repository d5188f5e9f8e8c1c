//! # Command Dispatcher
//!
//! Turns operator intents into outbound commands with the right cadence.
//!
//! ## Cadence
//! ```text
//!   drag samples ──► preview ──► displayed_angle only (no traffic)
//!        │
//!   release / numeric confirm / zero ──► exactly ONE set_position
//!
//!   fine-tune:  request ──► ticket(base = displayed now)
//!                                │   ... inbound events keep flowing ...
//!               resolve(ticket, "+5") ──► ONE set_position(base + 5)
//!               resolve(ticket, None) ──► nothing
//! ```
//!
//! Every angle passes through the [`BoundsPolicy`] before it reaches the
//! store or the wire.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::batch::BatchTracker;
use crate::command::{Command, CommandSink};
use crate::error::{CoreError, CoreResult, ValidationError};
use crate::store::ActuatorStateStore;
use crate::validation::{ensure_finite, parse_delta};

// =============================================================================
// Bounds Policy
// =============================================================================

/// What to do with an angle outside the actuator's declared range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundsPolicy {
    /// Pull the angle onto the nearest bound.
    #[default]
    Clamp,
    /// Refuse the intent with a validation error.
    Reject,
    /// Send as typed and let the controller decide.
    Advisory,
}

impl BoundsPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            BoundsPolicy::Clamp => "clamp",
            BoundsPolicy::Reject => "reject",
            BoundsPolicy::Advisory => "advisory",
        }
    }
}

impl fmt::Display for BoundsPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BoundsPolicy {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "clamp" => Ok(BoundsPolicy::Clamp),
            "reject" => Ok(BoundsPolicy::Reject),
            "advisory" => Ok(BoundsPolicy::Advisory),
            other => Err(ValidationError::InvalidFormat {
                field: "bounds_policy".to_string(),
                reason: format!("'{}' is not one of clamp, reject, advisory", other),
            }),
        }
    }
}

// =============================================================================
// Fine-tune tickets
// =============================================================================

/// An open fine-tune prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct FineTuneRequest {
    pub ticket: u64,
    pub name: String,
    /// Displayed angle when the prompt was opened.
    pub base_angle: f64,
}

#[derive(Debug, Clone)]
struct PendingFineTune {
    name: String,
    base_angle: f64,
}

// =============================================================================
// Dispatcher
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct CommandDispatcher {
    policy: BoundsPolicy,
    pending: BTreeMap<u64, PendingFineTune>,
    next_ticket: u64,
}

impl CommandDispatcher {
    pub fn new(policy: BoundsPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn policy(&self) -> BoundsPolicy {
        self.policy
    }

    /// Applies the bounds policy to an angle for `name`.
    pub fn resolve_angle(&self, store: &ActuatorStateStore, name: &str, angle: f64) -> CoreResult<f64> {
        let actuator = store.require(name)?;
        let angle = ensure_finite(name, angle)?;

        match self.policy {
            BoundsPolicy::Clamp => Ok(actuator.bounds.clamp(angle)),
            BoundsPolicy::Advisory => Ok(angle),
            BoundsPolicy::Reject if actuator.bounds.contains(angle) => Ok(angle),
            BoundsPolicy::Reject => Err(ValidationError::OutOfRange {
                field: name.to_string(),
                min: actuator.bounds.min,
                max: actuator.bounds.max,
            }
            .into()),
        }
    }

    // =========================================================================
    // Per-actuator intents
    // =========================================================================

    /// One drag sample. Local echo only.
    pub fn preview(&self, store: &mut ActuatorStateStore, name: &str, angle: f64) -> CoreResult<f64> {
        let angle = self.resolve_angle(store, name, angle)?;
        store.set_displayed(name, angle)?;
        Ok(angle)
    }

    /// Drag release: sends the displayed angle.
    pub fn commit(
        &self,
        store: &mut ActuatorStateStore,
        name: &str,
        sink: &mut dyn CommandSink,
    ) -> CoreResult<f64> {
        let displayed = store.require(name)?.displayed_angle;
        self.commit_value(store, name, displayed, sink)
    }

    /// Numeric-field confirmation: displays and sends `angle`.
    pub fn commit_value(
        &self,
        store: &mut ActuatorStateStore,
        name: &str,
        angle: f64,
        sink: &mut dyn CommandSink,
    ) -> CoreResult<f64> {
        let angle = self.resolve_angle(store, name, angle)?;
        store.set_displayed(name, angle)?;
        sink.emit(Command::set_position(name, angle));
        Ok(angle)
    }

    pub fn zero(
        &self,
        store: &mut ActuatorStateStore,
        name: &str,
        sink: &mut dyn CommandSink,
    ) -> CoreResult<f64> {
        self.commit_value(store, name, 0.0, sink)
    }

    /// Sends `set_enable` and flips the local flag ahead of the echo.
    pub fn set_enable(
        &self,
        store: &mut ActuatorStateStore,
        name: &str,
        enable: bool,
        sink: &mut dyn CommandSink,
    ) -> CoreResult<()> {
        store.set_enabled_local(name, enable)?;
        sink.emit(Command::set_enable(name, enable));
        Ok(())
    }

    // =========================================================================
    // Fine-tune
    // =========================================================================

    /// Opens a fine-tune prompt and returns immediately.
    pub fn request_fine_tune(&mut self, store: &ActuatorStateStore, name: &str) -> CoreResult<FineTuneRequest> {
        let base_angle = store.require(name)?.displayed_angle;

        self.next_ticket += 1;
        let ticket = self.next_ticket;
        self.pending.insert(
            ticket,
            PendingFineTune {
                name: name.to_string(),
                base_angle,
            },
        );

        Ok(FineTuneRequest {
            ticket,
            name: name.to_string(),
            base_angle,
        })
    }

    /// Answers a fine-tune prompt.
    ///
    /// `None` cancels and emits nothing. A non-numeric answer fails without
    /// touching the store and leaves the ticket open for another try.
    /// Returns the angle sent, if any.
    pub fn resolve_fine_tune(
        &mut self,
        store: &mut ActuatorStateStore,
        ticket: u64,
        response: Option<&str>,
        sink: &mut dyn CommandSink,
    ) -> CoreResult<Option<f64>> {
        let pending = self
            .pending
            .get(&ticket)
            .cloned()
            .ok_or(CoreError::UnknownTicket(ticket))?;

        let Some(text) = response else {
            self.pending.remove(&ticket);
            return Ok(None);
        };

        let delta = parse_delta(text)?;
        let angle = self.resolve_angle(store, &pending.name, pending.base_angle + delta)?;

        self.pending.remove(&ticket);
        store.set_displayed(&pending.name, angle)?;
        sink.emit(Command::set_position(pending.name, angle));
        Ok(Some(angle))
    }

    pub fn pending_fine_tunes(&self) -> Vec<FineTuneRequest> {
        self.pending
            .iter()
            .map(|(ticket, p)| FineTuneRequest {
                ticket: *ticket,
                name: p.name.clone(),
                base_angle: p.base_angle,
            })
            .collect()
    }

    // =========================================================================
    // Cluster-wide intents
    // =========================================================================

    /// Requests an enable/disable batch. Refused while any batch runs.
    pub fn enable_all(&self, tracker: &BatchTracker, enable: bool, sink: &mut dyn CommandSink) -> CoreResult<()> {
        tracker.ensure_idle()?;
        sink.emit(Command::EnableAll { enable });
        Ok(())
    }

    /// Requests the wave motion. Refused while any batch runs.
    pub fn wave(&self, tracker: &BatchTracker, sink: &mut dyn CommandSink) -> CoreResult<()> {
        tracker.ensure_idle()?;
        sink.emit(Command::WaveMotion);
        Ok(())
    }

    pub fn zero_all(&self, sink: &mut dyn CommandSink) {
        sink.emit(Command::ZeroAll);
    }

    /// Never gated on the batch slot.
    pub fn emergency_stop(&self, sink: &mut dyn CommandSink) {
        sink.emit(Command::EmergencyStop);
    }

    /// Asks for a `positions` resync.
    pub fn refresh(&self, sink: &mut dyn CommandSink) {
        sink.emit(Command::GetPositions);
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
