//! # Batch Operation Tracker
//!
//! State machine for cluster-wide operations that the controller executes
//! as a sequence of per-actuator steps.
//!
//! ## State Machine
//! ```text
//!                 enable_all_started{enabled,total}
//!        ┌──────┐     / wave_started              ┌───────────────────────┐
//!        │ Idle │ ───────────────────────────────►│ Running(kind,total,n) │
//!        └──────┘                                 └───────────┬───────────┘
//!            ▲                                                │ motor_enabled
//!            │        all_enabled{enabled}                    │ n += 1
//!            │        / wave_complete                         │ (n > total is
//!            └────────────────────────────────────────────────┘  an overrun)
//! ```
//!
//! There is one slot. While it is occupied every batch-initiating
//! affordance is off, a local request fails with
//! [`CoreError::BatchInProgress`] and a second `*_started` event is ignored.
//! Nothing can be cancelled from the client.
//!
//! The terminal `all_enabled` event applies its target to every actuator,
//! which repairs any progress event lost on the way. A full resync calls
//! [`BatchTracker::reset`], since the terminal event may have been lost with
//! the link.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::store::{ActuatorStateStore, UpdateOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum BatchKind {
    EnableAll,
    DisableAll,
    ChoreographedMotion,
}

impl BatchKind {
    pub fn for_target(enabled: bool) -> Self {
        if enabled {
            BatchKind::EnableAll
        } else {
            BatchKind::DisableAll
        }
    }

    /// Enabled state the batch drives every actuator to, if any.
    pub fn target_enabled(&self) -> Option<bool> {
        match self {
            BatchKind::EnableAll => Some(true),
            BatchKind::DisableAll => Some(false),
            BatchKind::ChoreographedMotion => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchKind::EnableAll => "enable_all",
            BatchKind::DisableAll => "disable_all",
            BatchKind::ChoreographedMotion => "wave",
        }
    }
}

/// The operation occupying the slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct BatchOperation {
    pub kind: BatchKind,
    /// Absent for choreographed motion.
    pub total: Option<u32>,
    pub progress: u32,
}

impl BatchOperation {
    /// Progress text for the operator.
    pub fn label(&self) -> String {
        match (self.kind, self.total) {
            (BatchKind::ChoreographedMotion, _) => "Wave running...".to_string(),
            (BatchKind::EnableAll, Some(total)) => format!("Enabling {}/{}...", self.progress, total),
            (BatchKind::DisableAll, Some(total)) => format!("Disabling {}/{}...", self.progress, total),
            (BatchKind::EnableAll, None) => "Enabling...".to_string(),
            (BatchKind::DisableAll, None) => "Disabling...".to_string(),
        }
    }
}

/// Which batch buttons the operator may press.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Affordances {
    pub enable_all: bool,
    pub disable_all: bool,
    pub wave: bool,
}

/// Result of one accepted progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressOutcome {
    pub progress: u32,
    pub total: u32,
    /// What happened to the item's own enabled state.
    pub item: UpdateOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct BatchTracker {
    current: Option<BatchOperation>,
    /// Progress events received past `total` in the running batch.
    overrun: u32,
}

impl BatchTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&BatchOperation> {
        self.current.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }

    pub fn affordances(&self) -> Affordances {
        let idle = self.current.is_none();
        Affordances {
            enable_all: idle,
            disable_all: idle,
            wave: idle,
        }
    }

    /// Checks that a new batch may be requested locally.
    pub fn ensure_idle(&self) -> CoreResult<()> {
        match &self.current {
            Some(running) => Err(CoreError::BatchInProgress {
                running: running.kind.as_str().to_string(),
            }),
            None => Ok(()),
        }
    }

    // =========================================================================
    // Enable / disable
    // =========================================================================

    /// `enable_all_started{enabled, total}`. Ignored while a batch runs.
    pub fn on_enable_started(&mut self, enabled: bool, total: u32) -> CoreResult<&BatchOperation> {
        self.ensure_idle()?;
        self.overrun = 0;
        Ok(self.current.insert(BatchOperation {
            kind: BatchKind::for_target(enabled),
            total: Some(total),
            progress: 0,
        }))
    }

    /// `motor_enabled{name, enabled}`.
    ///
    /// The item's enabled state is applied to the store in every case,
    /// including the error cases: [`CoreError::NoActiveBatch`] when nothing
    /// is tracked and [`CoreError::ProtocolOverrun`] past `total`. Progress
    /// never exceeds `total`.
    pub fn on_progress(
        &mut self,
        store: &mut ActuatorStateStore,
        name: &str,
        enabled: bool,
    ) -> CoreResult<ProgressOutcome> {
        let item = store.apply_enable_update(name, enabled, None);

        let Some(op) = self.current.as_mut().filter(|op| op.total.is_some()) else {
            return Err(CoreError::NoActiveBatch);
        };
        let total = op.total.unwrap_or_default();

        if op.progress >= total {
            self.overrun = self.overrun.saturating_add(1);
            return Err(CoreError::ProtocolOverrun {
                total,
                received: total.saturating_add(self.overrun),
            });
        }

        op.progress += 1;
        Ok(ProgressOutcome {
            progress: op.progress,
            total,
            item,
        })
    }

    /// `all_enabled{enabled}`. Applies `enabled` to every actuator, then
    /// frees the slot.
    ///
    /// Fails with [`CoreError::NoActiveBatch`] when no enable/disable batch
    /// was tracked; the state is applied regardless.
    pub fn on_enable_complete(
        &mut self,
        store: &mut ActuatorStateStore,
        enabled: bool,
    ) -> CoreResult<BatchOperation> {
        store.set_all_enabled(enabled);

        match self.current.take() {
            Some(op) if op.kind.target_enabled().is_some() => {
                self.overrun = 0;
                Ok(op)
            }
            other => {
                self.current = other;
                Err(CoreError::NoActiveBatch)
            }
        }
    }

    // =========================================================================
    // Choreographed motion
    // =========================================================================

    pub fn on_motion_started(&mut self) -> CoreResult<&BatchOperation> {
        self.ensure_idle()?;
        Ok(self.current.insert(BatchOperation {
            kind: BatchKind::ChoreographedMotion,
            total: None,
            progress: 0,
        }))
    }

    pub fn on_motion_complete(&mut self) -> CoreResult<BatchOperation> {
        match self.current.take() {
            Some(op) if op.kind == BatchKind::ChoreographedMotion => Ok(op),
            other => {
                self.current = other;
                Err(CoreError::NoActiveBatch)
            }
        }
    }

    // =========================================================================
    // Resync
    // =========================================================================

    /// Frees the slot without a terminal event, returning whatever was
    /// running. Used when a full `config` resync supersedes a batch whose
    /// completion was lost with the link.
    pub fn reset(&mut self) -> Option<BatchOperation> {
        self.overrun = 0;
        self.current.take()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
