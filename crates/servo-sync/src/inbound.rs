//! # Inbound Event Handler
//!
//! Applies controller events to the panel state and turns the interesting
//! ones into operator notices.
//!
//! ## Event Routing
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Inbound Event Application                          │
//! │                                                                         │
//! │  Inbound::Link(state) ──► PanelState.link, status.connected            │
//! │                                                                         │
//! │  config            ──► store.apply_config        (full snapshot)       │
//! │  status            ──► PanelState.status                               │
//! │  position_update   ──► store.apply_position_update / _rejected         │
//! │  enable_update     ──► store.apply_enable_update                       │
//! │  current_update    ──► store.apply_current_update                      │
//! │  positions         ──► store.apply_positions     (bulk resync)         │
//! │                                                                         │
//! │  enable_all_started ─► tracker.on_enable_started                       │
//! │  motor_enabled      ─► tracker.on_progress        (+ item state)       │
//! │  all_enabled        ─► tracker.on_enable_complete (+ every actuator)   │
//! │  wave_started/complete ─► tracker.on_motion_*                          │
//! │                                                                         │
//! │  all_zeroed, emergency_ack ─► notices                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing here stops the agent. Unknown targets, stale sequence numbers,
//! orphan progress and overruns are logged, counted and, where the operator
//! should know, reported as a [`Notice`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use servo_core::{
    ActuatorStateStore, ActuatorView, Affordances, BatchOperation, BatchTracker, BoundsPolicy,
    CommandDispatcher, ConnectionStatus, CoreError, FineTuneRequest, UpdateOutcome,
};
use tracing::{debug, error, info, warn};

use crate::channel::{ConnectionState, Inbound};
use crate::protocol::ServerEvent;

// =============================================================================
// Notices
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// Message for the operator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Info, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Error, message)
    }

    fn new(level: NoticeLevel, message: impl Into<String>) -> Self {
        Notice {
            level,
            message: message.into(),
            at: Utc::now(),
        }
    }
}

// =============================================================================
// Panel State
// =============================================================================

/// Everything the agent owns. Mutated only from the agent task.
#[derive(Debug, Clone)]
pub struct PanelState {
    pub store: ActuatorStateStore,
    pub tracker: BatchTracker,
    pub dispatcher: CommandDispatcher,
    /// Last status the controller reported.
    pub status: ConnectionStatus,
    pub link: ConnectionState,
    pub last_event_at: Option<DateTime<Utc>>,
}

impl PanelState {
    pub fn new(policy: BoundsPolicy) -> Self {
        PanelState {
            store: ActuatorStateStore::new(),
            tracker: BatchTracker::new(),
            dispatcher: CommandDispatcher::new(policy),
            status: ConnectionStatus::default(),
            link: ConnectionState::Disconnected,
            last_event_at: None,
        }
    }

    pub fn snapshot(&self) -> PanelSnapshot {
        let batch = self.tracker.current().cloned();
        PanelSnapshot {
            actuators: self.store.get_all(),
            status: self.status,
            status_label: self.status.label().to_string(),
            link: self.link,
            batch_label: batch.as_ref().map(BatchOperation::label),
            batch,
            affordances: self.tracker.affordances(),
            total_current_ma: self.store.total_current_ma(),
            fine_tunes: self.dispatcher.pending_fine_tunes(),
            last_event_at: self.last_event_at,
        }
    }
}

/// Read-only copy of the panel for rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct PanelSnapshot {
    /// In display order.
    pub actuators: Vec<ActuatorView>,
    pub status: ConnectionStatus,
    pub status_label: String,
    pub link: ConnectionState,
    pub batch: Option<BatchOperation>,
    pub batch_label: Option<String>,
    pub affordances: Affordances,
    pub total_current_ma: Option<f64>,
    pub fine_tunes: Vec<FineTuneRequest>,
    pub last_event_at: Option<DateTime<Utc>>,
}

impl PanelSnapshot {
    pub fn actuator(&self, name: &str) -> Option<&ActuatorView> {
        self.actuators.iter().find(|a| a.name == name)
    }
}

impl Default for PanelSnapshot {
    fn default() -> Self {
        PanelState::new(BoundsPolicy::default()).snapshot()
    }
}

// =============================================================================
// Inbound Handler
// =============================================================================

/// Counters for what the handler has seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InboundStats {
    pub events: u64,
    pub applied: u64,
    pub unknown_target: u64,
    pub stale: u64,
    pub orphan_progress: u64,
    pub overruns: u64,
    pub ignored_starts: u64,
    /// Batches dropped by a full resync before their terminal event arrived.
    pub abandoned_batches: u64,
}

#[derive(Debug, Default)]
pub struct InboundHandler {
    stats: InboundStats,
}

impl InboundHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> InboundStats {
        self.stats
    }

    pub fn handle(&mut self, state: &mut PanelState, inbound: Inbound) -> Vec<Notice> {
        match inbound {
            Inbound::Event(event) => self.apply_event(state, event),
            Inbound::Link(link) => self.apply_link(state, link),
        }
    }

    /// Link transitions. Dropping the link clears `connected` but keeps the
    /// last reported `mock` flag.
    pub fn apply_link(&mut self, state: &mut PanelState, link: ConnectionState) -> Vec<Notice> {
        let was_connected = state.link.is_connected();
        state.link = link;
        info!(link = %link, "Controller link state changed");

        if link.is_connected() {
            return Vec::new();
        }

        state.status = state.status.disconnected();
        match link {
            ConnectionState::Failed => {
                vec![Notice::error("Controller unreachable. Reconnection abandoned.")]
            }
            _ if was_connected => vec![Notice::warning("Connection to controller lost")],
            _ => Vec::new(),
        }
    }

    pub fn apply_event(&mut self, state: &mut PanelState, event: ServerEvent) -> Vec<Notice> {
        self.stats.events += 1;
        state.last_event_at = Some(Utc::now());
        let mut notices = Vec::new();

        match event {
            ServerEvent::Config(config) => {
                let count = state.store.apply_config(config.actuators);
                info!(actuators = count, "Actuator configuration applied");

                if let Some(abandoned) = state.tracker.reset() {
                    self.stats.abandoned_batches += 1;
                    warn!(
                        kind = abandoned.kind.as_str(),
                        progress = abandoned.progress,
                        total = ?abandoned.total,
                        "Resync abandoned a running batch"
                    );
                    notices.push(Notice::warning(format!(
                        "Lost track of {} during resync. Batch controls are available again.",
                        abandoned.kind.as_str()
                    )));
                }
            }

            ServerEvent::Status(status) => {
                info!(connected = status.connected, mock = status.mock, "Controller status");
                state.status = status;
            }

            ServerEvent::PositionUpdate(update) if update.ok => {
                let outcome = state
                    .store
                    .apply_position_update(&update.name, update.position_deg, update.seq);
                self.record("position_update", &update.name, outcome);
            }

            ServerEvent::PositionUpdate(update) => {
                let outcome = state.store.apply_position_rejected(&update.name, update.seq);
                self.record("position_update", &update.name, outcome);
                let reason = update.error.as_deref().unwrap_or("no reason given");
                warn!(name = %update.name, reason, "Controller rejected position");
                if outcome.is_applied() {
                    notices.push(Notice::warning(format!(
                        "{}: position rejected ({})",
                        update.name, reason
                    )));
                }
            }

            ServerEvent::EnableUpdate(update) => {
                let outcome = state
                    .store
                    .apply_enable_update(&update.name, update.enabled, update.seq);
                self.record("enable_update", &update.name, outcome);
            }

            ServerEvent::CurrentUpdate(update) => {
                let unknown = state.store.apply_current_update(update.total, &update.currents);
                self.record_unknown("current_update", unknown);
            }

            ServerEvent::Positions(positions) => {
                let unknown = state.store.apply_positions(&positions);
                self.stats.applied += (positions.len() - unknown.len()) as u64;
                debug!(count = positions.len(), "Positions resynced");
                self.record_unknown("positions", unknown);
            }

            ServerEvent::EnableAllStarted(started) => {
                match state.tracker.on_enable_started(started.enabled, started.total) {
                    Ok(op) => info!(kind = op.kind.as_str(), total = started.total, "Batch started"),
                    Err(e) => {
                        self.stats.ignored_starts += 1;
                        warn!(error = %e, "Ignoring batch start");
                    }
                }
            }

            ServerEvent::MotorEnabled(item) => {
                match state.tracker.on_progress(&mut state.store, &item.name, item.enabled) {
                    Ok(progress) => {
                        debug!(
                            name = %item.name,
                            progress = progress.progress,
                            total = progress.total,
                            "Batch progress"
                        );
                        self.record("motor_enabled", &item.name, progress.item);
                    }
                    Err(CoreError::NoActiveBatch) => {
                        self.stats.orphan_progress += 1;
                        warn!(name = %item.name, "Batch progress with no batch running");
                    }
                    Err(e) => {
                        self.stats.overruns += 1;
                        error!(name = %item.name, error = %e, "Batch progress overrun");
                        notices.push(Notice::error(e.to_string()));
                    }
                }
            }

            ServerEvent::AllEnabled(done) => {
                match state.tracker.on_enable_complete(&mut state.store, done.enabled) {
                    Ok(op) => {
                        if op.kind.target_enabled() != Some(done.enabled) {
                            warn!(kind = op.kind.as_str(), enabled = done.enabled, "Batch completed with a different target");
                        }
                        info!(enabled = done.enabled, progress = op.progress, "Batch complete");
                    }
                    Err(e) => warn!(error = %e, enabled = done.enabled, "Batch completion with no batch running"),
                }
                notices.push(Notice::info(if done.enabled {
                    "All servos enabled"
                } else {
                    "All servos disabled"
                }));
            }

            ServerEvent::WaveStarted => match state.tracker.on_motion_started() {
                Ok(_) => info!("Wave motion started"),
                Err(e) => {
                    self.stats.ignored_starts += 1;
                    warn!(error = %e, "Ignoring wave start");
                }
            },

            ServerEvent::WaveComplete => {
                match state.tracker.on_motion_complete() {
                    Ok(_) => info!("Wave motion complete"),
                    Err(e) => warn!(error = %e, "Wave completion with no wave running"),
                }
                notices.push(Notice::info("Wave motion complete"));
            }

            ServerEvent::AllZeroed => {
                info!("All actuators zeroed");
                notices.push(Notice::info("All servos zeroed"));
            }

            ServerEvent::EmergencyAck => {
                let count = state.store.set_all_enabled(false);
                warn!(actuators = count, "Emergency stop acknowledged");
                notices.push(Notice::warning("Emergency stop executed. All servos disabled."));
            }
        }

        notices
    }

    fn record(&mut self, event: &str, name: &str, outcome: UpdateOutcome) {
        match outcome {
            UpdateOutcome::Applied => self.stats.applied += 1,
            UpdateOutcome::UnknownTarget => {
                self.stats.unknown_target += 1;
                warn!(event, name = %name, "Update for unknown actuator");
            }
            UpdateOutcome::Stale { last, received } => {
                self.stats.stale += 1;
                debug!(event, name = %name, last, received, "Discarding stale update");
            }
        }
    }

    fn record_unknown(&mut self, event: &str, unknown: Vec<String>) {
        for name in unknown {
            self.record(event, &name, UpdateOutcome::UnknownTarget);
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{AllEnabled, CurrentUpdate, EnableAllStarted, MotorEnabled, PositionUpdate};
    use servo_core::{ActuatorSpec, BatchKind};
    use std::collections::BTreeMap;

    fn configured(names: &[&str]) -> (InboundHandler, PanelState) {
        let mut handler = InboundHandler::new();
        let mut state = PanelState::new(BoundsPolicy::Clamp);
        let event = ServerEvent::config(names.iter().enumerate().map(|(i, name)| {
            (
                name.to_string(),
                ActuatorSpec::new("brick-a", i as u32, -90.0, 90.0, 0.0, false),
            )
        }));
        handler.apply_event(&mut state, event);
        (handler, state)
    }

    fn progress(name: &str, enabled: bool) -> ServerEvent {
        ServerEvent::MotorEnabled(MotorEnabled {
            name: name.to_string(),
            enabled,
            progress: 0,
            total: 0,
        })
    }

    #[test]
    fn test_position_update_sets_both_angles() {
        let (mut handler, mut state) = configured(&["A1"]);
        handler.apply_event(&mut state, ServerEvent::position("A1", 45.0));

        let actuator = state.store.get("A1").unwrap();
        assert_eq!(actuator.displayed_angle, 45.0);
        assert_eq!(actuator.confirmed_angle, 45.0);
        assert_eq!(handler.stats().applied, 1);
    }

    #[test]
    fn test_unknown_target_is_counted_not_fatal() {
        let (mut handler, mut state) = configured(&["A1"]);
        let notices = handler.apply_event(&mut state, ServerEvent::position("Ghost", 10.0));

        assert!(notices.is_empty());
        assert_eq!(handler.stats().unknown_target, 1);
        assert_eq!(state.store.len(), 1);
    }

    #[test]
    fn test_rejected_position_reverts_and_warns() {
        let (mut handler, mut state) = configured(&["A1"]);
        state.dispatcher.preview(&mut state.store, "A1", 30.0).unwrap();

        let notices = handler.apply_event(
            &mut state,
            ServerEvent::PositionUpdate(PositionUpdate {
                name: "A1".into(),
                position_deg: 0.0,
                ok: false,
                seq: None,
                error: Some("brick offline".into()),
            }),
        );

        assert_eq!(state.store.get("A1").unwrap().displayed_angle, 0.0);
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].level, NoticeLevel::Warning);
        assert!(notices[0].message.contains("brick offline"));
    }

    #[test]
    fn test_stale_sequence_is_discarded() {
        let (mut handler, mut state) = configured(&["A1"]);
        let sequenced = |angle, seq| {
            ServerEvent::PositionUpdate(PositionUpdate {
                name: "A1".into(),
                position_deg: angle,
                ok: true,
                seq: Some(seq),
                error: None,
            })
        };

        handler.apply_event(&mut state, sequenced(20.0, 5));
        handler.apply_event(&mut state, sequenced(10.0, 4));

        assert_eq!(state.store.get("A1").unwrap().confirmed_angle, 20.0);
        assert_eq!(handler.stats().stale, 1);
    }

    #[test]
    fn test_current_update_stores_total() {
        let (mut handler, mut state) = configured(&["A1", "A2"]);
        let currents: BTreeMap<String, f64> =
            [("A1".to_string(), 120.0), ("Ghost".to_string(), 5.0)].into_iter().collect();

        handler.apply_event(
            &mut state,
            ServerEvent::CurrentUpdate(CurrentUpdate {
                total: Some(250.0),
                currents,
            }),
        );

        assert_eq!(state.store.total_current_ma(), Some(250.0));
        assert_eq!(state.store.get("A1").unwrap().current_ma, Some(120.0));
        assert_eq!(handler.stats().unknown_target, 1);
    }

    #[test]
    fn test_enable_batch_lifecycle() {
        let names: Vec<String> = (0..14).map(|i| format!("S{:02}", i)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let (mut handler, mut state) = configured(&refs);

        handler.apply_event(
            &mut state,
            ServerEvent::EnableAllStarted(EnableAllStarted { enabled: true, total: 14 }),
        );
        assert!(!state.tracker.affordances().wave);

        for name in &names[..3] {
            handler.apply_event(&mut state, progress(name, true));
        }
        assert_eq!(state.snapshot().batch_label.as_deref(), Some("Enabling 3/14..."));

        for name in &names[3..] {
            handler.apply_event(&mut state, progress(name, true));
        }
        let notices = handler.apply_event(&mut state, ServerEvent::AllEnabled(AllEnabled { enabled: true }));

        assert!(!state.tracker.is_active());
        assert!(state.tracker.affordances().enable_all);
        assert!(state.store.get_all().iter().all(|a| a.enabled));
        assert_eq!(notices[0].message, "All servos enabled");
    }

    #[test]
    fn test_overrun_raises_error_notice() {
        let (mut handler, mut state) = configured(&["A1", "A2"]);
        handler.apply_event(
            &mut state,
            ServerEvent::EnableAllStarted(EnableAllStarted { enabled: false, total: 1 }),
        );
        handler.apply_event(&mut state, progress("A1", false));
        let notices = handler.apply_event(&mut state, progress("A2", false));

        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].level, NoticeLevel::Error);
        assert_eq!(handler.stats().overruns, 1);
        assert_eq!(state.tracker.current().unwrap().progress, 1);
    }

    #[test]
    fn test_progress_while_idle_still_applies_item() {
        let (mut handler, mut state) = configured(&["A1"]);
        handler.apply_event(&mut state, progress("A1", true));

        assert!(state.store.get("A1").unwrap().enabled);
        assert_eq!(handler.stats().orphan_progress, 1);
    }

    #[test]
    fn test_second_start_is_ignored() {
        let (mut handler, mut state) = configured(&["A1"]);
        handler.apply_event(&mut state, ServerEvent::WaveStarted);
        handler.apply_event(
            &mut state,
            ServerEvent::EnableAllStarted(EnableAllStarted { enabled: true, total: 1 }),
        );

        assert_eq!(state.tracker.current().unwrap().kind, BatchKind::ChoreographedMotion);
        assert_eq!(handler.stats().ignored_starts, 1);

        handler.apply_event(&mut state, ServerEvent::WaveComplete);
        assert!(!state.tracker.is_active());
    }

    fn config_of(names: &[&str], enabled: bool) -> ServerEvent {
        ServerEvent::config(names.iter().enumerate().map(|(i, name)| {
            (
                name.to_string(),
                ActuatorSpec::new("brick-a", i as u32, -90.0, 90.0, 0.0, enabled),
            )
        }))
    }

    #[test]
    fn test_resync_after_link_loss_frees_batch_slot() {
        let (mut handler, mut state) = configured(&["A1", "A2"]);
        handler.apply_link(&mut state, ConnectionState::Connected);
        handler.apply_event(
            &mut state,
            ServerEvent::EnableAllStarted(EnableAllStarted { enabled: true, total: 2 }),
        );
        handler.apply_event(&mut state, progress("A1", true));

        // all_enabled is lost with the link
        handler.apply_link(&mut state, ConnectionState::Reconnecting { attempt: 1 });
        handler.apply_link(&mut state, ConnectionState::Connected);
        assert!(state.tracker.is_active());

        let notices = handler.apply_event(&mut state, config_of(&["A1", "A2"], true));

        assert!(!state.tracker.is_active());
        assert!(state.tracker.ensure_idle().is_ok());
        let snapshot = state.snapshot();
        assert_eq!(snapshot.batch, None);
        assert!(snapshot.affordances.enable_all && snapshot.affordances.wave);
        assert!(snapshot.actuators.iter().all(|a| a.enabled));

        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].level, NoticeLevel::Warning);
        assert!(notices[0].message.contains("enable_all"));
        assert_eq!(handler.stats().abandoned_batches, 1);
    }

    #[test]
    fn test_progress_after_resync_is_orphaned_but_applied() {
        let (mut handler, mut state) = configured(&["A1", "A2"]);
        handler.apply_event(&mut state, ServerEvent::WaveStarted);
        handler.apply_event(&mut state, config_of(&["A1", "A2"], false));

        // Stragglers from the old batch still mirror their item
        handler.apply_event(&mut state, progress("A2", true));
        assert!(state.store.get("A2").unwrap().enabled);
        assert_eq!(handler.stats().orphan_progress, 1);
        assert!(!state.tracker.is_active());

        // A late terminal event applies its value without reopening the slot
        let notices = handler.apply_event(&mut state, ServerEvent::AllEnabled(AllEnabled { enabled: true }));
        assert!(state.store.get_all().iter().all(|a| a.enabled));
        assert_eq!(notices[0].message, "All servos enabled");
        assert!(!state.tracker.is_active());
    }

    #[test]
    fn test_resync_without_batch_is_quiet() {
        let (mut handler, mut state) = configured(&["A1"]);
        let notices = handler.apply_event(&mut state, config_of(&["A1", "A2"], false));

        assert!(notices.is_empty());
        assert_eq!(state.store.len(), 2);
        assert_eq!(handler.stats().abandoned_batches, 0);
    }

    #[test]
    fn test_emergency_ack_disables_everything() {
        let (mut handler, mut state) = configured(&["A1", "A2"]);
        state.store.set_all_enabled(true);

        let notices = handler.apply_event(&mut state, ServerEvent::EmergencyAck);

        assert!(state.store.get_all().iter().all(|a| !a.enabled));
        assert_eq!(notices[0].message, "Emergency stop executed. All servos disabled.");
    }

    #[test]
    fn test_link_loss_keeps_mock_flag() {
        let (mut handler, mut state) = configured(&["A1"]);
        handler.apply_link(&mut state, ConnectionState::Connected);
        handler.apply_event(&mut state, ServerEvent::status(true, true));
        assert_eq!(state.status.label(), "Mock Mode");

        let notices = handler.apply_link(&mut state, ConnectionState::Reconnecting { attempt: 1 });
        assert_eq!(notices[0].level, NoticeLevel::Warning);
        assert!(!state.status.connected);
        assert!(state.status.mock);
        assert_eq!(state.status.label(), "Not Connected");

        // Still down: no repeated notice.
        assert!(handler
            .apply_link(&mut state, ConnectionState::Reconnecting { attempt: 2 })
            .is_empty());
        let notices = handler.apply_link(&mut state, ConnectionState::Failed);
        assert_eq!(notices[0].level, NoticeLevel::Error);
    }
}
