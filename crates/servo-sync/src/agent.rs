//! # Control Agent
//!
//! The one actor that owns the panel state. Operator intents and controller
//! events are processed one at a time on the same task.
//!
//! ## Agent Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       ControlAgent Architecture                         │
//! │                                                                         │
//! │   AgentHandle (cloneable)                SyncChannel                    │
//! │   ───────────────────────                ───────────                    │
//! │   preview / commit / enable ...          Inbound::Event / Link          │
//! │          │  Intent + oneshot reply              │                       │
//! │          ▼                                      ▼                       │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                  ControlAgent::run (select!)                     │  │
//! │  │                                                                  │  │
//! │  │   inbound first ─► EventRouter subscribers                       │  │
//! │  │                 ─► InboundHandler ─► PanelState                  │  │
//! │  │   intents       ─► CommandDispatcher / PresetStore ─► Outbound   │  │
//! │  │                                                                  │  │
//! │  │   after each step: snapshot ─► watch, notices ─► broadcast       │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! │                                                                         │
//! │  A fine-tune prompt never blocks this loop: it is a ticket that a       │
//! │  later intent resolves, and events keep flowing in between.             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use servo_core::{
    BoundsPolicy, Command, CommandSink, CoreResult, FineTuneRequest, GroupTable, PresetBackend,
    PresetLoadReport, PresetRemoval, PresetSaved, PresetStore, ActuatorStateStore,
};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, instrument, warn};

use crate::channel::{EventRouter, Inbound, SubscriptionId, SyncChannel};
use crate::config::PanelConfig;
use crate::error::{SyncError, SyncResult};
use crate::inbound::{InboundHandler, InboundStats, Notice, PanelSnapshot, PanelState};
use crate::protocol::{EventKind, ServerEvent};

const INTENT_BUFFER: usize = 64;
const NOTICE_BUFFER: usize = 64;

// =============================================================================
// Observer Trait
// =============================================================================

/// Push-style hook for a rendering layer.
pub trait PanelObserver: Send + Sync {
    fn on_snapshot(&self, snapshot: &PanelSnapshot);

    fn on_notice(&self, notice: &Notice);
}

/// No-op observer for headless use.
pub struct NoOpObserver;

impl PanelObserver for NoOpObserver {
    fn on_snapshot(&self, _snapshot: &PanelSnapshot) {}
    fn on_notice(&self, _notice: &Notice) {}
}

// =============================================================================
// Intents
// =============================================================================

type Reply<T> = oneshot::Sender<SyncResult<T>>;
type BoxedHandler = Box<dyn FnMut(&ServerEvent) + Send>;

enum Intent {
    Preview { name: String, angle: f64, reply: Reply<f64> },
    Commit { name: String, reply: Reply<f64> },
    CommitValue { name: String, angle: f64, reply: Reply<f64> },
    Zero { name: String, reply: Reply<f64> },
    SetEnable { name: String, enable: bool, reply: Reply<()> },
    RequestFineTune { name: String, reply: Reply<FineTuneRequest> },
    ResolveFineTune { ticket: u64, response: Option<String>, reply: Reply<Option<f64>> },
    EnableAll { enable: bool, reply: Reply<()> },
    ZeroAll { reply: Reply<()> },
    Wave { reply: Reply<()> },
    EmergencyStop { reply: Reply<()> },
    Refresh { reply: Reply<()> },
    SavePreset { name: String, reply: Reply<PresetSaved> },
    LoadPreset { name: String, reply: Reply<PresetLoadReport> },
    DeletePreset { name: String, reply: Reply<PresetRemoval> },
    ListPresets { reply: Reply<Vec<String>> },
    Subscribe { kind: EventKind, handler: BoxedHandler, reply: Reply<SubscriptionId> },
    Unsubscribe { id: SubscriptionId, reply: Reply<bool> },
    Snapshot { reply: Reply<PanelSnapshot> },
    Stats { reply: Reply<InboundStats> },
    Shutdown,
}

// =============================================================================
// Outbound Sink
// =============================================================================

/// Forwards dispatcher commands to the channel, counting what the channel
/// refused.
struct Outbound<'a, C> {
    channel: &'a C,
    dropped: usize,
}

impl<'a, C: SyncChannel> Outbound<'a, C> {
    fn new(channel: &'a C) -> Self {
        Outbound { channel, dropped: 0 }
    }

    fn undelivered(&self) -> Option<Notice> {
        (self.dropped > 0).then(|| {
            Notice::warning(format!(
                "Controller link down: {} command(s) not sent",
                self.dropped
            ))
        })
    }
}

impl<C: SyncChannel> CommandSink for Outbound<'_, C> {
    fn emit(&mut self, command: Command) {
        let event = command.event_name();
        match self.channel.send(command) {
            Ok(()) => debug!(command = event, "Command sent"),
            Err(e) => {
                self.dropped += 1;
                warn!(command = event, error = %e, "Command not sent");
            }
        }
    }
}

// =============================================================================
// Control Agent
// =============================================================================

pub struct ControlAgent<C, B> {
    channel: C,
    presets: PresetStore<B>,
    state: PanelState,
    inbound: InboundHandler,
    router: EventRouter,
    observer: Arc<dyn PanelObserver>,
    intents: mpsc::Receiver<Intent>,
    snapshot_tx: watch::Sender<PanelSnapshot>,
    notice_tx: broadcast::Sender<Notice>,
}

impl<C, B> ControlAgent<C, B>
where
    C: SyncChannel,
    B: PresetBackend + 'static,
{
    /// Connects the channel and spawns the agent with default settings.
    pub fn spawn(channel: C, backend: B) -> SyncResult<AgentHandle> {
        AgentBuilder::new(channel, backend).spawn()
    }

    #[instrument(skip_all, name = "control_agent")]
    async fn run(mut self, mut inbound: mpsc::Receiver<Inbound>) {
        info!(actuators = self.state.store.len(), "Control agent starting");
        let mut inbound_open = true;

        loop {
            tokio::select! {
                biased;

                item = inbound.recv(), if inbound_open => match item {
                    Some(item) => self.on_inbound(item),
                    None => {
                        warn!("Inbound stream closed");
                        inbound_open = false;
                    }
                },

                intent = self.intents.recv() => match intent {
                    Some(Intent::Shutdown) | None => break,
                    Some(intent) => self.on_intent(intent).await,
                },
            }
        }

        self.channel.shutdown();
        let stats = self.inbound.stats();
        info!(
            events = stats.events,
            applied = stats.applied,
            unknown = stats.unknown_target,
            stale = stats.stale,
            "Control agent stopped"
        );
    }

    fn on_inbound(&mut self, item: Inbound) {
        let notices = match item {
            Inbound::Event(event) => {
                let handled = self.router.dispatch(&event);
                if handled > 0 {
                    debug!(event = event.type_name(), subscribers = handled, "Event dispatched");
                }
                self.inbound.apply_event(&mut self.state, event)
            }
            Inbound::Link(link) => self.inbound.apply_link(&mut self.state, link),
        };
        self.publish(notices);
    }

    /// Runs a dispatcher operation against the live channel.
    fn dispatch<T>(
        &mut self,
        op: impl FnOnce(&mut PanelState, &mut dyn CommandSink) -> CoreResult<T>,
    ) -> (SyncResult<T>, Option<Notice>) {
        let mut sink = Outbound::new(&self.channel);
        let result = op(&mut self.state, &mut sink);
        if let Err(ref e) = result {
            debug!(error = %e, "Intent refused");
        }
        (result.map_err(SyncError::from), sink.undelivered())
    }

    async fn on_intent(&mut self, intent: Intent) {
        let mut notices = Vec::new();

        match intent {
            Intent::Preview { name, angle, reply } => {
                let state = &mut self.state;
                let result = state.dispatcher.preview(&mut state.store, &name, angle);
                let _ = reply.send(result.map_err(SyncError::from));
            }
            Intent::Commit { name, reply } => {
                let (result, notice) =
                    self.dispatch(|s, sink| s.dispatcher.commit(&mut s.store, &name, sink));
                notices.extend(notice);
                let _ = reply.send(result);
            }
            Intent::CommitValue { name, angle, reply } => {
                let (result, notice) = self
                    .dispatch(|s, sink| s.dispatcher.commit_value(&mut s.store, &name, angle, sink));
                notices.extend(notice);
                let _ = reply.send(result);
            }
            Intent::Zero { name, reply } => {
                let (result, notice) =
                    self.dispatch(|s, sink| s.dispatcher.zero(&mut s.store, &name, sink));
                notices.extend(notice);
                let _ = reply.send(result);
            }
            Intent::SetEnable { name, enable, reply } => {
                let (result, notice) = self
                    .dispatch(|s, sink| s.dispatcher.set_enable(&mut s.store, &name, enable, sink));
                notices.extend(notice);
                let _ = reply.send(result);
            }
            Intent::RequestFineTune { name, reply } => {
                let state = &mut self.state;
                let result = state.dispatcher.request_fine_tune(&state.store, &name);
                if let Ok(ref request) = result {
                    debug!(ticket = request.ticket, name = %request.name, "Fine-tune opened");
                }
                let _ = reply.send(result.map_err(SyncError::from));
            }
            Intent::ResolveFineTune { ticket, response, reply } => {
                let (result, notice) = self.dispatch(|s, sink| {
                    s.dispatcher
                        .resolve_fine_tune(&mut s.store, ticket, response.as_deref(), sink)
                });
                notices.extend(notice);
                let _ = reply.send(result);
            }
            Intent::EnableAll { enable, reply } => {
                let (result, notice) =
                    self.dispatch(|s, sink| s.dispatcher.enable_all(&s.tracker, enable, sink));
                notices.extend(notice);
                let _ = reply.send(result);
            }
            Intent::ZeroAll { reply } => {
                let (result, notice) = self.dispatch(|s, sink| {
                    s.dispatcher.zero_all(sink);
                    Ok(())
                });
                notices.extend(notice);
                let _ = reply.send(result);
            }
            Intent::Wave { reply } => {
                let (result, notice) = self.dispatch(|s, sink| s.dispatcher.wave(&s.tracker, sink));
                notices.extend(notice);
                let _ = reply.send(result);
            }
            Intent::EmergencyStop { reply } => {
                warn!("Emergency stop requested");
                let (result, notice) = self.dispatch(|s, sink| {
                    s.dispatcher.emergency_stop(sink);
                    Ok(())
                });
                notices.extend(notice);
                let _ = reply.send(result);
            }
            Intent::Refresh { reply } => {
                let (result, notice) = self.dispatch(|s, sink| {
                    s.dispatcher.refresh(sink);
                    Ok(())
                });
                notices.extend(notice);
                let _ = reply.send(result);
            }
            Intent::SavePreset { name, reply } => {
                let result = self.presets.save(&name, &self.state.store).await;
                if let Ok(ref saved) = result {
                    info!(preset = %saved.name, entries = saved.entries, replaced = saved.replaced, "Preset saved");
                }
                let _ = reply.send(result.map_err(SyncError::from));
            }
            Intent::LoadPreset { name, reply } => {
                let mut sink = Outbound::new(&self.channel);
                let result = self
                    .presets
                    .load(&name, &mut self.state.store, &self.state.dispatcher, &mut sink)
                    .await;
                notices.extend(sink.undelivered());
                if let Ok(ref report) = result {
                    info!(
                        preset = %report.name,
                        emitted = report.emitted.len(),
                        skipped = report.skipped.len(),
                        "Preset loaded"
                    );
                    if report.is_partial() {
                        notices.push(Notice::warning(format!(
                            "Preset '{}' partially applied: {} skipped",
                            report.name,
                            report.skipped.len()
                        )));
                    }
                }
                let _ = reply.send(result.map_err(SyncError::from));
            }
            Intent::DeletePreset { name, reply } => {
                let result = self.presets.delete(&name).await;
                if let Ok(removal) = result {
                    info!(preset = %name, ?removal, "Preset delete");
                }
                let _ = reply.send(result.map_err(SyncError::from));
            }
            Intent::ListPresets { reply } => {
                let _ = reply.send(self.presets.list().await.map_err(SyncError::from));
            }
            Intent::Subscribe { kind, handler, reply } => {
                let id = self.router.subscribe(kind, handler);
                let _ = reply.send(Ok(id));
            }
            Intent::Unsubscribe { id, reply } => {
                let _ = reply.send(Ok(self.router.unsubscribe(id)));
            }
            Intent::Snapshot { reply } => {
                let _ = reply.send(Ok(self.state.snapshot()));
                return;
            }
            Intent::Stats { reply } => {
                let _ = reply.send(Ok(self.inbound.stats()));
                return;
            }
            Intent::Shutdown => return,
        }

        self.publish(notices);
    }

    fn publish(&mut self, notices: Vec<Notice>) {
        for notice in notices {
            self.observer.on_notice(&notice);
            let _ = self.notice_tx.send(notice);
        }
        let snapshot = self.state.snapshot();
        self.observer.on_snapshot(&snapshot);
        self.snapshot_tx.send_replace(snapshot);
    }
}

// =============================================================================
// Agent Handle
// =============================================================================

/// Cloneable handle to a running [`ControlAgent`].
#[derive(Clone)]
pub struct AgentHandle {
    intents: mpsc::Sender<Intent>,
    snapshot: watch::Receiver<PanelSnapshot>,
    notices: broadcast::Sender<Notice>,
}

impl AgentHandle {
    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Intent) -> SyncResult<T> {
        let (reply, response) = oneshot::channel();
        self.intents
            .send(make(reply))
            .await
            .map_err(|_| SyncError::ShuttingDown)?;
        response.await.map_err(|_| SyncError::ShuttingDown)?
    }

    /// Latest published snapshot. May lag events still queued.
    pub fn snapshot(&self) -> PanelSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<PanelSnapshot> {
        self.snapshot.clone()
    }

    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    /// Snapshot taken after every event queued before this call.
    pub async fn sync(&self) -> SyncResult<PanelSnapshot> {
        self.request(|reply| Intent::Snapshot { reply }).await
    }

    pub async fn stats(&self) -> SyncResult<InboundStats> {
        self.request(|reply| Intent::Stats { reply }).await
    }

    // =========================================================================
    // Per-actuator
    // =========================================================================

    /// Drag sample: local echo only.
    pub async fn preview(&self, name: &str, angle: f64) -> SyncResult<f64> {
        let name = name.to_string();
        self.request(|reply| Intent::Preview { name, angle, reply }).await
    }

    /// Drag release: sends the displayed angle.
    pub async fn commit(&self, name: &str) -> SyncResult<f64> {
        let name = name.to_string();
        self.request(|reply| Intent::Commit { name, reply }).await
    }

    /// Numeric entry.
    pub async fn commit_value(&self, name: &str, angle: f64) -> SyncResult<f64> {
        let name = name.to_string();
        self.request(|reply| Intent::CommitValue { name, angle, reply }).await
    }

    pub async fn zero(&self, name: &str) -> SyncResult<f64> {
        let name = name.to_string();
        self.request(|reply| Intent::Zero { name, reply }).await
    }

    pub async fn set_enable(&self, name: &str, enable: bool) -> SyncResult<()> {
        let name = name.to_string();
        self.request(|reply| Intent::SetEnable { name, enable, reply }).await
    }

    pub async fn request_fine_tune(&self, name: &str) -> SyncResult<FineTuneRequest> {
        let name = name.to_string();
        self.request(|reply| Intent::RequestFineTune { name, reply }).await
    }

    /// `None` cancels the ticket.
    pub async fn resolve_fine_tune(&self, ticket: u64, response: Option<&str>) -> SyncResult<Option<f64>> {
        let response = response.map(str::to_string);
        self.request(|reply| Intent::ResolveFineTune { ticket, response, reply })
            .await
    }

    // =========================================================================
    // Cluster-wide
    // =========================================================================

    pub async fn enable_all(&self, enable: bool) -> SyncResult<()> {
        self.request(|reply| Intent::EnableAll { enable, reply }).await
    }

    pub async fn zero_all(&self) -> SyncResult<()> {
        self.request(|reply| Intent::ZeroAll { reply }).await
    }

    pub async fn wave(&self) -> SyncResult<()> {
        self.request(|reply| Intent::Wave { reply }).await
    }

    pub async fn emergency_stop(&self) -> SyncResult<()> {
        self.request(|reply| Intent::EmergencyStop { reply }).await
    }

    pub async fn refresh(&self) -> SyncResult<()> {
        self.request(|reply| Intent::Refresh { reply }).await
    }

    // =========================================================================
    // Presets
    // =========================================================================

    pub async fn save_preset(&self, name: &str) -> SyncResult<PresetSaved> {
        let name = name.to_string();
        self.request(|reply| Intent::SavePreset { name, reply }).await
    }

    pub async fn load_preset(&self, name: &str) -> SyncResult<PresetLoadReport> {
        let name = name.to_string();
        self.request(|reply| Intent::LoadPreset { name, reply }).await
    }

    pub async fn delete_preset(&self, name: &str) -> SyncResult<PresetRemoval> {
        let name = name.to_string();
        self.request(|reply| Intent::DeletePreset { name, reply }).await
    }

    pub async fn list_presets(&self) -> SyncResult<Vec<String>> {
        self.request(|reply| Intent::ListPresets { reply }).await
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Registers a handler that runs on the agent task once per event of
    /// `kind`, in arrival order.
    pub async fn subscribe<F>(&self, kind: EventKind, handler: F) -> SyncResult<SubscriptionId>
    where
        F: FnMut(&ServerEvent) + Send + 'static,
    {
        let handler: BoxedHandler = Box::new(handler);
        self.request(|reply| Intent::Subscribe { kind, handler, reply })
            .await
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) -> SyncResult<bool> {
        self.request(|reply| Intent::Unsubscribe { id, reply }).await
    }

    /// Stops the agent and shuts the channel down.
    pub async fn shutdown(&self) {
        let _ = self.intents.send(Intent::Shutdown).await;
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

pub struct AgentBuilder<C, B> {
    channel: C,
    backend: B,
    preset_key: Option<String>,
    policy: BoundsPolicy,
    groups: Option<GroupTable>,
    observer: Arc<dyn PanelObserver>,
}

impl<C, B> AgentBuilder<C, B>
where
    C: SyncChannel,
    B: PresetBackend + 'static,
{
    pub fn new(channel: C, backend: B) -> Self {
        AgentBuilder {
            channel,
            backend,
            preset_key: None,
            policy: BoundsPolicy::default(),
            groups: None,
            observer: Arc::new(NoOpObserver),
        }
    }

    /// Takes the bounds policy from the panel config.
    pub fn with_config(self, config: &PanelConfig) -> Self {
        self.with_policy(config.bounds_policy())
    }

    pub fn with_policy(mut self, policy: BoundsPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_groups(mut self, groups: GroupTable) -> Self {
        self.groups = Some(groups);
        self
    }

    pub fn with_preset_key(mut self, key: impl Into<String>) -> Self {
        self.preset_key = Some(key.into());
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn PanelObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Connects the channel and spawns the agent task. Must be called
    /// inside a Tokio runtime.
    pub fn spawn(mut self) -> SyncResult<AgentHandle> {
        let inbound = self.channel.connect()?;

        let mut state = PanelState::new(self.policy);
        if let Some(groups) = self.groups {
            state.store = ActuatorStateStore::with_groups(groups);
        }

        let presets = match self.preset_key {
            Some(key) => PresetStore::with_key(self.backend, key),
            None => PresetStore::new(self.backend),
        };

        let (intent_tx, intent_rx) = mpsc::channel(INTENT_BUFFER);
        let (snapshot_tx, snapshot_rx) = watch::channel(state.snapshot());
        let (notice_tx, _) = broadcast::channel(NOTICE_BUFFER);

        info!(policy = %self.policy, "Spawning control agent");

        let agent = ControlAgent {
            channel: self.channel,
            presets,
            state,
            inbound: InboundHandler::new(),
            router: EventRouter::new(),
            observer: self.observer,
            intents: intent_rx,
            snapshot_tx,
            notice_tx: notice_tx.clone(),
        };
        tokio::spawn(agent.run(inbound));

        Ok(AgentHandle {
            intents: intent_tx,
            snapshot: snapshot_rx,
            notices: notice_tx,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ConnectionState, ControllerEnd, MemoryChannel};
    use crate::inbound::NoticeLevel;
    use crate::protocol::{AllEnabled, EnableAllStarted, MotorEnabled};
    use servo_core::{ActuatorSpec, CoreError, MemoryBackend};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const HUMANOID: [&str; 14] = [
        "Daumen",
        "Handgelenk",
        "Daumen Gelenk",
        "Zeigefinger",
        "Mittelfinger",
        "Ringfinger",
        "Kleiner Finger",
        "Ellbogen",
        "Unterarm",
        "Schulter Vertikal",
        "Schulter Horizontal",
        "Bizeps",
        "Hals",
        "Nacken",
    ];

    fn config_event(names: &[&str]) -> ServerEvent {
        ServerEvent::config(names.iter().enumerate().map(|(i, name)| {
            (
                name.to_string(),
                ActuatorSpec::new("brick-a", i as u32, -90.0, 90.0, 0.0, false),
            )
        }))
    }

    async fn start(names: &[&str]) -> (AgentHandle, ControllerEnd, MemoryBackend) {
        let (channel, controller) = MemoryChannel::pair();
        let backend = MemoryBackend::new();
        let handle = ControlAgent::spawn(channel, backend.clone()).unwrap();
        controller.emit(config_event(names)).await.unwrap();
        controller.emit(ServerEvent::status(true, false)).await.unwrap();
        handle.sync().await.unwrap();
        (handle, controller, backend)
    }

    #[tokio::test]
    async fn test_drag_then_release_round_trip() {
        let (handle, mut controller, _) = start(&["Ellbogen"]).await;

        assert_eq!(handle.preview("Ellbogen", 30.0).await.unwrap(), 30.0);
        let view = handle.sync().await.unwrap().actuator("Ellbogen").cloned().unwrap();
        assert_eq!(view.displayed_angle, 30.0);
        assert!(view.pending);
        assert!(controller.try_next_command().is_none());

        assert_eq!(handle.commit("Ellbogen").await.unwrap(), 30.0);
        assert_eq!(
            controller.try_next_command(),
            Some(Command::set_position("Ellbogen", 30.0))
        );

        controller.emit(ServerEvent::position("Ellbogen", 30.0)).await.unwrap();
        let view = handle.sync().await.unwrap().actuator("Ellbogen").cloned().unwrap();
        assert_eq!(view.confirmed_angle, 30.0);
        assert!(!view.pending);
    }

    #[tokio::test]
    async fn test_enable_all_batch_with_fourteen_actuators() {
        let (handle, mut controller, _) = start(&HUMANOID).await;
        let mut notices = handle.notices();

        handle.enable_all(true).await.unwrap();
        assert_eq!(controller.try_next_command(), Some(Command::EnableAll { enable: true }));

        controller
            .emit(ServerEvent::EnableAllStarted(EnableAllStarted { enabled: true, total: 14 }))
            .await
            .unwrap();
        let snapshot = handle.sync().await.unwrap();
        assert!(!snapshot.affordances.enable_all);
        assert!(!snapshot.affordances.wave);

        assert!(matches!(
            handle.wave().await,
            Err(SyncError::Core(CoreError::BatchInProgress { .. }))
        ));
        assert!(controller.try_next_command().is_none());

        for (i, name) in HUMANOID.iter().enumerate() {
            controller
                .emit(ServerEvent::MotorEnabled(MotorEnabled {
                    name: name.to_string(),
                    enabled: true,
                    progress: i as u32 + 1,
                    total: 14,
                }))
                .await
                .unwrap();
        }
        let snapshot = handle.sync().await.unwrap();
        assert_eq!(snapshot.batch_label.as_deref(), Some("Enabling 14/14..."));

        controller
            .emit(ServerEvent::AllEnabled(AllEnabled { enabled: true }))
            .await
            .unwrap();
        let snapshot = handle.sync().await.unwrap();
        assert!(snapshot.batch.is_none());
        assert!(snapshot.affordances.enable_all);
        assert!(snapshot.actuators.iter().all(|a| a.enabled));
        assert_eq!(notices.recv().await.unwrap().message, "All servos enabled");
    }

    #[tokio::test]
    async fn test_fine_tune_does_not_block_events() {
        let (handle, mut controller, _) = start(&["Ellbogen"]).await;

        let request = handle.request_fine_tune("Ellbogen").await.unwrap();
        assert_eq!(request.base_angle, 0.0);

        controller.emit(ServerEvent::position("Ellbogen", 10.0)).await.unwrap();
        let snapshot = handle.sync().await.unwrap();
        assert_eq!(snapshot.actuator("Ellbogen").unwrap().confirmed_angle, 10.0);
        assert_eq!(snapshot.fine_tunes.len(), 1);

        assert!(matches!(
            handle.resolve_fine_tune(request.ticket, Some("abc")).await,
            Err(SyncError::Core(CoreError::Validation(_)))
        ));
        assert!(controller.try_next_command().is_none());

        assert_eq!(
            handle.resolve_fine_tune(request.ticket, Some("5")).await.unwrap(),
            Some(5.0)
        );
        assert_eq!(
            controller.try_next_command(),
            Some(Command::set_position("Ellbogen", 5.0))
        );

        let cancelled = handle.request_fine_tune("Ellbogen").await.unwrap();
        assert_eq!(handle.resolve_fine_tune(cancelled.ticket, None).await.unwrap(), None);
        assert!(controller.try_next_command().is_none());
        assert!(handle.sync().await.unwrap().fine_tunes.is_empty());
    }

    #[tokio::test]
    async fn test_presets_through_agent() {
        let (handle, mut controller, backend) = start(&["Daumen", "Ellbogen"]).await;

        assert_eq!(
            handle.delete_preset("Nope").await.unwrap(),
            PresetRemoval::NotFound
        );

        handle.preview("Daumen", 12.5).await.unwrap();
        handle.preview("Ellbogen", -20.0).await.unwrap();
        let saved = handle.save_preset("Grip").await.unwrap();
        assert_eq!(saved.entries, 2);
        assert_eq!(handle.list_presets().await.unwrap(), vec!["Grip".to_string()]);

        handle.zero("Daumen").await.unwrap();
        controller.drain_commands();

        let report = handle.load_preset("Grip").await.unwrap();
        assert!(!report.is_partial());
        assert_eq!(
            controller.drain_commands(),
            vec![
                Command::set_position("Daumen", 12.5),
                Command::set_position("Ellbogen", -20.0),
            ]
        );

        let stored = PresetStore::new(backend).list().await.unwrap();
        assert_eq!(stored, vec!["Grip".to_string()]);

        assert!(matches!(
            handle.load_preset("Missing").await,
            Err(SyncError::Core(CoreError::PresetNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_link_loss_warns_and_drops_commands() {
        let (handle, mut controller, _) = start(&["Ellbogen"]).await;
        let mut notices = handle.notices();

        controller.drop_link().await;
        let snapshot = handle.sync().await.unwrap();
        assert_eq!(snapshot.link, ConnectionState::Disconnected);
        assert_eq!(snapshot.status_label, "Not Connected");
        assert_eq!(notices.recv().await.unwrap().level, NoticeLevel::Warning);

        // Optimistic display still happens; the send does not.
        assert_eq!(handle.commit_value("Ellbogen", 15.0).await.unwrap(), 15.0);
        let notice = notices.recv().await.unwrap();
        assert!(notice.message.contains("not sent"));
        assert!(controller.try_next_command().is_none());

        controller.restore_link().await;
        handle.refresh().await.unwrap();
        assert_eq!(controller.try_next_command(), Some(Command::GetPositions));
    }

    #[tokio::test]
    async fn test_batch_interrupted_by_reconnect_is_released_on_resync() {
        let (handle, mut controller, _) = start(&["Ellbogen", "Hals"]).await;
        let mut notices = handle.notices();

        handle.enable_all(true).await.unwrap();
        assert_eq!(controller.try_next_command(), Some(Command::EnableAll { enable: true }));
        controller
            .emit(ServerEvent::EnableAllStarted(EnableAllStarted { enabled: true, total: 2 }))
            .await
            .unwrap();
        controller
            .emit(ServerEvent::MotorEnabled(MotorEnabled {
                name: "Ellbogen".into(),
                enabled: true,
                progress: 1,
                total: 2,
            }))
            .await
            .unwrap();

        // The link drops before all_enabled; the controller resyncs on reconnect
        controller.drop_link().await;
        controller.restore_link().await;
        controller.emit(ServerEvent::status(true, false)).await.unwrap();
        controller.emit(config_event(&["Ellbogen", "Hals"])).await.unwrap();

        let snapshot = handle.sync().await.unwrap();
        assert!(snapshot.batch.is_none());
        assert!(snapshot.affordances.enable_all);
        assert!(snapshot.affordances.disable_all);
        assert!(snapshot.affordances.wave);
        assert_eq!(handle.stats().await.unwrap().abandoned_batches, 1);

        let mut messages = Vec::new();
        while let Ok(notice) = notices.try_recv() {
            messages.push(notice.message);
        }
        assert!(messages.iter().any(|m| m.contains("enable_all") && m.contains("resync")));

        // Batch controls work again
        handle.enable_all(true).await.unwrap();
        assert_eq!(controller.try_next_command(), Some(Command::EnableAll { enable: true }));

        // A straggler from the old batch arrives after the resync
        controller
            .emit(ServerEvent::MotorEnabled(MotorEnabled {
                name: "Hals".into(),
                enabled: true,
                progress: 2,
                total: 2,
            }))
            .await
            .unwrap();
        let snapshot = handle.sync().await.unwrap();
        assert!(snapshot.actuator("Hals").unwrap().enabled);
        assert!(snapshot.batch.is_none());
        assert_eq!(handle.stats().await.unwrap().orphan_progress, 1);
    }

    #[tokio::test]
    async fn test_emergency_stop_is_never_gated() {
        let (handle, mut controller, _) = start(&["Ellbogen"]).await;
        controller.emit(ServerEvent::WaveStarted).await.unwrap();
        handle.sync().await.unwrap();

        handle.emergency_stop().await.unwrap();
        assert_eq!(controller.try_next_command(), Some(Command::EmergencyStop));

        controller.emit(ServerEvent::EmergencyAck).await.unwrap();
        let snapshot = handle.sync().await.unwrap();
        assert!(snapshot.actuators.iter().all(|a| !a.enabled));
    }

    #[tokio::test]
    async fn test_subscribers_see_events_in_order() {
        let (handle, controller, _) = start(&["A1"]).await;
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        let id = handle
            .subscribe(EventKind::PositionUpdate, move |event| {
                if let ServerEvent::PositionUpdate(update) = event {
                    sink.lock().unwrap().push(update.position_deg);
                }
            })
            .await
            .unwrap();

        controller.emit(ServerEvent::position("A1", 1.0)).await.unwrap();
        controller.emit(ServerEvent::enabled("A1", true)).await.unwrap();
        controller.emit(ServerEvent::position("A1", 2.0)).await.unwrap();
        handle.sync().await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![1.0, 2.0]);

        assert!(handle.unsubscribe(id).await.unwrap());
        controller.emit(ServerEvent::position("A1", 3.0)).await.unwrap();
        handle.sync().await.unwrap();
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    struct CountingObserver {
        snapshots: AtomicUsize,
        notices: AtomicUsize,
    }

    impl PanelObserver for CountingObserver {
        fn on_snapshot(&self, _snapshot: &PanelSnapshot) {
            self.snapshots.fetch_add(1, Ordering::SeqCst);
        }

        fn on_notice(&self, _notice: &Notice) {
            self.notices.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_observer_and_shutdown() {
        let observer = Arc::new(CountingObserver {
            snapshots: AtomicUsize::new(0),
            notices: AtomicUsize::new(0),
        });
        let (channel, controller) = MemoryChannel::pair();
        let handle = AgentBuilder::new(channel, MemoryBackend::new())
            .with_policy(BoundsPolicy::Reject)
            .with_observer(observer.clone())
            .spawn()
            .unwrap();

        controller.emit(config_event(&["A1"])).await.unwrap();
        controller.emit(ServerEvent::AllZeroed).await.unwrap();
        handle.sync().await.unwrap();

        assert!(observer.snapshots.load(Ordering::SeqCst) >= 3);
        assert_eq!(observer.notices.load(Ordering::SeqCst), 1);

        assert!(matches!(
            handle.preview("A1", 120.0).await,
            Err(SyncError::Core(CoreError::Validation(_)))
        ));

        handle.shutdown().await;
        assert!(matches!(
            handle.preview("A1", 10.0).await,
            Err(SyncError::ShuttingDown)
        ));
    }
}
