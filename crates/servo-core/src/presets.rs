//! # Preset Store
//!
//! Named poses kept in one durable record, independent of the session.
//!
//! ## Record Layout
//! ```text
//! key:   "humanoid_presets"
//! value: { "Greeting": { "Ellbogen": 45.0, "Daumen": -10.0 },
//!          "Rest":     { "Ellbogen": 0.0,  "Daumen": 0.0 } }
//! ```
//!
//! There is no schema version. Every operation re-reads the record, so two
//! panels sharing a backend race with last-write-wins semantics: a save in
//! one panel can silently drop a preset another panel saved in between. No
//! locking or versioning is attempted.
//!
//! Loading is not transactional. Each entry becomes an independent
//! `set_position`; the returned [`PresetLoadReport`] says which ones went
//! out and which were skipped, and nothing is rolled back.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex};

use crate::command::CommandSink;
use crate::dispatcher::CommandDispatcher;
use crate::error::{CoreError, CoreResult};
use crate::store::ActuatorStateStore;
use crate::validation::validate_preset_name;
use crate::PRESET_RECORD_KEY;

/// Actuator name to angle.
pub type Pose = BTreeMap<String, f64>;

type PresetCollection = BTreeMap<String, Pose>;

// =============================================================================
// Backend
// =============================================================================

/// Durable key-value storage for the preset record.
pub trait PresetBackend: Send + Sync {
    fn get(&self, key: &str) -> impl Future<Output = CoreResult<Option<String>>> + Send;

    fn set(&self, key: &str, value: String) -> impl Future<Output = CoreResult<()>> + Send;
}

/// In-process backend. Clones share the same map, which makes it easy to
/// model two panels writing to one store.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    records: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> CoreResult<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.records
            .lock()
            .map_err(|_| CoreError::Storage("memory backend lock poisoned".to_string()))
    }
}

impl PresetBackend for MemoryBackend {
    async fn get(&self, key: &str) -> CoreResult<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> CoreResult<()> {
        self.lock()?.insert(key.to_string(), value);
        Ok(())
    }
}

// =============================================================================
// Outcomes
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct PresetSaved {
    pub name: String,
    pub entries: usize,
    /// An existing preset of the same name was overwritten.
    pub replaced: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresetRemoval {
    Removed,
    NotFound,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// The actuator is not in the current collection.
    UnknownActuator,
    /// The bounds policy refused the angle.
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PresetLoadReport {
    pub name: String,
    /// `(actuator, angle sent)` in record order.
    pub emitted: Vec<(String, f64)>,
    pub skipped: Vec<(String, SkipReason)>,
}

impl PresetLoadReport {
    pub fn is_partial(&self) -> bool {
        !self.skipped.is_empty()
    }
}

// =============================================================================
// Store
// =============================================================================

pub struct PresetStore<B> {
    backend: B,
    key: String,
}

impl<B: PresetBackend> PresetStore<B> {
    pub fn new(backend: B) -> Self {
        Self::with_key(backend, PRESET_RECORD_KEY)
    }

    pub fn with_key(backend: B, key: impl Into<String>) -> Self {
        Self {
            backend,
            key: key.into(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    async fn read_all(&self) -> CoreResult<PresetCollection> {
        match self.backend.get(&self.key).await? {
            None => Ok(PresetCollection::new()),
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|e| CoreError::CorruptPresetRecord(e.to_string())),
        }
    }

    async fn write_all(&self, presets: &PresetCollection) -> CoreResult<()> {
        let raw = serde_json::to_string(presets)
            .map_err(|e| CoreError::Storage(format!("cannot encode presets: {}", e)))?;
        self.backend.set(&self.key, raw).await
    }

    /// Captures the displayed angle of every known actuator under `name`.
    /// An existing preset with that name is overwritten.
    pub async fn save(&self, name: &str, store: &ActuatorStateStore) -> CoreResult<PresetSaved> {
        let name = validate_preset_name(name)?;
        let pose = store.displayed_pose();
        let entries = pose.len();

        let mut presets = self.read_all().await?;
        let replaced = presets.insert(name.clone(), pose).is_some();
        self.write_all(&presets).await?;

        Ok(PresetSaved {
            name,
            entries,
            replaced,
        })
    }

    /// Emits one `set_position` per entry of the saved pose.
    pub async fn load(
        &self,
        name: &str,
        store: &mut ActuatorStateStore,
        dispatcher: &CommandDispatcher,
        sink: &mut (dyn CommandSink + Send),
    ) -> CoreResult<PresetLoadReport> {
        let name = validate_preset_name(name)?;
        let pose = self
            .get(&name)
            .await?
            .ok_or_else(|| CoreError::PresetNotFound(name.clone()))?;

        let mut report = PresetLoadReport {
            name,
            ..PresetLoadReport::default()
        };

        for (actuator, angle) in pose {
            if !store.contains(&actuator) {
                report.skipped.push((actuator, SkipReason::UnknownActuator));
                continue;
            }
            match dispatcher.commit_value(store, &actuator, angle, &mut *sink) {
                Ok(sent) => report.emitted.push((actuator, sent)),
                Err(e) => report.skipped.push((actuator, SkipReason::Rejected(e.to_string()))),
            }
        }

        Ok(report)
    }

    /// Deleting a name that is not there is a reported no-op.
    pub async fn delete(&self, name: &str) -> CoreResult<PresetRemoval> {
        let name = validate_preset_name(name)?;
        let mut presets = self.read_all().await?;

        if presets.remove(&name).is_none() {
            return Ok(PresetRemoval::NotFound);
        }

        self.write_all(&presets).await?;
        Ok(PresetRemoval::Removed)
    }

    /// All preset names, sorted lexically.
    pub async fn list(&self) -> CoreResult<Vec<String>> {
        Ok(self.read_all().await?.into_keys().collect())
    }

    pub async fn get(&self, name: &str) -> CoreResult<Option<Pose>> {
        Ok(self.read_all().await?.remove(name))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
