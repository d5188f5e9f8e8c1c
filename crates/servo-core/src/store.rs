//! # Actuator State Store
//!
//! Authoritative mirror of every actuator for the session and the single
//! source of truth for rendering.
//!
//! ## Merge Rules
//! ```text
//! ┌──────────────────────┬──────────────────────────────────────────────────┐
//! │ Inbound              │ Effect                                           │
//! ├──────────────────────┼──────────────────────────────────────────────────┤
//! │ config               │ Replace the whole collection, displayed =        │
//! │                      │ confirmed = position_deg                         │
//! │ position_update      │ displayed = confirmed = angle                    │
//! │ position rejected    │ displayed = confirmed (drop the optimistic value)│
//! │ enable_update        │ enabled = value                                  │
//! │ current_update       │ merge per name, unknown names skipped one by one │
//! │ positions            │ position_update for every entry                  │
//! └──────────────────────┴──────────────────────────────────────────────────┘
//! ```
//!
//! Updates carry absolute values, so interleaving across actuators is
//! harmless. Within one actuator an optional `seq` orders updates: when it
//! is present only strictly increasing values are applied. Without it the
//! last arrival wins.
//!
//! Unknown names are never fatal. The store reports them through
//! [`UpdateOutcome::UnknownTarget`] and leaves everything else untouched.

use std::collections::BTreeMap;

use crate::error::{CoreError, CoreResult};
use crate::groups::{display_order_key, GroupTable};
use crate::types::{Actuator, ActuatorSpec, ActuatorView};

/// What happened to a single inbound update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    /// No actuator with that name in the current collection.
    UnknownTarget,
    /// Sequence number not newer than the last one applied.
    Stale { last: u64, received: u64 },
}

impl UpdateOutcome {
    #[inline]
    pub fn is_applied(&self) -> bool {
        matches!(self, UpdateOutcome::Applied)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ActuatorStateStore {
    actuators: BTreeMap<String, Actuator>,
    groups: GroupTable,
    total_current_ma: Option<f64>,
}

impl ActuatorStateStore {
    /// Creates an empty store using the humanoid group table.
    pub fn new() -> Self {
        Self::with_groups(GroupTable::humanoid())
    }

    pub fn with_groups(groups: GroupTable) -> Self {
        Self {
            actuators: BTreeMap::new(),
            groups,
            total_current_ma: None,
        }
    }

    // =========================================================================
    // Inbound application
    // =========================================================================

    /// Replaces the entire collection from a controller snapshot.
    ///
    /// Returns the number of actuators now tracked. Sequencing and current
    /// readings start over.
    pub fn apply_config<I>(&mut self, specs: I) -> usize
    where
        I: IntoIterator<Item = (String, ActuatorSpec)>,
    {
        let groups = &self.groups;
        self.actuators = specs
            .into_iter()
            .map(|(name, spec)| {
                let mut actuator = Actuator::from_spec(name.clone(), spec);
                actuator.group = groups.lookup(&name);
                (name, actuator)
            })
            .collect();
        self.total_current_ma = None;
        self.actuators.len()
    }

    /// Sets both displayed and confirmed angle to an absolute value.
    pub fn apply_position_update(&mut self, name: &str, angle: f64, seq: Option<u64>) -> UpdateOutcome {
        let Some(actuator) = self.actuators.get_mut(name) else {
            return UpdateOutcome::UnknownTarget;
        };
        if let Err(stale) = admit(actuator, seq) {
            return stale;
        }
        actuator.displayed_angle = angle;
        actuator.confirmed_angle = angle;
        UpdateOutcome::Applied
    }

    /// The controller refused a position. The optimistic angle is dropped.
    pub fn apply_position_rejected(&mut self, name: &str, seq: Option<u64>) -> UpdateOutcome {
        let Some(actuator) = self.actuators.get_mut(name) else {
            return UpdateOutcome::UnknownTarget;
        };
        if let Err(stale) = admit(actuator, seq) {
            return stale;
        }
        actuator.displayed_angle = actuator.confirmed_angle;
        UpdateOutcome::Applied
    }

    pub fn apply_enable_update(&mut self, name: &str, enabled: bool, seq: Option<u64>) -> UpdateOutcome {
        let Some(actuator) = self.actuators.get_mut(name) else {
            return UpdateOutcome::UnknownTarget;
        };
        if let Err(stale) = admit(actuator, seq) {
            return stale;
        }
        actuator.enabled = enabled;
        UpdateOutcome::Applied
    }

    /// Merges current readings. Not atomic: known names are applied, unknown
    /// ones are returned.
    pub fn apply_current_update(
        &mut self,
        total: Option<f64>,
        currents: &BTreeMap<String, f64>,
    ) -> Vec<String> {
        if total.is_some() {
            self.total_current_ma = total;
        }

        let mut unknown = Vec::new();
        for (name, ma) in currents {
            match self.actuators.get_mut(name) {
                Some(actuator) => actuator.current_ma = Some(*ma),
                None => unknown.push(name.clone()),
            }
        }
        unknown
    }

    /// Bulk resync from a `positions` reply. Returns the unknown names.
    pub fn apply_positions(&mut self, positions: &BTreeMap<String, f64>) -> Vec<String> {
        positions
            .iter()
            .filter(|(name, angle)| !self.apply_position_update(name, **angle, None).is_applied())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Sets every actuator's enabled flag. Returns how many were touched.
    pub fn set_all_enabled(&mut self, enabled: bool) -> usize {
        for actuator in self.actuators.values_mut() {
            actuator.enabled = enabled;
        }
        self.actuators.len()
    }

    // =========================================================================
    // Local (optimistic) mutation
    // =========================================================================

    pub(crate) fn set_displayed(&mut self, name: &str, angle: f64) -> CoreResult<()> {
        let actuator = self
            .actuators
            .get_mut(name)
            .ok_or_else(|| CoreError::UnknownActuator(name.to_string()))?;
        actuator.displayed_angle = angle;
        Ok(())
    }

    pub(crate) fn set_enabled_local(&mut self, name: &str, enabled: bool) -> CoreResult<()> {
        let actuator = self
            .actuators
            .get_mut(name)
            .ok_or_else(|| CoreError::UnknownActuator(name.to_string()))?;
        actuator.enabled = enabled;
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn get(&self, name: &str) -> Option<&Actuator> {
        self.actuators.get(name)
    }

    pub(crate) fn require(&self, name: &str) -> CoreResult<&Actuator> {
        self.actuators
            .get(name)
            .ok_or_else(|| CoreError::UnknownActuator(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actuators.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.actuators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actuators.is_empty()
    }

    /// Snapshot for rendering, in card order (part, then name).
    pub fn get_all(&self) -> Vec<ActuatorView> {
        let mut actuators: Vec<&Actuator> = self.actuators.values().collect();
        actuators.sort_by(|a, b| {
            display_order_key(&a.name, a.group).cmp(&display_order_key(&b.name, b.group))
        });
        actuators.into_iter().map(Actuator::view).collect()
    }

    /// Displayed angle of every actuator, keyed by name.
    pub fn displayed_pose(&self) -> BTreeMap<String, f64> {
        self.actuators
            .iter()
            .map(|(name, actuator)| (name.clone(), actuator.displayed_angle))
            .collect()
    }

    pub fn total_current_ma(&self) -> Option<f64> {
        self.total_current_ma
    }
}

fn admit(actuator: &mut Actuator, seq: Option<u64>) -> Result<(), UpdateOutcome> {
    let Some(received) = seq else {
        return Ok(());
    };
    match actuator.last_seq {
        Some(last) if received <= last => Err(UpdateOutcome::Stale { last, received }),
        _ => {
            actuator.last_seq = Some(received);
            Ok(())
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(names: &[&str]) -> ActuatorStateStore {
        let mut store = ActuatorStateStore::new();
        store.apply_config(names.iter().enumerate().map(|(i, name)| {
            (
                name.to_string(),
                ActuatorSpec::new("brick-a", i as u32, -90.0, 90.0, 0.0, true),
            )
        }));
        store
    }

    #[test]
    fn test_apply_config_replaces_collection() {
        let mut store = store_with(&["A1", "A2", "A3"]);
        store.set_displayed("A1", 30.0).unwrap();

        let count = store.apply_config(vec![(
            "B1".to_string(),
            ActuatorSpec::new("brick-b", 0, -45.0, 45.0, 10.0, false),
        )]);

        assert_eq!(count, 1);
        assert!(!store.contains("A1"));
        let b1 = store.get("B1").unwrap();
        assert_eq!(b1.displayed_angle, 10.0);
        assert_eq!(b1.confirmed_angle, 10.0);
        assert!(!b1.enabled);
    }

    #[test]
    fn test_position_update_is_idempotent() {
        let mut store = store_with(&["A1"]);

        assert_eq!(store.apply_position_update("A1", 45.0, None), UpdateOutcome::Applied);
        let once = store.get("A1").unwrap().clone();
        assert_eq!(store.apply_position_update("A1", 45.0, None), UpdateOutcome::Applied);
        let twice = store.get("A1").unwrap();

        assert_eq!(&once, twice);
        assert_eq!(twice.displayed_angle, 45.0);
        assert_eq!(twice.confirmed_angle, 45.0);
    }

    #[test]
    fn test_unknown_name_leaves_store_untouched() {
        let mut store = store_with(&["A1", "A2"]);
        let before = store.get_all();

        assert_eq!(
            store.apply_position_update("ghost", 10.0, None),
            UpdateOutcome::UnknownTarget
        );
        assert_eq!(
            store.apply_enable_update("ghost", false, None),
            UpdateOutcome::UnknownTarget
        );

        assert_eq!(store.get_all(), before);
    }

    #[test]
    fn test_stale_sequence_is_discarded() {
        let mut store = store_with(&["A1"]);

        assert!(store.apply_position_update("A1", 10.0, Some(5)).is_applied());
        assert_eq!(
            store.apply_position_update("A1", 3.0, Some(4)),
            UpdateOutcome::Stale { last: 5, received: 4 }
        );
        assert_eq!(
            store.apply_enable_update("A1", false, Some(5)),
            UpdateOutcome::Stale { last: 5, received: 5 }
        );
        assert_eq!(store.get("A1").unwrap().confirmed_angle, 10.0);
        assert!(store.get("A1").unwrap().enabled);

        // Unsequenced updates are still last-arrived-wins
        assert!(store.apply_position_update("A1", 7.0, None).is_applied());
        assert_eq!(store.get("A1").unwrap().confirmed_angle, 7.0);

        // A new snapshot starts sequencing over
        let mut store = store_with(&["A1"]);
        assert!(store.apply_position_update("A1", 1.0, Some(1)).is_applied());
    }

    #[test]
    fn test_rejected_position_reverts_display() {
        let mut store = store_with(&["A1"]);
        store.set_displayed("A1", 80.0).unwrap();
        assert!(store.get("A1").unwrap().is_pending());

        assert!(store.apply_position_rejected("A1", None).is_applied());
        let a1 = store.get("A1").unwrap();
        assert_eq!(a1.displayed_angle, 0.0);
        assert!(!a1.is_pending());
    }

    #[test]
    fn test_current_update_is_partial() {
        let mut store = store_with(&["A1", "A2"]);
        let mut currents = BTreeMap::new();
        currents.insert("A1".to_string(), 50.0);
        currents.insert("ghost".to_string(), 70.0);
        currents.insert("A2".to_string(), 40.0);

        let unknown = store.apply_current_update(Some(160.0), &currents);

        assert_eq!(unknown, vec!["ghost".to_string()]);
        assert_eq!(store.get("A1").unwrap().current_ma, Some(50.0));
        assert_eq!(store.get("A2").unwrap().current_ma, Some(40.0));
        assert_eq!(store.total_current_ma(), Some(160.0));
    }

    #[test]
    fn test_positions_resync() {
        let mut store = store_with(&["A1", "A2"]);
        let mut positions = BTreeMap::new();
        positions.insert("A1".to_string(), 12.5);
        positions.insert("old".to_string(), 3.0);

        let unknown = store.apply_positions(&positions);

        assert_eq!(unknown, vec!["old".to_string()]);
        assert_eq!(store.get("A1").unwrap().displayed_angle, 12.5);
        assert_eq!(store.get("A2").unwrap().displayed_angle, 0.0);
    }

    #[test]
    fn test_get_all_uses_card_order() {
        let store = store_with(&["Nacken", "Daumen", "Tail", "Ellbogen"]);
        let names: Vec<_> = store.get_all().into_iter().map(|v| v.name).collect();
        assert_eq!(names, vec!["Ellbogen", "Daumen", "Nacken", "Tail"]);
    }

    #[test]
    fn test_local_mutation_of_unknown_actuator_fails() {
        let mut store = store_with(&["A1"]);
        assert!(matches!(
            store.set_displayed("ghost", 1.0),
            Err(CoreError::UnknownActuator(_))
        ));
    }
}
