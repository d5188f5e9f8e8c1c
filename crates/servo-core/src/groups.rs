//! # Group Metadata
//!
//! Display-only classification of actuators by body side and part.
//! Groups decide badge text and card order. They never change behaviour.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
    Center,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum BodyPart {
    Hand,
    Arm,
    Head,
}

impl BodyPart {
    pub fn as_str(&self) -> &'static str {
        match self {
            BodyPart::Hand => "hand",
            BodyPart::Arm => "arm",
            BodyPart::Head => "head",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ServoGroup {
    pub side: Side,
    pub part: BodyPart,
}

impl ServoGroup {
    pub const fn new(side: Side, part: BodyPart) -> Self {
        Self { side, part }
    }

    /// Badge labels, side first. Center gets no side badge.
    pub fn badges(&self) -> Vec<&'static str> {
        let mut badges = Vec::with_capacity(2);
        match self.side {
            Side::Left => badges.push("LEFT"),
            Side::Right => badges.push("RIGHT"),
            Side::Center => {}
        }
        badges.push(match self.part {
            BodyPart::Hand => "HAND",
            BodyPart::Arm => "ARM",
            BodyPart::Head => "HEAD",
        });
        badges
    }
}

/// Name to group lookup.
#[derive(Debug, Clone, Default)]
pub struct GroupTable {
    entries: HashMap<String, ServoGroup>,
}

impl GroupTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The table for the default humanoid rig (right arm, hand and head).
    pub fn humanoid() -> Self {
        use BodyPart::*;
        use Side::*;

        let mut table = Self::empty();
        for (name, side, part) in [
            ("Daumen", Right, Hand),
            ("Handgelenk", Right, Hand),
            ("Daumen Gelenk", Right, Hand),
            ("Zeigefinger", Right, Hand),
            ("Mittelfinger", Right, Hand),
            ("Ringfinger", Right, Hand),
            ("Kleiner Finger", Right, Hand),
            ("Ellbogen", Right, Arm),
            ("Unterarm", Right, Arm),
            ("Schulter Vertikal", Right, Arm),
            ("Schulter Horizontal", Right, Arm),
            ("Bizeps", Right, Arm),
            ("Hals", Center, Head),
            ("Nacken", Center, Head),
        ] {
            table.insert(name, ServoGroup::new(side, part));
        }
        table
    }

    pub fn insert(&mut self, name: impl Into<String>, group: ServoGroup) {
        self.entries.insert(name.into(), group);
    }

    pub fn lookup(&self, name: &str) -> Option<ServoGroup> {
        self.entries.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Sort key for card order: part label, unclassified last, then name.
pub(crate) fn display_order_key<'a>(name: &'a str, group: Option<ServoGroup>) -> (&'static str, &'a str) {
    (group.map(|g| g.part.as_str()).unwrap_or("~"), name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_humanoid_table() {
        let table = GroupTable::humanoid();
        assert_eq!(table.len(), 14);
        assert_eq!(
            table.lookup("Nacken"),
            Some(ServoGroup::new(Side::Center, BodyPart::Head))
        );
        assert_eq!(table.lookup("Tail"), None);
    }

    #[test]
    fn test_badges() {
        let group = ServoGroup::new(Side::Right, BodyPart::Arm);
        assert_eq!(group.badges(), vec!["RIGHT", "ARM"]);

        let group = ServoGroup::new(Side::Center, BodyPart::Head);
        assert_eq!(group.badges(), vec!["HEAD"]);
    }

    #[test]
    fn test_display_order() {
        let arm = Some(ServoGroup::new(Side::Right, BodyPart::Arm));
        let hand = Some(ServoGroup::new(Side::Right, BodyPart::Hand));

        let mut keys = vec![
            display_order_key("zzz", None),
            display_order_key("Daumen", hand),
            display_order_key("Ellbogen", arm),
            display_order_key("Bizeps", arm),
        ];
        keys.sort();
        let names: Vec<_> = keys.iter().map(|(_, n)| *n).collect();
        assert_eq!(names, vec!["Bizeps", "Ellbogen", "Daumen", "zzz"]);
    }
}
