use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::board::{Drawing, Footprint, Via};

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub enum EntityClass {
    Footprints,
    Pads,
    Drawings,
    Vias,
}

impl EntityClass {
    /// Key used for this class in diffs and snapshots.
    pub fn key(self) -> &'static str {
        match self {
            Self::Footprints => "footprints",
            Self::Pads => "pads_pth",
            Self::Drawings => "drawings",
            Self::Vias => "vias",
        }
    }
}

impl std::fmt::Display for EntityClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = match self {
            Self::Footprints => "footprint",
            Self::Pads => "pad",
            Self::Drawings => "drawing",
            Self::Vias => "via",
        };

        write!(f, "{value}")
    }
}

/// One `[field, new_value]` pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldChange(pub String, pub Value);

impl FieldChange {
    pub fn new(field: impl Into<String>, value: Value) -> Self {
        Self(field.into(), value)
    }

    pub fn field(&self) -> &str {
        &self.0
    }

    pub fn value(&self) -> &Value {
        &self.1
    }
}

/// Changes for a single entity, encoded on the wire as `{ "<external_id>": [[field, value], ...] }`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, Vec<FieldChange>>",
    into = "BTreeMap<String, Vec<FieldChange>>"
)]
pub struct ChangedEntry {
    pub external_id: String,
    pub changes: Vec<FieldChange>,
}

impl ChangedEntry {
    pub fn new(external_id: impl Into<String>, changes: Vec<FieldChange>) -> Self {
        Self {
            external_id: external_id.into(),
            changes,
        }
    }
}

impl TryFrom<BTreeMap<String, Vec<FieldChange>>> for ChangedEntry {
    type Error = String;

    fn try_from(value: BTreeMap<String, Vec<FieldChange>>) -> Result<Self, Self::Error> {
        if value.len() != 1 {
            return Err(format!(
                "changed entry must hold exactly one entity id, found {}",
                value.len()
            ));
        }

        let (external_id, changes) = value
            .into_iter()
            .next()
            .ok_or_else(|| "changed entry is empty".to_string())?;
        Ok(Self {
            external_id,
            changes,
        })
    }
}

impl From<ChangedEntry> for BTreeMap<String, Vec<FieldChange>> {
    fn from(value: ChangedEntry) -> Self {
        BTreeMap::from([(value.external_id, value.changes)])
    }
}

/// Three-way diff for one entity class. Empty lists are omitted on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(bound(serialize = "T: Serialize", deserialize = "T: DeserializeOwned"))]
pub struct ClassDiff<T> {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub added: Vec<T>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changed: Vec<ChangedEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<String>,
}

impl<T> ClassDiff<T> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }

    /// Drops the diff entirely when it carries nothing.
    pub fn non_empty(self) -> Option<Self> {
        if self.is_empty() {
            None
        } else {
            Some(self)
        }
    }
}

impl<T> Default for ClassDiff<T> {
    fn default() -> Self {
        Self {
            added: Vec::new(),
            changed: Vec::new(),
            removed: Vec::new(),
        }
    }
}

/// Board-level diff: a class key is present only when that class changed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BoardDiff {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footprints: Option<ClassDiff<Footprint>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drawings: Option<ClassDiff<Drawing>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vias: Option<ClassDiff<Via>>,
}

impl BoardDiff {
    pub fn from_parts(
        footprints: ClassDiff<Footprint>,
        drawings: ClassDiff<Drawing>,
        vias: ClassDiff<Via>,
    ) -> Self {
        Self {
            footprints: footprints.non_empty(),
            drawings: drawings.non_empty(),
            vias: vias.non_empty(),
        }
    }

    pub fn is_empty(&self) -> bool {
        let empty = |diff: Option<bool>| diff.unwrap_or(true);
        empty(self.footprints.as_ref().map(ClassDiff::is_empty))
            && empty(self.drawings.as_ref().map(ClassDiff::is_empty))
            && empty(self.vias.as_ref().map(ClassDiff::is_empty))
    }

    /// Classes carrying at least one entry, in application order.
    pub fn classes(&self) -> Vec<EntityClass> {
        let mut classes = Vec::new();
        if self.footprints.as_ref().is_some_and(|diff| !diff.is_empty()) {
            classes.push(EntityClass::Footprints);
        }
        if self.drawings.as_ref().is_some_and(|diff| !diff.is_empty()) {
            classes.push(EntityClass::Drawings);
        }
        if self.vias.as_ref().is_some_and(|diff| !diff.is_empty()) {
            classes.push(EntityClass::Vias);
        }
        classes
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{BoardDiff, ChangedEntry, ClassDiff, EntityClass, FieldChange};
    use crate::model::board::Via;

    #[test]
    fn changed_entry_uses_single_key_map() {
        let entry = ChangedEntry::new(
            "P2",
            vec![FieldChange::new("pos_delta", json!([3_000_000, 0]))],
        );

        let encoded = serde_json::to_value(&entry).expect("entry should encode");
        assert_eq!(encoded, json!({"P2": [["pos_delta", [3_000_000, 0]]]}));

        let decoded: ChangedEntry =
            serde_json::from_value(encoded).expect("entry should decode");
        assert_eq!(decoded, entry);
    }

    #[test]
    fn changed_entry_rejects_multiple_ids() {
        let result = serde_json::from_value::<ChangedEntry>(json!({"A": [], "B": []}));
        assert!(result.is_err());
    }

    #[test]
    fn empty_lists_are_omitted() {
        let diff = ClassDiff::<Via> {
            removed: vec!["V1".to_string()],
            ..ClassDiff::default()
        };

        let encoded = serde_json::to_value(&diff).expect("diff should encode");
        assert_eq!(encoded, json!({"removed": ["V1"]}));
    }

    #[test]
    fn board_diff_drops_empty_classes() {
        let diff = BoardDiff::from_parts(
            ClassDiff::default(),
            ClassDiff::default(),
            ClassDiff {
                removed: vec!["V1".to_string()],
                ..ClassDiff::default()
            },
        );

        assert!(diff.footprints.is_none());
        assert!(diff.drawings.is_none());
        assert_eq!(diff.classes(), vec![EntityClass::Vias]);

        let encoded = serde_json::to_value(&diff).expect("diff should encode");
        assert_eq!(encoded, json!({"vias": {"removed": ["V1"]}}));
    }

    #[test]
    fn present_but_empty_class_counts_as_empty() {
        let diff: BoardDiff =
            serde_json::from_value(json!({"drawings": {}})).expect("diff should decode");
        assert!(diff.is_empty());
        assert!(diff.classes().is_empty());
    }
}
