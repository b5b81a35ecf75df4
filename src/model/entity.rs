//! Record identity and content hashing shared by every snapshot entity.
//!
//! A record has three bookkeeping fields: `kiid` (external id), `seq` (local display
//! order) and `hash`. Everything else is content. The content hash is a SHA-256 over the
//! canonical JSON of the content fields: keys sorted, floats rounded to
//! `1 / FLOAT_SCALE` and negative zero folded, so equal content always hashes equal
//! regardless of how the record was built.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};

use crate::error::SyncError;
use crate::model::diff::FieldChange;

pub const KIID_FIELD: &str = "kiid";
pub const SEQ_FIELD: &str = "seq";
pub const HASH_FIELD: &str = "hash";

const IDENTITY_FIELDS: [&str; 3] = [KIID_FIELD, SEQ_FIELD, HASH_FIELD];

/// Floats are compared and hashed at a resolution of `1 / FLOAT_SCALE`.
pub const FLOAT_SCALE: f64 = 1e9;

pub trait Entity: Clone + Serialize + DeserializeOwned {
    fn external_id(&self) -> &str;

    fn sequence_id(&self) -> u32;

    fn set_sequence_id(&mut self, sequence_id: u32);

    fn content_hash(&self) -> &str;

    fn set_content_hash(&mut self, hash: String);

    /// Canonical content fields, bookkeeping fields excluded.
    fn fields(&self) -> Result<Map<String, Value>, SyncError> {
        content_fields(self)
    }

    fn compute_hash(&self) -> Result<String, SyncError> {
        Ok(canonical_hash(&self.fields()?))
    }

    fn refresh_hash(&mut self) -> Result<(), SyncError> {
        let hash = self.compute_hash()?;
        self.set_content_hash(hash);
        Ok(())
    }

    /// Fields of `self` whose value differs from `stored`.
    fn field_changes(&self, stored: &Self) -> Result<Vec<FieldChange>, SyncError> {
        Ok(diff_fields(&stored.fields()?, &self.fields()?))
    }

    /// Takes over the content of a freshly extracted record, keeping local bookkeeping.
    fn absorb(&mut self, fresh: Self) -> Result<(), SyncError> {
        let sequence_id = self.sequence_id();
        *self = fresh;
        self.set_sequence_id(sequence_id);
        self.refresh_hash()
    }

    /// Stamps a record seen for the first time with its sequence id.
    fn assign_new(&mut self, sequence_id: u32) -> Result<(), SyncError> {
        self.set_sequence_id(sequence_id);
        self.refresh_hash()
    }

    /// Overlays `[field, value]` pairs in order; a later pair for the same field wins.
    fn apply_changes(&mut self, changes: &[FieldChange]) -> Result<(), SyncError> {
        overlay_changes(self, changes)?;
        self.refresh_hash()
    }
}

/// Writes `changes` over the serialized form of `record` and reads it back.
pub fn overlay_changes<T: Entity>(
    record: &mut T,
    changes: &[FieldChange],
) -> Result<(), SyncError> {
    if changes.is_empty() {
        return Ok(());
    }

    let mut map = record_map(record)?;
    for change in changes {
        if IDENTITY_FIELDS.contains(&change.field()) {
            return Err(SyncError::InvalidField {
                field: change.field().to_string(),
                reason: "bookkeeping fields cannot be changed by a diff".to_string(),
            });
        }
        map.insert(change.field().to_string(), change.value().clone());
    }

    let updated: T = serde_json::from_value(Value::Object(map))
        .map_err(|err| SyncError::invalid_field(changed_field_names(changes).as_str(), err))?;
    *record = updated;
    Ok(())
}

pub fn find_entity<'a, T: Entity>(records: &'a [T], external_id: &str) -> Option<&'a T> {
    records
        .iter()
        .find(|record| record.external_id() == external_id)
}

pub fn find_entity_mut<'a, T: Entity>(
    records: &'a mut [T],
    external_id: &str,
) -> Option<&'a mut T> {
    records
        .iter_mut()
        .find(|record| record.external_id() == external_id)
}

/// Replaces the record with the same external id, or appends it.
pub fn upsert_entity<T: Entity>(records: &mut Vec<T>, record: T) {
    match find_entity_mut(records, record.external_id()) {
        Some(slot) => *slot = record,
        None => records.push(record),
    }
}

pub fn remove_entity<T: Entity>(records: &mut Vec<T>, external_id: &str) -> Option<T> {
    let index = records
        .iter()
        .position(|record| record.external_id() == external_id)?;
    Some(records.remove(index))
}

pub fn max_sequence_id<T: Entity>(records: &[T]) -> u32 {
    records.iter().map(Entity::sequence_id).max().unwrap_or(0)
}

/// Full serialized record, bookkeeping fields included.
pub fn record_map<T: Serialize>(record: &T) -> Result<Map<String, Value>, SyncError> {
    match serde_json::to_value(record) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(SyncError::Encode(format!(
            "entity record must serialize to an object, got `{other}`"
        ))),
        Err(err) => Err(SyncError::Encode(err.to_string())),
    }
}

pub fn content_fields<T: Serialize>(record: &T) -> Result<Map<String, Value>, SyncError> {
    let mut map = record_map(record)?;
    for field in IDENTITY_FIELDS {
        map.remove(field);
    }

    Ok(map
        .into_iter()
        .map(|(key, value)| (key, canonicalize(value)))
        .collect())
}

pub fn canonical_hash(fields: &Map<String, Value>) -> String {
    let mut hasher = Sha256::new();
    let canonical = canonicalize(Value::Object(fields.clone()));
    hasher.update(canonical.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Fields present in `fresh` whose value differs from `stored`, in key order.
pub fn diff_fields(stored: &Map<String, Value>, fresh: &Map<String, Value>) -> Vec<FieldChange> {
    fresh
        .iter()
        .filter(|(key, value)| stored.get(key.as_str()) != Some(*value))
        .map(|(key, value)| FieldChange::new(key.clone(), value.clone()))
        .collect()
}

pub fn canonicalize(value: Value) -> Value {
    match value {
        Value::Number(number) if number.is_f64() => {
            let raw = number.as_f64().unwrap_or_default();
            let rounded = (raw * FLOAT_SCALE).round() / FLOAT_SCALE;
            let folded = if rounded == 0.0 { 0.0 } else { rounded };
            Number::from_f64(folded).map_or(Value::Null, Value::Number)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|left, right| left.0.cmp(&right.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, canonicalize(value)))
                    .collect(),
            )
        }
        other => other,
    }
}

fn changed_field_names(changes: &[FieldChange]) -> String {
    changes
        .iter()
        .map(FieldChange::field)
        .collect::<Vec<_>>()
        .join(",")
}
