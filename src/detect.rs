//! Change detection: compares a live design-source enumeration with the snapshot and
//! produces a three-way diff per entity class, updating the snapshot in place.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::error::SyncError;
use crate::model::board::BoardSnapshot;
use crate::model::diff::{BoardDiff, ChangedEntry, ClassDiff, EntityClass};
use crate::model::entity::{max_sequence_id, Entity};
use crate::source::DesignSource;

/// Diffs one entity class.
///
/// Malformed records are logged and skipped; when their id is known they still count as
/// present, so a record that fails to extract is never reported as removed. New records get
/// the next sequence id, changed records are absorbed into `stored` with their bookkeeping
/// kept.
pub fn detect_class<T: Entity>(
    class: EntityClass,
    source: Vec<Result<T, SyncError>>,
    stored: &mut Vec<T>,
) -> ClassDiff<T> {
    let mut diff = ClassDiff::default();
    let mut present = HashSet::new();
    let mut next_sequence = max_sequence_id(stored);

    for item in source {
        let record = match item {
            Ok(record) => record,
            Err(err) => {
                if let SyncError::MalformedRecord {
                    external_id: Some(external_id),
                    ..
                } = &err
                {
                    present.insert(external_id.clone());
                }
                warn!(%class, error = %err, "skipping malformed design record");
                continue;
            }
        };

        let external_id = record.external_id().to_string();
        if !present.insert(external_id.clone()) {
            warn!(%class, %external_id, "skipping duplicate design record");
            continue;
        }

        let outcome = match stored
            .iter()
            .position(|known| known.external_id() == external_id)
        {
            None => {
                next_sequence += 1;
                observe_new(record, next_sequence, stored, &mut diff)
            }
            Some(index) => observe_known(record, &mut stored[index], &mut diff),
        };

        if let Err(err) = outcome {
            warn!(%class, %external_id, error = %err, "skipping record that could not be hashed");
        }
    }

    let before = stored.len();
    stored.retain(|known| {
        let keep = present.contains(known.external_id());
        if !keep {
            diff.removed.push(known.external_id().to_string());
        }
        keep
    });

    debug!(
        %class,
        added = diff.added.len(),
        changed = diff.changed.len(),
        removed = before - stored.len(),
        "class scanned"
    );
    diff
}

fn observe_new<T: Entity>(
    mut record: T,
    sequence_id: u32,
    stored: &mut Vec<T>,
    diff: &mut ClassDiff<T>,
) -> Result<(), SyncError> {
    record.assign_new(sequence_id)?;
    diff.added.push(record.clone());
    stored.push(record);
    Ok(())
}

fn observe_known<T: Entity>(
    record: T,
    known: &mut T,
    diff: &mut ClassDiff<T>,
) -> Result<(), SyncError> {
    if record.compute_hash()? == known.content_hash() {
        return Ok(());
    }

    let changes = record.field_changes(known)?;
    let external_id = known.external_id().to_string();
    known.absorb(record)?;
    if !changes.is_empty() {
        diff.changed.push(ChangedEntry::new(external_id, changes));
    }
    Ok(())
}

/// Diffs every class of `source` against `snapshot`, in footprints, drawings, vias order.
pub fn detect_changes(source: &dyn DesignSource, snapshot: &mut BoardSnapshot) -> BoardDiff {
    let footprints = detect_class(
        EntityClass::Footprints,
        source.footprints(),
        &mut snapshot.footprints,
    );
    let drawings = detect_class(
        EntityClass::Drawings,
        source.drawings(),
        &mut snapshot.drawings,
    );
    let vias = detect_class(EntityClass::Vias, source.vias(), &mut snapshot.vias);

    BoardDiff::from_parts(footprints, drawings, vias)
}

/// Captures a complete snapshot of `source` for the initial transfer.
pub fn full_scan(source: &dyn DesignSource) -> Result<BoardSnapshot, SyncError> {
    let mut snapshot = BoardSnapshot::new(source.board_info()?);
    let diff = detect_changes(source, &mut snapshot);
    debug!(
        pcb_name = %snapshot.general.pcb_name,
        pcb_id = %snapshot.general.pcb_id,
        classes = diff.classes().len(),
        entities = snapshot.entity_count(),
        "full board scan"
    );
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{detect_changes, detect_class, full_scan};
    use crate::error::SyncError;
    use crate::model::board::{Footprint, Layer, Pad, Via};
    use crate::model::diff::EntityClass;
    use crate::model::entity::Entity;
    use crate::source::BoardFile;
    use crate::units::Vector2Nm;

    fn via(kiid: &str, x: i64) -> Via {
        Via {
            kiid: kiid.to_string(),
            seq: 0,
            hash: String::new(),
            center: Vector2Nm::new(x, 0),
            radius: 200_000,
        }
    }

    fn pad(kiid: &str, number: &str, dx: i64) -> Pad {
        Pad {
            kiid: kiid.to_string(),
            seq: 0,
            hash: String::new(),
            number: number.to_string(),
            pos_delta: Vector2Nm::new(dx, 0),
            hole_size: [1_000_000, 1_000_000],
        }
    }

    fn footprint(p2_delta: i64) -> Footprint {
        Footprint {
            kiid: "F1".to_string(),
            seq: 0,
            hash: String::new(),
            fpid: "Connector:Pin_1x02".to_string(),
            reference: "J1".to_string(),
            pos: Vector2Nm::new(10_000_000, 10_000_000),
            rot: 0.0,
            layer: Layer::Top,
            pads_pth: vec![pad("P1", "1", 0), pad("P2", "2", p2_delta)],
            models: Vec::new(),
        }
    }

    #[test]
    fn second_scan_without_changes_is_empty() {
        let mut stored = Vec::new();
        let first = detect_class(
            EntityClass::Vias,
            vec![Ok(via("V1", 0)), Ok(via("V2", 5))],
            &mut stored,
        );
        assert_eq!(first.added.len(), 2);
        assert_eq!(stored[0].seq, 1);
        assert_eq!(stored[1].seq, 2);

        let second = detect_class(
            EntityClass::Vias,
            vec![Ok(via("V1", 0)), Ok(via("V2", 5))],
            &mut stored,
        );
        assert!(second.is_empty());
    }

    #[test]
    fn single_field_edit_reports_only_that_field() {
        let mut stored = Vec::new();
        detect_class(EntityClass::Vias, vec![Ok(via("V1", 0))], &mut stored);

        let mut moved = via("V1", 0);
        moved.center = Vector2Nm::new(0, 7);
        let diff = detect_class(EntityClass::Vias, vec![Ok(moved)], &mut stored);

        assert_eq!(diff.changed.len(), 1);
        let entry = &diff.changed[0];
        assert_eq!(entry.external_id, "V1");
        assert_eq!(entry.changes.len(), 1);
        assert_eq!(entry.changes[0].field(), "center");
        assert_eq!(entry.changes[0].value(), &json!([0, 7]));
        assert_eq!(stored[0].center, Vector2Nm::new(0, 7));
        assert_eq!(stored[0].seq, 1);
        assert_eq!(
            stored[0].hash,
            stored[0].compute_hash().expect("hash should compute")
        );
    }

    #[test]
    fn absent_record_is_removed_and_new_one_continues_sequence() {
        let mut stored = Vec::new();
        detect_class(
            EntityClass::Vias,
            vec![Ok(via("V1", 0)), Ok(via("V2", 5))],
            &mut stored,
        );

        let diff = detect_class(
            EntityClass::Vias,
            vec![Ok(via("V2", 5)), Ok(via("V3", 9))],
            &mut stored,
        );
        assert_eq!(diff.removed, vec!["V1".to_string()]);
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added[0].seq, 3);
        assert_eq!(stored.len(), 2);
    }

    #[test]
    fn malformed_record_is_skipped_but_not_removed() {
        let mut stored = Vec::new();
        detect_class(
            EntityClass::Vias,
            vec![Ok(via("V1", 0)), Ok(via("V2", 5))],
            &mut stored,
        );

        let diff = detect_class(
            EntityClass::Vias,
            vec![
                Err(SyncError::MalformedRecord {
                    class: EntityClass::Vias,
                    external_id: Some("V1".to_string()),
                    reason: "missing `drill`".to_string(),
                }),
                Err(SyncError::MalformedRecord {
                    class: EntityClass::Vias,
                    external_id: None,
                    reason: "missing `uuid`".to_string(),
                }),
                Ok(via("V2", 6)),
            ],
            &mut stored,
        );

        assert!(diff.removed.is_empty());
        assert_eq!(diff.changed.len(), 1);
        assert_eq!(stored.len(), 2);
    }

    #[test]
    fn duplicate_ids_keep_the_first_record() {
        let mut stored = Vec::new();
        let diff = detect_class(
            EntityClass::Vias,
            vec![Ok(via("V1", 0)), Ok(via("V1", 9))],
            &mut stored,
        );
        assert_eq!(diff.added.len(), 1);
        assert_eq!(stored[0].center, Vector2Nm::new(0, 0));
    }

    #[test]
    fn pad_edit_is_nested_under_footprint() {
        let mut stored = Vec::new();
        let first = detect_class(EntityClass::Footprints, vec![Ok(footprint(2_000_000))], &mut stored);
        assert_eq!(first.added.len(), 1);
        assert_eq!(first.added[0].pads_pth.len(), 2);

        let second = detect_class(EntityClass::Footprints, vec![Ok(footprint(3_000_000))], &mut stored);
        let encoded = serde_json::to_value(&second).expect("diff should encode");
        assert_eq!(
            encoded,
            json!({"changed": [{"F1": [["pads_pth", [{"P2": [["pos_delta", [3_000_000, 0]]]}]]]}]})
        );

        let third = detect_class(EntityClass::Footprints, vec![Ok(footprint(3_000_000))], &mut stored);
        assert!(third.is_empty());
    }

    #[test]
    fn full_scan_captures_general_section() {
        let board = BoardFile::from_json(
            r#"{"name": "demo", "thickness": 1600000,
                "tracks": [{"uuid": "V1", "kind": "via", "position": [0, 0], "drill": 400000}]}"#,
        )
        .expect("board should parse");

        let mut snapshot = full_scan(&board).expect("scan should succeed");
        assert_eq!(snapshot.general.pcb_name, "demo");
        assert_eq!(snapshot.general.thickness, 1_600_000);
        assert_eq!(snapshot.vias.len(), 1);

        let diff = detect_changes(&board, &mut snapshot);
        assert!(diff.is_empty());
    }
}
