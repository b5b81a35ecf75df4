use std::collections::HashSet;
use std::str::FromStr;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SyncError;
use crate::model::diff::{BoardDiff, ChangedEntry, ClassDiff, EntityClass, FieldChange};
use crate::model::entity::{
    content_fields, diff_fields, overlay_changes, Entity, HASH_FIELD, SEQ_FIELD,
};
use crate::units::Vector2Nm;

pub const FIELD_FPID: &str = "fpid";
pub const FIELD_REF: &str = "ref";
pub const FIELD_POS: &str = "pos";
pub const FIELD_ROT: &str = "rot";
pub const FIELD_LAYER: &str = "layer";
pub const FIELD_PADS: &str = "pads_pth";
/// Pseudo-field carrying the full pad list when pads were added to or removed from a footprint.
pub const FIELD_PAD_LIST: &str = "pad_list";
pub const FIELD_MODELS: &str = "3d_models";
pub const FIELD_NUMBER: &str = "number";
pub const FIELD_POS_DELTA: &str = "pos_delta";
pub const FIELD_HOLE_SIZE: &str = "hole_size";
pub const FIELD_SHAPE: &str = "shape";
pub const FIELD_START: &str = "start";
pub const FIELD_END: &str = "end";
pub const FIELD_POINTS: &str = "points";
pub const FIELD_CENTER: &str = "center";
pub const FIELD_RADIUS: &str = "radius";

macro_rules! record_identity {
    () => {
        fn external_id(&self) -> &str {
            &self.kiid
        }

        fn sequence_id(&self) -> u32 {
            self.seq
        }

        fn set_sequence_id(&mut self, sequence_id: u32) {
            self.seq = sequence_id;
        }

        fn content_hash(&self) -> &str {
            &self.hash
        }

        fn set_content_hash(&mut self, hash: String) {
            self.hash = hash;
        }
    };
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum Layer {
    Top,
    Bot,
}

impl Layer {
    /// Maps a board layer name (`F.Cu`, `B.SilkS`, ...) to the side it sits on.
    pub fn from_layer_name(name: &str) -> Option<Self> {
        if name.contains("F.") {
            Some(Self::Top)
        } else if name.contains("B.") {
            Some(Self::Bot)
        } else {
            None
        }
    }
}

impl FromStr for Layer {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Top" => Ok(Self::Top),
            "Bot" => Ok(Self::Bot),
            _ => Err(format!("unknown layer `{value}`; expected `Top` or `Bot`")),
        }
    }
}

impl std::fmt::Display for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Top => write!(f, "Top"),
            Self::Bot => write!(f, "Bot"),
        }
    }
}

/// Through-hole pad of a footprint. Position is stored relative to the footprint base.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pad {
    pub kiid: String,
    #[serde(default)]
    pub seq: u32,
    #[serde(default)]
    pub hash: String,
    pub number: String,
    pub pos_delta: Vector2Nm,
    /// Drill size as `[major, minor]` axis.
    pub hole_size: [i64; 2],
}

impl Entity for Pad {
    record_identity!();
}

/// 3D model reference. Not an entity: replaced wholesale on any change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Model3d {
    pub model_id: String,
    pub filename: String,
    /// Millimetres, Y not mirrored.
    pub offset: [f64; 3],
    pub scale: [f64; 3],
    pub rot: [f64; 3],
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Footprint {
    pub kiid: String,
    #[serde(default)]
    pub seq: u32,
    #[serde(default)]
    pub hash: String,
    pub fpid: String,
    #[serde(rename = "ref")]
    pub reference: String,
    pub pos: Vector2Nm,
    pub rot: f64,
    pub layer: Layer,
    #[serde(default)]
    pub pads_pth: Vec<Pad>,
    #[serde(default, rename = "3d_models")]
    pub models: Vec<Model3d>,
}

impl Footprint {
    pub fn pad(&self, external_id: &str) -> Option<&Pad> {
        self.pads_pth.iter().find(|pad| pad.kiid == external_id)
    }

    pub fn pad_mut(&mut self, external_id: &str) -> Option<&mut Pad> {
        self.pads_pth.iter_mut().find(|pad| pad.kiid == external_id)
    }

    fn same_pad_members(&self, other: &Footprint) -> bool {
        let mine: HashSet<&str> = self.pads_pth.iter().map(|pad| pad.kiid.as_str()).collect();
        let theirs: HashSet<&str> = other.pads_pth.iter().map(|pad| pad.kiid.as_str()).collect();
        mine == theirs && self.pads_pth.len() == other.pads_pth.len()
    }

    /// Pad-by-pad diff against `stored`; only pads whose content changed are listed.
    fn pad_changes(&self, stored: &Footprint) -> Result<Vec<ChangedEntry>, SyncError> {
        let mut entries = Vec::new();
        for fresh in &self.pads_pth {
            let Some(old) = stored.pad(&fresh.kiid) else {
                continue;
            };

            if fresh.compute_hash()? == old.hash {
                continue;
            }

            let changes = fresh.field_changes(old)?;
            if !changes.is_empty() {
                entries.push(ChangedEntry::new(fresh.kiid.clone(), changes));
            }
        }

        Ok(entries)
    }
}

/// Carries pad bookkeeping from `stored` into `fresh`: known pads keep their sequence id,
/// new pads continue after the highest one.
fn merge_pad_bookkeeping(stored: &[Pad], fresh: &[Pad]) -> Result<Vec<Pad>, SyncError> {
    let mut next = stored.iter().map(|pad| pad.seq).max().unwrap_or(0);
    let mut merged = Vec::with_capacity(fresh.len());
    for pad in fresh {
        let mut pad = pad.clone();
        match stored.iter().find(|old| old.kiid == pad.kiid) {
            Some(old) => pad.seq = old.seq,
            None => {
                next += 1;
                pad.seq = next;
            }
        }
        pad.refresh_hash()?;
        merged.push(pad);
    }

    Ok(merged)
}

impl Entity for Footprint {
    record_identity!();

    fn fields(&self) -> Result<Map<String, Value>, SyncError> {
        let mut fields = content_fields(self)?;
        if let Some(Value::Array(pads)) = fields.get_mut(FIELD_PADS) {
            for pad in pads.iter_mut() {
                if let Value::Object(pad) = pad {
                    pad.remove(SEQ_FIELD);
                    pad.remove(HASH_FIELD);
                }
            }
        }

        Ok(fields)
    }

    fn field_changes(&self, stored: &Self) -> Result<Vec<FieldChange>, SyncError> {
        let mut fresh_fields = self.fields()?;
        let mut stored_fields = stored.fields()?;
        fresh_fields.remove(FIELD_PADS);
        stored_fields.remove(FIELD_PADS);

        let mut changes = diff_fields(&stored_fields, &fresh_fields);

        if self.same_pad_members(stored) {
            let pad_entries = self.pad_changes(stored)?;
            if !pad_entries.is_empty() {
                let value = serde_json::to_value(&pad_entries)
                    .map_err(|err| SyncError::Encode(err.to_string()))?;
                changes.push(FieldChange::new(FIELD_PADS, value));
            }
        } else {
            let pads = merge_pad_bookkeeping(&stored.pads_pth, &self.pads_pth)?;
            let value =
                serde_json::to_value(&pads).map_err(|err| SyncError::Encode(err.to_string()))?;
            changes.push(FieldChange::new(FIELD_PAD_LIST, value));
        }

        changes.sort_by(|left, right| left.field().cmp(right.field()));
        Ok(changes)
    }

    fn absorb(&mut self, fresh: Self) -> Result<(), SyncError> {
        let sequence_id = self.seq;
        let pads = merge_pad_bookkeeping(&self.pads_pth, &fresh.pads_pth)?;
        *self = fresh;
        self.seq = sequence_id;
        self.pads_pth = pads;
        self.refresh_hash()
    }

    fn assign_new(&mut self, sequence_id: u32) -> Result<(), SyncError> {
        self.seq = sequence_id;
        for (index, pad) in self.pads_pth.iter_mut().enumerate() {
            pad.seq = index as u32 + 1;
            pad.refresh_hash()?;
        }
        self.refresh_hash()
    }

    fn apply_changes(&mut self, changes: &[FieldChange]) -> Result<(), SyncError> {
        let mut plain = Vec::with_capacity(changes.len());
        for change in changes {
            match change.field() {
                FIELD_PADS => {
                    let entries: Vec<ChangedEntry> = serde_json::from_value(change.value().clone())
                        .map_err(|err| SyncError::invalid_field(FIELD_PADS, err))?;
                    for entry in entries {
                        let pad = self.pad_mut(&entry.external_id).ok_or_else(|| {
                            SyncError::UnknownEntity {
                                class: EntityClass::Pads,
                                external_id: entry.external_id.clone(),
                            }
                        })?;
                        pad.apply_changes(&entry.changes)?;
                    }
                }
                FIELD_PAD_LIST => {
                    let mut pads: Vec<Pad> = serde_json::from_value(change.value().clone())
                        .map_err(|err| SyncError::invalid_field(FIELD_PAD_LIST, err))?;
                    for pad in pads.iter_mut() {
                        pad.refresh_hash()?;
                    }
                    self.pads_pth = pads;
                }
                _ => plain.push(change.clone()),
            }
        }

        overlay_changes(self, &plain)?;
        self.refresh_hash()
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum ShapeKind {
    Line,
    Rect,
    Polygon,
    Arc,
    Circle,
}

impl std::fmt::Display for ShapeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = match self {
            Self::Line => "Line",
            Self::Rect => "Rect",
            Self::Polygon => "Polygon",
            Self::Arc => "Arc",
            Self::Circle => "Circle",
        };

        write!(f, "{value}")
    }
}

impl FromStr for ShapeKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Line" => Ok(Self::Line),
            "Rect" => Ok(Self::Rect),
            "Polygon" => Ok(Self::Polygon),
            "Arc" => Ok(Self::Arc),
            "Circle" => Ok(Self::Circle),
            _ => Err(format!(
                "unknown shape `{value}`; expected one of: Line, Rect, Polygon, Arc, Circle"
            )),
        }
    }
}

/// Shape-specific point/parameter schema of a drawing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape")]
pub enum DrawingGeometry {
    Line {
        start: Vector2Nm,
        end: Vector2Nm,
    },
    Rect {
        points: Vec<Vector2Nm>,
    },
    Polygon {
        points: Vec<Vector2Nm>,
    },
    /// Start, mid and end point.
    Arc {
        points: Vec<Vector2Nm>,
    },
    Circle {
        center: Vector2Nm,
        radius: i64,
    },
}

impl DrawingGeometry {
    pub fn kind(&self) -> ShapeKind {
        match self {
            Self::Line { .. } => ShapeKind::Line,
            Self::Rect { .. } => ShapeKind::Rect,
            Self::Polygon { .. } => ShapeKind::Polygon,
            Self::Arc { .. } => ShapeKind::Arc,
            Self::Circle { .. } => ShapeKind::Circle,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Drawing {
    pub kiid: String,
    #[serde(default)]
    pub seq: u32,
    #[serde(default)]
    pub hash: String,
    #[serde(flatten)]
    pub geometry: DrawingGeometry,
}

impl Entity for Drawing {
    record_identity!();
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Via {
    pub kiid: String,
    #[serde(default)]
    pub seq: u32,
    #[serde(default)]
    pub hash: String,
    pub center: Vector2Nm,
    pub radius: i64,
}

impl Entity for Via {
    record_identity!();
}

/// The `general` section of a full snapshot.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct BoardInfo {
    pub pcb_name: String,
    pub pcb_id: String,
    /// Board thickness in design units.
    pub thickness: i64,
}

impl BoardInfo {
    /// Creates board info with a fresh random `pcb_id` tailpiece.
    pub fn new(pcb_name: impl Into<String>, thickness: i64) -> Self {
        Self {
            pcb_name: pcb_name.into(),
            pcb_id: random_pcb_id(),
            thickness,
        }
    }
}

fn random_pcb_id() -> String {
    const LETTERS: &[u8] = b"abcdefghiopqruwxyz";
    const DIGITS: &[u8] = b"0123456789";

    let mut rng = rand::thread_rng();
    let mut id = String::with_capacity(4);
    for pool in [LETTERS, LETTERS, DIGITS, DIGITS] {
        if let Some(byte) = pool.choose(&mut rng) {
            id.push(char::from(*byte));
        }
    }
    id
}

/// Canonical record of every synchronised entity on one board.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoardSnapshot {
    pub general: BoardInfo,
    #[serde(default)]
    pub drawings: Vec<Drawing>,
    #[serde(default)]
    pub footprints: Vec<Footprint>,
    #[serde(default)]
    pub vias: Vec<Via>,
}

impl BoardSnapshot {
    pub fn new(general: BoardInfo) -> Self {
        Self {
            general,
            drawings: Vec::new(),
            footprints: Vec::new(),
            vias: Vec::new(),
        }
    }

    /// Every record as an `added` entry, for replaying the snapshot onto an empty model.
    pub fn as_added_diff(&self) -> BoardDiff {
        BoardDiff::from_parts(
            ClassDiff {
                added: self.footprints.clone(),
                ..ClassDiff::default()
            },
            ClassDiff {
                added: self.drawings.clone(),
                ..ClassDiff::default()
            },
            ClassDiff {
                added: self.vias.clone(),
                ..ClassDiff::default()
            },
        )
    }

    pub fn entity_count(&self) -> usize {
        self.footprints.len() + self.drawings.len() + self.vias.len()
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use serde_json::json;

    use super::{
        BoardInfo, Drawing, DrawingGeometry, Footprint, Layer, Pad, ShapeKind, FIELD_PADS,
        FIELD_PAD_LIST,
    };
    use crate::model::entity::Entity;
    use crate::units::Vector2Nm;

    fn pad(kiid: &str, number: &str, dx: i64) -> Pad {
        Pad {
            kiid: kiid.to_string(),
            seq: 0,
            hash: String::new(),
            number: number.to_string(),
            pos_delta: Vector2Nm::new(dx, 0),
            hole_size: [800_000, 800_000],
        }
    }

    fn footprint(pads: Vec<Pad>) -> Footprint {
        let mut footprint = Footprint {
            kiid: "F1".to_string(),
            seq: 0,
            hash: String::new(),
            fpid: "Connector:Pin_1x02".to_string(),
            reference: "J1".to_string(),
            pos: Vector2Nm::new(10_000_000, 20_000_000),
            rot: 0.0,
            layer: Layer::Top,
            pads_pth: pads,
            models: Vec::new(),
        };
        footprint
            .assign_new(1)
            .expect("fresh footprint should take a sequence id");
        footprint
    }

    #[test]
    fn layer_parses_known_values() {
        assert_eq!(Layer::from_str("Top").expect("Top should parse"), Layer::Top);
        assert_eq!(Layer::from_str("Bot").expect("Bot should parse"), Layer::Bot);
        assert!(Layer::from_str("Inner").is_err());
    }

    #[test]
    fn layer_from_board_layer_name() {
        assert_eq!(Layer::from_layer_name("F.Cu"), Some(Layer::Top));
        assert_eq!(Layer::from_layer_name("B.Cu"), Some(Layer::Bot));
        assert_eq!(Layer::from_layer_name("In1.Cu"), None);
    }

    #[test]
    fn hash_excludes_bookkeeping_fields() {
        let first = footprint(vec![pad("P1", "1", 0)]);
        let mut second = first.clone();
        second.seq = 42;
        second.pads_pth[0].seq = 9;
        second.hash = "stale".to_string();

        assert_eq!(
            first.compute_hash().expect("hash should compute"),
            second.compute_hash().expect("hash should compute")
        );
    }

    #[test]
    fn pad_content_change_is_nested_under_pads_field() {
        let stored = footprint(vec![pad("P1", "1", 0), pad("P2", "2", 2_000_000)]);
        let mut fresh = stored.clone();
        fresh.pads_pth[1].pos_delta = Vector2Nm::new(3_000_000, 0);

        let changes = fresh
            .field_changes(&stored)
            .expect("field changes should compute");
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].field(), FIELD_PADS);
        assert_eq!(
            changes[0].value(),
            &json!([{"P2": [["pos_delta", [3_000_000, 0]]]}])
        );
    }

    #[test]
    fn pad_membership_change_reports_full_pad_list() {
        let stored = footprint(vec![pad("P1", "1", 0)]);
        let mut fresh = stored.clone();
        fresh.pads_pth.push(pad("P2", "2", 2_000_000));

        let changes = fresh
            .field_changes(&stored)
            .expect("field changes should compute");
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].field(), FIELD_PAD_LIST);

        let pads: Vec<Pad> =
            serde_json::from_value(changes[0].value().clone()).expect("pad list should decode");
        assert_eq!(pads.len(), 2);
        assert_eq!(pads[0].seq, 1);
        assert_eq!(pads[1].seq, 2);
    }

    #[test]
    fn apply_changes_overlays_fields_in_order() {
        let mut record = footprint(vec![pad("P1", "1", 0)]);
        let changes = vec![
            crate::model::diff::FieldChange::new("rot", json!(45.0)),
            crate::model::diff::FieldChange::new("ref", json!("J7")),
            crate::model::diff::FieldChange::new("rot", json!(90.0)),
        ];

        record
            .apply_changes(&changes)
            .expect("changes should apply");
        assert_eq!(record.rot, 90.0);
        assert_eq!(record.reference, "J7");
        assert_eq!(
            record.hash,
            record.compute_hash().expect("hash should compute")
        );
    }

    #[test]
    fn drawing_round_trips_flattened_shape() {
        let drawing = Drawing {
            kiid: "D1".to_string(),
            seq: 1,
            hash: String::new(),
            geometry: DrawingGeometry::Circle {
                center: Vector2Nm::new(1, 2),
                radius: 3,
            },
        };

        let encoded = serde_json::to_value(&drawing).expect("drawing should encode");
        assert_eq!(
            encoded,
            json!({"kiid": "D1", "seq": 1, "hash": "", "shape": "Circle", "center": [1, 2], "radius": 3})
        );

        let decoded: Drawing = serde_json::from_value(encoded).expect("drawing should decode");
        assert_eq!(decoded.geometry.kind(), ShapeKind::Circle);
    }

    #[test]
    fn drawing_shape_change_applies_as_one_overlay() {
        let mut drawing = Drawing {
            kiid: "D1".to_string(),
            seq: 1,
            hash: String::new(),
            geometry: DrawingGeometry::Line {
                start: Vector2Nm::new(0, 0),
                end: Vector2Nm::new(1, 0),
            },
        };

        drawing
            .apply_changes(&[
                crate::model::diff::FieldChange::new("shape", json!("Circle")),
                crate::model::diff::FieldChange::new("center", json!([5, 5])),
                crate::model::diff::FieldChange::new("radius", json!(7)),
            ])
            .expect("shape change should apply");

        assert_eq!(
            drawing.geometry,
            DrawingGeometry::Circle {
                center: Vector2Nm::new(5, 5),
                radius: 7
            }
        );
    }

    #[test]
    fn board_info_generates_short_pcb_id() {
        let info = BoardInfo::new("demo", 1_600_000);
        assert_eq!(info.pcb_id.len(), 4);
        assert!(info.pcb_id[2..].chars().all(|c| c.is_ascii_digit()));
    }
}
