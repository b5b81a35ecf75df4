//! Design-side collaborator: enumerates footprints, drawings and vias as snapshot records.
//!
//! [`DesignSource`] is the seam the change detector reads through. [`BoardFile`] implements
//! it over a JSON export of a board (`*.board.json`), which is what the CLI and the tests use.

use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::error::SyncError;
use crate::model::board::{
    BoardInfo, Drawing, DrawingGeometry, Footprint, Layer, Model3d, Pad, Via,
};
use crate::model::diff::EntityClass;
use crate::units::Vector2Nm;

const EDGE_CUTS_LAYER: &str = "Edge.Cuts";
const VIA_KIND: &str = "via";
const THROUGH_HOLE_ATTRIBUTE: &str = "pth";

/// Live enumeration of the design side.
///
/// Each record is extracted independently so one malformed item does not hide the rest.
/// A malformed record should carry its `external_id` when it is known, so the detector
/// does not mistake it for a removal.
pub trait DesignSource {
    fn board_info(&self) -> Result<BoardInfo, SyncError>;

    fn footprints(&self) -> Vec<Result<Footprint, SyncError>>;

    fn drawings(&self) -> Vec<Result<Drawing, SyncError>>;

    fn vias(&self) -> Vec<Result<Via, SyncError>>;
}

/// Board exported as JSON, one object per board item with raw (possibly missing) fields.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct BoardFile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub thickness: Option<i64>,
    #[serde(default)]
    pub footprints: Vec<RawFootprint>,
    #[serde(default)]
    pub drawings: Vec<RawDrawing>,
    #[serde(default)]
    pub tracks: Vec<RawTrack>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct RawFootprint {
    pub path: Option<String>,
    pub fpid: Option<String>,
    pub reference: Option<String>,
    pub position: Option<[i64; 2]>,
    pub orientation: Option<f64>,
    pub layer: Option<String>,
    #[serde(default)]
    pub pads: Vec<RawPad>,
    #[serde(default)]
    pub models: Vec<RawModel>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct RawPad {
    pub uuid: Option<String>,
    pub number: Option<String>,
    pub attribute: Option<String>,
    pub position: Option<[i64; 2]>,
    pub drill: Option<[i64; 2]>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct RawModel {
    pub filename: Option<String>,
    #[serde(default)]
    pub offset: [f64; 3],
    #[serde(default = "unit_scale")]
    pub scale: [f64; 3],
    #[serde(default)]
    pub rotation: [f64; 3],
}

fn unit_scale() -> [f64; 3] {
    [1.0, 1.0, 1.0]
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct RawDrawing {
    pub uuid: Option<String>,
    pub layer: Option<String>,
    pub shape: Option<String>,
    pub start: Option<[i64; 2]>,
    pub mid: Option<[i64; 2]>,
    pub end: Option<[i64; 2]>,
    pub center: Option<[i64; 2]>,
    pub radius: Option<i64>,
    #[serde(default)]
    pub corners: Vec<[i64; 2]>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct RawTrack {
    pub uuid: Option<String>,
    pub kind: Option<String>,
    pub position: Option<[i64; 2]>,
    pub drill: Option<i64>,
}

impl BoardFile {
    /// Reads a board export. The board name defaults to the file stem.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| SyncError::Io {
            path: path.display().to_string(),
            reason: err.to_string(),
        })?;

        let mut board = Self::from_json(&text)?;
        if board.name.is_none() {
            board.name = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().trim_end_matches(".board").to_string());
        }
        Ok(board)
    }

    pub fn from_json(text: &str) -> Result<Self, SyncError> {
        serde_json::from_str(text).map_err(|err| SyncError::Decode(err.to_string()))
    }
}

impl DesignSource for BoardFile {
    fn board_info(&self) -> Result<BoardInfo, SyncError> {
        let thickness = self.thickness.ok_or_else(|| SyncError::Config {
            reason: "board export has no `thickness`".to_string(),
        })?;
        Ok(BoardInfo::new(
            self.name.clone().unwrap_or_else(|| "board".to_string()),
            thickness,
        ))
    }

    fn footprints(&self) -> Vec<Result<Footprint, SyncError>> {
        self.footprints.iter().map(extract_footprint).collect()
    }

    fn drawings(&self) -> Vec<Result<Drawing, SyncError>> {
        self.drawings
            .iter()
            .filter(|drawing| drawing.layer.as_deref() == Some(EDGE_CUTS_LAYER))
            .map(extract_drawing)
            .collect()
    }

    fn vias(&self) -> Vec<Result<Via, SyncError>> {
        self.tracks
            .iter()
            .filter(|track| track.kind.as_deref() == Some(VIA_KIND))
            .map(extract_via)
            .collect()
    }
}

fn required<T: Clone>(
    value: &Option<T>,
    class: EntityClass,
    external_id: Option<&str>,
    field: &str,
) -> Result<T, SyncError> {
    value.clone().ok_or_else(|| SyncError::MalformedRecord {
        class,
        external_id: external_id.map(str::to_string),
        reason: format!("missing `{field}`"),
    })
}

fn extract_footprint(raw: &RawFootprint) -> Result<Footprint, SyncError> {
    let class = EntityClass::Footprints;
    let kiid = required(&raw.path, class, None, "path")?;
    let id = Some(kiid.as_str());

    let pos = Vector2Nm::from(required(&raw.position, class, id, "position")?);
    let layer_name = required(&raw.layer, class, id, "layer")?;
    let layer = Layer::from_layer_name(&layer_name).ok_or_else(|| SyncError::MalformedRecord {
        class,
        external_id: Some(kiid.clone()),
        reason: format!("layer `{layer_name}` is neither a front nor a back layer"),
    })?;

    let mut pads_pth = Vec::new();
    for pad in &raw.pads {
        if pad.attribute.as_deref() != Some(THROUGH_HOLE_ATTRIBUTE) {
            continue;
        }
        pads_pth.push(extract_pad(pad, pos, &kiid)?);
    }

    let mut models = Vec::with_capacity(raw.models.len());
    for (index, model) in raw.models.iter().enumerate() {
        let filename = required(&model.filename, class, id, "models.filename")?;
        models.push(Model3d {
            model_id: format!("{index:03}"),
            filename: relative_model_path(&filename),
            offset: model.offset,
            scale: model.scale,
            rot: model.rotation,
        });
    }

    Ok(Footprint {
        fpid: required(&raw.fpid, class, id, "fpid")?,
        reference: required(&raw.reference, class, id, "reference")?,
        rot: required(&raw.orientation, class, id, "orientation")?,
        kiid,
        seq: 0,
        hash: String::new(),
        pos,
        layer,
        pads_pth,
        models,
    })
}

fn extract_pad(raw: &RawPad, footprint_pos: Vector2Nm, footprint_id: &str) -> Result<Pad, SyncError> {
    // A broken pad makes the whole footprint malformed; report it under the footprint id.
    let class = EntityClass::Footprints;
    let id = Some(footprint_id);
    let position = Vector2Nm::from(required(&raw.position, class, id, "pads.position")?);

    Ok(Pad {
        kiid: required(&raw.uuid, class, id, "pads.uuid")?,
        seq: 0,
        hash: String::new(),
        number: required(&raw.number, class, id, "pads.number")?,
        pos_delta: position - footprint_pos,
        hole_size: required(&raw.drill, class, id, "pads.drill")?,
    })
}

fn extract_drawing(raw: &RawDrawing) -> Result<Drawing, SyncError> {
    let class = EntityClass::Drawings;
    let kiid = required(&raw.uuid, class, None, "uuid")?;
    let id = Some(kiid.as_str());
    let shape = required(&raw.shape, class, id, "shape")?;
    let point = |value: &Option<[i64; 2]>, field: &str| {
        required(value, class, id, field).map(Vector2Nm::from)
    };

    let geometry = match shape.as_str() {
        "Line" => DrawingGeometry::Line {
            start: point(&raw.start, "start")?,
            end: point(&raw.end, "end")?,
        },
        "Rect" | "Polygon" => {
            let points: Vec<Vector2Nm> = raw.corners.iter().copied().map(Vector2Nm::from).collect();
            let minimum = if shape == "Rect" { 4 } else { 3 };
            if points.len() < minimum {
                return Err(SyncError::MalformedRecord {
                    class,
                    external_id: Some(kiid.clone()),
                    reason: format!("{shape} needs at least {minimum} corners, got {}", points.len()),
                });
            }
            if shape == "Rect" {
                DrawingGeometry::Rect { points }
            } else {
                DrawingGeometry::Polygon { points }
            }
        }
        "Arc" => DrawingGeometry::Arc {
            points: vec![
                point(&raw.start, "start")?,
                point(&raw.mid, "mid")?,
                point(&raw.end, "end")?,
            ],
        },
        "Circle" => DrawingGeometry::Circle {
            center: point(&raw.center, "center")?,
            radius: required(&raw.radius, class, id, "radius")?,
        },
        other => {
            debug!(shape = other, external_id = %kiid, "unsupported edge shape");
            return Err(SyncError::MalformedRecord {
                class,
                external_id: Some(kiid.clone()),
                reason: format!("unsupported shape `{other}`"),
            });
        }
    };

    Ok(Drawing {
        kiid,
        seq: 0,
        hash: String::new(),
        geometry,
    })
}

fn extract_via(raw: &RawTrack) -> Result<Via, SyncError> {
    let class = EntityClass::Vias;
    let kiid = required(&raw.uuid, class, None, "uuid")?;
    let id = Some(kiid.as_str());

    Ok(Via {
        center: Vector2Nm::from(required(&raw.position, class, id, "position")?),
        radius: required(&raw.drill, class, id, "drill")? / 2,
        kiid,
        seq: 0,
        hash: String::new(),
    })
}

/// Model path relative to the 3D library root, without the leading path variable
/// segment and without the `.wrl` extension.
pub fn relative_model_path(file_path: &str) -> String {
    let mut segments = file_path.split('/');
    segments.next();
    let rest = segments.collect::<Vec<_>>().join("/");
    format!("/{}", rest.replace(".wrl", ""))
}


#[cfg(test)]
mod tests {
    use super::{relative_model_path, BoardFile, DesignSource};
    use crate::error::SyncError;
    use crate::model::board::{DrawingGeometry, Layer};
    use crate::units::Vector2Nm;

    const BOARD: &str = r#"{
        "name": "demo",
        "thickness": 1600000,
        "footprints": [{
            "path": "F1",
            "fpid": "Connector:Pin_1x02",
            "reference": "J1",
            "position": [10000000, 20000000],
            "orientation": 90.0,
            "layer": "B.Cu",
            "pads": [
                {"uuid": "P1", "number": "1", "attribute": "pth", "position": [10000000, 20000000], "drill": [1000000, 1000000]},
                {"uuid": "S1", "number": "3", "attribute": "smd", "position": [0, 0]},
                {"uuid": "P2", "number": "2", "attribute": "pth", "position": [12000000, 20000000], "drill": [1000000, 1000000]}
            ],
            "models": [{"filename": "${KICAD6_3DMODEL_DIR}/Connector.3dshapes/Pin_1x02.wrl"}]
        }],
        "drawings": [
            {"uuid": "D1", "layer": "Edge.Cuts", "shape": "Line", "start": [0, 0], "end": [5, 0]},
            {"uuid": "D2", "layer": "F.SilkS", "shape": "Line", "start": [0, 0], "end": [5, 0]},
            {"uuid": "D3", "layer": "Edge.Cuts", "shape": "Bezier"}
        ],
        "tracks": [
            {"uuid": "V1", "kind": "via", "position": [1, 2], "drill": 400000},
            {"uuid": "T1", "kind": "track", "position": [1, 2]}
        ]
    }"#;

    #[test]
    fn extracts_footprint_with_relative_pads() {
        let board = BoardFile::from_json(BOARD).expect("board should parse");
        let footprints = board.footprints();
        assert_eq!(footprints.len(), 1);

        let footprint = footprints[0].as_ref().expect("footprint should extract");
        assert_eq!(footprint.layer, Layer::Bot);
        assert_eq!(footprint.pads_pth.len(), 2);
        assert_eq!(footprint.pads_pth[0].pos_delta, Vector2Nm::new(0, 0));
        assert_eq!(footprint.pads_pth[1].pos_delta, Vector2Nm::new(2_000_000, 0));
        assert_eq!(footprint.models[0].model_id, "000");
        assert_eq!(footprint.models[0].filename, "/Connector.3dshapes/Pin_1x02");
    }

    #[test]
    fn keeps_only_edge_cuts_and_reports_unknown_shapes() {
        let board = BoardFile::from_json(BOARD).expect("board should parse");
        let drawings = board.drawings();
        assert_eq!(drawings.len(), 2);
        assert!(matches!(
            drawings[0].as_ref().map(|drawing| &drawing.geometry),
            Ok(DrawingGeometry::Line { .. })
        ));
        assert!(matches!(
            &drawings[1],
            Err(SyncError::MalformedRecord { external_id: Some(id), .. }) if id == "D3"
        ));
    }

    #[test]
    fn via_radius_is_half_the_drill() {
        let board = BoardFile::from_json(BOARD).expect("board should parse");
        let vias = board.vias();
        assert_eq!(vias.len(), 1);
        assert_eq!(vias[0].as_ref().expect("via should extract").radius, 200_000);
    }

    #[test]
    fn missing_field_is_malformed_with_known_id() {
        let board =
            BoardFile::from_json(r#"{"footprints": [{"path": "F9", "fpid": "x"}]}"#).expect("board should parse");
        let footprints = board.footprints();
        assert!(matches!(
            &footprints[0],
            Err(SyncError::MalformedRecord { external_id: Some(id), .. }) if id == "F9"
        ));
    }

    #[test]
    fn model_path_drops_variable_and_extension() {
        assert_eq!(
            relative_model_path("${KISYS3DMOD}/Resistor_THT.3dshapes/R_Axial.wrl"),
            "/Resistor_THT.3dshapes/R_Axial"
        );
    }
}
