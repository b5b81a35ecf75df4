//! Diff application: replays a [`BoardDiff`] onto the mechanical model and the snapshot.
//!
//! Classes are applied footprints, drawings, vias; inside a class the order is added,
//! removed, changed. A failing entry is reported in [`ApplyReport::skipped`] and the rest
//! of the diff still applies. Its snapshot record is dropped, so the next detection pass
//! reports the entity as added and the add replaces whatever the model holds for it.
//! Geometry is always resolved from registry tags and constraints from their names right
//! before use.

use tracing::{debug, info, warn};

use crate::compose::{
    self, constraint_index, constraint_name, CIRCLE_RADIUS, DISTANCE_X, DISTANCE_Y, PAD_RADIUS,
    VIA_RADIUS,
};
use crate::error::SyncError;
use crate::kernel::{Geometry, GeometryTag, PointRef, PointRole, SketchKernel};
use crate::mechanical::{Container, ContainerId, ContainerRole, MechanicalModel, Placement};
use crate::model::board::{
    BoardSnapshot, Drawing, DrawingGeometry, Footprint, Layer, Model3d, Pad, Via, FIELD_CENTER,
    FIELD_END, FIELD_FPID, FIELD_HOLE_SIZE, FIELD_LAYER, FIELD_MODELS, FIELD_NUMBER,
    FIELD_PADS, FIELD_PAD_LIST, FIELD_POINTS, FIELD_POS, FIELD_POS_DELTA, FIELD_RADIUS,
    FIELD_REF, FIELD_ROT, FIELD_SHAPE, FIELD_START,
};
use crate::model::diff::{BoardDiff, ChangedEntry, ClassDiff, EntityClass, FieldChange};
use crate::model::entity::{find_entity, remove_entity, upsert_entity, Entity};
use crate::registry::Registration;
use crate::units::{length_to_model, to_model, Point2, Point3, Vector2Nm};

#[derive(Debug)]
pub struct SkippedEntry {
    pub class: EntityClass,
    pub external_id: String,
    pub error: SyncError,
}

/// Outcome of one diff application.
#[derive(Debug, Default)]
pub struct ApplyReport {
    pub added: usize,
    pub removed: usize,
    pub changed: usize,
    pub skipped: Vec<SkippedEntry>,
}

impl ApplyReport {
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty()
    }

    fn skip(&mut self, class: EntityClass, external_id: &str, error: SyncError) {
        warn!(%class, %external_id, %error, "skipping diff entry");
        self.skipped.push(SkippedEntry {
            class,
            external_id: external_id.to_string(),
            error,
        });
    }
}

/// Per-class hooks the generic added/removed/changed loop dispatches to.
trait ClassApplier<K: SketchKernel> {
    type Record: Entity;

    const CLASS: EntityClass;

    fn records(snapshot: &mut BoardSnapshot) -> &mut Vec<Self::Record>;

    fn add(model: &mut MechanicalModel<K>, record: &Self::Record) -> Result<(), SyncError>;

    fn change(
        model: &mut MechanicalModel<K>,
        working: &mut Self::Record,
        changes: &[FieldChange],
    ) -> Result<(), SyncError>;

    fn remove(model: &mut MechanicalModel<K>, external_id: &str) -> Result<(), SyncError> {
        remove_registered(model, Self::CLASS, external_id)
    }
}

/// Applies `diff` to `model` and `snapshot`.
pub fn apply_diff<K: SketchKernel>(
    model: &mut MechanicalModel<K>,
    snapshot: &mut BoardSnapshot,
    diff: &BoardDiff,
) -> ApplyReport {
    let mut report = ApplyReport::default();

    if let Some(footprints) = &diff.footprints {
        apply_class::<K, Footprints>(model, snapshot, footprints, &mut report);
    }
    if let Some(drawings) = &diff.drawings {
        apply_class::<K, Drawings>(model, snapshot, drawings, &mut report);
    }
    if let Some(vias) = &diff.vias {
        apply_class::<K, Vias>(model, snapshot, vias, &mut report);
    }

    if diff.drawings.as_ref().is_some_and(|drawings| !drawings.is_empty()) {
        if let Err(error) = compose::add_path_continuity(&mut model.kernel) {
            warn!(%error, "could not join board outline");
        }
    }
    if let Err(error) = model.kernel.recompute() {
        warn!(%error, "sketch recompute failed");
    }

    info!(
        added = report.added,
        removed = report.removed,
        changed = report.changed,
        skipped = report.skipped.len(),
        "diff applied"
    );
    report
}

fn apply_class<K: SketchKernel, A: ClassApplier<K>>(
    model: &mut MechanicalModel<K>,
    snapshot: &mut BoardSnapshot,
    diff: &ClassDiff<A::Record>,
    report: &mut ApplyReport,
) {
    for record in &diff.added {
        let external_id = record.external_id();
        if model.registry.contains(external_id) {
            if let Err(error) = A::remove(model, external_id) {
                report.skip(A::CLASS, external_id, error);
                continue;
            }
        }

        match A::add(model, record) {
            Ok(()) => {
                let mut stored = record.clone();
                if let Err(error) = stored.refresh_hash() {
                    remove_entity(A::records(snapshot), external_id);
                    report.skip(A::CLASS, external_id, error);
                    continue;
                }
                upsert_entity(A::records(snapshot), stored);
                report.added += 1;
            }
            Err(error) => {
                if model.registry.contains(external_id) {
                    if let Err(cleanup) = A::remove(model, external_id) {
                        warn!(
                            class = %A::CLASS,
                            %external_id,
                            error = %cleanup,
                            "partial entity left in model"
                        );
                    }
                }
                remove_entity(A::records(snapshot), external_id);
                report.skip(A::CLASS, external_id, error);
            }
        }
    }

    for external_id in &diff.removed {
        match A::remove(model, external_id) {
            Ok(()) => report.removed += 1,
            Err(error) => report.skip(A::CLASS, external_id, error),
        }
        remove_entity(A::records(snapshot), external_id);
    }

    for entry in &diff.changed {
        match apply_change::<K, A>(model, snapshot, entry) {
            Ok(()) => report.changed += 1,
            Err(error) => {
                remove_entity(A::records(snapshot), &entry.external_id);
                report.skip(A::CLASS, &entry.external_id, error);
            }
        }
    }
}

fn apply_change<K: SketchKernel, A: ClassApplier<K>>(
    model: &mut MechanicalModel<K>,
    snapshot: &mut BoardSnapshot,
    entry: &ChangedEntry,
) -> Result<(), SyncError> {
    model.registry.require(A::CLASS, &entry.external_id)?;
    let mut working = find_entity(A::records(snapshot), &entry.external_id)
        .cloned()
        .ok_or_else(|| SyncError::UnknownEntity {
            class: A::CLASS,
            external_id: entry.external_id.clone(),
        })?;

    A::change(model, &mut working, &entry.changes)?;
    working.refresh_hash()?;
    upsert_entity(A::records(snapshot), working);
    Ok(())
}

/// Deletes everything registered for `external_id` (owned entities included).
fn remove_registered<K: SketchKernel>(
    model: &mut MechanicalModel<K>,
    class: EntityClass,
    external_id: &str,
) -> Result<(), SyncError> {
    let container = model.registry.require(class, external_id)?.container;
    delete_owned_geometry(model, external_id)?;

    for child in model.registry.children_of(external_id) {
        model.registry.unregister(&child);
    }
    model.registry.unregister(external_id);
    if model.containers.contains(container) {
        model.containers.remove(container)?;
    }
    debug!(%class, %external_id, "entity removed from model");
    Ok(())
}

fn delete_owned_geometry<K: SketchKernel>(
    model: &mut MechanicalModel<K>,
    external_id: &str,
) -> Result<(), SyncError> {
    let tags = model.registry.owned_tags(external_id);
    if tags.is_empty() {
        return Ok(());
    }
    let indices = model.kernel.find_geometry_by_tag(&tags);
    model.kernel.delete_geometry(&indices)
}

fn mismatch(
    class: EntityClass,
    external_id: &str,
    field: &str,
    reason: impl Into<String>,
) -> SyncError {
    SyncError::StructuralMismatch {
        class,
        external_id: external_id.to_string(),
        field: field.to_string(),
        reason: reason.into(),
    }
}

fn decode<T: serde::de::DeserializeOwned>(change: &FieldChange) -> Result<T, SyncError> {
    serde_json::from_value(change.value().clone())
        .map_err(|err| SyncError::invalid_field(change.field(), err))
}

fn single_tag(registration: &Registration, external_id: &str) -> Result<GeometryTag, SyncError> {
    registration
        .tags
        .first()
        .copied()
        .ok_or_else(|| SyncError::MissingGeometry {
            external_id: external_id.to_string(),
        })
}

fn move_tagged<K: SketchKernel>(
    model: &mut MechanicalModel<K>,
    tag: GeometryTag,
    role: PointRole,
    to: Point2,
) -> Result<(), SyncError> {
    let index = compose::index_of(&model.kernel, tag)?;
    model.kernel.move_point(PointRef::new(index, role), to)
}

fn set_named_value<K: SketchKernel>(
    model: &mut MechanicalModel<K>,
    name: &str,
    value: f64,
) -> Result<(), SyncError> {
    let index = constraint_index(&model.kernel, name)?;
    model.kernel.set_constraint_value(index, value)
}

struct Footprints;

impl Footprints {
    fn label(sequence_id: u32, reference: &str, pcb_id: &str) -> String {
        format!("{sequence_id}_{reference}_{pcb_id}")
    }

    fn placement<K: SketchKernel>(model: &MechanicalModel<K>, record: &Footprint) -> Placement {
        let base = to_model(record.pos);
        Placement {
            base: Point3::new(base.x, base.y, model.layer_height(record.layer)),
            rotation_z_deg: record.rot,
            flipped: record.layer == Layer::Bot,
        }
    }

    fn pad_group<K: SketchKernel>(
        model: &MechanicalModel<K>,
        footprint: ContainerId,
    ) -> Result<ContainerId, SyncError> {
        model
            .containers
            .children_where(footprint, |role| matches!(role, ContainerRole::PadGroup))?
            .first()
            .copied()
            .ok_or(SyncError::UnknownContainer)
    }

    /// Pad center in model space.
    fn pad_point(footprint_pos: Vector2Nm, pad: &Pad) -> Point2 {
        to_model(footprint_pos) + to_model(pad.pos_delta)
    }

    /// Datum of a pad's offset constraints: its model delta relative to the anchor's.
    fn pad_offset(anchor: &Pad, pad: &Pad) -> Point2 {
        to_model(pad.pos_delta) - to_model(anchor.pos_delta)
    }

    fn pad_tag<K: SketchKernel>(
        model: &MechanicalModel<K>,
        pad_id: &str,
    ) -> Result<GeometryTag, SyncError> {
        single_tag(model.registry.require(EntityClass::Pads, pad_id)?, pad_id)
    }

    /// Creates pad geometry: the first pad is the free anchor, every other pad is tied to it.
    fn build_pads<K: SketchKernel>(
        model: &mut MechanicalModel<K>,
        record: &Footprint,
        group: ContainerId,
    ) -> Result<(), SyncError> {
        let Some(anchor) = record.pads_pth.first() else {
            return Ok(());
        };
        let mut anchor_tag = None;

        for pad in &record.pads_pth {
            let tag = model.kernel.add_geometry(Geometry::Circle {
                center: Self::pad_point(record.pos, pad),
                radius: length_to_model(pad.hole_size[0]) / 2.0,
            })?;

            let container = model.containers.insert(
                Container::new(
                    format!("{}_{}_{}", record.reference, pad.number, model.pcb_id),
                    ContainerRole::Pad {
                        number: pad.number.clone(),
                    },
                ),
                Some(group),
            );
            let mut registration =
                Registration::new(EntityClass::Pads, container).with_parent(record.kiid.clone());
            registration.tags.push(tag);
            model.registry.register(pad.kiid.clone(), registration);

            let mut names = vec![compose::add_radius(
                &mut model.kernel,
                PAD_RADIUS,
                tag,
                length_to_model(pad.hole_size[0]) / 2.0,
            )?];
            match anchor_tag {
                None => anchor_tag = Some(tag),
                Some(anchor_tag) => names.extend(compose::add_offset(
                    &mut model.kernel,
                    anchor_tag,
                    tag,
                    Self::pad_offset(anchor, pad),
                )?),
            }

            if let Some(registration) = model.registry.resolve_mut(&pad.kiid) {
                registration.constraints = names;
            }
        }

        debug!(footprint = %record.kiid, pads = record.pads_pth.len(), "pads built");
        Ok(())
    }

    fn remove_pads<K: SketchKernel>(
        model: &mut MechanicalModel<K>,
        footprint_id: &str,
    ) -> Result<(), SyncError> {
        for pad in model.registry.children_of(footprint_id) {
            delete_owned_geometry(model, &pad)?;
            if let Some(registration) = model.registry.unregister(&pad) {
                if model.containers.contains(registration.container) {
                    model.containers.remove(registration.container)?;
                }
            }
        }
        Ok(())
    }

    fn build_models<K: SketchKernel>(
        model: &mut MechanicalModel<K>,
        record: &Footprint,
        container: ContainerId,
    ) {
        for part in &record.models {
            let placement = model.model_placement(part, record.layer);
            model.containers.insert(
                Container::new(
                    format!(
                        "{}_{}_{}_{}",
                        record.seq, record.reference, part.model_id, model.pcb_id
                    ),
                    ContainerRole::Model3d(part.clone()),
                )
                .with_placement(placement),
                Some(container),
            );
        }
    }

    fn model_containers<K: SketchKernel>(
        model: &MechanicalModel<K>,
        container: ContainerId,
    ) -> Result<Vec<ContainerId>, SyncError> {
        model
            .containers
            .children_where(container, |role| matches!(role, ContainerRole::Model3d(_)))
    }

    fn change_pads<K: SketchKernel>(
        model: &mut MechanicalModel<K>,
        working: &mut Footprint,
        change: &FieldChange,
    ) -> Result<(), SyncError> {
        let entries: Vec<ChangedEntry> = decode(change)?;
        for entry in &entries {
            model.registry.require(EntityClass::Pads, &entry.external_id)?;
            for pad_change in &entry.changes {
                Self::change_pad(model, working, &entry.external_id, pad_change)?;
            }
        }
        Ok(())
    }

    fn change_pad<K: SketchKernel>(
        model: &mut MechanicalModel<K>,
        working: &mut Footprint,
        pad_id: &str,
        change: &FieldChange,
    ) -> Result<(), SyncError> {
        let tag = Self::pad_tag(model, pad_id)?;
        match change.field() {
            FIELD_POS_DELTA => {
                let delta: Vector2Nm = decode(change)?;
                let is_anchor = working
                    .pads_pth
                    .first()
                    .is_some_and(|anchor| anchor.kiid == pad_id);
                apply_pad_change(working, pad_id, change)?;

                let anchor = working
                    .pads_pth
                    .first()
                    .cloned()
                    .ok_or_else(|| SyncError::UnknownEntity {
                        class: EntityClass::Pads,
                        external_id: pad_id.to_string(),
                    })?;

                if is_anchor {
                    move_tagged(
                        model,
                        tag,
                        PointRole::Center,
                        to_model(working.pos) + to_model(delta),
                    )?;
                    for sibling in working.pads_pth.iter().skip(1) {
                        let sibling_tag = Self::pad_tag(model, &sibling.kiid)?;
                        Self::set_offset(model, sibling_tag, Self::pad_offset(&anchor, sibling))?;
                    }
                } else if let Some(pad) = working.pad(pad_id).cloned() {
                    Self::set_offset(model, tag, Self::pad_offset(&anchor, &pad))?;
                    move_tagged(model, tag, PointRole::Center, Self::pad_point(working.pos, &pad))?;
                }
                Ok(())
            }
            FIELD_HOLE_SIZE => {
                let hole: [i64; 2] = decode(change)?;
                set_named_value(
                    model,
                    &constraint_name(PAD_RADIUS, tag),
                    length_to_model(hole[0]) / 2.0,
                )?;
                apply_pad_change(working, pad_id, change)
            }
            FIELD_NUMBER => {
                let number: String = decode(change)?;
                let container = model.registry.require(EntityClass::Pads, pad_id)?.container;
                let entry = model.containers.get_mut(container)?;
                entry.label = format!("{}_{}_{}", working.reference, number, model.pcb_id);
                entry.role = ContainerRole::Pad { number };
                apply_pad_change(working, pad_id, change)
            }
            other => Err(mismatch(EntityClass::Pads, pad_id, other, "field is not synchronised")),
        }
    }

    fn set_offset<K: SketchKernel>(
        model: &mut MechanicalModel<K>,
        tag: GeometryTag,
        offset: Point2,
    ) -> Result<(), SyncError> {
        set_named_value(model, &constraint_name(DISTANCE_X, tag), offset.x)?;
        set_named_value(model, &constraint_name(DISTANCE_Y, tag), offset.y)
    }
}

fn apply_pad_change(
    working: &mut Footprint,
    pad_id: &str,
    change: &FieldChange,
) -> Result<(), SyncError> {
    let pad = working.pad_mut(pad_id).ok_or_else(|| SyncError::UnknownEntity {
        class: EntityClass::Pads,
        external_id: pad_id.to_string(),
    })?;
    pad.apply_changes(std::slice::from_ref(change))
}

impl<K: SketchKernel> ClassApplier<K> for Footprints {
    type Record = Footprint;

    const CLASS: EntityClass = EntityClass::Footprints;

    fn records(snapshot: &mut BoardSnapshot) -> &mut Vec<Footprint> {
        &mut snapshot.footprints
    }

    fn add(model: &mut MechanicalModel<K>, record: &Footprint) -> Result<(), SyncError> {
        let container = model.containers.insert(
            Container::new(
                Self::label(record.seq, &record.reference, &model.pcb_id),
                ContainerRole::Footprint {
                    reference: record.reference.clone(),
                    library_id: record.fpid.clone(),
                    sequence_id: record.seq,
                },
            )
            .with_placement(Self::placement(model, record)),
            Some(model.layout.layer(record.layer)),
        );
        model.registry.register(
            record.kiid.clone(),
            Registration::new(EntityClass::Footprints, container),
        );

        let group = model.containers.insert(
            Container::new(
                format!("Pads_{}", Self::label(record.seq, &record.reference, &model.pcb_id)),
                ContainerRole::PadGroup,
            ),
            Some(container),
        );
        Self::build_pads(model, record, group)?;
        Self::build_models(model, record, container);
        Ok(())
    }

    fn change(
        model: &mut MechanicalModel<K>,
        working: &mut Footprint,
        changes: &[FieldChange],
    ) -> Result<(), SyncError> {
        let external_id = working.kiid.clone();
        let container = model.registry.require(EntityClass::Footprints, &external_id)?.container;

        for change in changes {
            match change.field() {
                FIELD_REF => {
                    let reference: String = decode(change)?;
                    let entry = model.containers.get_mut(container)?;
                    entry.label = Self::label(working.seq, &reference, &model.pcb_id);
                    if let ContainerRole::Footprint { reference: current, .. } = &mut entry.role {
                        *current = reference;
                    }
                }
                FIELD_FPID => {
                    let fpid: String = decode(change)?;
                    if let ContainerRole::Footprint { library_id, .. } =
                        &mut model.containers.get_mut(container)?.role
                    {
                        *library_id = fpid;
                    }
                }
                FIELD_POS => {
                    let pos: Vector2Nm = decode(change)?;
                    let base = to_model(pos);
                    let placement = &mut model.containers.get_mut(container)?.placement;
                    placement.base.x = base.x;
                    placement.base.y = base.y;

                    for pad in &working.pads_pth {
                        let tag = Self::pad_tag(model, &pad.kiid)?;
                        move_tagged(model, tag, PointRole::Center, Self::pad_point(pos, pad))?;
                    }
                }
                FIELD_ROT => {
                    let rot: f64 = decode(change)?;
                    let placement = &mut model.containers.get_mut(container)?.placement;
                    let delta = rot - placement.rotation_z_deg;
                    placement.rotate_z(delta);
                    debug!(footprint = %external_id, delta, "footprint rotated");
                }
                FIELD_LAYER => {
                    let layer: Layer = decode(change)?;
                    model
                        .containers
                        .reparent(container, model.layout.layer(layer))?;
                    let height = model.layer_height(layer);
                    let placement = &mut model.containers.get_mut(container)?.placement;
                    placement.base.z = height;
                    placement.flipped = layer == Layer::Bot;

                    for part in Self::model_containers(model, container)? {
                        let ContainerRole::Model3d(reference) =
                            model.containers.get(part)?.role.clone()
                        else {
                            continue;
                        };
                        let placement = model.model_placement(&reference, layer);
                        model.containers.get_mut(part)?.placement = placement;
                    }
                }
                FIELD_PADS => {
                    Self::change_pads(model, working, change)?;
                    continue;
                }
                FIELD_PAD_LIST => {
                    let pads: Vec<Pad> = decode(change)?;
                    Self::remove_pads(model, &external_id)?;
                    let mut rebuilt = working.clone();
                    rebuilt.pads_pth = pads;
                    let group = Self::pad_group(model, container)?;
                    Self::build_pads(model, &rebuilt, group)?;
                }
                FIELD_MODELS => {
                    let models: Vec<Model3d> = decode(change)?;
                    for part in Self::model_containers(model, container)? {
                        model.containers.remove(part)?;
                    }
                    let mut replaced = working.clone();
                    replaced.models = models;
                    Self::build_models(model, &replaced, container);
                }
                other => {
                    return Err(mismatch(
                        EntityClass::Footprints,
                        &external_id,
                        other,
                        "field is not synchronised",
                    ))
                }
            }

            working.apply_changes(std::slice::from_ref(change))?;
        }
        Ok(())
    }
}

struct Drawings;

impl Drawings {
    /// Builds the drawing's geometry, deleting whatever was created if any step fails.
    fn build<K: SketchKernel>(
        model: &mut MechanicalModel<K>,
        record: &Drawing,
    ) -> Result<(Vec<GeometryTag>, Vec<String>), SyncError> {
        let mut tags = Vec::new();
        match Self::build_into(model, record, &mut tags) {
            Ok(names) => Ok((tags, names)),
            Err(error) => {
                let indices = model.kernel.find_geometry_by_tag(&tags);
                if let Err(cleanup) = model.kernel.delete_geometry(&indices) {
                    warn!(drawing = %record.kiid, error = %cleanup, "partial drawing left in sketch");
                }
                Err(error)
            }
        }
    }

    fn build_into<K: SketchKernel>(
        model: &mut MechanicalModel<K>,
        record: &Drawing,
        tags: &mut Vec<GeometryTag>,
    ) -> Result<Vec<String>, SyncError> {
        let mut names = Vec::new();

        match &record.geometry {
            DrawingGeometry::Line { start, end } => {
                tags.push(model.kernel.add_geometry(Geometry::Line {
                    start: to_model(*start),
                    end: to_model(*end),
                })?);
            }
            DrawingGeometry::Rect { points } | DrawingGeometry::Polygon { points } => {
                for (index, point) in points.iter().enumerate() {
                    let next = points[(index + 1) % points.len()];
                    tags.push(model.kernel.add_geometry(Geometry::Line {
                        start: to_model(*point),
                        end: to_model(next),
                    })?);
                }
                if matches!(record.geometry, DrawingGeometry::Rect { .. }) {
                    names = compose::add_rectangle(&mut model.kernel, tags)?;
                }
            }
            DrawingGeometry::Arc { points } => {
                let [start, mid, end] = points.as_slice() else {
                    return Err(SyncError::InvalidField {
                        field: FIELD_POINTS.to_string(),
                        reason: format!("arc needs 3 points, got {}", points.len()),
                    });
                };
                tags.push(model.kernel.add_geometry(Geometry::arc_through(
                    to_model(*start),
                    to_model(*mid),
                    to_model(*end),
                )?)?);
            }
            DrawingGeometry::Circle { center, radius } => {
                let radius = length_to_model(*radius);
                let tag = model.kernel.add_geometry(Geometry::Circle {
                    center: to_model(*center),
                    radius,
                })?;
                tags.push(tag);
                names.push(compose::add_radius(&mut model.kernel, CIRCLE_RADIUS, tag, radius)?);
            }
        }

        Ok(names)
    }

    /// Drops the drawing's geometry and builds it again from `record`.
    fn rebuild<K: SketchKernel>(
        model: &mut MechanicalModel<K>,
        record: &Drawing,
    ) -> Result<(), SyncError> {
        delete_owned_geometry(model, &record.kiid)?;
        if let Some(registration) = model.registry.resolve_mut(&record.kiid) {
            registration.tags.clear();
            registration.constraints.clear();
        }

        let (tags, names) = Self::build(model, record)?;
        let container = model.registry.require(EntityClass::Drawings, &record.kiid)?.container;
        let entry = model.containers.get_mut(container)?;
        entry.role = ContainerRole::Drawing {
            shape: record.geometry.kind(),
        };
        entry.label = format!("{}_{}_{}", record.seq, record.geometry.kind(), model.pcb_id);

        if let Some(registration) = model.registry.resolve_mut(&record.kiid) {
            registration.tags = tags;
            registration.constraints = names;
        }
        debug!(drawing = %record.kiid, shape = %record.geometry.kind(), "drawing rebuilt");
        Ok(())
    }
}

impl<K: SketchKernel> ClassApplier<K> for Drawings {
    type Record = Drawing;

    const CLASS: EntityClass = EntityClass::Drawings;

    fn records(snapshot: &mut BoardSnapshot) -> &mut Vec<Drawing> {
        &mut snapshot.drawings
    }

    fn add(model: &mut MechanicalModel<K>, record: &Drawing) -> Result<(), SyncError> {
        let container = model.containers.insert(
            Container::new(
                format!("{}_{}_{}", record.seq, record.geometry.kind(), model.pcb_id),
                ContainerRole::Drawing {
                    shape: record.geometry.kind(),
                },
            ),
            Some(model.layout.drawings),
        );
        model.registry.register(
            record.kiid.clone(),
            Registration::new(EntityClass::Drawings, container),
        );

        let (tags, names) = Self::build(model, record)?;
        if let Some(registration) = model.registry.resolve_mut(&record.kiid) {
            registration.tags = tags;
            registration.constraints = names;
        }
        Ok(())
    }

    fn change(
        model: &mut MechanicalModel<K>,
        working: &mut Drawing,
        changes: &[FieldChange],
    ) -> Result<(), SyncError> {
        let external_id = working.kiid.clone();
        let before = working.geometry.kind();
        working.apply_changes(changes)?;

        let structural = before != working.geometry.kind()
            || changes
                .iter()
                .any(|change| matches!(change.field(), FIELD_SHAPE | FIELD_POINTS));
        if structural {
            return Self::rebuild(model, working);
        }

        let registration = model.registry.require(EntityClass::Drawings, &external_id)?;
        let tag = single_tag(registration, &external_id)?;
        for change in changes {
            match (&working.geometry, change.field()) {
                (DrawingGeometry::Line { .. }, FIELD_START) => {
                    move_tagged(model, tag, PointRole::Start, to_model(decode(change)?))?;
                }
                (DrawingGeometry::Line { .. }, FIELD_END) => {
                    move_tagged(model, tag, PointRole::End, to_model(decode(change)?))?;
                }
                (DrawingGeometry::Circle { .. }, FIELD_CENTER) => {
                    move_tagged(model, tag, PointRole::Center, to_model(decode(change)?))?;
                }
                (DrawingGeometry::Circle { .. }, FIELD_RADIUS) => {
                    let radius: i64 = decode(change)?;
                    set_named_value(
                        model,
                        &constraint_name(CIRCLE_RADIUS, tag),
                        length_to_model(radius),
                    )?;
                }
                (geometry, field) => {
                    return Err(mismatch(
                        EntityClass::Drawings,
                        &external_id,
                        field,
                        format!("{} drawings have no such field", geometry.kind()),
                    ))
                }
            }
        }
        Ok(())
    }
}

struct Vias;

impl<K: SketchKernel> ClassApplier<K> for Vias {
    type Record = Via;

    const CLASS: EntityClass = EntityClass::Vias;

    fn records(snapshot: &mut BoardSnapshot) -> &mut Vec<Via> {
        &mut snapshot.vias
    }

    fn add(model: &mut MechanicalModel<K>, record: &Via) -> Result<(), SyncError> {
        let container = model.containers.insert(
            Container::new(format!("{}_Via_{}", record.seq, model.pcb_id), ContainerRole::Via),
            Some(model.layout.vias),
        );
        model
            .registry
            .register(record.kiid.clone(), Registration::new(EntityClass::Vias, container));

        let radius = length_to_model(record.radius);
        let tag = model.kernel.add_geometry(Geometry::Circle {
            center: to_model(record.center),
            radius,
        })?;
        if let Some(registration) = model.registry.resolve_mut(&record.kiid) {
            registration.tags.push(tag);
        }
        let name = compose::add_radius(&mut model.kernel, VIA_RADIUS, tag, radius)?;
        if let Some(registration) = model.registry.resolve_mut(&record.kiid) {
            registration.constraints.push(name);
        }
        Ok(())
    }

    fn change(
        model: &mut MechanicalModel<K>,
        working: &mut Via,
        changes: &[FieldChange],
    ) -> Result<(), SyncError> {
        let external_id = working.kiid.clone();
        let tag = single_tag(
            model.registry.require(EntityClass::Vias, &external_id)?,
            &external_id,
        )?;

        for change in changes {
            match change.field() {
                FIELD_CENTER => {
                    move_tagged(model, tag, PointRole::Center, to_model(decode(change)?))?;
                }
                FIELD_RADIUS => {
                    let radius: i64 = decode(change)?;
                    set_named_value(
                        model,
                        &constraint_name(VIA_RADIUS, tag),
                        length_to_model(radius),
                    )?;
                }
                other => {
                    return Err(mismatch(
                        EntityClass::Vias,
                        &external_id,
                        other,
                        "field is not synchronised",
                    ))
                }
            }
        }
        working.apply_changes(changes)
    }
}
