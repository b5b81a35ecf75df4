use std::collections::BTreeSet;

use crate::error::SyncError;
use crate::kernel::{
    Constraint, ConstraintIndex, ConstraintKind, Geometry, GeometryIndex, GeometryTag, PointRef,
    PointRole, SketchKernel,
};
use crate::units::Point2;

/// In-memory sketch: an ordered geometry store with shifting indices and named constraints.
///
/// `recompute` evaluates radius and directional distance constraints by moving the
/// constrained point; it is not a general solver.
#[derive(Clone, Debug, Default)]
pub struct MemorySketch {
    geometry: Vec<(GeometryTag, Geometry)>,
    constraints: Vec<Constraint>,
    next_tag: u64,
}

impl MemorySketch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point referenced by `point`, if the geometry exists and has that vertex.
    pub fn point(&self, point: PointRef) -> Option<Point2> {
        self.geometry(point.geometry)?.point(point.role)
    }

    fn check_point(&self, point: PointRef) -> Result<(), SyncError> {
        match self.geometry(point.geometry) {
            None => Err(SyncError::kernel(format!(
                "geometry index {} is out of range",
                point.geometry
            ))),
            Some(geometry) if geometry.point(point.role).is_none() => Err(SyncError::kernel(
                format!("geometry {} has no {} point", point.geometry, point.role),
            )),
            Some(_) => Ok(()),
        }
    }

    fn check_line(&self, index: GeometryIndex) -> Result<(), SyncError> {
        match self.geometry(index) {
            Some(geometry) if geometry.is_line() => Ok(()),
            Some(_) => Err(SyncError::kernel(format!("geometry {index} is not a line"))),
            None => Err(SyncError::kernel(format!(
                "geometry index {index} is out of range"
            ))),
        }
    }

    fn check_constraint(&self, kind: &ConstraintKind) -> Result<(), SyncError> {
        match kind {
            ConstraintKind::Coincident { first, second }
            | ConstraintKind::DistanceX {
                from: first,
                to: second,
                ..
            }
            | ConstraintKind::DistanceY {
                from: first,
                to: second,
                ..
            } => {
                self.check_point(*first)?;
                self.check_point(*second)
            }
            ConstraintKind::Horizontal { geometry } | ConstraintKind::Vertical { geometry } => {
                self.check_line(*geometry)
            }
            ConstraintKind::Perpendicular { first, second } => {
                self.check_line(*first)?;
                self.check_line(*second)
            }
            ConstraintKind::Radius { geometry, value } => {
                if self.geometry(*geometry).and_then(Geometry::radius).is_none() {
                    return Err(SyncError::kernel(format!(
                        "geometry {geometry} has no radius"
                    )));
                }
                if *value <= 0.0 {
                    return Err(SyncError::kernel(format!("radius {value} is not positive")));
                }
                Ok(())
            }
        }
    }

    fn set_radius(&mut self, index: GeometryIndex, value: f64) {
        if let Some((_, Geometry::Circle { radius, .. } | Geometry::Arc { radius, .. })) =
            self.geometry.get_mut(index)
        {
            *radius = value;
        }
    }
}

impl SketchKernel for MemorySketch {
    fn add_geometry(&mut self, geometry: Geometry) -> Result<GeometryTag, SyncError> {
        geometry.validate()?;
        self.next_tag += 1;
        let tag = GeometryTag(self.next_tag);
        self.geometry.push((tag, geometry));
        Ok(tag)
    }

    fn add_constraint(&mut self, constraint: Constraint) -> Result<ConstraintIndex, SyncError> {
        if self.find_constraint_by_name(&constraint.name).is_some() {
            return Err(SyncError::kernel(format!(
                "constraint `{}` already exists",
                constraint.name
            )));
        }
        self.check_constraint(&constraint.kind)?;
        self.constraints.push(constraint);
        Ok(self.constraints.len() - 1)
    }

    fn move_point(&mut self, point: PointRef, to: Point2) -> Result<(), SyncError> {
        let (_, geometry) = self.geometry.get_mut(point.geometry).ok_or_else(|| {
            SyncError::kernel(format!("geometry index {} is out of range", point.geometry))
        })?;

        match (geometry, point.role) {
            (Geometry::Line { start, .. }, PointRole::Start) => *start = to,
            (Geometry::Line { end, .. }, PointRole::End) => *end = to,
            (Geometry::Circle { center, .. } | Geometry::Arc { center, .. }, PointRole::Center) => {
                *center = to
            }
            (_, role) => {
                return Err(SyncError::kernel(format!(
                    "cannot move {role} point of geometry {}",
                    point.geometry
                )))
            }
        }
        Ok(())
    }

    fn set_constraint_value(
        &mut self,
        constraint: ConstraintIndex,
        value: f64,
    ) -> Result<(), SyncError> {
        let entry = self.constraints.get_mut(constraint).ok_or_else(|| {
            SyncError::kernel(format!("constraint index {constraint} is out of range"))
        })?;
        if !entry.kind.set_value(value) {
            return Err(SyncError::kernel(format!(
                "constraint `{}` has no datum value",
                entry.name
            )));
        }
        Ok(())
    }

    fn delete_geometry(&mut self, indices: &[GeometryIndex]) -> Result<(), SyncError> {
        let doomed: BTreeSet<GeometryIndex> = indices.iter().copied().collect();
        if let Some(index) = doomed.iter().find(|index| **index >= self.geometry.len()) {
            return Err(SyncError::kernel(format!(
                "geometry index {index} is out of range"
            )));
        }

        for index in doomed.iter().rev() {
            self.geometry.remove(*index);
        }

        self.constraints.retain(|constraint| {
            constraint
                .kind
                .geometries()
                .iter()
                .all(|index| !doomed.contains(index))
        });

        let shift = |index: GeometryIndex| index - doomed.range(..index).count();
        for constraint in &mut self.constraints {
            constraint.kind.remap(shift);
        }
        Ok(())
    }

    fn find_geometry_by_tag(&self, tags: &[GeometryTag]) -> Vec<GeometryIndex> {
        tags.iter()
            .filter_map(|tag| self.geometry.iter().position(|(known, _)| known == tag))
            .collect()
    }

    fn find_constraint_by_name(&self, name: &str) -> Option<ConstraintIndex> {
        self.constraints
            .iter()
            .position(|constraint| constraint.name == name)
    }

    fn geometry(&self, index: GeometryIndex) -> Option<&Geometry> {
        self.geometry.get(index).map(|(_, geometry)| geometry)
    }

    fn tag_of(&self, index: GeometryIndex) -> Option<GeometryTag> {
        self.geometry.get(index).map(|(tag, _)| *tag)
    }

    fn geometry_count(&self) -> usize {
        self.geometry.len()
    }

    fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    fn recompute(&mut self) -> Result<(), SyncError> {
        let kinds: Vec<ConstraintKind> = self
            .constraints
            .iter()
            .map(|constraint| constraint.kind.clone())
            .collect();

        for kind in kinds {
            match kind {
                ConstraintKind::Radius { geometry, value } => self.set_radius(geometry, value),
                ConstraintKind::DistanceX { from, to, value } => {
                    let (Some(origin), Some(target)) = (self.point(from), self.point(to)) else {
                        continue;
                    };
                    self.move_point(to, Point2::new(origin.x + value, target.y))?;
                }
                ConstraintKind::DistanceY { from, to, value } => {
                    let (Some(origin), Some(target)) = (self.point(from), self.point(to)) else {
                        continue;
                    };
                    self.move_point(to, Point2::new(target.x, origin.y + value))?;
                }
                _ => {}
            }
        }
        Ok(())
    }
}
