//! Contract with the sketch kernel that owns geometry and constraints.
//!
//! Geometry is addressed two ways. A [`GeometryTag`] is issued once when geometry is created
//! and survives unrelated edits; a [`GeometryIndex`] is a position in the kernel's ordered
//! store and shifts whenever earlier geometry is deleted. Constraint indices shift the same
//! way. Callers keep tags and constraint names, and resolve indices right before each call.

use std::f64::consts::TAU;

use crate::error::SyncError;
use crate::units::Point2;

pub mod memory;

pub use memory::MemorySketch;

/// Length below which geometry is considered degenerate.
pub const GEOMETRY_EPSILON: f64 = 1e-9;

pub type GeometryIndex = usize;

pub type ConstraintIndex = usize;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct GeometryTag(pub u64);

impl std::fmt::Display for GeometryTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "g{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum PointRole {
    Start,
    End,
    Center,
}

impl std::fmt::Display for PointRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = match self {
            Self::Start => "start",
            Self::End => "end",
            Self::Center => "center",
        };

        write!(f, "{value}")
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct PointRef {
    pub geometry: GeometryIndex,
    pub role: PointRole,
}

impl PointRef {
    pub const fn new(geometry: GeometryIndex, role: PointRole) -> Self {
        Self { geometry, role }
    }
}

/// Sketch primitives. Arcs run counter-clockwise from `start_angle` to `end_angle` (radians).
#[derive(Clone, Debug, PartialEq)]
pub enum Geometry {
    Line {
        start: Point2,
        end: Point2,
    },
    Circle {
        center: Point2,
        radius: f64,
    },
    Arc {
        center: Point2,
        radius: f64,
        start_angle: f64,
        end_angle: f64,
    },
}

impl Geometry {
    /// Arc through three points.
    ///
    /// The kernel stores arcs counter-clockwise, so when the points run clockwise the
    /// arc's start vertex is `end` and its end vertex is `start`.
    pub fn arc_through(start: Point2, mid: Point2, end: Point2) -> Result<Self, SyncError> {
        let cross = (mid.x - start.x) * (end.y - start.y) - (mid.y - start.y) * (end.x - start.x);
        if cross.abs() <= GEOMETRY_EPSILON {
            return Err(SyncError::kernel("arc points are collinear"));
        }

        let d = 2.0 * (start.x * (mid.y - end.y) + mid.x * (end.y - start.y) + end.x * (start.y - mid.y));
        let sq = |p: Point2| p.x * p.x + p.y * p.y;
        let center = Point2::new(
            (sq(start) * (mid.y - end.y) + sq(mid) * (end.y - start.y) + sq(end) * (start.y - mid.y)) / d,
            (sq(start) * (end.x - mid.x) + sq(mid) * (start.x - end.x) + sq(end) * (mid.x - start.x)) / d,
        );
        let radius = center.distance(start);
        let angle = |p: Point2| (p.y - center.y).atan2(p.x - center.x);

        let (from, to) = if cross > 0.0 { (start, end) } else { (end, start) };
        let start_angle = angle(from);
        let mut end_angle = angle(to);
        if end_angle <= start_angle {
            end_angle += TAU;
        }

        Ok(Self::Arc {
            center,
            radius,
            start_angle,
            end_angle,
        })
    }

    pub fn point(&self, role: PointRole) -> Option<Point2> {
        match (self, role) {
            (Self::Line { start, .. }, PointRole::Start) => Some(*start),
            (Self::Line { end, .. }, PointRole::End) => Some(*end),
            (Self::Circle { center, .. }, PointRole::Center) => Some(*center),
            (Self::Arc { center, .. }, PointRole::Center) => Some(*center),
            (
                Self::Arc {
                    center,
                    radius,
                    start_angle,
                    ..
                },
                PointRole::Start,
            ) => Some(polar(*center, *radius, *start_angle)),
            (
                Self::Arc {
                    center,
                    radius,
                    end_angle,
                    ..
                },
                PointRole::End,
            ) => Some(polar(*center, *radius, *end_angle)),
            _ => None,
        }
    }

    /// Start and end vertex, for geometry that has them.
    pub fn endpoints(&self) -> Option<(Point2, Point2)> {
        Some((self.point(PointRole::Start)?, self.point(PointRole::End)?))
    }

    pub fn is_line(&self) -> bool {
        matches!(self, Self::Line { .. })
    }

    pub fn radius(&self) -> Option<f64> {
        match self {
            Self::Circle { radius, .. } | Self::Arc { radius, .. } => Some(*radius),
            Self::Line { .. } => None,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), SyncError> {
        match self {
            Self::Line { start, end } => {
                if start.distance(*end) <= GEOMETRY_EPSILON {
                    return Err(SyncError::kernel("line has zero length"));
                }
            }
            Self::Circle { radius, .. } | Self::Arc { radius, .. } => {
                if !radius.is_finite() || *radius <= GEOMETRY_EPSILON {
                    return Err(SyncError::kernel(format!("radius {radius} is not positive")));
                }
            }
        }
        Ok(())
    }
}

fn polar(center: Point2, radius: f64, angle: f64) -> Point2 {
    Point2::new(center.x + radius * angle.cos(), center.y + radius * angle.sin())
}

#[derive(Clone, Debug, PartialEq)]
pub enum ConstraintKind {
    Coincident { first: PointRef, second: PointRef },
    Horizontal { geometry: GeometryIndex },
    Vertical { geometry: GeometryIndex },
    Perpendicular { first: GeometryIndex, second: GeometryIndex },
    Radius { geometry: GeometryIndex, value: f64 },
    /// `to.x - from.x == value`
    DistanceX { from: PointRef, to: PointRef, value: f64 },
    /// `to.y - from.y == value`
    DistanceY { from: PointRef, to: PointRef, value: f64 },
}

impl ConstraintKind {
    pub fn geometries(&self) -> Vec<GeometryIndex> {
        match self {
            Self::Coincident { first, second }
            | Self::DistanceX {
                from: first,
                to: second,
                ..
            }
            | Self::DistanceY {
                from: first,
                to: second,
                ..
            } => vec![first.geometry, second.geometry],
            Self::Horizontal { geometry }
            | Self::Vertical { geometry }
            | Self::Radius { geometry, .. } => vec![*geometry],
            Self::Perpendicular { first, second } => vec![*first, *second],
        }
    }

    pub fn points(&self) -> Vec<PointRef> {
        match self {
            Self::Coincident { first, second }
            | Self::DistanceX {
                from: first,
                to: second,
                ..
            }
            | Self::DistanceY {
                from: first,
                to: second,
                ..
            } => vec![*first, *second],
            _ => Vec::new(),
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Radius { value, .. }
            | Self::DistanceX { value, .. }
            | Self::DistanceY { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub(crate) fn set_value(&mut self, new_value: f64) -> bool {
        match self {
            Self::Radius { value, .. }
            | Self::DistanceX { value, .. }
            | Self::DistanceY { value, .. } => {
                *value = new_value;
                true
            }
            _ => false,
        }
    }

    /// Rewrites every geometry index through `map`.
    pub(crate) fn remap(&mut self, map: impl Fn(GeometryIndex) -> GeometryIndex) {
        match self {
            Self::Coincident { first, second }
            | Self::DistanceX {
                from: first,
                to: second,
                ..
            }
            | Self::DistanceY {
                from: first,
                to: second,
                ..
            } => {
                first.geometry = map(first.geometry);
                second.geometry = map(second.geometry);
            }
            Self::Horizontal { geometry }
            | Self::Vertical { geometry }
            | Self::Radius { geometry, .. } => *geometry = map(*geometry),
            Self::Perpendicular { first, second } => {
                *first = map(*first);
                *second = map(*second);
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Constraint {
    pub name: String,
    pub kind: ConstraintKind,
}

impl Constraint {
    pub fn new(name: impl Into<String>, kind: ConstraintKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Operations the sync engine needs from a sketch kernel.
///
/// Deleting geometry must also delete every constraint that references it; surviving
/// geometry and constraint indices shift down accordingly.
pub trait SketchKernel {
    fn add_geometry(&mut self, geometry: Geometry) -> Result<GeometryTag, SyncError>;

    fn add_constraint(&mut self, constraint: Constraint) -> Result<ConstraintIndex, SyncError>;

    fn move_point(&mut self, point: PointRef, to: Point2) -> Result<(), SyncError>;

    fn set_constraint_value(
        &mut self,
        constraint: ConstraintIndex,
        value: f64,
    ) -> Result<(), SyncError>;

    fn delete_geometry(&mut self, indices: &[GeometryIndex]) -> Result<(), SyncError>;

    /// Current indices of `tags`, in tag order. Tags that no longer exist are left out.
    fn find_geometry_by_tag(&self, tags: &[GeometryTag]) -> Vec<GeometryIndex>;

    fn find_constraint_by_name(&self, name: &str) -> Option<ConstraintIndex>;

    fn geometry(&self, index: GeometryIndex) -> Option<&Geometry>;

    fn tag_of(&self, index: GeometryIndex) -> Option<GeometryTag>;

    fn geometry_count(&self) -> usize;

    fn constraints(&self) -> &[Constraint];

    /// Re-evaluates datum constraints after points or values changed.
    fn recompute(&mut self) -> Result<(), SyncError>;
}

#[cfg(test)]
mod tests {
    use super::{Geometry, PointRole};
    use crate::units::Point2;

    #[test]
    fn counter_clockwise_arc_keeps_vertex_order() {
        let arc = Geometry::arc_through(
            Point2::new(1.0, 0.0),
            Point2::new(0.0, 1.0),
            Point2::new(-1.0, 0.0),
        )
        .expect("arc should build");

        let start = arc.point(PointRole::Start).expect("arc has a start");
        let end = arc.point(PointRole::End).expect("arc has an end");
        assert!(start.approx_eq(Point2::new(1.0, 0.0), 1e-9));
        assert!(end.approx_eq(Point2::new(-1.0, 0.0), 1e-9));
        assert!((arc.radius().expect("arc has a radius") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn clockwise_arc_swaps_vertices() {
        let arc = Geometry::arc_through(
            Point2::new(-1.0, 0.0),
            Point2::new(0.0, 1.0),
            Point2::new(1.0, 0.0),
        )
        .expect("arc should build");

        let start = arc.point(PointRole::Start).expect("arc has a start");
        assert!(start.approx_eq(Point2::new(1.0, 0.0), 1e-9));
    }

    #[test]
    fn collinear_points_are_rejected() {
        assert!(Geometry::arc_through(
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(2.0, 0.0),
        )
        .is_err());
    }
}
