//! Constraint composition for geometry entering the sketch.
//!
//! Every constraint is named `<kind>_<tag>` after the geometry it belongs to, so it can be
//! found again by name after unrelated edits have shifted constraint indices.

use tracing::debug;

use crate::error::SyncError;
use crate::kernel::{
    Constraint, ConstraintKind, GeometryIndex, GeometryTag, PointRef, PointRole, SketchKernel,
    GEOMETRY_EPSILON,
};
use crate::units::Point2;

pub const PAD_RADIUS: &str = "padradius";
pub const CIRCLE_RADIUS: &str = "circleradius";
pub const VIA_RADIUS: &str = "viaradius";
pub const DISTANCE_X: &str = "distance_x";
pub const DISTANCE_Y: &str = "distance_y";
pub const PERPENDICULAR: &str = "perpendicular_rectangle";
pub const HORIZONTAL: &str = "horizontal_rectangle";
pub const VERTICAL: &str = "vertical_rectangle";
pub const COINCIDENT_START: &str = "coincident_start";
pub const COINCIDENT_END: &str = "coincident_end";

/// Points closer than this on both axes are treated as shared.
pub const COINCIDENCE_TOLERANCE: f64 = 1e-9;

pub fn constraint_name(kind: &str, tag: GeometryTag) -> String {
    format!("{kind}_{tag}")
}

pub(crate) fn index_of<K: SketchKernel>(
    kernel: &K,
    tag: GeometryTag,
) -> Result<GeometryIndex, SyncError> {
    kernel
        .find_geometry_by_tag(&[tag])
        .first()
        .copied()
        .ok_or_else(|| SyncError::MissingGeometry {
            external_id: tag.to_string(),
        })
}

/// Current index of the constraint called `name`.
pub fn constraint_index<K: SketchKernel>(kernel: &K, name: &str) -> Result<usize, SyncError> {
    kernel
        .find_constraint_by_name(name)
        .ok_or_else(|| SyncError::MissingConstraint {
            name: name.to_string(),
        })
}

fn add_named<K: SketchKernel>(
    kernel: &mut K,
    kind: &str,
    tag: GeometryTag,
    constraint: ConstraintKind,
) -> Result<String, SyncError> {
    let name = constraint_name(kind, tag);
    kernel.add_constraint(Constraint::new(name.clone(), constraint))?;
    Ok(name)
}

/// Radius constraint on the circle or arc `tag`, named `<kind>_<tag>`.
pub fn add_radius<K: SketchKernel>(
    kernel: &mut K,
    kind: &str,
    tag: GeometryTag,
    radius: f64,
) -> Result<String, SyncError> {
    let geometry = index_of(kernel, tag)?;
    add_named(
        kernel,
        kind,
        tag,
        ConstraintKind::Radius {
            geometry,
            value: radius,
        },
    )
}

/// Ties `member`'s center to `anchor`'s center by directional offsets.
pub fn add_offset<K: SketchKernel>(
    kernel: &mut K,
    anchor: GeometryTag,
    member: GeometryTag,
    offset: Point2,
) -> Result<Vec<String>, SyncError> {
    let from = PointRef::new(index_of(kernel, anchor)?, PointRole::Center);
    let to = PointRef::new(index_of(kernel, member)?, PointRole::Center);

    Ok(vec![
        add_named(
            kernel,
            DISTANCE_X,
            member,
            ConstraintKind::DistanceX {
                from,
                to,
                value: offset.x,
            },
        )?,
        add_named(
            kernel,
            DISTANCE_Y,
            member,
            ConstraintKind::DistanceY {
                from,
                to,
                value: offset.y,
            },
        )?,
    ])
}

/// Perpendicular constraints between consecutive edges, leaving the closing pair free,
/// plus a horizontal or vertical constraint on the first edge when it is axis aligned.
pub fn add_rectangle<K: SketchKernel>(
    kernel: &mut K,
    edges: &[GeometryTag],
) -> Result<Vec<String>, SyncError> {
    let mut names = Vec::new();
    for pair in edges.windows(2) {
        let first = index_of(kernel, pair[0])?;
        let second = index_of(kernel, pair[1])?;
        names.push(add_named(
            kernel,
            PERPENDICULAR,
            pair[0],
            ConstraintKind::Perpendicular { first, second },
        )?);
    }

    let Some(first_tag) = edges.first().copied() else {
        return Ok(names);
    };
    let first = index_of(kernel, first_tag)?;
    let Some((start, end)) = kernel.geometry(first).and_then(|geometry| geometry.endpoints())
    else {
        return Ok(names);
    };

    if (start.y - end.y).abs() <= GEOMETRY_EPSILON {
        names.push(add_named(
            kernel,
            HORIZONTAL,
            first_tag,
            ConstraintKind::Horizontal { geometry: first },
        )?);
    } else if (start.x - end.x).abs() <= GEOMETRY_EPSILON {
        names.push(add_named(
            kernel,
            VERTICAL,
            first_tag,
            ConstraintKind::Vertical { geometry: first },
        )?);
    }

    Ok(names)
}

/// Adds one coincident constraint for every pair of line/arc endpoints that touch and
/// are not already joined. Returns the number of constraints added.
pub fn add_path_continuity<K: SketchKernel>(kernel: &mut K) -> Result<usize, SyncError> {
    let mut joined: Vec<PointRef> = kernel
        .constraints()
        .iter()
        .filter(|constraint| matches!(constraint.kind, ConstraintKind::Coincident { .. }))
        .flat_map(|constraint| constraint.kind.points())
        .collect();

    let mut endpoints = Vec::new();
    for index in 0..kernel.geometry_count() {
        let Some((start, end)) = kernel.geometry(index).and_then(|geometry| geometry.endpoints())
        else {
            continue;
        };
        endpoints.push((PointRef::new(index, PointRole::Start), start));
        endpoints.push((PointRef::new(index, PointRole::End), end));
    }

    let mut added = 0;
    for (position, (first, first_point)) in endpoints.iter().enumerate() {
        if joined.contains(first) {
            continue;
        }

        let partner = endpoints[position + 1..].iter().find(|(second, point)| {
            second.geometry != first.geometry
                && !joined.contains(second)
                && point.approx_eq(*first_point, COINCIDENCE_TOLERANCE)
        });
        let Some((second, _)) = partner else {
            continue;
        };

        let tag = kernel
            .tag_of(first.geometry)
            .ok_or_else(|| SyncError::kernel(format!("geometry {} has no tag", first.geometry)))?;
        let kind = match first.role {
            PointRole::Start => COINCIDENT_START,
            _ => COINCIDENT_END,
        };
        add_named(
            kernel,
            kind,
            tag,
            ConstraintKind::Coincident {
                first: *first,
                second: *second,
            },
        )?;
        joined.push(*first);
        joined.push(*second);
        added += 1;
    }

    debug!(added, "path continuity constraints");
    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::{
        add_offset, add_path_continuity, add_radius, add_rectangle, constraint_name, PAD_RADIUS,
    };
    use crate::kernel::{
        ConstraintKind, Geometry, GeometryTag, MemorySketch, PointRef, PointRole, SketchKernel,
    };
    use crate::units::Point2;

    fn line(sketch: &mut MemorySketch, start: (f64, f64), end: (f64, f64)) -> GeometryTag {
        sketch
            .add_geometry(Geometry::Line {
                start: Point2::new(start.0, start.1),
                end: Point2::new(end.0, end.1),
            })
            .expect("line should be accepted")
    }

    fn rectangle(sketch: &mut MemorySketch) -> Vec<GeometryTag> {
        vec![
            line(sketch, (0.0, 0.0), (4.0, 0.0)),
            line(sketch, (4.0, 0.0), (4.0, 3.0)),
            line(sketch, (4.0, 3.0), (0.0, 3.0)),
            line(sketch, (0.0, 3.0), (0.0, 0.0)),
        ]
    }

    #[test]
    fn rectangle_gets_three_perpendiculars_and_a_horizontal() {
        let mut sketch = MemorySketch::new();
        let edges = rectangle(&mut sketch);

        let names = add_rectangle(&mut sketch, &edges).expect("constraints should be added");
        assert_eq!(names.len(), 4);
        assert_eq!(names[3], format!("horizontal_rectangle_{}", edges[0]));

        let perpendiculars = sketch
            .constraints()
            .iter()
            .filter(|constraint| matches!(constraint.kind, ConstraintKind::Perpendicular { .. }))
            .count();
        assert_eq!(perpendiculars, 3);
    }

    #[test]
    fn closed_loop_gets_one_coincidence_per_corner() {
        let mut sketch = MemorySketch::new();
        rectangle(&mut sketch);

        assert_eq!(add_path_continuity(&mut sketch).expect("continuity should succeed"), 4);
        assert_eq!(add_path_continuity(&mut sketch).expect("continuity should succeed"), 0);
        assert_eq!(sketch.constraints().len(), 4);
    }

    #[test]
    fn circles_do_not_join_paths() {
        let mut sketch = MemorySketch::new();
        line(&mut sketch, (0.0, 0.0), (1.0, 0.0));
        sketch
            .add_geometry(Geometry::Circle {
                center: Point2::new(1.0, 0.0),
                radius: 1.0,
            })
            .expect("circle should be accepted");

        assert_eq!(add_path_continuity(&mut sketch).expect("continuity should succeed"), 0);
    }

    #[test]
    fn arc_joins_lines_at_its_real_endpoints() {
        let mut sketch = MemorySketch::new();
        line(&mut sketch, (-1.0, -2.0), (-1.0, 0.0));
        sketch
            .add_geometry(
                Geometry::arc_through(
                    Point2::new(-1.0, 0.0),
                    Point2::new(0.0, 1.0),
                    Point2::new(1.0, 0.0),
                )
                .expect("arc should build"),
            )
            .expect("arc should be accepted");
        line(&mut sketch, (1.0, 0.0), (1.0, -2.0));

        assert_eq!(add_path_continuity(&mut sketch).expect("continuity should succeed"), 2);
    }

    #[test]
    fn group_follows_a_relocated_anchor() {
        let mut sketch = MemorySketch::new();
        let mut circle = |x: f64, y: f64| {
            sketch
                .add_geometry(Geometry::Circle {
                    center: Point2::new(x, y),
                    radius: 0.4,
                })
                .expect("circle should be accepted")
        };
        let anchor = circle(0.0, 0.0);
        let second = circle(2.54, 0.0);
        let third = circle(0.0, -2.54);

        add_offset(&mut sketch, anchor, second, Point2::new(2.54, 0.0))
            .expect("offsets should add");
        add_offset(&mut sketch, anchor, third, Point2::new(0.0, -2.54))
            .expect("offsets should add");

        let indices = sketch.find_geometry_by_tag(&[anchor, second, third]);
        sketch
            .move_point(
                PointRef::new(indices[0], PointRole::Center),
                Point2::new(10.0, 5.0),
            )
            .expect("anchor should move");
        sketch.recompute().expect("recompute should succeed");

        let center = |index: usize| {
            sketch
                .geometry(index)
                .and_then(|geometry| geometry.point(PointRole::Center))
                .expect("circle has a center")
        };
        assert!(center(indices[1]).approx_eq(Point2::new(12.54, 5.0), 1e-9));
        assert!(center(indices[2]).approx_eq(Point2::new(10.0, 2.46), 1e-9));
    }

    #[test]
    fn offsets_and_radius_are_named_after_tags() {
        let mut sketch = MemorySketch::new();
        let anchor = sketch
            .add_geometry(Geometry::Circle {
                center: Point2::new(0.0, 0.0),
                radius: 0.5,
            })
            .expect("circle should be accepted");
        let member = sketch
            .add_geometry(Geometry::Circle {
                center: Point2::new(2.0, 0.0),
                radius: 0.5,
            })
            .expect("circle should be accepted");

        let radius = add_radius(&mut sketch, PAD_RADIUS, member, 0.5).expect("radius should add");
        assert_eq!(radius, format!("padradius_{member}"));

        let names = add_offset(&mut sketch, anchor, member, Point2::new(2.0, 0.0))
            .expect("offsets should add");
        assert_eq!(
            names,
            vec![
                constraint_name("distance_x", member),
                constraint_name("distance_y", member)
            ]
        );
    }
}
