//! Unit and axis conversion between the board (design) side and the sketch (model) side.
//!
//! The board stores integer nanometres with Y growing downwards. The sketch stores
//! floating-point millimetres with Y growing upwards. Every value that crosses the
//! boundary goes through the functions in this module and nowhere else:
//!
//! ```text
//! model.x =  design.x / SCALE        design.x = round( model.x * SCALE)
//! model.y = -design.y / SCALE        design.y = round(-model.y * SCALE)
//! ```

use serde::{Deserialize, Serialize};

/// Design units per model unit (nanometres per millimetre).
pub const SCALE: f64 = 1_000_000.0;

/// A point or offset on the board, in design units.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(from = "[i64; 2]", into = "[i64; 2]")]
pub struct Vector2Nm {
    pub x_nm: i64,
    pub y_nm: i64,
}

impl Vector2Nm {
    pub const fn new(x_nm: i64, y_nm: i64) -> Self {
        Self { x_nm, y_nm }
    }
}

impl From<[i64; 2]> for Vector2Nm {
    fn from(value: [i64; 2]) -> Self {
        Self::new(value[0], value[1])
    }
}

impl From<Vector2Nm> for [i64; 2] {
    fn from(value: Vector2Nm) -> Self {
        [value.x_nm, value.y_nm]
    }
}

impl std::ops::Sub for Vector2Nm {
    type Output = Vector2Nm;

    fn sub(self, rhs: Self) -> Self::Output {
        Vector2Nm::new(self.x_nm - rhs.x_nm, self.y_nm - rhs.y_nm)
    }
}

/// A point in sketch space, in model units.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Point2) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn approx_eq(self, other: Point2, tolerance: f64) -> bool {
        (self.x - other.x).abs() <= tolerance && (self.y - other.y).abs() <= tolerance
    }
}

impl std::ops::Add for Point2 {
    type Output = Point2;

    fn add(self, rhs: Self) -> Self::Output {
        Point2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl std::ops::Sub for Point2 {
    type Output = Point2;

    fn sub(self, rhs: Self) -> Self::Output {
        Point2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

/// A placement offset in model units, z pointing out of the board's top face.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn planar(self) -> Point2 {
        Point2::new(self.x, self.y)
    }
}

pub fn length_to_model(length_nm: i64) -> f64 {
    length_nm as f64 / SCALE
}

pub fn length_to_design(length: f64) -> i64 {
    (length * SCALE).round() as i64
}

/// Converts a board position or board-relative offset into sketch space.
///
/// Offsets transform exactly like positions because the conversion is linear.
pub fn to_model(point: Vector2Nm) -> Point2 {
    Point2::new(length_to_model(point.x_nm), -length_to_model(point.y_nm))
}

/// Inverse of [`to_model`].
pub fn to_design(point: Point2) -> Vector2Nm {
    Vector2Nm::new(length_to_design(point.x), length_to_design(-point.y))
}

#[cfg(test)]
mod tests {
    use super::{length_to_design, length_to_model, to_design, to_model, Point2, Vector2Nm};

    #[test]
    fn to_model_scales_and_flips_y() {
        let point = to_model(Vector2Nm::new(2_000_000, 3_500_000));
        assert_eq!(point, Point2::new(2.0, -3.5));
    }

    #[test]
    fn to_design_inverts_to_model() {
        let samples = [
            Vector2Nm::new(0, 0),
            Vector2Nm::new(1, -1),
            Vector2Nm::new(123_456_789, -987_654_321),
            Vector2Nm::new(-2_540_000, 2_540_000),
        ];

        for sample in samples {
            assert_eq!(to_design(to_model(sample)), sample);
        }
    }

    #[test]
    fn lengths_do_not_flip_sign() {
        assert_eq!(length_to_model(800_000), 0.8);
        assert_eq!(length_to_design(0.8), 800_000);
    }

    #[test]
    fn vector_serializes_as_pair() {
        let json = serde_json::to_string(&Vector2Nm::new(5, -7)).expect("vector should encode");
        assert_eq!(json, "[5,-7]");

        let decoded: Vector2Nm = serde_json::from_str("[9,10]").expect("pair should decode");
        assert_eq!(decoded, Vector2Nm::new(9, 10));
    }
}
