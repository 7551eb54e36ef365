use serde::{Deserialize, Serialize};

/// A geographic position.
///
/// `x` is longitude and `y` latitude in degrees; `z` is altitude in meters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Longitude and latitude converted to radians, in `(x, y)` order.
    pub fn to_radians(&self) -> (f64, f64) {
        (self.x.to_radians(), self.y.to_radians())
    }
}
