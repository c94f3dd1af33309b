// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

/// Equatorial radius of Earth (WGS84), in meters.
/// Source: https://en.wikipedia.org/wiki/World_Geodetic_System#WGS84
pub const EARTH_RADIUS: f64 = 6378137.0;

/// Point in a cartesian, Earth-centered coordinate system, in meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn distance(&self, other: &Vec3) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Converts a lat-lon position (in degrees) into a point relative to the center of
/// a spherical Earth. 0°N 0°E maps to `(0, 0, -EARTH_RADIUS)`.
pub fn cartesian(lat: f64, lon: f64) -> Vec3 {
    let lat = lat.to_radians();
    let lon = lon.to_radians();
    let r = lat.cos() * EARTH_RADIUS;
    Vec3 {
        x: lon.sin() * r,
        y: lat.sin() * EARTH_RADIUS,
        z: -lon.cos() * r,
    }
}

/// Calculates the length of the straight 3D chord between two lat-lon positions
/// on a spherical Earth. Returns the result in meters.
///
/// For the short distances between consecutive street nodes the chord is
/// indistinguishable from the great-circle distance, and it never exceeds it,
/// which keeps it usable as an A* heuristic.
pub fn chord_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    cartesian(lat1, lon1).distance(&cartesian(lat2, lon2))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chord_distance_along_equator() {
        // 2R sin(0.5°)
        let expected = 2.0 * EARTH_RADIUS * (0.5f64).to_radians().sin();
        assert!((chord_distance(0.0, 0.0, 0.0, 1.0) - expected).abs() < 1e-6);
        assert!((chord_distance(0.0, 1.0, 0.0, 0.0) - expected).abs() < 1e-6);
    }

    #[test]
    fn chord_distance_is_zero_for_equal_points() {
        assert_eq!(chord_distance(51.5, -0.1, 51.5, -0.1), 0.0);
    }

    #[test]
    fn cartesian_origin() {
        let p = cartesian(0.0, 0.0);
        assert!(p.x.abs() < 1e-9);
        assert!(p.y.abs() < 1e-9);
        assert!((p.z + EARTH_RADIUS).abs() < 1e-9);
    }
}
