// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use std::f64::consts::{E, FRAC_PI_4, PI};

use serde::{Deserialize, Serialize};

use crate::distance::{cartesian, Vec3};

/// Geographic position, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoPos {
    pub lat: f64,
    pub lon: f64,
}

/// Position in a normalized [Web Mercator](https://en.wikipedia.org/wiki/Web_Mercator_projection)
/// projection, where the whole longitude range spans one unit of `x`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MercatorPos {
    pub x: f64,
    pub y: f64,
}

/// Axis-aligned rectangle. In geographic space `x` is the longitude and `y` the latitude.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub left: f64,
    pub right: f64,
    pub bottom: f64,
    pub top: f64,
}

/// Result of projecting a point onto a line segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentProjection {
    pub point: MercatorPos,

    /// Fraction of the way from the segment start to `point`, in `[0, 1]`.
    pub t: f64,

    /// True if the perpendicular foot fell outside the segment
    /// and `point` was snapped to one of its ends.
    pub clamped: bool,
}

impl GeoPos {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn to_mercator(&self) -> MercatorPos {
        MercatorPos {
            x: lon_to_mercator(self.lon),
            y: lat_to_mercator(self.lat),
        }
    }

    /// Position relative to the center of the Earth, in meters.
    pub fn to_cartesian(&self) -> Vec3 {
        cartesian(self.lat, self.lon)
    }

    /// Straight 3D distance to another position, in meters.
    pub fn chord_distance(&self, other: &GeoPos) -> f64 {
        self.to_cartesian().distance(&other.to_cartesian())
    }

    /// Linearly interpolates latitude and longitude. The result is only approximately
    /// on the geodesic between `a` and `b`, which is irrelevant on street scale.
    pub fn interpolate(a: &GeoPos, b: &GeoPos, t: f64) -> GeoPos {
        GeoPos {
            lat: a.lat + (b.lat - a.lat) * t,
            lon: a.lon + (b.lon - a.lon) * t,
        }
    }
}

impl MercatorPos {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn to_geo(&self) -> GeoPos {
        GeoPos {
            lat: lat_from_mercator(self.y),
            lon: lon_from_mercator(self.x),
        }
    }

    pub fn distance(&self, other: &MercatorPos) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn interpolate(a: &MercatorPos, b: &MercatorPos, t: f64) -> MercatorPos {
        MercatorPos {
            x: a.x + (b.x - a.x) * t,
            y: a.y + (b.y - a.y) * t,
        }
    }

    /// Finds the point on the segment `a`-`b` closest to `self`.
    pub fn project_onto_segment(&self, a: &MercatorPos, b: &MercatorPos) -> SegmentProjection {
        let dx = b.x - a.x;
        let dy = b.y - a.y;
        let length_sq = dx * dx + dy * dy;
        if length_sq == 0.0 {
            return SegmentProjection {
                point: *a,
                t: 0.0,
                clamped: false,
            };
        }

        let t = ((self.x - a.x) * dx + (self.y - a.y) * dy) / length_sq;
        if t < 0.0 {
            SegmentProjection {
                point: *a,
                t: 0.0,
                clamped: true,
            }
        } else if t > 1.0 {
            SegmentProjection {
                point: *b,
                t: 1.0,
                clamped: true,
            }
        } else {
            SegmentProjection {
                point: MercatorPos::interpolate(a, b, t),
                t,
                clamped: false,
            }
        }
    }
}

impl From<GeoPos> for MercatorPos {
    fn from(pos: GeoPos) -> Self {
        pos.to_mercator()
    }
}

impl Rect {
    pub fn new(left: f64, right: f64, bottom: f64, top: f64) -> Self {
        Self {
            left,
            right,
            bottom,
            top,
        }
    }

    /// Creates a rectangle centered at `(x, y)` extending by `half_width` and `half_height`
    /// in every direction.
    pub fn around(x: f64, y: f64, half_width: f64, half_height: f64) -> Self {
        Self::new(x - half_width, x + half_width, y - half_height, y + half_height)
    }

    /// Geographic rectangle centered around a [GeoPos], with half sizes in degrees.
    pub fn around_geo(center: &GeoPos, half_lat: f64, half_lon: f64) -> Self {
        Self::around(center.lon, center.lat, half_lon, half_lat)
    }

    /// Returns the smallest rectangle containing all provided `(x, y)` points,
    /// or `None` if there are no points.
    pub fn containing<I: IntoIterator<Item = (f64, f64)>>(points: I) -> Option<Self> {
        let mut points = points.into_iter();
        let (x, y) = points.next()?;
        let mut r = Self::new(x, x, y, y);
        for (x, y) in points {
            r.left = r.left.min(x);
            r.right = r.right.max(x);
            r.bottom = r.bottom.min(y);
            r.top = r.top.max(y);
        }
        Some(r)
    }

    /// Checks that no bound is NaN and the rectangle is not inverted.
    pub fn is_valid(&self) -> bool {
        self.left <= self.right && self.bottom <= self.top
    }

    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.top - self.bottom
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.left + self.right) * 0.5,
            (self.bottom + self.top) * 0.5,
        )
    }

    /// Returns true if the rectangles overlap or share an edge.
    pub fn touches(&self, other: &Rect) -> bool {
        self.left <= other.right
            && self.right >= other.left
            && self.bottom <= other.top
            && self.top >= other.bottom
    }

    /// Returns true if `other` lies completely within `self`.
    pub fn contains(&self, other: &Rect) -> bool {
        other.left >= self.left
            && other.right <= self.right
            && other.bottom >= self.bottom
            && other.top <= self.top
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.left && x <= self.right && y >= self.bottom && y <= self.top
    }

    /// Converts a geographic rectangle into the Mercator space.
    pub fn to_mercator(&self) -> Rect {
        Rect::new(
            lon_to_mercator(self.left),
            lon_to_mercator(self.right),
            lat_to_mercator(self.bottom),
            lat_to_mercator(self.top),
        )
    }

    /// Converts a Mercator rectangle into the geographic space.
    pub fn to_geo(&self) -> Rect {
        Rect::new(
            lon_from_mercator(self.left),
            lon_from_mercator(self.right),
            lat_from_mercator(self.bottom),
            lat_from_mercator(self.top),
        )
    }
}

fn lon_to_mercator(lon: f64) -> f64 {
    lon / 360.0
}

fn lat_to_mercator(lat: f64) -> f64 {
    (FRAC_PI_4 + lat.to_radians() * 0.5).tan().ln() / (2.0 * PI)
}

fn lon_from_mercator(x: f64) -> f64 {
    x * 360.0
}

fn lat_from_mercator(y: f64) -> f64 {
    ((E.powf(y * 2.0 * PI)).atan() - FRAC_PI_4).to_degrees() * 2.0
}
