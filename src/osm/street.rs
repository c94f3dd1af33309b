// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use std::cell::OnceCell;
use std::rc::Rc;

use log::warn;

use super::Street;
use crate::geo::{GeoPos, MercatorPos};

/// Location along a [Street], between node `index` and `index + 1`.
///
/// `t` is the fraction of the way from node `index` to node `index + 1`, in `[0, 1)`.
/// `t == 0` means the point is exactly at node `index`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SectionPoint {
    pub index: usize,
    pub t: f64,
}

impl SectionPoint {
    pub fn new(index: usize, t: f64) -> Self {
        Self { index, t }
    }

    /// Point exactly at the node with the provided index.
    pub fn node(index: usize) -> Self {
        Self { index, t: 0.0 }
    }

    /// Returns true if `self` comes before `other` when walking along the street.
    pub fn precedes(&self, other: &SectionPoint) -> bool {
        self.index < other.index || (self.index == other.index && self.t < other.t)
    }

    fn geo_pos(&self, street: &Street) -> GeoPos {
        let coordinates = street.geo_coordinates();
        if self.t == 0.0 || self.index + 1 >= coordinates.len() {
            coordinates[self.index]
        } else {
            GeoPos::interpolate(&coordinates[self.index], &coordinates[self.index + 1], self.t)
        }
    }

    fn mercator_pos(&self, street: &Street) -> MercatorPos {
        let coordinates = street.mercator_coordinates();
        if self.t == 0.0 || self.index + 1 >= coordinates.len() {
            coordinates[self.index]
        } else {
            MercatorPos::interpolate(&coordinates[self.index], &coordinates[self.index + 1], self.t)
        }
    }
}

/// Point on a specific [Street], see [SectionPoint].
#[derive(Debug, Clone)]
pub struct StreetPosition {
    pub street: Rc<Street>,
    pub index: usize,
    pub t: f64,
}

impl StreetPosition {
    /// Creates a new position on a street.
    ///
    /// `t == 1` is normalized to the start of the next segment.
    /// Returns `None` (and logs a warning) if the position lies outside of the street.
    pub fn new(street: Rc<Street>, index: usize, t: f64) -> Option<Self> {
        let (index, t) = if t == 1.0 { (index + 1, 0.0) } else { (index, t) };

        let last = street.len() - 1;
        let valid = t >= 0.0 && t < 1.0 && (index < last || (index == last && t == 0.0));
        if !valid {
            warn!(
                "invalid position on street {}: index {}, t {} (street has {} nodes)",
                street.id,
                index,
                t,
                street.len()
            );
            return None;
        }

        Some(Self { street, index, t })
    }

    /// Position exactly at the node with the provided index.
    pub fn at_node(street: Rc<Street>, index: usize) -> Option<Self> {
        Self::new(street, index, 0.0)
    }

    pub fn point(&self) -> SectionPoint {
        SectionPoint::new(self.index, self.t)
    }

    /// ID of the node at this position, if `t == 0`.
    pub fn node(&self) -> Option<i64> {
        if self.t == 0.0 {
            Some(self.street.nodes()[self.index])
        } else {
            None
        }
    }

    /// Geographic coordinates of the position. Latitude and longitude are
    /// interpolated linearly, which is only approximately on the street segment.
    pub fn geo_pos(&self) -> GeoPos {
        self.point().geo_pos(&self.street)
    }

    pub fn mercator_pos(&self) -> MercatorPos {
        self.point().mercator_pos(&self.street)
    }

    /// Returns true if both positions denote the same point of the same street.
    pub fn same_as(&self, other: &StreetPosition) -> bool {
        self.street.id == other.street.id && self.index == other.index && self.t == other.t
    }
}

/// Directed span of a single [Street] between two [SectionPoint]s.
#[derive(Debug, Clone)]
pub struct StreetSection {
    pub street: Rc<Street>,
    pub start: SectionPoint,
    pub end: SectionPoint,
}

impl StreetSection {
    pub fn new(street: Rc<Street>, start: SectionPoint, end: SectionPoint) -> Self {
        Self { street, start, end }
    }

    /// Creates a section between two positions.
    ///
    /// Panics if the positions lie on different streets.
    pub fn between(a: &StreetPosition, b: &StreetPosition) -> Self {
        assert_eq!(
            a.street.id, b.street.id,
            "a street section must span a single street"
        );
        Self::new(a.street.clone(), a.point(), b.point())
    }

    /// True if the section follows the node order of the street.
    /// Degenerate sections (with `start == end`) are considered forwards.
    pub fn forwards(&self) -> bool {
        !self.end.precedes(&self.start)
    }

    pub fn start_position(&self) -> StreetPosition {
        StreetPosition {
            street: self.street.clone(),
            index: self.start.index,
            t: self.start.t,
        }
    }

    pub fn end_position(&self) -> StreetPosition {
        StreetPosition {
            street: self.street.clone(),
            index: self.end.index,
            t: self.end.t,
        }
    }

    /// Coordinates of all points of the section, in travel order:
    /// the (possibly interpolated) start, all nodes strictly between,
    /// and the (possibly interpolated) end.
    pub fn geo_coordinates(&self) -> Vec<GeoPos> {
        let street = &*self.street;
        let nodes = street.geo_coordinates();
        let (start, end) = (self.start, self.end);
        let mut coordinates = Vec::default();

        if start.index == end.index {
            coordinates.push(start.geo_pos(street));
            if start.t != end.t {
                coordinates.push(end.geo_pos(street));
            }
        } else if start.index < end.index {
            if start.t < 1.0 {
                coordinates.push(start.geo_pos(street));
            }
            coordinates.extend_from_slice(&nodes[start.index + 1..=end.index]);
            if end.t > 0.0 {
                coordinates.push(end.geo_pos(street));
            }
        } else {
            if start.t > 0.0 {
                coordinates.push(start.geo_pos(street));
            }
            coordinates.extend(nodes[end.index + 1..=start.index].iter().rev());
            if end.t < 1.0 {
                coordinates.push(end.geo_pos(street));
            }
        }

        coordinates
    }

    /// Length of the section, in meters.
    pub fn length(&self) -> f64 {
        self.geo_coordinates()
            .windows(2)
            .map(|pair| pair[0].chord_distance(&pair[1]))
            .sum()
    }
}

/// Route over multiple streets, made of contiguous [StreetSection]s.
///
/// The first and last sections may start and end in the middle of street segments.
#[derive(Debug, Clone)]
pub struct StreetPath {
    sections: Vec<StreetSection>,
    geo: Vec<GeoPos>,
    mercator: OnceCell<Vec<MercatorPos>>,
}

impl StreetPath {
    /// Creates a path from its sections.
    ///
    /// Panics if `sections` is empty.
    pub fn new(sections: Vec<StreetSection>) -> Self {
        assert!(!sections.is_empty(), "a street path needs at least one section");

        for pair in sections.windows(2) {
            let end = pair[0].end_position().geo_pos();
            let start = pair[1].start_position().geo_pos();
            if end != start {
                warn!(
                    "discontinuous street path: section on street {} ends at {:?}, next on street {} starts at {:?}",
                    pair[0].street.id, end, pair[1].street.id, start,
                );
            }
        }

        let mut geo: Vec<GeoPos> = Vec::default();
        for section in &sections {
            for p in section.geo_coordinates() {
                if geo.last() != Some(&p) {
                    geo.push(p);
                }
            }
        }

        Self {
            sections,
            geo,
            mercator: OnceCell::new(),
        }
    }

    pub fn sections(&self) -> &[StreetSection] {
        &self.sections
    }

    pub fn start(&self) -> StreetPosition {
        self.sections[0].start_position()
    }

    pub fn end(&self) -> StreetPosition {
        self.sections[self.sections.len() - 1].end_position()
    }

    /// Coordinates of the path, without consecutive duplicates.
    pub fn geo_coordinates(&self) -> &[GeoPos] {
        &self.geo
    }

    /// [StreetPath::geo_coordinates] projected onto the Mercator space.
    pub fn mercator_coordinates(&self) -> &[MercatorPos] {
        self.mercator
            .get_or_init(|| self.geo.iter().map(|p| p.to_mercator()).collect())
    }

    /// Length of the path, in meters.
    pub fn length(&self) -> f64 {
        self.sections.iter().map(|s| s.length()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osm::model;
    use std::collections::HashMap;

    macro_rules! assert_almost_eq {
        ($a:expr, $b:expr) => {
            assert!(
                (($a - $b).abs() < 1e-6),
                "assertion failed: {} ≈ {}",
                $a,
                $b
            )
        };
    }

    /// Street along the equator, with nodes at the provided longitudes.
    fn street(id: i64, lons: &[f64]) -> Rc<Street> {
        let way = model::Way {
            id,
            nodes: (1..=lons.len() as i64).map(|n| id * 100 + n).collect(),
            tags: HashMap::default(),
        };
        let resolve = |node: i64| {
            let idx = (node - id * 100 - 1) as usize;
            lons.get(idx).map(|&lon| GeoPos::new(0.0, lon))
        };
        Rc::new(Street::new(&way, resolve).unwrap())
    }

    fn lons(coordinates: &[GeoPos]) -> Vec<f64> {
        coordinates.iter().map(|p| p.lon).collect()
    }

    #[test]
    fn position_normalization() {
        let s = street(1, &[0.0, 1.0, 2.0]);
        let p = StreetPosition::new(s.clone(), 0, 1.0).unwrap();
        assert_eq!((p.index, p.t), (1, 0.0));
        assert_eq!(p.node(), Some(102));

        assert!(StreetPosition::new(s.clone(), 2, 0.0).is_some());
        assert!(StreetPosition::new(s.clone(), 2, 0.5).is_none());
        assert!(StreetPosition::new(s.clone(), 1, 1.0).is_some());
        assert!(StreetPosition::new(s.clone(), 3, 0.0).is_none());
        assert!(StreetPosition::new(s.clone(), 0, -0.1).is_none());
        assert!(StreetPosition::new(s, 0, f64::NAN).is_none());
    }

    #[test]
    fn position_coordinates() {
        let s = street(1, &[0.0, 1.0, 2.0]);
        let p = StreetPosition::new(s, 1, 0.25).unwrap();
        assert_almost_eq!(p.geo_pos().lon, 1.25);
        assert_almost_eq!(p.mercator_pos().x, 1.25 / 360.0);
        assert_eq!(p.node(), None);
    }

    #[test]
    fn section_coordinates_forwards() {
        let s = street(1, &[0.0, 1.0, 2.0, 3.0]);
        let section = StreetSection::new(
            s.clone(),
            SectionPoint::new(0, 0.5),
            SectionPoint::new(2, 0.5),
        );
        assert!(section.forwards());
        assert_eq!(lons(&section.geo_coordinates()), vec![0.5, 1.0, 2.0, 2.5]);

        let section = StreetSection::new(s, SectionPoint::node(0), SectionPoint::node(3));
        assert_eq!(lons(&section.geo_coordinates()), vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn section_coordinates_backwards() {
        let s = street(1, &[0.0, 1.0, 2.0, 3.0]);
        let section = StreetSection::new(
            s.clone(),
            SectionPoint::new(2, 0.5),
            SectionPoint::new(0, 0.5),
        );
        assert!(!section.forwards());
        assert_eq!(lons(&section.geo_coordinates()), vec![2.5, 2.0, 1.0, 0.5]);

        let section = StreetSection::new(s, SectionPoint::node(3), SectionPoint::node(1));
        assert_eq!(lons(&section.geo_coordinates()), vec![3.0, 2.0, 1.0]);
    }

    #[test]
    fn section_within_segment() {
        let s = street(1, &[0.0, 1.0]);
        let section = StreetSection::new(
            s.clone(),
            SectionPoint::new(0, 0.75),
            SectionPoint::new(0, 0.25),
        );
        assert!(!section.forwards());
        assert_eq!(lons(&section.geo_coordinates()), vec![0.75, 0.25]);

        let degenerate = StreetSection::new(
            s,
            SectionPoint::new(0, 0.5),
            SectionPoint::new(0, 0.5),
        );
        assert!(degenerate.forwards());
        assert_eq!(degenerate.geo_coordinates().len(), 1);
        assert_eq!(degenerate.length(), 0.0);
    }

    #[test]
    fn section_length_is_additive() {
        let s = street(1, &[0.0, 0.0003, 0.0007, 0.0012, 0.002]);
        let points = [
            SectionPoint::new(0, 0.2),
            SectionPoint::new(1, 0.0),
            SectionPoint::new(1, 0.6),
            SectionPoint::new(3, 0.1),
            SectionPoint::node(4),
        ];

        for (i, &a) in points.iter().enumerate() {
            for (j, &b) in points.iter().enumerate().skip(i + 1) {
                for &c in points.iter().skip(j + 1) {
                    let ab = StreetSection::new(s.clone(), a, b).length();
                    let bc = StreetSection::new(s.clone(), b, c).length();
                    let ac = StreetSection::new(s.clone(), a, c).length();
                    assert_almost_eq!(ac, ab + bc);

                    let ca = StreetSection::new(s.clone(), c, a).length();
                    assert_almost_eq!(ca, ac);
                }
            }
        }
    }

    #[test]
    #[should_panic]
    fn section_between_different_streets() {
        let a = StreetPosition::at_node(street(1, &[0.0, 1.0]), 0).unwrap();
        let b = StreetPosition::at_node(street(2, &[0.0, 1.0]), 1).unwrap();
        StreetSection::between(&a, &b);
    }

    #[test]
    fn path_coordinates_and_length() {
        let a = street(1, &[0.0, 1.0, 2.0]);
        let b = street(2, &[2.0, 3.0, 4.0]);
        let path = StreetPath::new(vec![
            StreetSection::new(a.clone(), SectionPoint::new(0, 0.5), SectionPoint::node(2)),
            StreetSection::new(b.clone(), SectionPoint::node(0), SectionPoint::new(1, 0.5)),
        ]);

        assert_eq!(lons(path.geo_coordinates()), vec![0.5, 1.0, 2.0, 3.0, 3.5]);
        assert_eq!(path.mercator_coordinates().len(), 5);
        let expected: f64 = path
            .geo_coordinates()
            .windows(2)
            .map(|pair| pair[0].chord_distance(&pair[1]))
            .sum();
        assert_almost_eq!(path.length(), expected);
        assert_eq!(path.start().street.id, 1);
        assert_eq!(path.end().street.id, 2);
    }

    #[test]
    #[should_panic]
    fn path_without_sections() {
        StreetPath::new(vec![]);
    }
}
