// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use log::warn;

use super::model::{self, FeatureType};
use super::rules::{self, Rule, TurnRestriction};
use crate::geo::{GeoPos, MercatorPos, Rect};

/// [OSM node](https://wiki.openstreetmap.org/wiki/Node) held by [OsmData](super::OsmData).
///
/// Apart from its position, a node tracks the streets going through it
/// and the turn restrictions referencing it. Those back-references are appended
/// by [OsmData](super::OsmData) when elements are loaded and never removed.
#[derive(Debug)]
pub struct Node {
    pub id: i64,
    pub position: GeoPos,
    pub mercator: MercatorPos,
    pub tags: HashMap<String, String>,

    streets: RefCell<Vec<i64>>,
    restrictions: RefCell<Vec<i64>>,

    /// Set once the area around the node was loaded, so that [Node::streets] is complete.
    pub(super) connectivity_loaded: Cell<bool>,

    /// Cached result of [OsmData::is_junction](super::OsmData::is_junction).
    pub(super) junction: Cell<Option<bool>>,
}

impl Node {
    pub fn new(raw: model::Node) -> Self {
        let position = GeoPos::new(raw.lat, raw.lon);
        Self {
            id: raw.id,
            position,
            mercator: position.to_mercator(),
            tags: raw.tags,
            streets: RefCell::default(),
            restrictions: RefCell::default(),
            connectivity_loaded: Cell::new(false),
            junction: Cell::new(None),
        }
    }

    /// IDs of already loaded streets going through this node.
    pub fn streets(&self) -> Vec<i64> {
        self.streets.borrow().clone()
    }

    /// IDs of already loaded [RestrictionRelation]s referencing this node.
    pub fn restrictions(&self) -> Vec<i64> {
        self.restrictions.borrow().clone()
    }

    pub(super) fn add_street(&self, id: i64) {
        push_unique(&mut self.streets.borrow_mut(), id);
    }

    pub(super) fn add_restriction(&self, id: i64) {
        push_unique(&mut self.restrictions.borrow_mut(), id);
    }
}

/// [OSM way](https://wiki.openstreetmap.org/wiki/Way) with a `highway` tag
/// and at least 2 known nodes.
///
/// The geometry of the street is derived when the street is created
/// and stored in both the geographic and the Mercator space.
#[derive(Debug)]
pub struct Street {
    pub id: i64,
    pub tags: HashMap<String, String>,

    nodes: Vec<i64>,
    geo: Vec<GeoPos>,
    mercator: Vec<MercatorPos>,
    bounds: Rect,
    restrictions: RefCell<Vec<i64>>,
}

/// Point on a [Street] closest to some other point, see [Street::closest_point_to].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClosestPoint {
    pub index: usize,
    pub t: f64,
    pub point: MercatorPos,
    pub distance: f64,
    pub clamped: bool,
}

impl Street {
    /// Creates a street from a raw way, resolving node positions with `resolve`.
    ///
    /// Nodes which can't be resolved are skipped with a warning.
    /// Returns `None` if fewer than 2 nodes remain.
    pub fn new<F: Fn(i64) -> Option<GeoPos>>(way: &model::Way, resolve: F) -> Option<Self> {
        let mut nodes = Vec::with_capacity(way.nodes.len());
        let mut geo = Vec::with_capacity(way.nodes.len());

        for &node_id in &way.nodes {
            match resolve(node_id) {
                Some(position) => {
                    nodes.push(node_id);
                    geo.push(position);
                }
                None => warn!("way {} references unknown node {}", way.id, node_id),
            }
        }

        if nodes.len() < 2 {
            warn!(
                "way {} has {} known node(s) - not usable as a street",
                way.id,
                nodes.len()
            );
            return None;
        }

        let mercator = geo.iter().map(|p| p.to_mercator()).collect::<Vec<_>>();
        let bounds = Rect::containing(geo.iter().map(|p| (p.lon, p.lat)))?;

        Some(Self {
            id: way.id,
            tags: way.tags.clone(),
            nodes,
            geo,
            mercator,
            bounds,
            restrictions: RefCell::default(),
        })
    }

    /// IDs of nodes of this street, in order.
    pub fn nodes(&self) -> &[i64] {
        &self.nodes
    }

    /// Number of nodes of this street, always at least 2.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn geo_coordinates(&self) -> &[GeoPos] {
        &self.geo
    }

    pub fn mercator_coordinates(&self) -> &[MercatorPos] {
        &self.mercator
    }

    /// Geographic bounding box of the street (x is longitude, y is latitude).
    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    /// Every index at which `node` appears in [Street::nodes].
    pub fn indices_of(&self, node: i64) -> impl Iterator<Item = usize> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(move |(idx, &n)| if n == node { Some(idx) } else { None })
    }

    pub fn index_of(&self, node: i64) -> Option<usize> {
        self.indices_of(node).next()
    }

    pub fn contains_node(&self, node: i64) -> bool {
        self.nodes.contains(&node)
    }

    /// IDs of already loaded [RestrictionRelation]s referencing this street.
    pub fn restrictions(&self) -> Vec<i64> {
        self.restrictions.borrow().clone()
    }

    pub(super) fn add_restriction(&self, id: i64) {
        push_unique(&mut self.restrictions.borrow_mut(), id);
    }

    pub fn matches_rules(&self, rules: &[Rule<'_>]) -> bool {
        rules::matches_rules(&self.tags, rules)
    }

    /// Length of the whole street, in meters.
    pub fn length(&self) -> f64 {
        self.geo
            .windows(2)
            .map(|pair| pair[0].chord_distance(&pair[1]))
            .sum()
    }

    /// Finds the point of the street closest to `p`, in the Mercator space.
    /// Ties are resolved in favor of the earliest segment.
    pub fn closest_point_to(&self, p: &MercatorPos) -> ClosestPoint {
        let mut closest: Option<ClosestPoint> = None;

        for (index, pair) in self.mercator.windows(2).enumerate() {
            let projection = p.project_onto_segment(&pair[0], &pair[1]);
            let distance = projection.point.distance(p);
            if closest.map_or(true, |c| distance < c.distance) {
                closest = Some(ClosestPoint {
                    index,
                    t: projection.t,
                    point: projection.point,
                    distance,
                    clamped: projection.clamped,
                });
            }
        }

        // Streets always have at least one segment
        closest.unwrap_or(ClosestPoint {
            index: 0,
            t: 0.0,
            point: self.mercator[0],
            distance: self.mercator[0].distance(p),
            clamped: true,
        })
    }
}

/// Reference to a member of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemberRef {
    pub type_: FeatureType,
    pub ref_: i64,
}

impl MemberRef {
    pub fn node(ref_: i64) -> Self {
        Self {
            type_: FeatureType::Node,
            ref_,
        }
    }

    pub fn way(ref_: i64) -> Self {
        Self {
            type_: FeatureType::Way,
            ref_,
        }
    }
}

/// [OSM turn restriction](https://wiki.openstreetmap.org/wiki/Relation:restriction).
#[derive(Debug)]
pub struct RestrictionRelation {
    pub id: i64,
    pub tags: HashMap<String, String>,
    pub kind: TurnRestriction,
    pub from: Option<MemberRef>,
    pub via: Option<MemberRef>,
    pub to: Option<MemberRef>,
}

impl RestrictionRelation {
    /// Interprets a raw relation as a turn restriction.
    ///
    /// Restrictions with more than one `from`, `via` or `to` member are not supported,
    /// and become inert (their [RestrictionRelation::kind] is set to
    /// [TurnRestriction::Inapplicable]).
    pub fn new(raw: &model::Relation) -> Self {
        let mut kind = rules::restriction_kind(&raw.tags);
        let mut from = None;
        let mut via = None;
        let mut to = None;

        for member in &raw.members {
            let slot = match member.role.as_str() {
                "from" => &mut from,
                "via" => &mut via,
                "to" => &mut to,
                _ => continue,
            };

            if slot.is_some() {
                warn!(
                    "restriction {} has multiple {:?} members - ignoring it",
                    raw.id, member.role
                );
                kind = TurnRestriction::Inapplicable;
            }

            *slot = Some(MemberRef {
                type_: member.type_,
                ref_: member.ref_,
            });
        }

        if kind != TurnRestriction::Inapplicable && (from.is_none() || to.is_none()) {
            warn!("restriction {} lacks a from or to member - ignoring it", raw.id);
            kind = TurnRestriction::Inapplicable;
        }

        Self {
            id: raw.id,
            tags: raw.tags.clone(),
            kind,
            from,
            via,
            to,
        }
    }

    /// Returns true for `only_*` restrictions.
    pub fn is_mandatory(&self) -> bool {
        self.kind == TurnRestriction::Mandatory
    }

    /// Returns true if this restriction prevents a car coming from `from_street`,
    /// through the `via_node`, from continuing onto `to_street`.
    ///
    /// Restrictions with a different `from` street or `via` element never forbid anything.
    /// Otherwise, prohibitory restrictions forbid only their `to` street, while mandatory
    /// restrictions forbid every street except their `to` street.
    pub fn forbids(&self, from_street: i64, via_node: i64, to_street: i64) -> bool {
        if self.kind == TurnRestriction::Inapplicable
            || self.from != Some(MemberRef::way(from_street))
            || self.via != Some(MemberRef::node(via_node))
        {
            return false;
        }

        (self.to == Some(MemberRef::way(to_street))) != self.is_mandatory()
    }

    /// All role members of the restriction.
    pub fn members(&self) -> impl Iterator<Item = MemberRef> + '_ {
        [self.from, self.via, self.to].into_iter().flatten()
    }
}

fn push_unique(v: &mut Vec<i64>, id: i64) {
    if !v.contains(&id) {
        v.push(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osm::model::RelationMember;
    use crate::osm::rules::speed_weighting;

    macro_rules! tags {
        {} => { HashMap::default() };
        {$( $k:literal : $v:literal ),+} => {
            HashMap::from_iter([ $( ($k.to_string(), $v.to_string()) ),+ ])
        };
    }

    fn raw_way(id: i64, nodes: &[i64], tags: HashMap<String, String>) -> model::Way {
        model::Way {
            id,
            nodes: nodes.to_vec(),
            tags,
        }
    }

    fn resolve_on_equator(id: i64) -> Option<GeoPos> {
        if id > 0 && id < 100 {
            Some(GeoPos::new(0.0, id as f64 * 0.001))
        } else {
            None
        }
    }

    fn member(type_: FeatureType, ref_: i64, role: &str) -> RelationMember {
        RelationMember {
            type_,
            ref_,
            role: role.to_string(),
        }
    }

    fn restriction(kind: &str, from: i64, via: i64, to: i64) -> RestrictionRelation {
        RestrictionRelation::new(&model::Relation {
            id: 1000,
            members: vec![
                member(FeatureType::Way, from, "from"),
                member(FeatureType::Node, via, "via"),
                member(FeatureType::Way, to, "to"),
            ],
            tags: HashMap::from_iter([
                ("type".to_string(), "restriction".to_string()),
                ("restriction".to_string(), kind.to_string()),
            ]),
        })
    }

    #[test]
    fn street_geometry() {
        let way = raw_way(1, &[1, 2, 3], tags! {"highway": "residential"});
        let s = Street::new(&way, resolve_on_equator).unwrap();
        assert_eq!(s.len(), 3);
        assert_eq!(s.geo_coordinates().len(), 3);
        assert_eq!(s.mercator_coordinates().len(), 3);
        let b = s.bounds();
        assert_eq!(b.left, s.geo_coordinates()[0].lon);
        assert_eq!(b.right, s.geo_coordinates()[2].lon);
        assert_eq!(b.height(), 0.0);
        assert!(s.length() > 0.0);
    }

    #[test]
    fn street_skips_unknown_nodes() {
        let s = Street::new(&raw_way(1, &[1, 500, 2], tags! {}), resolve_on_equator).unwrap();
        assert_eq!(s.nodes(), &[1, 2]);

        assert!(Street::new(&raw_way(2, &[1, 500], tags! {}), resolve_on_equator).is_none());
        assert!(Street::new(&raw_way(3, &[], tags! {}), resolve_on_equator).is_none());
    }

    #[test]
    fn street_indices_of_loop() {
        let s = Street::new(&raw_way(1, &[1, 2, 3, 1], tags! {}), resolve_on_equator).unwrap();
        assert_eq!(s.indices_of(1).collect::<Vec<_>>(), vec![0, 3]);
        assert_eq!(s.index_of(3), Some(2));
        assert_eq!(s.index_of(4), None);
    }

    #[test]
    fn street_closest_point() {
        let s = Street::new(&raw_way(1, &[1, 2, 3], tags! {}), resolve_on_equator).unwrap();
        let target = GeoPos::new(0.0005, 0.0025).to_mercator();
        let c = s.closest_point_to(&target);
        assert_eq!(c.index, 1);
        assert!((c.t - 0.5).abs() < 1e-6);
        assert!(!c.clamped);

        let before = GeoPos::new(0.0, -0.01).to_mercator();
        let c = s.closest_point_to(&before);
        assert_eq!(c.index, 0);
        assert_eq!(c.t, 0.0);
        assert!(c.clamped);
    }

    #[test]
    fn prohibitory_restriction() {
        let r = restriction("no_left_turn", 10, 5, 20);
        assert!(!r.is_mandatory());
        assert!(r.forbids(10, 5, 20));
        assert!(!r.forbids(10, 5, 30));
        assert!(!r.forbids(11, 5, 20));
        assert!(!r.forbids(10, 6, 20));
    }

    #[test]
    fn mandatory_restriction() {
        let r = restriction("only_straight_on", 10, 5, 20);
        assert!(r.is_mandatory());
        assert!(!r.forbids(10, 5, 20));
        assert!(r.forbids(10, 5, 30));
        assert!(r.forbids(10, 5, 10));
        assert!(!r.forbids(11, 5, 30));
    }

    #[test]
    fn malformed_restrictions_are_inert() {
        let r = RestrictionRelation::new(&model::Relation {
            id: 1,
            members: vec![
                member(FeatureType::Way, 10, "from"),
                member(FeatureType::Node, 5, "via"),
            ],
            tags: tags! {"type": "restriction", "restriction": "no_left_turn"},
        });
        assert_eq!(r.kind, TurnRestriction::Inapplicable);
        assert!(!r.forbids(10, 5, 20));

        let r = RestrictionRelation::new(&model::Relation {
            id: 2,
            members: vec![
                member(FeatureType::Way, 10, "from"),
                member(FeatureType::Way, 11, "from"),
                member(FeatureType::Node, 5, "via"),
                member(FeatureType::Way, 20, "to"),
            ],
            tags: tags! {"type": "restriction", "restriction": "no_left_turn"},
        });
        assert_eq!(r.kind, TurnRestriction::Inapplicable);
        assert!(!r.forbids(10, 5, 20));
    }

    #[test]
    fn speed_weighting_of_streets() {
        let street = |tags: HashMap<String, String>| {
            Street::new(&raw_way(1, &[1, 2], tags), resolve_on_equator).unwrap()
        };

        let primary = street(tags! {"highway": "primary", "maxspeed": "65"});
        assert_eq!(speed_weighting(&primary, true), 2.0);

        let backward_limit = street(tags! {"highway": "primary", "maxspeed:backward": "130"});
        assert_eq!(speed_weighting(&backward_limit, false), 1.0);
        assert_eq!(
            speed_weighting(&street(tags! {"highway": "residential"}), true),
            130.0 / 30.0
        );
        assert_eq!(speed_weighting(&street(tags! {"highway": "footway"}), true), -1.0);
        assert_eq!(
            speed_weighting(&street(tags! {"highway": "residential", "oneway": "yes"}), false),
            -1.0
        );
        assert_eq!(
            speed_weighting(&street(tags! {"highway": "residential", "oneway": "yes"}), true),
            130.0 / 30.0
        );
    }
}
