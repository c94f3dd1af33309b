// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use futures::future::join_all;
use log::{debug, info};

use super::element::{ClosestPoint, MemberRef, Node, RestrictionRelation, Street};
use super::model::{self, Feature, FeatureType};
use super::rules::Rule;
use super::source::DataSource;
use super::street::{SectionPoint, StreetPosition, StreetSection};
use crate::geo::{GeoPos, MercatorPos, Rect};
use crate::quadtree::QuadTree;
use crate::sorted::SortedUnique;

/// Controls how [OsmData] requests and indexes data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoreOptions {
    /// Size of a single square of the loading grid, in degrees.
    pub grid_size: f64,

    /// How often to check whether a square requested by another caller has finished loading.
    pub poll_interval: Duration,

    /// Approximate size of the leaves of the street index, in degrees.
    pub leaf_extent: f64,

    /// Half sizes (latitude, longitude) of the area loaded around a node
    /// before its streets are considered complete, in degrees.
    pub connectivity_half_size: (f64, f64),
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            grid_size: 0.1,
            poll_interval: Duration::from_millis(100),
            leaf_extent: 0.05,
            connectivity_half_size: (0.01, 0.00001),
        }
    }
}

/// Any loaded [OSM way](https://wiki.openstreetmap.org/wiki/Way).
#[derive(Debug, Clone)]
pub enum OsmWay {
    /// Way with a `highway` tag and a usable geometry.
    Street(Rc<Street>),

    /// Any other way, kept only to avoid requesting it again.
    Other(Rc<model::Way>),
}

impl OsmWay {
    pub fn id(&self) -> i64 {
        match self {
            Self::Street(s) => s.id,
            Self::Other(w) => w.id,
        }
    }

    pub fn as_street(&self) -> Option<&Rc<Street>> {
        match self {
            Self::Street(s) => Some(s),
            Self::Other(_) => None,
        }
    }
}

/// Any loaded [OSM relation](https://wiki.openstreetmap.org/wiki/Relation).
#[derive(Debug, Clone)]
pub enum OsmRelation {
    /// Relation with a `restriction` tag.
    Restriction(Rc<RestrictionRelation>),
    Other(Rc<model::Relation>),
}

impl OsmRelation {
    pub fn id(&self) -> i64 {
        match self {
            Self::Restriction(r) => r.id,
            Self::Other(r) => r.id,
        }
    }

    pub fn as_restriction(&self) -> Option<&Rc<RestrictionRelation>> {
        match self {
            Self::Restriction(r) => Some(r),
            Self::Other(_) => None,
        }
    }
}

/// Single cell of the loading grid. Cell `(lat, lon)` covers latitudes
/// `[lat * grid_size, (lat + 1) * grid_size]` and likewise for longitudes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Square {
    pub lat: i64,
    pub lon: i64,
    pub area: Rect,
    pub loaded: bool,
}

/// Closest junction in one direction along a street, see [OsmData::next_junctions].
#[derive(Debug, Clone)]
pub struct Junction {
    pub node: i64,

    /// Section from the starting point to the junction.
    pub section: StreetSection,
}

impl Junction {
    pub fn street(&self) -> &Rc<Street> {
        &self.section.street
    }
}

/// Closest junctions before and after a point of a street.
/// `None` means the end of the street was reached without encountering a junction.
#[derive(Debug, Clone, Default)]
pub struct NextJunctions {
    pub previous: Option<Junction>,
    pub next: Option<Junction>,
}

/// Result of [OsmData::get_closest_street].
#[derive(Debug, Clone)]
pub struct ClosestStreet {
    pub position: StreetPosition,

    /// The closest point itself, in the Mercator space.
    pub point: MercatorPos,

    /// Distance from the searched position to [ClosestStreet::point], in Mercator units.
    pub distance: f64,

    /// True if the closest point is an end of a segment, rather than a perpendicular projection.
    pub clamped: bool,
}

type NodeStore = SortedUnique<Rc<Node>, fn(&Rc<Node>) -> i64>;
type WayStore = SortedUnique<OsmWay, fn(&OsmWay) -> i64>;
type RelationStore = SortedUnique<OsmRelation, fn(&OsmRelation) -> i64>;

/// OsmData holds all OSM elements loaded so far, and lazily loads more from
/// a [DataSource], one square of a fixed grid at a time.
///
/// Elements are never replaced: the first loaded version of every node, way and relation wins.
/// Elements refer to each other by IDs, which are resolved through the store.
///
/// All methods take `&self` - the store is meant to be shared between multiple concurrently
/// running tasks on a single thread. No internal borrow is ever held across a suspension point.
pub struct OsmData<S: DataSource> {
    source: S,
    options: StoreOptions,

    nodes: RefCell<NodeStore>,
    ways: RefCell<WayStore>,
    relations: RefCell<RelationStore>,
    streets: RefCell<QuadTree<Rc<Street>>>,

    squares: RefCell<HashMap<(i64, i64), Square>>,

    /// Restrictions referencing elements which were not loaded yet, by member.
    pending: RefCell<HashMap<MemberRef, Vec<i64>>>,
}

impl<S: DataSource> OsmData<S> {
    pub fn new(source: S) -> Self {
        Self::with_options(source, StoreOptions::default())
    }

    /// Panics if `options.grid_size` or `options.leaf_extent` are not positive.
    pub fn with_options(source: S, options: StoreOptions) -> Self {
        assert!(
            options.grid_size > 0.0,
            "grid size must be positive, got {}",
            options.grid_size
        );
        let world = Rect::new(-180.0, 180.0, -90.0, 90.0);

        Self {
            source,
            options,
            nodes: RefCell::new(SortedUnique::new(node_key as fn(&Rc<Node>) -> i64)),
            ways: RefCell::new(SortedUnique::new(OsmWay::id as fn(&OsmWay) -> i64)),
            relations: RefCell::new(SortedUnique::new(
                OsmRelation::id as fn(&OsmRelation) -> i64,
            )),
            streets: RefCell::new(QuadTree::with_leaf_extent(world, options.leaf_extent)),
            squares: RefCell::default(),
            pending: RefCell::default(),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Returns the grid cells covering a geographic area. Degenerate areas
    /// still cover the cell they lie in.
    fn squares_covering(&self, area: &Rect) -> Vec<(i64, i64)> {
        let (min_lat, max_lat) = cell_range(area.bottom, area.top, self.options.grid_size);
        let (min_lon, max_lon) = cell_range(area.left, area.right, self.options.grid_size);

        let mut cells = Vec::default();
        for lat in min_lat..max_lat {
            for lon in min_lon..max_lon {
                cells.push((lat, lon));
            }
        }
        cells
    }

    fn square_area(&self, lat: i64, lon: i64) -> Rect {
        let g = self.options.grid_size;
        Rect::new(
            lon as f64 * g,
            (lon + 1) as f64 * g,
            lat as f64 * g,
            (lat + 1) as f64 * g,
        )
    }

    /// Ensures all squares covering the geographic `area` are loaded.
    ///
    /// Squares which were never requested are fetched concurrently. Squares requested
    /// by other callers, but not loaded yet, are awaited by polling every
    /// [StoreOptions::poll_interval].
    pub async fn load(&self, area: &Rect) {
        let cells = self.squares_covering(area);
        join_all(cells.into_iter().map(|(lat, lon)| self.load_square(lat, lon))).await;
    }

    async fn load_square(&self, lat: i64, lon: i64) {
        let status = self.squares.borrow().get(&(lat, lon)).map(|s| s.loaded);
        match status {
            Some(true) => return,
            Some(false) => {
                while !self.is_square_loaded(lat, lon) {
                    tokio::time::sleep(self.options.poll_interval).await;
                }
                return;
            }
            None => {}
        }

        let area = self.square_area(lat, lon);
        self.squares.borrow_mut().insert(
            (lat, lon),
            Square {
                lat,
                lon,
                area,
                loaded: false,
            },
        );

        debug!("loading square ({}, {}): {:?}", lat, lon, area);
        let features = self.source.fetch_area(&area).await;
        self.add_elements(features);

        if let Some(square) = self.squares.borrow_mut().get_mut(&(lat, lon)) {
            square.loaded = true;
        }
        info!("loaded square ({}, {})", lat, lon);
    }

    fn is_square_loaded(&self, lat: i64, lon: i64) -> bool {
        self.squares
            .borrow()
            .get(&(lat, lon))
            .is_some_and(|s| s.loaded)
    }

    /// Returns true if all squares covering the geographic `area` are loaded.
    pub fn is_loaded(&self, area: &Rect) -> bool {
        self.squares_covering(area)
            .into_iter()
            .all(|(lat, lon)| self.is_square_loaded(lat, lon))
    }

    /// Returns all requested squares, ordered by latitude and longitude.
    pub fn requested_squares(&self) -> Vec<Square> {
        let mut squares = self.squares.borrow().values().copied().collect::<Vec<_>>();
        squares.sort_by_key(|s| (s.lat, s.lon));
        squares
    }

    /// Adds raw OSM elements to the store.
    ///
    /// Elements with already known IDs are skipped. Ways with a `highway` tag become
    /// [Street]s, which are indexed and linked to their nodes. Relations with
    /// a `restriction` tag become [RestrictionRelation]s, which are linked to their
    /// members; links to members which are not loaded yet are made once they load.
    pub fn add_elements(&self, features: Vec<Feature>) {
        let mut raw_nodes = Vec::default();
        let mut raw_ways = Vec::default();
        let mut raw_relations = Vec::default();
        for f in features {
            match f {
                Feature::Node(n) => raw_nodes.push(n),
                Feature::Way(w) => raw_ways.push(w),
                Feature::Relation(r) => raw_relations.push(r),
                Feature::Unknown => {}
            }
        }

        let new_nodes = self
            .nodes
            .borrow_mut()
            .add_all(raw_nodes.into_iter().map(|n| Rc::new(Node::new(n))));

        // Nodes must be added first, as streets resolve their geometry from them
        let ways = raw_ways
            .into_iter()
            .filter(|w| !self.ways.borrow().contains(w.id))
            .map(|w| self.wrap_way(w))
            .collect::<Vec<_>>();
        let new_ways = self.ways.borrow_mut().add_all(ways);

        let relations = raw_relations
            .into_iter()
            .filter(|r| !self.relations.borrow().contains(r.id))
            .map(wrap_relation)
            .collect::<Vec<_>>();
        let new_relations = self.relations.borrow_mut().add_all(relations);

        for node in &new_nodes {
            self.attach_pending(MemberRef::node(node.id));
        }

        for street in new_ways.iter().filter_map(OsmWay::as_street) {
            for &node_id in street.nodes() {
                if let Some(node) = self.node(node_id) {
                    node.add_street(street.id);
                }
            }
            self.streets
                .borrow_mut()
                .insert(street.clone(), street.bounds());
            self.attach_pending(MemberRef::way(street.id));
        }

        for restriction in new_relations.iter().filter_map(OsmRelation::as_restriction) {
            for member in restriction.members() {
                if !self.attach_restriction(member, restriction.id) {
                    self.pending
                        .borrow_mut()
                        .entry(member)
                        .or_default()
                        .push(restriction.id);
                }
            }
        }

        debug!(
            "added {} nodes, {} ways and {} relations",
            new_nodes.len(),
            new_ways.len(),
            new_relations.len(),
        );
    }

    fn wrap_way(&self, way: model::Way) -> OsmWay {
        if way.tags.contains_key("highway") {
            if let Some(street) = Street::new(&way, |id| self.node(id).map(|n| n.position)) {
                return OsmWay::Street(Rc::new(street));
            }
        }
        OsmWay::Other(Rc::new(way))
    }

    /// Links a restriction to one of its members. Returns false if the member is not loaded.
    fn attach_restriction(&self, member: MemberRef, restriction: i64) -> bool {
        match member.type_ {
            FeatureType::Node => match self.node(member.ref_) {
                Some(node) => {
                    node.add_restriction(restriction);
                    true
                }
                None => false,
            },

            FeatureType::Way => match self.way(member.ref_) {
                Some(OsmWay::Street(street)) => {
                    street.add_restriction(restriction);
                    true
                }
                Some(OsmWay::Other(_)) => true,
                None => false,
            },

            FeatureType::Relation => true,
        }
    }

    fn attach_pending(&self, member: MemberRef) {
        let waiting = self.pending.borrow_mut().remove(&member);
        for restriction in waiting.into_iter().flatten() {
            self.attach_restriction(member, restriction);
        }
    }

    pub fn node(&self, id: i64) -> Option<Rc<Node>> {
        self.nodes.borrow().get(id).cloned()
    }

    pub fn way(&self, id: i64) -> Option<OsmWay> {
        self.ways.borrow().get(id).cloned()
    }

    pub fn street(&self, id: i64) -> Option<Rc<Street>> {
        self.way(id).and_then(|w| w.as_street().cloned())
    }

    pub fn relation(&self, id: i64) -> Option<OsmRelation> {
        self.relations.borrow().get(id).cloned()
    }

    pub fn restriction(&self, id: i64) -> Option<Rc<RestrictionRelation>> {
        self.relation(id).and_then(|r| r.as_restriction().cloned())
    }

    pub fn node_count(&self) -> usize {
        self.nodes.borrow().len()
    }

    pub fn way_count(&self) -> usize {
        self.ways.borrow().len()
    }

    pub fn relation_count(&self) -> usize {
        self.relations.borrow().len()
    }

    /// Returns all indexed streets whose bounding box touches the geographic `area`,
    /// in the order they were loaded. Doesn't load anything.
    pub fn streets_in(&self, area: &Rect) -> Vec<Rc<Street>> {
        self.streets
            .borrow()
            .query(area)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Removes streets not touching `keep` from the spatial index, returning the number
    /// of removed streets. The streets remain accessible by ID.
    pub fn prune(&self, keep: &Rect) -> usize {
        let removed = self.streets.borrow_mut().prune(keep);
        debug!("pruned {} streets from the index", removed.len());
        removed.len()
    }

    /// Returns all streets going through a node.
    ///
    /// The first call for every node loads a small area around it,
    /// so that all streets of the node are known.
    pub async fn node_streets(&self, id: i64) -> Vec<Rc<Street>> {
        let Some(node) = self.node(id) else {
            return vec![];
        };

        if !node.connectivity_loaded.get() {
            let (half_lat, half_lon) = self.options.connectivity_half_size;
            self.load(&Rect::around_geo(&node.position, half_lat, half_lon))
                .await;
            node.connectivity_loaded.set(true);
        }

        node.streets()
            .into_iter()
            .filter_map(|s| self.street(s))
            .collect()
    }

    /// Returns all turn restrictions referencing a node.
    pub fn node_restrictions(&self, id: i64) -> Vec<Rc<RestrictionRelation>> {
        self.node(id)
            .map(|n| n.restrictions())
            .unwrap_or_default()
            .into_iter()
            .filter_map(|r| self.restriction(r))
            .collect()
    }

    /// Checks if a node is a junction - that is, it either belongs to
    /// more than one street, or appears multiple times in a single street.
    ///
    /// The result is cached per node. Unknown nodes are never junctions.
    pub async fn is_junction(&self, id: i64) -> bool {
        let Some(node) = self.node(id) else {
            return false;
        };
        if let Some(cached) = node.junction.get() {
            return cached;
        }

        let streets = self.node_streets(id).await;
        let junction =
            streets.len() > 1 || streets.first().is_some_and(|s| s.indices_of(id).count() > 1);
        node.junction.set(Some(junction));
        junction
    }

    /// Finds the closest junctions before and after `start` along a street.
    ///
    /// If `start` lies inside a segment (`t > 0`), the node at `start.index`
    /// is also considered as the previous junction. Sections of the returned
    /// junctions begin at `start`.
    pub async fn next_junctions(&self, street: &Rc<Street>, start: SectionPoint) -> NextJunctions {
        let nodes = street.nodes();
        let mut junctions = NextJunctions::default();

        let first_previous = if start.t > 0.0 {
            Some(start.index)
        } else {
            start.index.checked_sub(1)
        };

        if let Some(first) = first_previous {
            for i in (0..=first).rev() {
                if self.is_junction(nodes[i]).await {
                    junctions.previous = Some(Junction {
                        node: nodes[i],
                        section: StreetSection::new(street.clone(), start, SectionPoint::node(i)),
                    });
                    break;
                }
            }
        }

        for (i, &node) in nodes.iter().enumerate().skip(start.index + 1) {
            if self.is_junction(node).await {
                junctions.next = Some(Junction {
                    node,
                    section: StreetSection::new(street.clone(), start, SectionPoint::node(i)),
                });
                break;
            }
        }

        junctions
    }

    /// Returns the neighboring junctions of a node, along all of its streets.
    /// Nodes appearing multiple times in a street are considered at every occurrence.
    pub async fn connections_to_neighbors(&self, id: i64) -> Vec<Junction> {
        let mut connections = Vec::default();

        for street in self.node_streets(id).await {
            let indices = street.indices_of(id).collect::<Vec<_>>();
            for index in indices {
                let junctions = self
                    .next_junctions(&street, SectionPoint::node(index))
                    .await;
                connections.extend(junctions.previous);
                connections.extend(junctions.next);
            }
        }

        connections
    }

    /// Finds the street closest to `pos`, considering only streets whose bounding
    /// box touches a square of `radius` (in Mercator units) around `pos`.
    ///
    /// If `load` is set, the search area is loaded first. If `rules` are provided,
    /// streets not matching them are ignored. When multiple streets are equally close,
    /// the first loaded one wins.
    ///
    /// Panics if `radius` is negative or NaN.
    pub async fn get_closest_street(
        &self,
        pos: &GeoPos,
        radius: f64,
        load: bool,
        rules: Option<&[Rule<'_>]>,
    ) -> Option<ClosestStreet> {
        assert!(
            radius >= 0.0,
            "search radius must be a non-negative number, got {}",
            radius
        );

        let mercator = pos.to_mercator();
        let area = Rect::around(mercator.x, mercator.y, radius, radius).to_geo();
        if load {
            self.load(&area).await;
        }

        let mut closest: Option<(Rc<Street>, ClosestPoint)> = None;
        for street in self.streets_in(&area) {
            if rules.is_some_and(|r| !street.matches_rules(r)) {
                continue;
            }

            let point = street.closest_point_to(&mercator);
            if closest.as_ref().map_or(true, |(_, c)| point.distance < c.distance) {
                closest = Some((street, point));
            }
        }

        let (street, point) = closest?;
        Some(ClosestStreet {
            position: StreetPosition::new(street, point.index, point.t)?,
            point: point.point,
            distance: point.distance,
            clamped: point.clamped,
        })
    }
}

fn node_key(n: &Rc<Node>) -> i64 {
    n.id
}

fn wrap_relation(relation: model::Relation) -> OsmRelation {
    if relation.tags.contains_key("restriction") {
        OsmRelation::Restriction(Rc::new(RestrictionRelation::new(&relation)))
    } else {
        OsmRelation::Other(Rc::new(relation))
    }
}

/// Returns the half-open range of grid cells covering `[lo, hi]`, never empty.
fn cell_range(lo: f64, hi: f64, grid_size: f64) -> (i64, i64) {
    let min = (lo / grid_size).floor() as i64;
    let max = ((hi / grid_size).ceil() as i64).max(min + 1);
    (min, max)
}
