// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use std::rc::Rc;

use log::{debug, error, info};

use super::data::OsmData;
use super::element::{RestrictionRelation, Street};
use super::source::DataSource;
use super::street::{SectionPoint, StreetPath, StreetPosition, StreetSection};
use crate::astar::{
    find_path, AStarError, Connection, HeapOpenSet, OpenSet, Waypoints, DEFAULT_STEP_LIMIT,
};
use crate::geo::GeoPos;

/// Controls the behavior of the [Pathfinder].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathfinderOptions {
    /// Multiplier of edge costs, see [find_path]. Values below 1 speed up the search
    /// at the cost of possibly sub-optimal routes.
    pub accuracy: f64,

    /// Respect [turn restrictions](https://wiki.openstreetmap.org/wiki/Relation:restriction).
    pub turn_restrictions: bool,

    /// Allow turning back at junctions onto the just-traveled street segment.
    pub u_turns: bool,

    /// Maximum number of expanded waypoints, see [find_path].
    pub step_limit: usize,
}

impl Default for PathfinderOptions {
    fn default() -> Self {
        Self {
            accuracy: 1.0,
            turn_restrictions: true,
            u_turns: false,
            step_limit: DEFAULT_STEP_LIMIT,
        }
    }
}

/// Weighting function giving the same weight to every street in both directions.
pub fn uniform_weighting(_: &Street, _: bool) -> f64 {
    1.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Place {
    Node(i64),
    From,
    To,
}

/// How a junction was entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Entry {
    street: i64,
    forwards: bool,

    /// Index of the junction within `street`.
    index: usize,
}

/// Identifies a waypoint of the search. The same junction entered from different
/// streets (or directions) yields different waypoints, as different turns may be
/// allowed from them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaypointKey {
    place: Place,
    entry: Option<Entry>,
}

/// Finds routes between two [StreetPosition]s, over junctions of streets loaded
/// (on demand) into an [OsmData].
///
/// The cost of traveling over a [StreetSection] is its length multiplied by
/// `weighting(street, forwards)`. Negative weights mark the section as impassable.
/// A NaN weight is a bug in the weighting function - it's logged and the section
/// is treated as impassable.
///
/// The search heuristic is the straight-line distance to the node starting the segment
/// of the destination.
pub struct Pathfinder<'a, S: DataSource, W: Fn(&Street, bool) -> f64> {
    data: &'a OsmData<S>,
    from: StreetPosition,
    to: StreetPosition,
    weighting: W,
    options: PathfinderOptions,
}

impl<'a, S: DataSource, W: Fn(&Street, bool) -> f64> Pathfinder<'a, S, W> {
    pub fn new(
        data: &'a OsmData<S>,
        from: StreetPosition,
        to: StreetPosition,
        weighting: W,
        options: PathfinderOptions,
    ) -> Self {
        Self {
            data,
            from,
            to,
            weighting,
            options,
        }
    }

    pub fn start(&self) -> &StreetPosition {
        &self.from
    }

    pub fn destination(&self) -> &StreetPosition {
        &self.to
    }

    pub fn options(&self) -> &PathfinderOptions {
        &self.options
    }

    /// Finds the cheapest route, using a [HeapOpenSet].
    ///
    /// Returns `Ok(None)` if the destination is unreachable.
    pub async fn find(&self) -> Result<Option<StreetPath>, AStarError> {
        self.find_with(&mut HeapOpenSet::new()).await
    }

    /// Finds the cheapest route, using the provided (empty) [OpenSet].
    pub async fn find_with<O: OpenSet<WaypointKey>>(
        &self,
        open: &mut O,
    ) -> Result<Option<StreetPath>, AStarError> {
        debug!(
            "searching for a route from street {} ({}, {}) to street {} ({}, {})",
            self.from.street.id,
            self.from.index,
            self.from.t,
            self.to.street.id,
            self.to.index,
            self.to.t,
        );

        let mut search = Search {
            pathfinder: self,
            goal: self.to.street.geo_coordinates()[self.to.index],
        };
        let start = WaypointKey {
            place: Place::From,
            entry: None,
        };

        let steps = find_path(
            &mut search,
            start,
            open,
            self.options.accuracy,
            self.options.step_limit,
        )
        .await?;

        let Some(steps) = steps else {
            info!("no route found");
            return Ok(None);
        };

        let sections = steps.into_iter().filter_map(|s| s.edge).collect::<Vec<_>>();
        let mut significant = sections
            .iter()
            .filter(|s| s.start != s.end)
            .cloned()
            .collect::<Vec<_>>();
        if significant.is_empty() {
            significant = sections;
        }
        if significant.is_empty() {
            significant.push(StreetSection::between(&self.from, &self.to));
        }

        let path = StreetPath::new(significant);
        info!(
            "found a route over {} street section(s), {:.1} m long",
            path.sections().len(),
            path.length(),
        );
        Ok(Some(path))
    }

    fn tracks_entry(&self) -> bool {
        self.options.turn_restrictions || !self.options.u_turns
    }

    /// Checks whether a junction entered as described by `entry` may be left over `section`.
    fn is_turn_allowed(
        &self,
        node: i64,
        entry: Option<Entry>,
        restrictions: &[Rc<RestrictionRelation>],
        section: &StreetSection,
    ) -> bool {
        let Some(entry) = entry else {
            return true;
        };

        let is_u_turn = section.street.id == entry.street
            && section.start != section.end
            && section.start.index == entry.index
            && section.forwards() != entry.forwards;
        if is_u_turn && !self.options.u_turns {
            return false;
        }

        !restrictions
            .iter()
            .any(|r| r.forbids(entry.street, node, section.street.id))
    }

    /// Turns a section into a search edge, unless the section is impassable.
    fn connect(
        &self,
        out: &mut Vec<Connection<WaypointKey, StreetSection>>,
        place: Place,
        section: StreetSection,
    ) {
        // Zero-length hops are free and don't constitute entering a street
        if section.start == section.end {
            out.push(Connection {
                to: WaypointKey { place, entry: None },
                cost: 0.0,
                edge: section,
            });
            return;
        }

        let forwards = section.forwards();
        let weight = (self.weighting)(&section.street, forwards);
        if weight.is_nan() {
            error!(
                "weighting of street {} (forwards: {}) is NaN - treating it as impassable",
                section.street.id, forwards,
            );
            return;
        } else if weight < 0.0 {
            return;
        }

        let entry = if place != Place::To && self.tracks_entry() {
            Some(Entry {
                street: section.street.id,
                forwards,
                index: section.end.index,
            })
        } else {
            None
        };

        out.push(Connection {
            to: WaypointKey { place, entry },
            cost: section.length() * weight,
            edge: section,
        });
    }

    async fn node_neighbors(
        &self,
        node: i64,
        entry: Option<Entry>,
    ) -> Vec<Connection<WaypointKey, StreetSection>> {
        let restrictions = if self.options.turn_restrictions && entry.is_some() {
            self.data.node_restrictions(node)
        } else {
            vec![]
        };

        let mut neighbors = Vec::default();
        for junction in self.data.connections_to_neighbors(node).await {
            if self.is_turn_allowed(node, entry, &restrictions, &junction.section) {
                self.connect(&mut neighbors, Place::Node(junction.node), junction.section);
            }
        }

        // Destination on a street going through this junction. Arriving at a destination
        // placed on the junction itself doesn't turn onto its street.
        let indices = self.to.street.indices_of(node).collect::<Vec<_>>();
        for index in indices {
            let to_street = self.to.street.clone();
            let section = StreetSection::new(to_street, SectionPoint::node(index), self.to.point());
            let arrives_here = section.start == section.end;
            if arrives_here || self.is_turn_allowed(node, entry, &restrictions, &section) {
                self.connect(&mut neighbors, Place::To, section);
            }
        }

        neighbors
    }

    async fn start_neighbors(&self) -> Vec<Connection<WaypointKey, StreetSection>> {
        let from = &self.from;
        let mut neighbors = Vec::default();

        let junctions = self.data.next_junctions(&from.street, from.point()).await;
        for junction in [junctions.previous, junctions.next].into_iter().flatten() {
            self.connect(&mut neighbors, Place::Node(junction.node), junction.section);
        }

        if let Some(node) = from.node() {
            if self.data.is_junction(node).await {
                let here = StreetSection::new(from.street.clone(), from.point(), from.point());
                self.connect(&mut neighbors, Place::Node(node), here);
            }
        }

        if from.street.id == self.to.street.id {
            self.connect(&mut neighbors, Place::To, StreetSection::between(from, &self.to));
        }

        neighbors
    }
}

struct Search<'p, 'a, S: DataSource, W: Fn(&Street, bool) -> f64> {
    pathfinder: &'p Pathfinder<'a, S, W>,

    /// Position the heuristic measures distances to.
    goal: GeoPos,
}

impl<S: DataSource, W: Fn(&Street, bool) -> f64> Waypoints for Search<'_, '_, S, W> {
    type Key = WaypointKey;
    type Edge = StreetSection;

    fn heuristic(&mut self, key: &WaypointKey) -> f64 {
        let position = match key.place {
            Place::Node(id) => self.pathfinder.data.node(id).map(|n| n.position),
            Place::From => Some(self.pathfinder.from.geo_pos()),
            Place::To => Some(self.pathfinder.to.geo_pos()),
        };
        position.map_or(0.0, |p| p.chord_distance(&self.goal))
    }

    fn is_goal(&self, key: &WaypointKey) -> bool {
        key.place == Place::To
    }

    async fn neighbors(
        &mut self,
        key: &WaypointKey,
    ) -> Vec<Connection<WaypointKey, StreetSection>> {
        match key.place {
            Place::Node(id) => self.pathfinder.node_neighbors(id, key.entry).await,
            Place::From => self.pathfinder.start_neighbors().await,
            Place::To => vec![],
        }
    }
}
