// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

//! Street-level routing over [OpenStreetMap](https://www.openstreetmap.org/) data,
//! which is loaded on demand from a [DataSource] into [OsmData].

mod data;
mod element;
pub mod model;
mod pathfinder;
pub mod rules;
mod source;
mod street;

pub use data::{
    ClosestStreet, Junction, NextJunctions, OsmData, OsmRelation, OsmWay, Square, StoreOptions,
};
pub use element::{ClosestPoint, MemberRef, Node, RestrictionRelation, Street};
pub use pathfinder::{uniform_weighting, Pathfinder, PathfinderOptions, WaypointKey};
pub use rules::{
    matches_rules, speed_weighting, way_direction, Condition, Rule, RuleValue, TurnRestriction,
    DRIVEABLE_STREET_RULE,
};
#[cfg(feature = "http")]
pub use source::HttpTransport;
pub use source::{
    area_query, features_from_buffer, features_from_file, features_from_io, parse_status,
    DataSource, Error, FileFormat, MemorySource, Overpass, OverpassOptions, SlotStatus, Transport,
};
pub use street::{SectionPoint, StreetPath, StreetPosition, StreetSection};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeoPos;

    const SIMPLE_XML: &[u8] = include_bytes!("source/test_fixtures/simple.osm");

    //        4
    //      / │
    // (12)/  │ (11)
    //    /   v
    //   1 ── 2 ── 3 (10)
    //        │
    //        v
    //        5
    //
    // 10: 1 ── 2 ── 3, primary, 50 km/h
    // 11: 4 ─> 2 ─> 5, residential, one-way
    // No left turn from 10 onto 11 at 2.

    async fn closest(d: &OsmData<MemorySource>, lat: f64, lon: f64) -> StreetPosition {
        d.get_closest_street(
            &GeoPos::new(lat, lon),
            0.00001,
            true,
            Some(DRIVEABLE_STREET_RULE),
        )
        .await
        .expect("no street nearby")
        .position
    }

    #[tokio::test]
    async fn route_over_simple_graph() {
        let source = MemorySource::from_buffer(SIMPLE_XML, FileFormat::Unknown).unwrap();
        let d = OsmData::new(source);

        let from = closest(&d, 52.23, 21.0105).await;
        let to = closest(&d, 52.2295, 21.011).await;
        assert_eq!(from.street.id, 10);
        assert_eq!(to.street.id, 11);
        assert_eq!(to.index, 1);

        // The only drivable way is prohibited
        let p = Pathfinder::new(
            &d,
            from.clone(),
            to.clone(),
            speed_weighting,
            PathfinderOptions::default(),
        );
        assert!(p.find().await.unwrap().is_none());

        let p = Pathfinder::new(
            &d,
            from,
            to,
            speed_weighting,
            PathfinderOptions {
                turn_restrictions: false,
                ..Default::default()
            },
        );
        let path = p.find().await.unwrap().unwrap();
        let streets = path
            .sections()
            .iter()
            .map(|s| s.street.id)
            .collect::<Vec<_>>();
        assert_eq!(streets, vec![10, 11]);
        assert_eq!(path.geo_coordinates().len(), 3);
        assert_eq!(path.geo_coordinates()[1], GeoPos::new(52.23, 21.011));
    }
}
