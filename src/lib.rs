// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

//! Street-level routing over incrementally loaded [OpenStreetMap](https://www.openstreetmap.org/) data.
//!
//! Map data is requested lazily, one square of a fixed grid at a time, from a
//! [DataSource](osm::DataSource) - the [Overpass API](osm::Overpass) or an in-memory
//! [extract](osm::MemorySource). Loaded streets are indexed in a [QuadTree],
//! and routes are found with an asynchronous [A*](astar::find_path) search over
//! street junctions, which loads more data as the search progresses.
//! Streetpath supports one-way streets, turn restrictions and custom weighting functions.
//!
//! Everything runs on a single thread; futures returned by this crate are not `Send`
//! and should be driven by a current-thread runtime.
//!
//! # Example
//!
//! ```no_run
//! use streetpath::geo::GeoPos;
//! use streetpath::osm;
//!
//! # async fn route() -> Result<(), Box<dyn std::error::Error>> {
//! let source = osm::MemorySource::from_file("path/to/monaco.osm", osm::FileFormat::Unknown)?;
//! let data = osm::OsmData::new(source);
//!
//! let from = data
//!     .get_closest_street(&GeoPos::new(43.7384, 7.4246), 0.00001, true, Some(osm::DRIVEABLE_STREET_RULE))
//!     .await
//!     .expect("no street near the start");
//! let to = data
//!     .get_closest_street(&GeoPos::new(43.7478, 7.4323), 0.00001, true, Some(osm::DRIVEABLE_STREET_RULE))
//!     .await
//!     .expect("no street near the end");
//!
//! let pathfinder = osm::Pathfinder::new(
//!     &data,
//!     from.position,
//!     to.position,
//!     osm::speed_weighting,
//!     osm::PathfinderOptions::default(),
//! );
//! if let Some(path) = pathfinder.find().await? {
//!     println!("Route: {:?}", path.geo_coordinates());
//! }
//! # Ok(())
//! # }
//! ```

pub mod astar;
pub mod config;
pub mod distance;
pub mod geo;
pub mod osm;
pub mod quadtree;
pub mod sorted;

pub use astar::{AStarError, DEFAULT_STEP_LIMIT};
pub use config::RouteConfig;
pub use distance::chord_distance;
pub use geo::{GeoPos, MercatorPos, Rect};
pub use quadtree::QuadTree;
pub use sorted::{SortedUnique, SortedVec};
