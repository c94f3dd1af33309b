// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

use log::{info, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::geo::GeoPos;

/// Maximum offset (in degrees) of randomly chosen route endpoints from the center.
pub const RANDOM_ROUTE_SPREAD: f64 = 0.3;

/// Error which can occur when reading a [RouteConfig].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Requested route, as stored in a JSON file:
///
/// ```json
/// {"from": {"lat": 52.2297, "lon": 21.0122}, "to": {"lat": 52.2319, "lon": 21.0067}}
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub from: GeoPos,
    pub to: GeoPos,
}

impl RouteConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let f = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(f))?)
    }

    pub fn from_json(data: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(data)?)
    }

    /// Picks a random route, with both endpoints north-east of `center`,
    /// offset by less than [RANDOM_ROUTE_SPREAD] degrees in each axis.
    pub fn random<R: Rng>(center: GeoPos, rng: &mut R) -> Self {
        let mut offset = |p: GeoPos| {
            GeoPos::new(
                p.lat + rng.gen_range(0.0..RANDOM_ROUTE_SPREAD),
                p.lon + rng.gen_range(0.0..RANDOM_ROUTE_SPREAD),
            )
        };
        let from = offset(center);
        let to = offset(center);
        Self { from, to }
    }

    /// Reads the route from a file, falling back to [RouteConfig::random]
    /// if the file can't be read.
    pub fn load_or_random<P: AsRef<Path>, R: Rng>(
        path: P,
        center: GeoPos,
        rng: &mut R,
    ) -> Self {
        match Self::from_file(&path) {
            Ok(config) => {
                info!("loaded route from {}", path.as_ref().display());
                config
            }
            Err(e) => {
                warn!(
                    "failed to load route from {}: {} - picking a random one",
                    path.as_ref().display(),
                    e
                );
                Self::random(center, rng)
            }
        }
    }
}
