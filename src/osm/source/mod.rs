// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{self, BufRead, Read};
use std::path::Path;

use log::debug;

use super::model::{Feature, FeatureType, Node, OverpassResponse, Relation, Way};
use crate::geo::Rect;

mod overpass;
mod xml;

#[cfg(feature = "http")]
pub use overpass::HttpTransport;
pub use overpass::{area_query, parse_status, Overpass, OverpassOptions, SlotStatus, Transport};

/// Error which can occur when reading OSM data or talking to the Overpass API.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] io::Error),

    #[error("xml: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "http")]
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status response: {0:?}")]
    UnexpectedStatus(String),

    #[error("unrecognized file format")]
    UnknownFileFormat,
}

/// Provider of raw OSM elements for [OsmData](super::OsmData).
///
/// Fetching is infallible from the perspective of the caller:
/// implementations are expected to retry transient failures on their own.
#[allow(async_fn_in_trait)]
pub trait DataSource {
    /// Fetches all ways with a `highway` tag and all relations with a `restriction` tag
    /// within the geographic `area` (x being the longitude and y the latitude),
    /// together with all nodes (and ways) referenced by them.
    async fn fetch_area(&self, area: &Rect) -> Vec<Feature>;
}

/// Format of an input file with OSM data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    /// Unknown format - guess the format based on the extension or the content
    Unknown,

    /// Force uncompressed [OSM XML](https://wiki.openstreetmap.org/wiki/OSM_XML)
    Xml,

    /// Force [OSM XML](https://wiki.openstreetmap.org/wiki/OSM_XML)
    /// with [gzip](https://en.wikipedia.org/wiki/Gzip) compression
    XmlGz,

    /// Force [OSM XML](https://wiki.openstreetmap.org/wiki/OSM_XML)
    /// with [bzip2](https://en.wikipedia.org/wiki/Bzip2) compression
    XmlBz2,

    /// Force [Overpass JSON](https://wiki.openstreetmap.org/wiki/OSM_JSON)
    Json,
}

impl FileFormat {
    /// Guesses the format from the extension of a file,
    /// returning [FileFormat::Unknown] if the extension is not recognized.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        let name = path
            .as_ref()
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();

        if name.ends_with(".gz") {
            Self::XmlGz
        } else if name.ends_with(".bz2") {
            Self::XmlBz2
        } else if name.ends_with(".json") {
            Self::Json
        } else if name.ends_with(".osm") || name.ends_with(".xml") {
            Self::Xml
        } else {
            Self::Unknown
        }
    }

    /// Guesses the format from the first bytes of a file.
    pub fn from_content(head: &[u8]) -> Self {
        if head.starts_with(&[0x1f, 0x8b]) {
            return Self::XmlGz;
        } else if head.starts_with(b"BZh") {
            return Self::XmlBz2;
        }

        match head.iter().find(|b| !b.is_ascii_whitespace()) {
            Some(b'<') => Self::Xml,
            Some(b'{') => Self::Json,
            _ => Self::Unknown,
        }
    }
}

/// Parses all features from a stream in the provided format.
///
/// The provided stream will be automatically wrapped in a buffered reader when needed.
pub fn features_from_io<R: Read>(reader: R, format: FileFormat) -> Result<Vec<Feature>, Error> {
    let mut b = io::BufReader::new(reader);
    let format = match format {
        FileFormat::Unknown => FileFormat::from_content(b.fill_buf()?),
        f => f,
    };

    match format {
        FileFormat::Unknown => Err(Error::UnknownFileFormat),

        FileFormat::Xml => Ok(xml::features_from_io(b).collect::<Result<Vec<_>, _>>()?),

        FileFormat::XmlGz => {
            let d = flate2::read::MultiGzDecoder::new(b);
            let b = io::BufReader::new(d);
            Ok(xml::features_from_io(b).collect::<Result<Vec<_>, _>>()?)
        }

        FileFormat::XmlBz2 => {
            let d = bzip2::read::MultiBzDecoder::new(b);
            let b = io::BufReader::new(d);
            Ok(xml::features_from_io(b).collect::<Result<Vec<_>, _>>()?)
        }

        FileFormat::Json => {
            let response: OverpassResponse = serde_json::from_reader(b)?;
            Ok(response.elements)
        }
    }
}

/// Parses all features from a file at the provided path. [FileFormat::Unknown]
/// is first resolved using the file extension, then using the file content.
pub fn features_from_file<P: AsRef<Path>>(
    path: P,
    format: FileFormat,
) -> Result<Vec<Feature>, Error> {
    let format = match format {
        FileFormat::Unknown => FileFormat::from_path(&path),
        f => f,
    };
    let f = File::open(path)?;
    features_from_io(f, format)
}

/// Parses all features from a static buffer.
pub fn features_from_buffer(data: &[u8], format: FileFormat) -> Result<Vec<Feature>, Error> {
    let format = match format {
        FileFormat::Unknown => FileFormat::from_content(data),
        f => f,
    };

    match format {
        // Fast path is available for in-memory XML data
        FileFormat::Xml => Ok(xml::features_from_buffer(data).collect::<Result<Vec<_>, _>>()?),
        FileFormat::Json => Ok(serde_json::from_slice::<OverpassResponse>(data)?.elements),
        f => features_from_io(io::Cursor::new(data), f),
    }
}

/// [DataSource] serving a fixed set of OSM elements from memory,
/// answering area requests like the Overpass API would.
///
/// Primarily useful for offline routing over an extract and for tests.
#[derive(Debug, Default)]
pub struct MemorySource {
    nodes: BTreeMap<i64, Node>,
    ways: BTreeMap<i64, Way>,
    relations: BTreeMap<i64, Relation>,
    requested: RefCell<Vec<Rect>>,
    fetches: Cell<usize>,
}

impl MemorySource {
    pub fn new<I: IntoIterator<Item = Feature>>(features: I) -> Self {
        let mut s = Self::default();
        for f in features {
            match f {
                Feature::Node(n) => {
                    s.nodes.insert(n.id, n);
                }
                Feature::Way(w) => {
                    s.ways.insert(w.id, w);
                }
                Feature::Relation(r) => {
                    s.relations.insert(r.id, r);
                }
                Feature::Unknown => {}
            }
        }
        s
    }

    pub fn from_file<P: AsRef<Path>>(path: P, format: FileFormat) -> Result<Self, Error> {
        Ok(Self::new(features_from_file(path, format)?))
    }

    pub fn from_io<R: Read>(reader: R, format: FileFormat) -> Result<Self, Error> {
        Ok(Self::new(features_from_io(reader, format)?))
    }

    pub fn from_buffer(data: &[u8], format: FileFormat) -> Result<Self, Error> {
        Ok(Self::new(features_from_buffer(data, format)?))
    }

    /// Number of [DataSource::fetch_area] calls so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.get()
    }

    /// Areas passed to [DataSource::fetch_area] so far, in call order.
    pub fn requested_areas(&self) -> Vec<Rect> {
        self.requested.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.nodes.len() + self.ways.len() + self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Geographic bounding box of all nodes, or `None` if there are no nodes.
    pub fn bounds(&self) -> Option<Rect> {
        Rect::containing(self.nodes.values().map(|n| (n.lon, n.lat)))
    }

    fn way_bounds(&self, way: &Way) -> Option<Rect> {
        Rect::containing(
            way.nodes
                .iter()
                .filter_map(|id| self.nodes.get(id))
                .map(|n| (n.lon, n.lat)),
        )
    }

    fn way_touches(&self, way: &Way, area: &Rect) -> bool {
        self.way_bounds(way).is_some_and(|b| b.touches(area))
    }

    fn node_inside(&self, id: i64, area: &Rect) -> bool {
        self.nodes
            .get(&id)
            .is_some_and(|n| area.contains_point(n.lon, n.lat))
    }

    /// Selects elements the way the following Overpass query does:
    ///
    /// ```text
    /// (way["highway"](bbox); relation["restriction"](bbox);); (._; >;); out;
    /// ```
    ///
    /// Ways are matched by their bounding box, which may select slightly more ways
    /// than Overpass would. Elements are returned ordered by type, then by id.
    pub fn select(&self, area: &Rect) -> Vec<Feature> {
        let mut node_ids = BTreeSet::default();
        let mut way_ids = BTreeSet::default();
        let mut relation_ids = BTreeSet::default();

        for way in self.ways.values() {
            if way.tags.contains_key("highway") && self.way_touches(way, area) {
                way_ids.insert(way.id);
            }
        }

        for relation in self.relations.values() {
            if !relation.tags.contains_key("restriction") {
                continue;
            }

            let in_area = relation.members.iter().any(|m| match m.type_ {
                FeatureType::Node => self.node_inside(m.ref_, area),
                FeatureType::Way => self
                    .ways
                    .get(&m.ref_)
                    .is_some_and(|w| self.way_touches(w, area)),
                FeatureType::Relation => false,
            });

            if in_area {
                relation_ids.insert(relation.id);
                for m in &relation.members {
                    match m.type_ {
                        FeatureType::Node => {
                            node_ids.insert(m.ref_);
                        }
                        FeatureType::Way => {
                            way_ids.insert(m.ref_);
                        }
                        FeatureType::Relation => {}
                    }
                }
            }
        }

        for id in &way_ids {
            if let Some(way) = self.ways.get(id) {
                node_ids.extend(way.nodes.iter().copied());
            }
        }

        let nodes = node_ids
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .map(|n| Feature::Node(n.clone()));
        let ways = way_ids
            .iter()
            .filter_map(|id| self.ways.get(id))
            .map(|w| Feature::Way(w.clone()));
        let relations = relation_ids
            .iter()
            .filter_map(|id| self.relations.get(id))
            .map(|r| Feature::Relation(r.clone()));

        nodes.chain(ways).chain(relations).collect()
    }
}

impl DataSource for MemorySource {
    async fn fetch_area(&self, area: &Rect) -> Vec<Feature> {
        self.fetches.set(self.fetches.get() + 1);
        self.requested.borrow_mut().push(*area);

        let features = self.select(area);
        debug!("serving {} elements for {:?}", features.len(), area);
        features
    }
}
