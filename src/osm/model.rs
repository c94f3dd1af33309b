// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

//! Raw [OSM elements](https://wiki.openstreetmap.org/wiki/Elements), as returned by
//! a [DataSource](super::DataSource), before being wrapped by [OsmData](super::OsmData).

use std::collections::HashMap;

use serde::Deserialize;

/// Represents an [OSM node](https://wiki.openstreetmap.org/wiki/Node).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Node {
    pub id: i64,
    pub lat: f64,
    pub lon: f64,

    #[serde(default)]
    pub tags: HashMap<String, String>,
}

/// Represents an [OSM way](https://wiki.openstreetmap.org/wiki/Way).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Way {
    pub id: i64,

    #[serde(default)]
    pub nodes: Vec<i64>,

    #[serde(default)]
    pub tags: HashMap<String, String>,
}

/// Type of an [OSM feature/element](https://wiki.openstreetmap.org/wiki/Elements).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureType {
    Node,
    Way,
    Relation,
}

impl std::fmt::Display for FeatureType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Node => write!(f, "node"),
            Self::Way => write!(f, "way"),
            Self::Relation => write!(f, "relation"),
        }
    }
}

/// Represents a member of an [OSM relation](https://wiki.openstreetmap.org/wiki/Relation).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RelationMember {
    #[serde(rename = "type")]
    pub type_: FeatureType,

    #[serde(rename = "ref")]
    pub ref_: i64,

    #[serde(default)]
    pub role: String,
}

/// Represents an [OSM relation](https://wiki.openstreetmap.org/wiki/Relation).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Relation {
    pub id: i64,

    #[serde(default)]
    pub members: Vec<RelationMember>,

    #[serde(default)]
    pub tags: HashMap<String, String>,
}

/// Union over all possible [OSM features/elements](https://wiki.openstreetmap.org/wiki/Elements).
///
/// Deserializes from the [Overpass JSON](https://wiki.openstreetmap.org/wiki/OSM_JSON)
/// representation, where the kind of an element is stored under the `type` key.
/// Elements of other kinds (e.g. `area` or `count`) become [Feature::Unknown].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Feature {
    Node(Node),
    Way(Way),
    Relation(Relation),

    #[serde(other)]
    Unknown,
}

impl Feature {
    pub fn id(&self) -> Option<i64> {
        match self {
            Self::Node(n) => Some(n.id),
            Self::Way(w) => Some(w.id),
            Self::Relation(r) => Some(r.id),
            Self::Unknown => None,
        }
    }
}

/// Body of an [Overpass API](https://wiki.openstreetmap.org/wiki/Overpass_API)
/// response with `[out:json]`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OverpassResponse {
    #[serde(default)]
    pub elements: Vec<Feature>,
}
