// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use std::collections::HashMap;
use std::io;
use std::str::from_utf8;

use log::warn;
use quick_xml::events::{BytesStart, Event};

use crate::osm::model::{Feature, FeatureType, Node, Relation, RelationMember, Way};

/// Returns an iterator over all features from an [OSM XML](https://wiki.openstreetmap.org/wiki/OSM_XML)
/// stream.
pub fn features_from_io<R: io::BufRead>(
    reader: R,
) -> impl Iterator<Item = Result<Feature, quick_xml::Error>> {
    Reader::new(IoParser::new(reader))
}

/// Returns an iterator over all features from an in-memory
/// [OSM XML](https://wiki.openstreetmap.org/wiki/OSM_XML) document.
pub fn features_from_buffer(
    b: &[u8],
) -> impl Iterator<Item = Result<Feature, quick_xml::Error>> + '_ {
    Reader::new(BufParser::new(b))
}

/// Parser is a trait for objects which can parse XML.
///
/// This trait only exists to fix the mismatch of
/// [quick_xml::Reader::read_event] when working on buffered data
/// and [quick_xml::Reader::read_event_into] when working on IO.
trait Parser {
    fn read_event<'a>(&'a mut self) -> quick_xml::Result<Event<'a>>;
}

/// IoParser implements [Parser] over an [std::io::BufRead].
struct IoParser<R: io::BufRead>(quick_xml::Reader<R>, Vec<u8>);

impl<R: io::BufRead> IoParser<R> {
    #[inline]
    fn new(reader: R) -> Self {
        Self(quick_xml::Reader::from_reader(reader), Vec::default())
    }
}

impl<R: io::BufRead> Parser for IoParser<R> {
    #[inline]
    fn read_event<'a>(&'a mut self) -> quick_xml::Result<Event<'a>> {
        self.1.clear();
        self.0.read_event_into(&mut self.1)
    }
}

/// BufParser implements [Parser] over a slice of bytes (`&[u8]`).
struct BufParser<'a>(quick_xml::Reader<&'a [u8]>);

impl<'a> BufParser<'a> {
    #[inline]
    fn new(data: &'a [u8]) -> Self {
        Self(quick_xml::Reader::from_reader(data))
    }
}

impl<'a> Parser for BufParser<'a> {
    #[inline]
    fn read_event<'b>(&'b mut self) -> quick_xml::Result<Event<'b>> {
        self.0.read_event()
    }
}

/// Reader reads osm [Features](Feature) from an XML file.
struct Reader<P: Parser> {
    parser: P,
    eof: bool,
}

impl<P: Parser> Reader<P> {
    #[inline]
    fn new(parser: P) -> Self {
        Self { parser, eof: false }
    }
}

impl<P: Parser> Iterator for Reader<P> {
    type Item = Result<Feature, quick_xml::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut f: Option<Feature> = None;

        while !self.eof {
            let event = match self.parser.read_event() {
                Ok(e) => e,
                Err(e) => {
                    self.eof = true;
                    return Some(Err(e));
                }
            };

            match event {
                Event::Empty(start) => match start.local_name().as_ref() {
                    b"node" => {
                        if let Some(n) = parse_node(&start) {
                            return Some(Ok(Feature::Node(n)));
                        }
                    }
                    b"way" => {
                        if let Some(w) = parse_way(&start) {
                            return Some(Ok(Feature::Way(w)));
                        }
                    }
                    b"relation" => {
                        if let Some(r) = parse_relation(&start) {
                            return Some(Ok(Feature::Relation(r)));
                        }
                    }
                    b"tag" => {
                        if let (Some(tags), Some((k, v))) =
                            (feature_tags(&mut f), parse_tag(&start))
                        {
                            tags.insert(k, v);
                        }
                    }
                    b"nd" => {
                        if let (Some(nodes), Some(ref_)) =
                            (feature_nodes(&mut f), parse_nd(&start))
                        {
                            nodes.push(ref_);
                        }
                    }
                    b"member" => {
                        if let (Some(members), Some(m)) =
                            (feature_members(&mut f), parse_member(&start))
                        {
                            members.push(m);
                        }
                    }
                    _ => {}
                },

                Event::Start(start) => match start.local_name().as_ref() {
                    b"node" => f = parse_node(&start).map(Feature::Node),
                    b"way" => f = parse_way(&start).map(Feature::Way),
                    b"relation" => f = parse_relation(&start).map(Feature::Relation),
                    _ => {}
                },

                Event::End(end) => match end.local_name().as_ref() {
                    b"node" | b"way" | b"relation" => {
                        if let Some(f) = f.take() {
                            return Some(Ok(f));
                        }
                    }
                    _ => {}
                },

                Event::Eof => {
                    self.eof = true;
                }

                _ => {}
            }
        }

        return f.map(Ok);
    }
}

/// Iterates over `(key, value)` attribute pairs, logging and skipping malformed ones.
fn attributes<'a>(start: &'a BytesStart<'_>) -> impl Iterator<Item = (&'a [u8], String)> + 'a {
    start.attributes().filter_map(|attr| match attr {
        Ok(attr) => match from_utf8(&attr.value) {
            Ok(value) => Some((attr.key.into_inner(), value.to_string())),
            Err(e) => {
                warn!("non-utf8 value of an xml attribute: {}", e);
                None
            }
        },
        Err(e) => {
            warn!("malformed xml attribute: {}", e);
            None
        }
    })
}

fn parse_id(start: &BytesStart<'_>, what: &str) -> Option<i64> {
    let mut id: i64 = 0;
    for (key, value) in attributes(start) {
        if key == b"id" {
            id = value.parse().unwrap_or(0);
        }
    }

    if id != 0 {
        Some(id)
    } else {
        warn!("{} without a valid id", what);
        None
    }
}

fn parse_node(start: &BytesStart<'_>) -> Option<Node> {
    let mut id: i64 = 0;
    let mut lat = f64::NAN;
    let mut lon = f64::NAN;

    for (key, value) in attributes(start) {
        match key {
            b"id" => id = value.parse().unwrap_or(0),
            b"lat" => lat = value.parse().unwrap_or(f64::NAN),
            b"lon" => lon = value.parse().unwrap_or(f64::NAN),
            _ => {}
        }
    }

    if id != 0 && lat.is_finite() && lon.is_finite() {
        Some(Node {
            id,
            lat,
            lon,
            tags: HashMap::default(),
        })
    } else {
        warn!("skipping invalid node {} ({}, {})", id, lat, lon);
        None
    }
}

fn parse_way(start: &BytesStart<'_>) -> Option<Way> {
    parse_id(start, "way").map(|id| Way {
        id,
        nodes: Vec::default(),
        tags: HashMap::default(),
    })
}

fn parse_relation(start: &BytesStart<'_>) -> Option<Relation> {
    parse_id(start, "relation").map(|id| Relation {
        id,
        members: Vec::default(),
        tags: HashMap::default(),
    })
}

fn parse_tag(start: &BytesStart<'_>) -> Option<(String, String)> {
    let mut k = None;
    let mut v = None;

    for (key, value) in attributes(start) {
        match key {
            b"k" => k = Some(value),
            b"v" => v = Some(value),
            _ => {}
        }
    }

    k.map(|k| (k, v.unwrap_or_default()))
}

fn parse_nd(start: &BytesStart<'_>) -> Option<i64> {
    let ref_ = attributes(start)
        .find(|(key, _)| *key == b"ref")
        .and_then(|(_, value)| value.parse::<i64>().ok())
        .unwrap_or(0);

    if ref_ != 0 {
        Some(ref_)
    } else {
        warn!("skipping way node reference without a valid ref");
        None
    }
}

fn parse_member(start: &BytesStart<'_>) -> Option<RelationMember> {
    let mut ref_: i64 = 0;
    let mut type_ = None;
    let mut role = None;

    for (key, value) in attributes(start) {
        match key {
            b"ref" => ref_ = value.parse().unwrap_or(0),
            b"type" => type_ = parse_feature_type(&value),
            b"role" => role = Some(value),
            _ => {}
        }
    }

    match (ref_, type_, role) {
        (0, _, _) => None,
        (ref_, Some(type_), role) => Some(RelationMember {
            type_,
            ref_,
            role: role.unwrap_or_default(),
        }),
        _ => None,
    }
}

fn parse_feature_type(s: &str) -> Option<FeatureType> {
    match s {
        "node" => Some(FeatureType::Node),
        "way" => Some(FeatureType::Way),
        "relation" => Some(FeatureType::Relation),
        _ => None,
    }
}

fn feature_tags(f: &mut Option<Feature>) -> Option<&mut HashMap<String, String>> {
    match f {
        Some(Feature::Node(ref mut n)) => Some(&mut n.tags),
        Some(Feature::Way(ref mut w)) => Some(&mut w.tags),
        Some(Feature::Relation(ref mut r)) => Some(&mut r.tags),
        _ => None,
    }
}

fn feature_nodes(f: &mut Option<Feature>) -> Option<&mut Vec<i64>> {
    match f {
        Some(Feature::Way(ref mut w)) => Some(&mut w.nodes),
        _ => None,
    }
}

fn feature_members(f: &mut Option<Feature>) -> Option<&mut Vec<RelationMember>> {
    match f {
        Some(Feature::Relation(ref mut r)) => Some(&mut r.members),
        _ => None,
    }
}
