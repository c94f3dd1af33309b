// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use std::collections::HashMap;

use super::Street;

/// How a [Rule] compares the value of a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    /// The tag value must be equal to (one of) [Rule::value].
    Equals,

    /// The tag value must not be equal to any of [Rule::value].
    NotEquals,
}

/// Value (or set of values) a tag is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleValue<'a> {
    One(&'a str),
    Any(&'a [&'a str]),
}

impl<'a> RuleValue<'a> {
    fn contains(&self, v: &str) -> bool {
        match self {
            Self::One(x) => *x == v,
            Self::Any(xs) => xs.contains(&v),
        }
    }
}

/// Single condition on the tags of an OSM element, see [matches_rules].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule<'a> {
    pub key: &'a str,
    pub condition: Condition,
    pub value: RuleValue<'a>,

    /// If false, an element without [Rule::key] passes the rule.
    /// If true, an element without [Rule::key] fails the rule.
    pub has_to_exist: bool,
}

impl<'a> Rule<'a> {
    pub fn matches(&self, tags: &HashMap<String, String>) -> bool {
        match tags.get(self.key) {
            None => !self.has_to_exist,
            Some(v) => match self.condition {
                Condition::Equals => self.value.contains(v),
                Condition::NotEquals => !self.value.contains(v),
            },
        }
    }
}

/// Checks if the tags pass every provided [Rule].
pub fn matches_rules(tags: &HashMap<String, String>, rules: &[Rule<'_>]) -> bool {
    rules.iter().all(|r| r.matches(tags))
}

/// Rules selecting streets which can be driven on by a car.
pub const DRIVEABLE_STREET_RULE: &[Rule<'static>] = &[
    Rule {
        key: "access",
        condition: Condition::Equals,
        value: RuleValue::One("yes"),
        has_to_exist: false,
    },
    Rule {
        key: "vehicle",
        condition: Condition::NotEquals,
        value: RuleValue::One("no"),
        has_to_exist: false,
    },
    Rule {
        key: "highway",
        condition: Condition::Equals,
        value: RuleValue::Any(&[
            "motorway",
            "trunk",
            "primary",
            "secondary",
            "tertiary",
            "unclassified",
            "residential",
            "motorway_link",
            "trunk_link",
            "primary_link",
            "secondary_link",
            "tertiary_link",
            "living_street",
            "service",
        ]),
        has_to_exist: true,
    },
];

/// Access modes, from least to most specific, which apply to cars.
const CAR_ACCESS: &[&str] = &["vehicle", "motor_vehicle", "motorcar"];

/// Turn restriction kind indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRestriction {
    /// Not a turn restriction, or a turn restriction which does not apply to cars.
    Inapplicable,

    /// Turning from the `from` street onto the `to` street is prohibited.
    Prohibitory,

    /// After entering the `via` node from the `from` street, only the `to` street may be used.
    Mandatory,
}

/// Checks if a way is traversable by cars forward (first return value) and
/// backwards (second return value) by investigating mode-specific and generic one-way tags.
///
/// Some ways (highway=motorway, highway=motorway_link, junction=roundabout and
/// junction=circular) default to being one-way, except if overridden by specific tags.
pub fn way_direction(tags: &HashMap<String, String>) -> (bool, bool) {
    let mut forward = true;
    let mut backward = true;

    match tags.get("highway").map(|s| s.as_str()).unwrap_or("") {
        "motorway" | "motorway_link" => backward = false,
        _ => {}
    }

    match tags.get("junction").map(|s| s.as_str()).unwrap_or("") {
        "roundabout" | "circular" => backward = false,
        _ => {}
    }

    match active_mode_value(tags, "oneway") {
        "yes" | "true" | "1" => {
            forward = true;
            backward = false;
        }

        "-1" | "reverse" => {
            forward = false;
            backward = true;
        }

        "no" => {
            forward = true;
            backward = true;
        }

        _ => {}
    }

    return (forward, backward);
}

/// Figures out what kind of [TurnRestriction] a relation with given tags represents.
pub fn restriction_kind(tags: &HashMap<String, String>) -> TurnRestriction {
    if is_exempted(tags) {
        return TurnRestriction::Inapplicable;
    }

    let restriction = active_mode_value(tags, "restriction");
    if restriction.starts_with("no_") {
        TurnRestriction::Prohibitory
    } else if restriction.starts_with("only_") {
        TurnRestriction::Mandatory
    } else {
        TurnRestriction::Inapplicable
    }
}

/// Returns true if any of the car access modes is listed in the `except` tag.
fn is_exempted(tags: &HashMap<String, String>) -> bool {
    tags.get("except")
        .map_or("", |v| v.as_str())
        .split(';')
        .any(|exempted| CAR_ACCESS.contains(&exempted.trim()))
}

/// Returns the value of the most specific "KEY:MODE" tag (based on [CAR_ACCESS]),
/// falling back to simply "KEY", and returning an empty string if no relevant tag was found.
fn active_mode_value<'t>(tags: &'t HashMap<String, String>, key: &str) -> &'t str {
    CAR_ACCESS
        .iter()
        .rev()
        .find_map(|&mode| tags.get(&format!("{}:{}", key, mode)))
        .or_else(|| tags.get(key))
        .map(|v| v.as_str())
        .unwrap_or("")
}

/// Speed assumed on streets without a usable `maxspeed` tag, in km/h.
pub const DEFAULT_MAX_SPEED: f64 = 30.0;

/// Speed for which [speed_weighting] returns 1, in km/h.
pub const REFERENCE_SPEED: f64 = 130.0;

/// Parses the value of a [maxspeed](https://wiki.openstreetmap.org/wiki/Key:maxspeed) tag
/// into km/h. Returns `None` for non-numeric values (like "none" or "signals").
pub fn parse_max_speed(value: &str) -> Option<f64> {
    let value = value.trim();
    let (number, factor) = match value.strip_suffix("mph") {
        Some(number) => (number.trim(), 1.609344),
        None => (value.strip_suffix("km/h").unwrap_or(value).trim(), 1.0),
    };

    number
        .parse::<f64>()
        .ok()
        .filter(|&v| v.is_finite() && v > 0.0)
        .map(|v| v * factor)
}

/// Weighting function preferring faster streets, usable with the
/// [Pathfinder](super::Pathfinder).
///
/// Returns -1 (impassable) for streets not passing [DRIVEABLE_STREET_RULE] and when
/// travelling against the one-way direction (see [way_direction]); otherwise
/// [REFERENCE_SPEED] divided by the speed limit of the street.
pub fn speed_weighting(street: &Street, forwards: bool) -> f64 {
    if !street.matches_rules(DRIVEABLE_STREET_RULE) {
        return -1.0;
    }

    let (forward, backward) = way_direction(&street.tags);
    if (forwards && !forward) || (!forwards && !backward) {
        return -1.0;
    }

    let directional_key = if forwards {
        "maxspeed:forward"
    } else {
        "maxspeed:backward"
    };

    let max_speed = street
        .tags
        .get("maxspeed")
        .and_then(|v| parse_max_speed(v))
        .or_else(|| street.tags.get(directional_key).and_then(|v| parse_max_speed(v)))
        .unwrap_or(DEFAULT_MAX_SPEED);

    REFERENCE_SPEED / max_speed
}

#[cfg(test)]
mod tests {
    use super::*;

    macro_rules! tags {
        {} => { HashMap::default() };
        {$( $k:literal : $v:literal ),+} => {
            HashMap::from_iter([ $( ($k.to_string(), $v.to_string()) ),+ ])
        };
    }

    #[test]
    fn driveable_street_rule() {
        assert!(matches_rules(&tags! {"highway": "residential"}, DRIVEABLE_STREET_RULE));
        assert!(matches_rules(
            &tags! {"highway": "service", "access": "yes"},
            DRIVEABLE_STREET_RULE
        ));
        assert!(!matches_rules(&tags! {"highway": "footway"}, DRIVEABLE_STREET_RULE));
        assert!(!matches_rules(&tags! {"name": "Main Street"}, DRIVEABLE_STREET_RULE));
        assert!(!matches_rules(
            &tags! {"highway": "primary", "access": "no"},
            DRIVEABLE_STREET_RULE
        ));
        assert!(!matches_rules(
            &tags! {"highway": "primary", "vehicle": "no"},
            DRIVEABLE_STREET_RULE
        ));
        assert!(matches_rules(
            &tags! {"highway": "primary", "vehicle": "destination"},
            DRIVEABLE_STREET_RULE
        ));
    }

    #[test]
    fn rule_with_set_of_values() {
        let rule = Rule {
            key: "surface",
            condition: Condition::NotEquals,
            value: RuleValue::Any(&["gravel", "sand"]),
            has_to_exist: true,
        };
        assert!(rule.matches(&tags! {"surface": "asphalt"}));
        assert!(!rule.matches(&tags! {"surface": "sand"}));
        assert!(!rule.matches(&tags! {}));
        assert!(matches_rules(&tags! {}, &[]));
    }

    #[test]
    fn way_direction_tags() {
        assert_eq!(way_direction(&tags! {"highway": "residential"}), (true, true));
        assert_eq!(
            way_direction(&tags! {"highway": "residential", "oneway": "yes"}),
            (true, false),
        );
        assert_eq!(
            way_direction(&tags! {"highway": "residential", "oneway": "-1"}),
            (false, true),
        );
        assert_eq!(way_direction(&tags! {"highway": "motorway_link"}), (true, false));
        assert_eq!(
            way_direction(&tags! {"highway": "primary", "junction": "roundabout"}),
            (true, false),
        );
        assert_eq!(
            way_direction(&tags! {"highway": "motorway_link", "oneway": "no"}),
            (true, true),
        );

        let exempt = tags! {"highway": "residential", "oneway": "yes", "oneway:motorcar": "no"};
        assert_eq!(way_direction(&exempt), (true, true));
    }

    #[test]
    fn restriction_kinds() {
        assert_eq!(
            restriction_kind(&tags! {"type": "restriction", "restriction": "no_left_turn"}),
            TurnRestriction::Prohibitory,
        );
        assert_eq!(
            restriction_kind(&tags! {"type": "restriction", "restriction": "only_straight_on"}),
            TurnRestriction::Mandatory,
        );
        assert_eq!(
            restriction_kind(
                &tags! {"type": "restriction", "restriction": "no_u_turn", "except": "psv;motorcar"}
            ),
            TurnRestriction::Inapplicable,
        );
        assert_eq!(
            restriction_kind(&tags! {"type": "restriction", "restriction:motorcar": "no_u_turn"}),
            TurnRestriction::Prohibitory,
        );
        assert_eq!(
            restriction_kind(&tags! {"type": "restriction", "restriction": "give_way"}),
            TurnRestriction::Inapplicable,
        );
    }

    #[test]
    fn max_speed_parsing() {
        assert_eq!(parse_max_speed("50"), Some(50.0));
        assert_eq!(parse_max_speed("50 km/h"), Some(50.0));
        assert!((parse_max_speed("30 mph").unwrap() - 48.28032).abs() < 1e-9);
        assert_eq!(parse_max_speed("none"), None);
        assert_eq!(parse_max_speed("0"), None);
    }
}
