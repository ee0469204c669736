//! Transformer: reshape upstream feed JSON into transport-ready records.
//!
//! Parsing is per element. An element that does not have the fields a record needs is
//! skipped and counted; the rest of the feed still goes through.

use serde::Deserialize;
use serde_json::Value as Json;

use crate::protocol::{PatternPoint, PatternStop, Record, Rgb, Route, RouteType};

/// Default fixed-point scale: coordinates are sent in hundredths of a degree.
pub const DEFAULT_SCALE: f64 = 100.0;

/// Upstream point type code marking a stop.
const STOP_POINT_TYPE: i64 = 1;

/// Transform output plus how many source elements were dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct Transformed<T> {
    pub items: T,
    pub skipped: usize,
}

/// A route pattern: every point, and the stops among them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pattern {
    pub points: Vec<PatternPoint>,
    pub stops: Vec<PatternStop>,
}

impl Pattern {
    pub fn point_records(&self) -> Vec<Record> {
        self.points.iter().cloned().map(Record::Point).collect()
    }

    pub fn stop_records(&self) -> Vec<Record> {
        self.stops.iter().cloned().map(Record::Stop).collect()
    }
}

#[derive(Deserialize)]
struct RawRoute {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Group", default)]
    group: Option<Json>,
    #[serde(rename = "ShortName")]
    short_name: String,
    #[serde(rename = "Color", default)]
    color: Option<Json>,
}

#[derive(Deserialize)]
struct RawStop {
    #[serde(rename = "IsTimePoint", default)]
    is_time_point: Option<bool>,
}

#[derive(Deserialize)]
struct RawPoint {
    #[serde(rename = "Name", default)]
    name: Option<String>,
    #[serde(rename = "PointTypeCode", default)]
    point_type_code: Option<i64>,
    #[serde(rename = "Stop", default)]
    stop: Option<RawStop>,
    // The live feed spells it "Longtitude".
    #[serde(rename = "Longitude", alias = "Longtitude")]
    longitude: f64,
    #[serde(rename = "Latitude")]
    latitude: f64,
}

/// Map a free-text group label to a route category. Total: anything unknown is `Other`.
pub fn classify_group(label: Option<&str>) -> RouteType {
    match label.map(str::trim) {
        Some("On Campus") => RouteType::OnCampus,
        Some("Off Campus") => RouteType::OffCampus,
        Some("Game Day Routes") => RouteType::GameDay,
        _ => RouteType::Other,
    }
}

/// Parse a CSS color (`#rgb`, `#rrggbb`, `rgb()`, `rgba()`, or a basic named color).
pub fn parse_css_color(input: &str) -> Option<Rgb> {
    let s = input.trim().to_ascii_lowercase();
    if let Some(hex) = s.strip_prefix('#') {
        return parse_hex(hex);
    }
    let args = s
        .strip_prefix("rgba(")
        .or_else(|| s.strip_prefix("rgb("))
        .and_then(|rest| rest.strip_suffix(')'));
    if let Some(args) = args {
        return parse_rgb_args(args);
    }
    named_color(&s)
}

fn parse_hex(hex: &str) -> Option<Rgb> {
    if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let channel = |i: usize, w: usize| u8::from_str_radix(&hex[i * w..(i + 1) * w], 16).ok();
    match hex.len() {
        3 => Some(Rgb {
            r: channel(0, 1)? * 17,
            g: channel(1, 1)? * 17,
            b: channel(2, 1)? * 17,
        }),
        6 => Some(Rgb {
            r: channel(0, 2)?,
            g: channel(1, 2)?,
            b: channel(2, 2)?,
        }),
        _ => None,
    }
}

fn parse_rgb_args(args: &str) -> Option<Rgb> {
    let parts: Vec<&str> = args.split(',').map(str::trim).collect();
    if parts.len() != 3 && parts.len() != 4 {
        return None;
    }
    let channel = |p: &str| -> Option<u8> {
        let v = match p.strip_suffix('%') {
            Some(pct) => pct.trim().parse::<f64>().ok()? / 100.0 * 255.0,
            None => p.parse::<f64>().ok()?,
        };
        if !v.is_finite() {
            return None;
        }
        Some(v.round().clamp(0.0, 255.0) as u8)
    };
    Some(Rgb {
        r: channel(parts[0])?,
        g: channel(parts[1])?,
        b: channel(parts[2])?,
    })
}

fn named_color(name: &str) -> Option<Rgb> {
    let (r, g, b) = match name {
        "black" => (0, 0, 0),
        "white" => (255, 255, 255),
        "red" => (255, 0, 0),
        "lime" => (0, 255, 0),
        "green" => (0, 128, 0),
        "blue" => (0, 0, 255),
        "yellow" => (255, 255, 0),
        "orange" => (255, 165, 0),
        "purple" => (128, 0, 128),
        "maroon" => (128, 0, 0),
        "navy" => (0, 0, 128),
        "teal" => (0, 128, 128),
        "silver" => (192, 192, 192),
        "gray" | "grey" => (128, 128, 128),
        _ => return None,
    };
    Some(Rgb { r, g, b })
}

/// Feed-to-record transformer. Holds only the fixed-point scale; no state between calls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transformer {
    scale: f64,
}

impl Transformer {
    pub fn new() -> Self {
        Self {
            scale: DEFAULT_SCALE,
        }
    }

    pub fn with_scale(scale: f64) -> Self {
        Self { scale }
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Routes listing → routes in source order.
    pub fn routes(&self, feed: &Json) -> Transformed<Vec<Route>> {
        let Some(elements) = feed.as_array() else {
            tracing::warn!("routes feed is not an array; nothing to send");
            return Transformed {
                items: Vec::new(),
                skipped: 1,
            };
        };
        let mut items = Vec::with_capacity(elements.len());
        let mut skipped = 0;
        for (i, elem) in elements.iter().enumerate() {
            match RawRoute::deserialize(elem) {
                Ok(raw) => items.push(route_from_raw(raw)),
                Err(e) => {
                    skipped += 1;
                    tracing::warn!(index = i, error = %e, "skipping malformed route");
                }
            }
        }
        Transformed { items, skipped }
    }

    /// Pattern listing → normalized points and the stops among them.
    pub fn pattern(&self, route_short_name: &str, feed: &Json) -> Transformed<Pattern> {
        let Some(elements) = feed.as_array() else {
            tracing::warn!(route = route_short_name, "pattern feed is not an array");
            return Transformed {
                items: Pattern::default(),
                skipped: 1,
            };
        };
        let mut raw_points = Vec::with_capacity(elements.len());
        let mut skipped = 0;
        for (i, elem) in elements.iter().enumerate() {
            match RawPoint::deserialize(elem) {
                Ok(raw) => raw_points.push(raw),
                Err(e) => {
                    skipped += 1;
                    tracing::warn!(index = i, route = route_short_name, error = %e, "skipping malformed pattern point");
                }
            }
        }

        // First pass: origin of the bounding box.
        let min_x = raw_points
            .iter()
            .map(|p| p.longitude)
            .fold(f64::INFINITY, f64::min);
        let min_y = raw_points
            .iter()
            .map(|p| p.latitude)
            .fold(f64::INFINITY, f64::min);

        // Second pass: shift to origin, then scale to fixed point.
        let mut pattern = Pattern::default();
        for raw in raw_points {
            let is_stop = raw.point_type_code == Some(STOP_POINT_TYPE);
            let x = self.fixed_point(raw.longitude - min_x);
            let y = self.fixed_point(raw.latitude - min_y);
            let (stop_name, is_timed) = if is_stop {
                let name = raw.name.as_deref().map(str::trim).unwrap_or_default();
                let timed = raw.stop.and_then(|s| s.is_time_point).unwrap_or(false);
                pattern.stops.push(PatternStop {
                    route_short_name: route_short_name.to_string(),
                    name: name.to_string(),
                    is_timed: timed,
                    point_index: pattern.points.len() as u32,
                });
                (Some(name.to_string()), Some(timed))
            } else {
                (None, None)
            };
            pattern.points.push(PatternPoint {
                route_short_name: route_short_name.to_string(),
                x,
                y,
                is_stop,
                stop_name,
                is_timed,
            });
        }
        Transformed {
            items: pattern,
            skipped,
        }
    }

    fn fixed_point(&self, offset: f64) -> i32 {
        // `as` saturates at the i32 bounds.
        (offset * self.scale).round() as i32
    }
}

impl Default for Transformer {
    fn default() -> Self {
        Self::new()
    }
}

fn route_from_raw(raw: RawRoute) -> Route {
    let color = match raw.color.as_ref().and_then(Json::as_str) {
        Some(s) if !s.trim().is_empty() => {
            let parsed = parse_css_color(s);
            if parsed.is_none() {
                tracing::debug!(color = s, "unparseable route color; omitting");
            }
            parsed
        }
        _ => None,
    };
    Route {
        name: raw.name.trim().to_string(),
        route_type: classify_group(raw.group.as_ref().and_then(Json::as_str)),
        short_name: raw.short_name.trim().to_string(),
        color,
    }
}

/// Split routes into one batch per category, in category order, dropping empty ones.
/// Source order is kept inside each batch.
pub fn group_by_type(routes: Vec<Route>) -> Vec<(RouteType, Vec<Record>)> {
    let mut groups: Vec<(RouteType, Vec<Record>)> =
        RouteType::ALL.iter().map(|&t| (t, Vec::new())).collect();
    for route in routes {
        let slot = route.route_type.as_wire() as usize;
        groups[slot].1.push(Record::Route(route));
    }
    groups.retain(|(_, records)| !records.is_empty());
    groups
}
