//! GPX track processing.
//!
//! Turns raw GPX text into an ordered, resampled list of [`RoutePoint`]s:
//! parse → smooth → distances → bearings → grades → resample.
//! Every stage returns a new vector; nothing is mutated in place.

use chrono::{DateTime, Duration, Utc};
use geo::{Coord, LineString, Simplify};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Mean Earth radius used by the haversine formula (metres).
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Metres per degree, used to turn a metric smoothing tolerance into degrees.
const METRES_PER_DEGREE: f64 = 111_000.0;

/// Default Douglas-Peucker tolerance (metres).
pub const DEFAULT_SMOOTHING_EPSILON_M: f64 = 20.0;

/// Default bearing window (metres).
pub const DEFAULT_BEARING_WINDOW_M: f64 = 300.0;

/// Default grade window (metres).
pub const DEFAULT_GRADE_WINDOW_M: f64 = 200.0;

/// Errors that can occur during GPX parsing.
#[derive(Debug, Error)]
pub enum GpxError {
    #[error("XML parsing error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("Invalid field value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
    #[error("No route points found in GPX file")]
    NoPoints,
}

/// A point along a route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RoutePoint {
    /// Latitude (WGS84)
    pub lat: f64,
    /// Longitude (WGS84)
    pub lon: f64,
    /// Elevation in metres, when the track records it
    pub elevation: Option<f64>,
    /// Cumulative distance from the start in metres
    pub distance_m: f64,
    /// Heading in degrees clockwise from true north, `[0, 360)`
    pub bearing_deg: Option<f64>,
    /// Gradient in percent
    pub grade_pct: Option<f64>,
    /// Recorded timestamp, when the track has one
    pub timestamp: Option<DateTime<Utc>>,
}

impl RoutePoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self {
            lat,
            lon,
            elevation: None,
            distance_m: 0.0,
            bearing_deg: None,
            grade_pct: None,
            timestamp: None,
        }
    }
}

/// Summary of a processed track.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RouteMetadata {
    pub total_distance_km: f64,
    /// `[min_lon, min_lat, max_lon, max_lat]`
    pub bbox: Vec<f64>,
    /// Points after smoothing
    pub total_points: usize,
    /// Points after resampling
    pub sampled_points: usize,
    pub has_elevation: bool,
    pub has_timestamps: bool,
    /// Fraction of smoothed points carrying a timestamp
    pub timestamp_coverage: f64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Extract points from every `<trk>` and then every `<rte>` in the document.
///
/// Track points come first regardless of document order, so a GPX that
/// carries both keeps the recorded track ahead of the planned route.
pub fn parse_gpx(gpx_xml: &str) -> Result<Vec<RoutePoint>, GpxError> {
    let mut reader = Reader::from_str(gpx_xml);

    let mut track_points: Vec<RoutePoint> = Vec::new();
    let mut route_points: Vec<RoutePoint> = Vec::new();

    // Point being built while inside <trkpt> or <rtept>
    let mut current: Option<RoutePoint> = None;
    let mut current_is_track = false;
    let mut current_element: Option<&'static str> = None;
    // Nested <extensions> may carry their own <time>/<ele>; ignore those
    let mut extensions_depth = 0usize;

    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let local = local_name_str(e.name().as_ref());
                match local.as_str() {
                    "trkpt" | "rtept" => {
                        current = Some(point_from_attributes(e)?);
                        current_is_track = local == "trkpt";
                    }
                    "extensions" if current.is_some() => extensions_depth += 1,
                    "ele" if current.is_some() && extensions_depth == 0 => {
                        current_element = Some("ele");
                    }
                    "time" if current.is_some() && extensions_depth == 0 => {
                        current_element = Some("time");
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(ref e)) => {
                let local = local_name_str(e.name().as_ref());
                if local == "trkpt" {
                    track_points.push(point_from_attributes(e)?);
                } else if local == "rtept" {
                    route_points.push(point_from_attributes(e)?);
                }
            }
            Ok(Event::Text(ref e)) => {
                if let (Some(elem), Some(point)) = (current_element, current.as_mut()) {
                    let text = e.unescape().unwrap_or_default().trim().to_string();
                    if !text.is_empty() {
                        match elem {
                            "ele" => match text.parse::<f64>() {
                                Ok(v) if v.is_finite() => point.elevation = Some(v),
                                _ => tracing::warn!("Ignoring malformed <ele>'{}'", text),
                            },
                            "time" => match DateTime::parse_from_rfc3339(&text) {
                                Ok(dt) => point.timestamp = Some(dt.with_timezone(&Utc)),
                                Err(e) => {
                                    tracing::warn!("Ignoring malformed <time>'{}': {}", text, e)
                                }
                            },
                            _ => {}
                        }
                    }
                }
            }
            Ok(Event::End(ref e)) => {
                let local = local_name_str(e.name().as_ref());
                current_element = None;
                match local.as_str() {
                    "extensions" if extensions_depth > 0 => extensions_depth -= 1,
                    "trkpt" | "rtept" => {
                        if let Some(point) = current.take() {
                            if current_is_track {
                                track_points.push(point);
                            } else {
                                route_points.push(point);
                            }
                        }
                        extensions_depth = 0;
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(GpxError::Xml(e)),
            _ => {}
        }
        buf.clear();
    }

    track_points.extend(route_points);
    if track_points.is_empty() {
        return Err(GpxError::NoPoints);
    }
    Ok(track_points)
}

/// Build a bare point from the `lat`/`lon` attributes of a `<trkpt>`/`<rtept>`.
fn point_from_attributes(e: &BytesStart) -> Result<RoutePoint, GpxError> {
    let mut lat: Option<f64> = None;
    let mut lon: Option<f64> = None;

    for attr in e.attributes().flatten() {
        let key = std::str::from_utf8(attr.key.as_ref()).unwrap_or("");
        let val = std::str::from_utf8(&attr.value).unwrap_or("");
        match key {
            "lat" => lat = Some(parse_coordinate("lat", val, 90.0)?),
            "lon" => lon = Some(parse_coordinate("lon", val, 180.0)?),
            _ => {}
        }
    }

    match (lat, lon) {
        (Some(lat), Some(lon)) => Ok(RoutePoint::new(lat, lon)),
        _ => Err(GpxError::InvalidValue {
            field: "lat/lon".to_string(),
            message: "point is missing a coordinate attribute".to_string(),
        }),
    }
}

fn parse_coordinate(field: &str, val: &str, limit: f64) -> Result<f64, GpxError> {
    let v: f64 = val.trim().parse().map_err(|_| GpxError::InvalidValue {
        field: field.to_string(),
        message: format!("not a valid number: '{}'", val),
    })?;
    if !v.is_finite() || v.abs() > limit {
        return Err(GpxError::InvalidValue {
            field: field.to_string(),
            message: format!("{} is outside [-{limit}, {limit}]", v),
        });
    }
    Ok(v)
}

/// Extract the local name from a potentially namespaced XML element name.
/// e.g. `gpxtpx:name` -> `name`, `name` -> `name`
fn local_name_str(full: &[u8]) -> String {
    let s = std::str::from_utf8(full).unwrap_or("");
    match s.rfind(':') {
        Some(pos) => s[pos + 1..].to_string(),
        None => s.to_string(),
    }
}

/// Douglas-Peucker simplification with the tolerance given in metres.
///
/// Surviving vertices take elevation and timestamp from the nearest original
/// point, by squared planar lat/lon distance.
pub fn smooth_route(points: &[RoutePoint], epsilon_m: f64) -> Vec<RoutePoint> {
    if points.len() < 3 {
        return points.to_vec();
    }

    let line: LineString<f64> = points
        .iter()
        .map(|p| Coord { x: p.lon, y: p.lat })
        .collect::<Vec<_>>()
        .into();
    let epsilon_deg = epsilon_m / METRES_PER_DEGREE;
    let simplified = line.simplify(&epsilon_deg);

    simplified
        .coords()
        .map(|c| {
            let nearest = points
                .iter()
                .min_by(|a, b| {
                    planar_sq(a, c.y, c.x)
                        .partial_cmp(&planar_sq(b, c.y, c.x))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .unwrap_or(&points[0]);
            RoutePoint {
                elevation: nearest.elevation,
                timestamp: nearest.timestamp,
                ..RoutePoint::new(c.y, c.x)
            }
        })
        .collect()
}

fn planar_sq(p: &RoutePoint, lat: f64, lon: f64) -> f64 {
    (p.lat - lat).powi(2) + (p.lon - lon).powi(2)
}

/// Great-circle distance between two coordinates (metres).
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();

    let a = (dlat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Initial true bearing from point 1 to point 2, in `[0, 360)`.
pub fn initial_bearing(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let dlon = (lon2 - lon1).to_radians();

    let y = dlon.sin() * lat2_rad.cos();
    let x = lat1_rad.cos() * lat2_rad.sin() - lat1_rad.sin() * lat2_rad.cos() * dlon.cos();

    normalize_deg(y.atan2(x).to_degrees())
}

/// Wrap an angle into `[0, 360)`.
pub(crate) fn normalize_deg(deg: f64) -> f64 {
    let wrapped = deg.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Cumulative haversine distance along the track. The first point is at 0.
pub fn calculate_distances(points: &[RoutePoint]) -> Vec<RoutePoint> {
    let mut cumulative = 0.0;
    points
        .iter()
        .enumerate()
        .map(|(i, p)| {
            if i > 0 {
                let prev = &points[i - 1];
                cumulative += haversine_distance(prev.lat, prev.lon, p.lat, p.lon);
            }
            RoutePoint {
                distance_m: cumulative,
                ..p.clone()
            }
        })
        .collect()
}

/// Index of the point whose cumulative distance is closest to `target`.
fn find_distance_index(points: &[RoutePoint], target: f64) -> usize {
    let idx = points.partition_point(|p| p.distance_m < target);
    if idx == 0 {
        return 0;
    }
    if idx >= points.len() {
        return points.len() - 1;
    }
    let below = (target - points[idx - 1].distance_m).abs();
    let above = (points[idx].distance_m - target).abs();
    if below <= above {
        idx - 1
    } else {
        idx
    }
}

/// Window endpoints straddling `distance ± window/2`.
fn window_indices(points: &[RoutePoint], distance_m: f64, window_m: f64) -> (usize, usize) {
    let start = find_distance_index(points, (distance_m - window_m / 2.0).max(0.0));
    let end = find_distance_index(points, distance_m + window_m / 2.0);
    (start, end)
}

/// Heading at each point, measured across a sliding distance window.
pub fn calculate_bearings(points: &[RoutePoint], window_m: f64) -> Vec<RoutePoint> {
    if points.len() < 2 {
        return points
            .iter()
            .map(|p| RoutePoint {
                bearing_deg: Some(0.0),
                ..p.clone()
            })
            .collect();
    }

    points
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let (mut start, mut end) = window_indices(points, p.distance_m, window_m);
            if start == end {
                // Window collapsed onto one vertex; use the neighbours instead
                start = i.saturating_sub(1);
                end = (i + 1).min(points.len() - 1);
            }
            let bearing = if start != end {
                initial_bearing(
                    points[start].lat,
                    points[start].lon,
                    points[end].lat,
                    points[end].lon,
                )
            } else {
                0.0
            };
            RoutePoint {
                bearing_deg: Some(bearing),
                ..p.clone()
            }
        })
        .collect()
}

/// Gradient (percent) at each point, measured across a sliding distance window.
pub fn calculate_grades(points: &[RoutePoint], window_m: f64) -> Vec<RoutePoint> {
    points
        .iter()
        .map(|p| {
            let grade = if p.elevation.is_none() || points.len() < 2 {
                0.0
            } else {
                let (start, end) = window_indices(points, p.distance_m, window_m);
                match (points[start].elevation, points[end].elevation) {
                    (Some(ele_start), Some(ele_end)) if start != end => {
                        let run = points[end].distance_m - points[start].distance_m;
                        if run > 0.0 {
                            (ele_end - ele_start) / run * 100.0
                        } else {
                            0.0
                        }
                    }
                    _ => 0.0,
                }
            };
            RoutePoint {
                grade_pct: Some(grade),
                ..p.clone()
            }
        })
        .collect()
}

/// Resample the track at fixed distance intervals.
///
/// Always keeps the first point and always ends on the true last point.
pub fn sample_route(points: &[RoutePoint], interval_km: f64) -> Vec<RoutePoint> {
    if points.len() < 2 {
        return points.to_vec();
    }
    if !interval_km.is_finite() || interval_km <= 0.0 {
        tracing::warn!(
            "Resample interval {} km is not positive, keeping all points",
            interval_km
        );
        return points.to_vec();
    }

    let interval_m = interval_km * 1000.0;
    let total = points[points.len() - 1].distance_m;

    let mut sampled = vec![points[0].clone()];
    let mut step = 1u64;
    loop {
        let target = interval_m * step as f64;
        if target >= total {
            break;
        }
        sampled.push(interpolate_at_distance(points, target));
        step += 1;
    }

    let last = &points[points.len() - 1];
    if sampled.last().map(|p| p.distance_m < last.distance_m).unwrap_or(true) {
        sampled.push(last.clone());
    }
    sampled
}

/// Linearly interpolate a point at `distance` metres along the track.
fn interpolate_at_distance(points: &[RoutePoint], distance: f64) -> RoutePoint {
    if distance <= 0.0 {
        return points[0].clone();
    }
    let last = &points[points.len() - 1];
    if distance >= last.distance_m {
        return last.clone();
    }

    // First index with distance >= target; the segment is (idx-1, idx)
    let idx = points.partition_point(|p| p.distance_m < distance).max(1);
    let p1 = &points[idx - 1];
    let p2 = &points[idx];

    let span = p2.distance_m - p1.distance_m;
    if span <= 0.0 {
        return p1.clone();
    }
    let ratio = (distance - p1.distance_m) / span;

    let elevation = match (p1.elevation, p2.elevation) {
        (Some(a), Some(b)) => Some(a + ratio * (b - a)),
        _ => None,
    };

    let timestamp = match (p1.timestamp, p2.timestamp) {
        (Some(t1), Some(t2)) => {
            let millis = ((t2 - t1).num_milliseconds() as f64 * ratio).round() as i64;
            Some(t1 + Duration::milliseconds(millis))
        }
        (Some(t), None) | (None, Some(t)) => Some(t),
        (None, None) => None,
    };

    RoutePoint {
        lat: p1.lat + ratio * (p2.lat - p1.lat),
        lon: p1.lon + ratio * (p2.lon - p1.lon),
        elevation,
        distance_m: distance,
        bearing_deg: Some(p1.bearing_deg.unwrap_or(0.0)),
        grade_pct: p1.grade_pct,
        timestamp,
    }
}

/// Bounding box `[min_lon, min_lat, max_lon, max_lat]`.
pub fn calculate_bbox(points: &[RoutePoint]) -> Vec<f64> {
    if points.is_empty() {
        return vec![0.0; 4];
    }
    let mut bbox = vec![f64::MAX, f64::MAX, f64::MIN, f64::MIN];
    for p in points {
        bbox[0] = bbox[0].min(p.lon);
        bbox[1] = bbox[1].min(p.lat);
        bbox[2] = bbox[2].max(p.lon);
        bbox[3] = bbox[3].max(p.lat);
    }
    bbox
}

/// Full processing pipeline: parse → smooth → distances → bearings →
/// grades (only with elevation) → resample.
pub fn process_route(
    gpx_xml: &str,
    interval_km: f64,
) -> Result<(Vec<RoutePoint>, RouteMetadata), GpxError> {
    let parsed = parse_gpx(gpx_xml)?;
    tracing::info!("Parsed {} points from GPX", parsed.len());

    let smoothed = smooth_route(&parsed, DEFAULT_SMOOTHING_EPSILON_M);
    tracing::info!("Smoothed to {} points", smoothed.len());

    let with_distances = calculate_distances(&smoothed);
    let mut points = calculate_bearings(&with_distances, DEFAULT_BEARING_WINDOW_M);

    let has_elevation = points.iter().any(|p| p.elevation.is_some());
    if has_elevation {
        points = calculate_grades(&points, DEFAULT_GRADE_WINDOW_M);
    }

    let sampled = sample_route(&points, interval_km);
    tracing::info!("Sampled to {} points", sampled.len());

    let timestamps: Vec<DateTime<Utc>> = points.iter().filter_map(|p| p.timestamp).collect();
    let total_distance_m = points.last().map(|p| p.distance_m).unwrap_or(0.0);

    let metadata = RouteMetadata {
        total_distance_km: total_distance_m / 1000.0,
        bbox: calculate_bbox(&points),
        total_points: points.len(),
        sampled_points: sampled.len(),
        has_elevation,
        has_timestamps: !timestamps.is_empty(),
        timestamp_coverage: timestamps.len() as f64 / points.len() as f64,
        start_time: timestamps.iter().min().copied(),
        end_time: timestamps.iter().max().copied(),
    };

    Ok((sampled, metadata))
}
