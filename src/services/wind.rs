//! Wind reduction: from raw u/v samples to rider-relevant segments.
//!
//! Everything here is pure. The orchestrator hands in route points, their
//! arrival times and the fetched samples, and gets segments plus a summary
//! back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;

use crate::config::WindMatching;
use crate::services::gpx::{normalize_deg, RoutePoint};
use crate::services::provider::{WindMeta, WindSample};
use crate::services::timing::ForecastPoint;

/// von Kármán constant.
const VON_KARMAN: f64 = 0.41;

/// Height of the provider's reference wind (m).
const REFERENCE_HEIGHT_M: f64 = 10.0;

/// Samples further than this from the arrival time are not used.
const MATCH_WINDOW_SECS: i64 = 3600;

/// Half-width of the lat/lon box used when matching samples to a point (degrees).
const MATCH_BOX_DEG: f64 = 0.1;

/// Positions closer than this are treated as the same location (degrees).
const EXACT_MATCH_DEG: f64 = 1e-6;

/// Route length each segment stands for when measuring headwind runs (km).
const SEGMENT_LENGTH_KM: f64 = 1.0;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Wind relative to the direction of travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum WindClass {
    Head,
    Cross,
    Tail,
}

impl WindClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            WindClass::Head => "HEAD",
            WindClass::Cross => "CROSS",
            WindClass::Tail => "TAIL",
        }
    }
}

/// Wind conditions at one resampled route point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SegmentWind {
    /// Index of the route point this segment belongs to
    pub seq: u32,
    pub time_utc: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    /// Direction the wind blows from at 10 m, `[0, 360)`
    pub wind_dir_deg10m: f64,
    pub wind_ms10m: f64,
    /// Wind speed downscaled to rider height
    pub wind_ms1p5m: f64,
    pub gust_ms: Option<f64>,
    /// Angle between heading and the wind's direction of travel, `[0, 180]`
    pub yaw_deg: f64,
    pub wind_class: WindClass,
    /// Along-track component at rider height, positive against the rider
    pub headwind_ms: f64,
    /// Absolute side-on component at rider height
    pub crosswind_ms: f64,
    pub confidence: f64,
}

/// Route-wide breakdown of the segments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AnalysisSummary {
    pub head_pct: f64,
    pub tail_pct: f64,
    pub cross_pct: f64,
    pub longest_head_km: f64,
}

// ---------------------------------------------------------------------------
// Vector conversions
// ---------------------------------------------------------------------------

/// Convert eastward/northward components to `(speed, from_direction)`.
pub fn speed_direction(u_ms: f64, v_ms: f64) -> (f64, f64) {
    let speed = (u_ms * u_ms + v_ms * v_ms).sqrt();
    let direction = normalize_deg((-u_ms).atan2(-v_ms).to_degrees() + 360.0);
    (speed, direction)
}

/// Inverse of [`speed_direction`]: `(u, v)` for a wind blowing from `from_deg`.
pub fn uv_from_speed_direction(speed_ms: f64, from_deg: f64) -> (f64, f64) {
    let rad = from_deg.to_radians();
    (-speed_ms * rad.sin(), -speed_ms * rad.cos())
}

// ---------------------------------------------------------------------------
// Scalar reductions
// ---------------------------------------------------------------------------

/// Logarithmic wind profile from 10 m down to `target_height_m`.
pub fn downscale(wind_10m: f64, target_height_m: f64, roughness_length_m: f64) -> f64 {
    if target_height_m >= REFERENCE_HEIGHT_M {
        return wind_10m;
    }
    let friction_velocity = wind_10m * VON_KARMAN / (REFERENCE_HEIGHT_M / roughness_length_m).ln();
    let wind_target = friction_velocity / VON_KARMAN * (target_height_m / roughness_length_m).ln();
    wind_target.max(0.0)
}

/// Angle between the route heading and the direction the wind travels to.
pub fn yaw(route_bearing_deg: f64, wind_from_deg: f64) -> f64 {
    let wind_to = (wind_from_deg + 180.0).rem_euclid(360.0);
    let diff = (route_bearing_deg - wind_to).abs().rem_euclid(360.0);
    if diff > 180.0 {
        360.0 - diff
    } else {
        diff
    }
}

/// Hard thresholds; 60 and 120 themselves are crosswind.
pub fn classify(yaw_deg: f64) -> WindClass {
    if yaw_deg > 120.0 {
        WindClass::Head
    } else if yaw_deg < 60.0 {
        WindClass::Tail
    } else {
        WindClass::Cross
    }
}

/// Signed along-track component; positive is a headwind.
pub fn headwind_component(speed_ms: f64, yaw_deg: f64) -> f64 {
    -speed_ms * yaw_deg.to_radians().cos()
}

pub fn crosswind_component(speed_ms: f64, yaw_deg: f64) -> f64 {
    (speed_ms * yaw_deg.to_radians().sin()).abs()
}

/// Confidence in `[0, 1]`, only ever reduced by gustiness, rough terrain and
/// interpolation.
pub fn confidence(sample: &WindSample, gust_factor: Option<f64>, terrain_roughness: f64) -> f64 {
    let mut confidence = 1.0;

    if let Some(gf) = gust_factor.filter(|gf| *gf > 1.5) {
        confidence *= (1.0 - (gf - 1.5) * 0.2).max(0.5);
    }
    if terrain_roughness > 0.5 {
        confidence *= (1.0 - (terrain_roughness - 0.5) * 0.4).max(0.6);
    }
    if sample.meta.interpolated {
        confidence *= 0.9;
    }

    f64::clamp(confidence, 0.0, 1.0)
}

// ---------------------------------------------------------------------------
// Interpolation
// ---------------------------------------------------------------------------

fn within_window(sample: &WindSample, target_time: DateTime<Utc>) -> bool {
    (sample.valid_from - target_time).num_seconds().abs() <= MATCH_WINDOW_SECS
}

fn degree_distance(sample: &WindSample, lat: f64, lon: f64) -> f64 {
    ((sample.meta.lat - lat).powi(2) + (sample.meta.lon - lon).powi(2)).sqrt()
}

/// Inverse-distance-squared weighting of the samples within an hour of
/// `target_time`. An exact positional match is returned verbatim.
pub fn spatial_interpolate(
    samples: &[WindSample],
    target_lat: f64,
    target_lon: f64,
    target_time: DateTime<Utc>,
) -> Option<WindSample> {
    let candidates: Vec<&WindSample> = samples
        .iter()
        .filter(|s| within_window(s, target_time))
        .collect();

    match candidates.as_slice() {
        [] => return None,
        [only] => return Some((*only).clone()),
        _ => {}
    }

    let mut weights = Vec::with_capacity(candidates.len());
    for sample in &candidates {
        let distance = degree_distance(sample, target_lat, target_lon);
        if distance < EXACT_MATCH_DEG {
            return Some((*sample).clone());
        }
        weights.push(1.0 / (distance * distance));
    }

    let total: f64 = weights.iter().sum();
    if !(total > 0.0) || !total.is_finite() {
        return None;
    }

    let u = candidates.iter().zip(&weights).map(|(s, w)| s.u_ms * w).sum::<f64>() / total;
    let v = candidates.iter().zip(&weights).map(|(s, w)| s.v_ms * w).sum::<f64>() / total;

    let closest = candidates
        .iter()
        .zip(&weights)
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(s, _)| *s)?;

    Some(WindSample {
        u_ms: u,
        v_ms: v,
        height_m: closest.height_m,
        model_run_id: closest.model_run_id.clone(),
        source: closest.source.clone(),
        valid_from: target_time,
        valid_to: target_time,
        meta: WindMeta {
            lat: target_lat,
            lon: target_lon,
            gust_ms: closest.meta.gust_ms,
            interpolated: true,
        },
    })
}

/// Linear interpolation in time between the samples bracketing `target_time`.
///
/// With only a later sample the earliest sample is returned, with only an
/// earlier one that sample is returned, both unchanged.
pub fn temporal_interpolate(
    samples: &[WindSample],
    target_time: DateTime<Utc>,
) -> Option<WindSample> {
    let mut sorted: Vec<&WindSample> = samples.iter().collect();
    sorted.sort_by_key(|s| s.valid_from);

    let before = sorted.iter().rev().find(|s| s.valid_from <= target_time);
    let after = sorted.iter().find(|s| s.valid_from > target_time);

    let (before, after) = match (before, after) {
        (None, _) => return sorted.first().map(|s| (*s).clone()),
        (Some(b), None) => return Some((*b).clone()),
        (Some(b), Some(a)) => (*b, *a),
    };

    let span = (after.valid_from - before.valid_from).num_milliseconds();
    if span == 0 {
        return Some(before.clone());
    }
    let ratio = (target_time - before.valid_from).num_milliseconds() as f64 / span as f64;

    let gust_ms = match (before.meta.gust_ms, after.meta.gust_ms) {
        (Some(g0), Some(g1)) => Some(g0 + ratio * (g1 - g0)),
        (g0, g1) => g0.or(g1),
    };

    Some(WindSample {
        u_ms: before.u_ms + ratio * (after.u_ms - before.u_ms),
        v_ms: before.v_ms + ratio * (after.v_ms - before.v_ms),
        height_m: before.height_m,
        model_run_id: before.model_run_id.clone(),
        source: before.source.clone(),
        valid_from: target_time,
        valid_to: target_time,
        meta: WindMeta {
            gust_ms,
            interpolated: true,
            ..before.meta.clone()
        },
    })
}

// ---------------------------------------------------------------------------
// Reducer
// ---------------------------------------------------------------------------

/// Matches samples to route points and reduces each match to a segment.
#[derive(Debug, Clone)]
pub struct WindReducer {
    pub rider_height_m: f64,
    pub roughness_length_m: f64,
    pub matching: WindMatching,
}

impl WindReducer {
    pub fn new(rider_height_m: f64, roughness_length_m: f64, matching: WindMatching) -> Self {
        Self {
            rider_height_m,
            roughness_length_m,
            matching,
        }
    }

    /// One segment per route point that has a matching sample, in route order.
    /// Points with no match are skipped.
    pub fn reduce(
        &self,
        route_points: &[RoutePoint],
        forecast_points: &[ForecastPoint],
        samples: &[WindSample],
    ) -> Vec<SegmentWind> {
        route_points
            .iter()
            .zip(forecast_points)
            .enumerate()
            .filter_map(|(seq, (point, fp))| {
                let sample = self.match_sample(point, fp.time_utc, samples)?;
                Some(self.segment(seq as u32, point, fp.time_utc, &sample))
            })
            .collect()
    }

    fn match_sample(
        &self,
        point: &RoutePoint,
        time_utc: DateTime<Utc>,
        samples: &[WindSample],
    ) -> Option<WindSample> {
        let mut candidates = samples.iter().filter(|s| {
            within_window(s, time_utc)
                && (s.meta.lat - point.lat).abs() < MATCH_BOX_DEG
                && (s.meta.lon - point.lon).abs() < MATCH_BOX_DEG
        });

        match self.matching {
            WindMatching::First => candidates.next().cloned(),
            WindMatching::Interpolated => {
                // Group by sample location, bring each location to the arrival
                // time, then blend the locations
                let mut by_location: HashMap<(i64, i64), Vec<WindSample>> = HashMap::new();
                for s in candidates {
                    let key = (
                        (s.meta.lat * 1e4).round() as i64,
                        (s.meta.lon * 1e4).round() as i64,
                    );
                    by_location.entry(key).or_default().push(s.clone());
                }
                let per_location: Vec<WindSample> = by_location
                    .values()
                    .filter_map(|group| temporal_interpolate(group, time_utc))
                    .collect();
                spatial_interpolate(&per_location, point.lat, point.lon, time_utc)
            }
        }
    }

    fn segment(
        &self,
        seq: u32,
        point: &RoutePoint,
        time_utc: DateTime<Utc>,
        sample: &WindSample,
    ) -> SegmentWind {
        let (wind_ms10m, wind_dir_deg10m) = speed_direction(sample.u_ms, sample.v_ms);
        let wind_ms1p5m = downscale(wind_ms10m, self.rider_height_m, self.roughness_length_m);
        let yaw_deg = yaw(point.bearing_deg.unwrap_or(0.0), wind_dir_deg10m);

        let gust_factor = sample
            .meta
            .gust_ms
            .filter(|_| wind_ms10m > 0.0)
            .map(|g| g / wind_ms10m);

        SegmentWind {
            seq,
            time_utc,
            lat: point.lat,
            lon: point.lon,
            wind_dir_deg10m,
            wind_ms10m,
            wind_ms1p5m,
            gust_ms: sample.meta.gust_ms,
            yaw_deg,
            wind_class: classify(yaw_deg),
            headwind_ms: headwind_component(wind_ms1p5m, yaw_deg),
            crosswind_ms: crosswind_component(wind_ms1p5m, yaw_deg),
            confidence: confidence(sample, gust_factor, self.roughness_length_m),
        }
    }
}

/// Percentages per class and the longest unbroken headwind stretch.
pub fn summarize(segments: &[SegmentWind]) -> AnalysisSummary {
    if segments.is_empty() {
        return AnalysisSummary {
            head_pct: 0.0,
            tail_pct: 0.0,
            cross_pct: 0.0,
            longest_head_km: 0.0,
        };
    }

    let total = segments.len() as f64;
    let pct = |class: WindClass| {
        segments.iter().filter(|s| s.wind_class == class).count() as f64 / total * 100.0
    };

    let mut longest = 0usize;
    let mut run = 0usize;
    for s in segments {
        if s.wind_class == WindClass::Head {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }

    AnalysisSummary {
        head_pct: pct(WindClass::Head),
        tail_pct: pct(WindClass::Tail),
        cross_pct: pct(WindClass::Cross),
        longest_head_km: longest as f64 * SEGMENT_LENGTH_KM,
    }
}
