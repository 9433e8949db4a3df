//! Arrival-time estimation.
//!
//! Maps each resampled route point to the time the rider is expected to be
//! there, producing one [`ForecastPoint`] per route point in the same order.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::services::gpx::RoutePoint;

/// Assumed average riding speed when nothing better is known (km/h).
pub const DEFAULT_AVG_SPEED_KMH: f64 = 25.0;

/// A location and the time the rider is expected to reach it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ForecastPoint {
    pub lat: f64,
    pub lon: f64,
    pub time_utc: DateTime<Utc>,
}

/// How arrival times are derived.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimingMode {
    /// Recorded timestamps are the actual times (historical replay).
    Historical,
    /// Recorded timestamps shifted so the first one lands on the departure time.
    GpxOffset,
    /// Departure plus the point's share of a total ride duration (hours).
    EstimatedDuration(f64),
    /// Departure plus distance at [`DEFAULT_AVG_SPEED_KMH`].
    ConstantSpeed,
}

impl TimingMode {
    /// Pick the mode for a request.
    ///
    /// Historical beats offset, offset beats estimated duration, and constant
    /// speed is the default. Both timestamp modes need at least one recorded
    /// timestamp, otherwise they are skipped.
    pub fn select(
        points: &[RoutePoint],
        use_historical_mode: bool,
        use_gpx_timestamps: bool,
        estimated_duration_hours: Option<f64>,
    ) -> Self {
        let has_timestamps = points.iter().any(|p| p.timestamp.is_some());
        if use_historical_mode && has_timestamps {
            TimingMode::Historical
        } else if use_gpx_timestamps && has_timestamps {
            TimingMode::GpxOffset
        } else if let Some(hours) = estimated_duration_hours {
            TimingMode::EstimatedDuration(hours)
        } else {
            TimingMode::ConstantSpeed
        }
    }
}

/// An arrival time fell outside the representable date range.
#[derive(Debug, Error)]
#[error("Arrival time out of range: {hours} h after {start}")]
pub struct TimingError {
    pub start: DateTime<Utc>,
    pub hours: f64,
}

/// `start` plus fractional hours, at millisecond precision.
fn add_hours(start: DateTime<Utc>, h: f64) -> Result<DateTime<Utc>, TimingError> {
    let millis = (h * 3_600_000.0).round();
    let overflow = || TimingError { start, hours: h };
    if !millis.is_finite() || millis.abs() >= i64::MAX as f64 {
        return Err(overflow());
    }
    Duration::try_milliseconds(millis as i64)
        .and_then(|d| start.checked_add_signed(d))
        .ok_or_else(overflow)
}

fn constant_speed_eta(start: DateTime<Utc>, distance_m: f64) -> Result<DateTime<Utc>, TimingError> {
    add_hours(start, distance_m / 1000.0 / DEFAULT_AVG_SPEED_KMH)
}

/// Produce one forecast point per route point under the given mode.
///
/// Fails when any arrival time cannot be represented.
pub fn generate_forecast_points(
    points: &[RoutePoint],
    depart_time: DateTime<Utc>,
    mode: TimingMode,
) -> Result<Vec<ForecastPoint>, TimingError> {
    let timestamped: Vec<(f64, DateTime<Utc>)> = points
        .iter()
        .filter_map(|p| p.timestamp.map(|t| (p.distance_m, t)))
        .collect();
    let gpx_start = timestamped.iter().map(|(_, t)| *t).min();

    let total_m = points.last().map(|p| p.distance_m).unwrap_or(0.0);

    points
        .iter()
        .map(|p| -> Result<ForecastPoint, TimingError> {
            let time_utc = match mode {
                TimingMode::Historical => match p.timestamp {
                    Some(t) => t,
                    None => match reconstruct_timestamp(&timestamped, p.distance_m) {
                        Some(t) => t,
                        None => constant_speed_eta(gpx_start.unwrap_or(depart_time), p.distance_m)?,
                    },
                },
                TimingMode::GpxOffset => match (p.timestamp, gpx_start) {
                    (Some(t), Some(start)) => {
                        let shift = depart_time - start;
                        t.checked_add_signed(shift).ok_or(TimingError {
                            start: t,
                            hours: shift.num_milliseconds() as f64 / 3_600_000.0,
                        })?
                    }
                    _ => constant_speed_eta(depart_time, p.distance_m)?,
                },
                TimingMode::EstimatedDuration(duration_h) => {
                    let ratio = if total_m > 0.0 {
                        p.distance_m / total_m
                    } else {
                        0.0
                    };
                    add_hours(depart_time, ratio * duration_h)?
                }
                TimingMode::ConstantSpeed => constant_speed_eta(depart_time, p.distance_m)?,
            };
            Ok(ForecastPoint {
                lat: p.lat,
                lon: p.lon,
                time_utc,
            })
        })
        .collect()
}

/// Fill a missing timestamp from the nearest timestamped neighbours by distance.
///
/// `timestamped` is ordered by distance. Interpolates linearly between the
/// last point at or before `distance_m` and the first point after it; with
/// only one side available that side's time is reused.
fn reconstruct_timestamp(
    timestamped: &[(f64, DateTime<Utc>)],
    distance_m: f64,
) -> Option<DateTime<Utc>> {
    let before = timestamped
        .iter()
        .take_while(|(d, _)| *d <= distance_m)
        .last();
    let after = timestamped.iter().find(|(d, _)| *d > distance_m);

    match (before, after) {
        (Some(&(d0, t0)), Some(&(d1, t1))) => {
            let ratio = (distance_m - d0) / (d1 - d0);
            let millis = ((t1 - t0).num_milliseconds() as f64 * ratio).round() as i64;
            Some(t0 + Duration::milliseconds(millis))
        }
        (Some(&(_, t)), None) | (None, Some(&(_, t))) => Some(t),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> DateTime<Utc> {
        s.parse::<DateTime<Utc>>().unwrap()
    }

    fn point(distance_m: f64, timestamp: Option<&str>) -> RoutePoint {
        RoutePoint {
            distance_m,
            timestamp: timestamp.map(t),
            ..RoutePoint::new(53.4, -1.5)
        }
    }

    #[test]
    fn test_constant_speed() {
        let points = vec![point(0.0, None), point(10_000.0, None), point(25_000.0, None)];
        let depart = t("2024-05-01T08:00:00Z");
        let fps = generate_forecast_points(&points, depart, TimingMode::ConstantSpeed).unwrap();
        assert_eq!(fps.len(), 3);
        assert_eq!(fps[0].time_utc, depart);
        assert_eq!(fps[1].time_utc, t("2024-05-01T08:24:00Z"));
        assert_eq!(fps[2].time_utc, t("2024-05-01T09:00:00Z"));
        assert_eq!(fps[1].lat, 53.4);
    }

    #[test]
    fn test_estimated_duration_distributes_by_distance() {
        let points = vec![point(0.0, None), point(5_000.0, None), point(20_000.0, None)];
        let depart = t("2024-05-01T08:00:00Z");
        let fps =
            generate_forecast_points(&points, depart, TimingMode::EstimatedDuration(2.0)).unwrap();
        assert_eq!(fps[1].time_utc, t("2024-05-01T08:30:00Z"));
        assert_eq!(fps[2].time_utc, t("2024-05-01T10:00:00Z"));
    }

    #[test]
    fn test_estimated_duration_zero_length_route() {
        let points = vec![point(0.0, None)];
        let depart = t("2024-05-01T08:00:00Z");
        let fps =
            generate_forecast_points(&points, depart, TimingMode::EstimatedDuration(3.0)).unwrap();
        assert_eq!(fps[0].time_utc, depart);
    }

    #[test]
    fn test_gpx_offset_shifts_to_departure() {
        let points = vec![
            point(0.0, Some("2023-06-10T06:00:00Z")),
            point(10_000.0, Some("2023-06-10T06:40:00Z")),
            point(20_000.0, None),
        ];
        let depart = t("2024-05-01T08:00:00Z");
        let fps = generate_forecast_points(&points, depart, TimingMode::GpxOffset).unwrap();
        assert_eq!(fps[0].time_utc, depart);
        assert_eq!(fps[1].time_utc, t("2024-05-01T08:40:00Z"));
        // Untimestamped points fall back to constant speed from departure
        assert_eq!(fps[2].time_utc, t("2024-05-01T08:48:00Z"));
    }

    #[test]
    fn test_historical_uses_and_fills_timestamps() {
        let points = vec![
            point(0.0, Some("2023-06-10T06:00:00Z")),
            point(5_000.0, None),
            point(10_000.0, Some("2023-06-10T07:00:00Z")),
            point(15_000.0, None),
        ];
        let depart = t("2024-05-01T08:00:00Z");
        let fps = generate_forecast_points(&points, depart, TimingMode::Historical).unwrap();
        assert_eq!(fps[0].time_utc, t("2023-06-10T06:00:00Z"));
        assert_eq!(fps[1].time_utc, t("2023-06-10T06:30:00Z"));
        assert_eq!(fps[2].time_utc, t("2023-06-10T07:00:00Z"));
        // Only a preceding timestamp exists; it is reused
        assert_eq!(fps[3].time_utc, t("2023-06-10T07:00:00Z"));
    }

    #[test]
    fn test_historical_leading_gap_uses_following_timestamp() {
        let points = vec![point(0.0, None), point(1_000.0, Some("2023-06-10T06:05:00Z"))];
        let fps = generate_forecast_points(
            &points,
            t("2024-05-01T08:00:00Z"),
            TimingMode::Historical,
        )
        .unwrap();
        assert_eq!(fps[0].time_utc, t("2023-06-10T06:05:00Z"));
    }

    #[test]
    fn test_mode_precedence() {
        let timed = vec![point(0.0, Some("2023-06-10T06:00:00Z"))];
        let untimed = vec![point(0.0, None)];

        assert_eq!(
            TimingMode::select(&timed, true, true, Some(2.0)),
            TimingMode::Historical
        );
        assert_eq!(
            TimingMode::select(&timed, false, true, Some(2.0)),
            TimingMode::GpxOffset
        );
        assert_eq!(
            TimingMode::select(&untimed, true, true, Some(2.0)),
            TimingMode::EstimatedDuration(2.0)
        );
        assert_eq!(
            TimingMode::select(&untimed, true, true, None),
            TimingMode::ConstantSpeed
        );
    }

    #[test]
    fn test_out_of_range_arrival_is_an_error() {
        let points = vec![point(0.0, None), point(10_000.0, None)];
        let depart = t("2024-05-01T08:00:00Z");

        let err = generate_forecast_points(&points, depart, TimingMode::EstimatedDuration(1e12))
            .unwrap_err();
        assert_eq!(err.start, depart);
        assert_eq!(err.hours, 1e12);

        assert!(
            generate_forecast_points(&points, depart, TimingMode::EstimatedDuration(1e300))
                .is_err()
        );
    }
}
