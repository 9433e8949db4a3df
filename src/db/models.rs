use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::helpers::{dec_to_f64, opt_dec_to_f64};
use crate::services::gpx::RoutePoint;
use crate::services::wind::AnalysisSummary;

// ---------------------------------------------------------------------------
// Domain records
// ---------------------------------------------------------------------------

/// A stored route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Route {
    pub id: String,
    pub name: Option<String>,
    /// Where the original GPX text is stored
    pub gpx_url: String,
    /// `[min_lon, min_lat, max_lon, max_lat]`
    pub bbox: Vec<f64>,
    pub length_km: f64,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle of an analysis result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Processing,
    Completed,
    Failed,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Processing => "processing",
            ResultStatus::Completed => "completed",
            ResultStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "completed" => ResultStatus::Completed,
            "failed" => ResultStatus::Failed,
            _ => ResultStatus::Processing,
        }
    }
}

/// Header record of one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ForecastResult {
    pub id: Uuid,
    pub route_id: String,
    pub depart_time: DateTime<Utc>,
    pub provider: String,
    pub model_run_id: String,
    pub created_at: DateTime<Utc>,
    pub status: ResultStatus,
}

/// A past analysis with its summary, as listed per route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ResultRecord {
    pub result: ForecastResult,
    pub summary: AnalysisSummary,
}

// ---------------------------------------------------------------------------
// Database rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, FromRow)]
pub struct RouteRow {
    pub id: String,
    pub name: Option<String>,
    pub gpx_url: String,
    pub bbox_min_lon: Decimal,
    pub bbox_min_lat: Decimal,
    pub bbox_max_lon: Decimal,
    pub bbox_max_lat: Decimal,
    pub length_km: Decimal,
    pub created_at: DateTime<Utc>,
}

impl From<RouteRow> for Route {
    fn from(row: RouteRow) -> Self {
        Route {
            id: row.id,
            name: row.name,
            gpx_url: row.gpx_url,
            bbox: vec![
                dec_to_f64(row.bbox_min_lon),
                dec_to_f64(row.bbox_min_lat),
                dec_to_f64(row.bbox_max_lon),
                dec_to_f64(row.bbox_max_lat),
            ],
            length_km: dec_to_f64(row.length_km),
            created_at: row.created_at,
        }
    }
}

/// One resampled point of a route, ordered by `seq`.
#[derive(Debug, Clone, FromRow)]
pub struct RoutePointRow {
    pub seq: i32,
    pub lat: Decimal,
    pub lon: Decimal,
    pub elevation_m: Option<Decimal>,
    pub distance_m: Decimal,
    pub bearing_deg: Option<Decimal>,
    pub grade_pct: Option<Decimal>,
    pub recorded_at: Option<DateTime<Utc>>,
}

impl From<RoutePointRow> for RoutePoint {
    fn from(row: RoutePointRow) -> Self {
        RoutePoint {
            lat: dec_to_f64(row.lat),
            lon: dec_to_f64(row.lon),
            elevation: opt_dec_to_f64(row.elevation_m),
            distance_m: dec_to_f64(row.distance_m),
            bearing_deg: opt_dec_to_f64(row.bearing_deg),
            grade_pct: opt_dec_to_f64(row.grade_pct),
            timestamp: row.recorded_at,
        }
    }
}

/// A result header joined with its summary.
#[derive(Debug, Clone, FromRow)]
pub struct ResultSummaryRow {
    pub id: Uuid,
    pub route_id: String,
    pub depart_time: DateTime<Utc>,
    pub provider: String,
    pub model_run_id: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub head_pct: Decimal,
    pub tail_pct: Decimal,
    pub cross_pct: Decimal,
    pub longest_head_km: Decimal,
}

impl From<ResultSummaryRow> for ResultRecord {
    fn from(row: ResultSummaryRow) -> Self {
        ResultRecord {
            result: ForecastResult {
                id: row.id,
                route_id: row.route_id,
                depart_time: row.depart_time,
                provider: row.provider,
                model_run_id: row.model_run_id,
                created_at: row.created_at,
                status: ResultStatus::parse(&row.status),
            },
            summary: AnalysisSummary {
                head_pct: dec_to_f64(row.head_pct),
                tail_pct: dec_to_f64(row.tail_pct),
                cross_pct: dec_to_f64(row.cross_pct),
                longest_head_km: dec_to_f64(row.longest_head_km),
            },
        }
    }
}
