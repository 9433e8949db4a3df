use sqlx::PgPool;

use super::models::{ForecastResult, ResultRecord, ResultSummaryRow, Route, RoutePointRow, RouteRow};
use crate::helpers::{
    f64_to_decimal_1dp, f64_to_decimal_full, opt_f64_to_decimal_1dp, opt_f64_to_decimal_full,
};
use crate::services::gpx::RoutePoint;
use crate::services::wind::{AnalysisSummary, SegmentWind};

/// Bounding box component `i`, 0 when the box is malformed.
fn bbox_at(route: &Route, i: usize) -> rust_decimal::Decimal {
    f64_to_decimal_full(route.bbox.get(i).copied().unwrap_or(0.0))
}

/// Insert a route and replace its resampled points, in one transaction.
///
/// An existing route row is left untouched (ids are content-derived).
pub async fn insert_route(
    pool: &PgPool,
    route: &Route,
    points: &[RoutePoint],
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO routes (
            id, name, gpx_url, bbox_min_lon, bbox_min_lat, bbox_max_lon, bbox_max_lat,
            length_km, created_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (id) DO NOTHING",
    )
    .bind(&route.id)
    .bind(&route.name)
    .bind(&route.gpx_url)
    .bind(bbox_at(route, 0))
    .bind(bbox_at(route, 1))
    .bind(bbox_at(route, 2))
    .bind(bbox_at(route, 3))
    .bind(f64_to_decimal_full(route.length_km))
    .bind(route.created_at)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM route_points WHERE route_id = $1")
        .bind(&route.id)
        .execute(&mut *tx)
        .await?;

    for (seq, p) in points.iter().enumerate() {
        sqlx::query(
            "INSERT INTO route_points (
                route_id, seq, lat, lon, elevation_m, distance_m, bearing_deg, grade_pct,
                recorded_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(&route.id)
        .bind(seq as i32)
        .bind(f64_to_decimal_full(p.lat))
        .bind(f64_to_decimal_full(p.lon))
        .bind(opt_f64_to_decimal_full(p.elevation))
        .bind(f64_to_decimal_full(p.distance_m))
        .bind(opt_f64_to_decimal_full(p.bearing_deg))
        .bind(opt_f64_to_decimal_full(p.grade_pct))
        .bind(p.timestamp)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await
}

/// Get a single route by ID.
pub async fn get_route(pool: &PgPool, id: &str) -> Result<Option<Route>, sqlx::Error> {
    let row = sqlx::query_as::<_, RouteRow>(
        "SELECT id, name, gpx_url, bbox_min_lon, bbox_min_lat, bbox_max_lon, bbox_max_lat,
                length_km, created_at
         FROM routes WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(Route::from))
}

/// Resampled points for a route, ordered by seq. Empty if the route has none.
pub async fn get_route_points(
    pool: &PgPool,
    route_id: &str,
) -> Result<Vec<RoutePoint>, sqlx::Error> {
    let rows = sqlx::query_as::<_, RoutePointRow>(
        "SELECT seq, lat, lon, elevation_m, distance_m, bearing_deg, grade_pct, recorded_at
         FROM route_points
         WHERE route_id = $1
         ORDER BY seq",
    )
    .bind(route_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(RoutePoint::from).collect())
}

/// Insert a result header with its segments and summary, in one transaction.
pub async fn insert_analysis(
    pool: &PgPool,
    result: &ForecastResult,
    segments: &[SegmentWind],
    summary: &AnalysisSummary,
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO forecast_results (
            id, route_id, depart_time, provider, model_run_id, status, created_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(result.id)
    .bind(&result.route_id)
    .bind(result.depart_time)
    .bind(&result.provider)
    .bind(&result.model_run_id)
    .bind(result.status.as_str())
    .bind(result.created_at)
    .execute(&mut *tx)
    .await?;

    for s in segments {
        sqlx::query(
            "INSERT INTO segment_winds (
                result_id, seq, time_utc, lat, lon, wind_dir_deg10m, wind_ms10m, wind_ms1p5m,
                gust_ms, yaw_deg, wind_class, headwind_ms, crosswind_ms, confidence
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(result.id)
        .bind(s.seq as i32)
        .bind(s.time_utc)
        .bind(f64_to_decimal_full(s.lat))
        .bind(f64_to_decimal_full(s.lon))
        .bind(f64_to_decimal_1dp(s.wind_dir_deg10m))
        .bind(f64_to_decimal_1dp(s.wind_ms10m))
        .bind(f64_to_decimal_1dp(s.wind_ms1p5m))
        .bind(opt_f64_to_decimal_1dp(s.gust_ms))
        .bind(f64_to_decimal_1dp(s.yaw_deg))
        .bind(s.wind_class.as_str())
        .bind(f64_to_decimal_1dp(s.headwind_ms))
        .bind(f64_to_decimal_1dp(s.crosswind_ms))
        .bind(f64_to_decimal_full(s.confidence))
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query(
        "INSERT INTO analysis_summaries (
            result_id, head_pct, tail_pct, cross_pct, longest_head_km
        ) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(result.id)
    .bind(f64_to_decimal_1dp(summary.head_pct))
    .bind(f64_to_decimal_1dp(summary.tail_pct))
    .bind(f64_to_decimal_1dp(summary.cross_pct))
    .bind(f64_to_decimal_1dp(summary.longest_head_km))
    .execute(&mut *tx)
    .await?;

    tx.commit().await
}

/// Most recent results for a route, newest first.
pub async fn get_recent_results(
    pool: &PgPool,
    route_id: &str,
    limit: i64,
) -> Result<Vec<ResultRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ResultSummaryRow>(
        "SELECT r.id, r.route_id, r.depart_time, r.provider, r.model_run_id, r.status,
                r.created_at, s.head_pct, s.tail_pct, s.cross_pct, s.longest_head_km
         FROM forecast_results r
         JOIN analysis_summaries s ON s.result_id = r.id
         WHERE r.route_id = $1
         ORDER BY r.created_at DESC
         LIMIT $2",
    )
    .bind(route_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(ResultRecord::from).collect())
}
