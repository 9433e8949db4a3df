//! GET /api/v1/analyze, streamed as server-sent events.
//!
//! The stream opens with an `accepted` event echoing the request, followed by
//! `progress` events and exactly one terminal `complete` or `error` event.
//! Closing the connection cancels the analysis at its next stage.

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::AppState;
use crate::errors::{AppError, ErrorResponse};
use crate::services::analyze::{
    AnalysisEvent, AnalysisPayload, AnalysisRequest, DEFAULT_PROVIDER,
};

const DEFAULT_SPEED_PROFILE: &str = "preset";

/// Longest ride duration accepted for distance-proportional timing.
const MAX_ESTIMATED_DURATION_HOURS: f64 = 240.0;

#[derive(Debug, Deserialize, IntoParams)]
pub struct AnalyzeQuery {
    /// Route id returned by route upload, or `demo-glossop-sheffield`
    pub route_id: String,
    /// Departure time in ISO 8601 format (e.g. "2024-05-01T08:00:00Z")
    pub depart: String,
    /// Wind data provider (default "open-meteo")
    pub provider: Option<String>,
    /// Pacing preset name (default "preset")
    pub speed_profile: Option<String>,
    /// Shift the track's recorded timestamps to the departure time
    pub use_gpx_timestamps: Option<bool>,
    /// Spread this many hours across the route by distance
    pub estimated_duration_hours: Option<f64>,
    /// Replay recorded timestamps against historical wind
    pub use_historical_mode: Option<bool>,
}

/// First event of every analysis stream.
#[derive(Debug, Serialize, ToSchema)]
pub struct AcceptedEvent {
    pub route_id: String,
    pub depart_time: DateTime<Utc>,
    pub provider: String,
}

/// Validate query parameters into an analysis request.
fn build_request(params: AnalyzeQuery) -> Result<AnalysisRequest, AppError> {
    let depart_time: DateTime<Utc> = params
        .depart
        .parse()
        .map_err(|e| AppError::BadRequest(format!("Invalid depart time: {}", e)))?;

    if let Some(hours) = params.estimated_duration_hours {
        // NaN passes range comparisons
        if !hours.is_finite() || hours <= 0.0 || hours > MAX_ESTIMATED_DURATION_HOURS {
            return Err(AppError::BadRequest(format!(
                "estimated_duration_hours must be between 0 and {}, got {}",
                MAX_ESTIMATED_DURATION_HOURS, hours
            )));
        }
    }

    if params.route_id.trim().is_empty() {
        return Err(AppError::BadRequest("route_id must not be empty".to_string()));
    }

    Ok(AnalysisRequest {
        route_id: params.route_id,
        depart_time,
        provider: params
            .provider
            .unwrap_or_else(|| DEFAULT_PROVIDER.to_string()),
        speed_profile: params
            .speed_profile
            .unwrap_or_else(|| DEFAULT_SPEED_PROFILE.to_string()),
        use_gpx_timestamps: params.use_gpx_timestamps.unwrap_or(false),
        estimated_duration_hours: params.estimated_duration_hours,
        use_historical_mode: params.use_historical_mode.unwrap_or(false),
    })
}

fn sse_event(event: AnalysisEvent) -> Result<Event, axum::Error> {
    let sse = Event::default().event(event.name());
    match event {
        AnalysisEvent::Progress(update) => sse.json_data(update),
        AnalysisEvent::Complete(payload) => sse.json_data(payload),
        AnalysisEvent::Error(failure) => sse.json_data(failure),
    }
}

/// Analyse a route's wind exposure for a departure time.
///
/// Streams `accepted`, then `progress` events per stage, then `complete`
/// with the full result or `error` with `{error, message}`. Repeating a
/// request for the same route, provider and departure hour is served from
/// cache.
#[utoipa::path(
    get,
    path = "/api/v1/analyze",
    tag = "Analysis",
    params(AnalyzeQuery),
    responses(
        (status = 200, description = "Event stream of progress and the final analysis",
         body = AnalysisPayload, content_type = "text/event-stream"),
        (status = 400, description = "Invalid query parameters", body = ErrorResponse),
    )
)]
pub async fn analyze_route(
    State(state): State<AppState>,
    Query(params): Query<AnalyzeQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, AppError> {
    let request = build_request(params)?;
    tracing::info!(
        "Analysis requested for route {} departing {} via {}",
        request.route_id,
        request.depart_time,
        request.provider
    );

    let accepted = Event::default().event("accepted").json_data(AcceptedEvent {
        route_id: request.route_id.clone(),
        depart_time: request.depart_time,
        provider: request.provider.clone(),
    });

    let rx = state.service.analyze_route_stream(request);
    let events = stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (sse_event(event), rx))
    });

    Ok(Sse::new(stream::once(async move { accepted }).chain(events))
        .keep_alive(KeepAlive::default()))
}
