//! Route endpoints:
//! - POST /api/v1/routes?name=
//! - GET /api/v1/routes/:id
//! - GET /api/v1/routes/:id/gpx
//! - GET /api/v1/routes/:id/results?limit=

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::AppState;
use crate::db::models::{ResultRecord, Route};
use crate::errors::{AppError, ErrorResponse};

/// Default number of results listed per route.
const DEFAULT_RESULTS_LIMIT: i64 = 10;
/// Maximum allowed value for the `limit` query parameter.
const MAX_RESULTS_LIMIT: i64 = 100;

#[derive(Debug, Deserialize, IntoParams)]
pub struct CreateRouteQuery {
    /// Optional display name for the route
    pub name: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ResultsQuery {
    /// Number of results to return (1-100, default 10)
    pub limit: Option<i64>,
}

/// Size and extent of an uploaded route.
#[derive(Debug, Serialize, ToSchema)]
pub struct RouteMetadataResponse {
    /// Total route length in kilometres
    pub length_km: f64,
    /// `[min_lon, min_lat, max_lon, max_lat]`
    pub bbox: Vec<f64>,
}

/// Response type for POST /api/v1/routes.
#[derive(Debug, Serialize, ToSchema)]
pub struct CreateRouteResponse {
    /// Content-derived route id; uploading the same GPX returns the same id
    pub route_id: String,
    pub message: String,
    pub metadata: RouteMetadataResponse,
}

/// Upload a GPX track and register it as a route.
///
/// The request body is the raw GPX document. Uploading an identical
/// document again returns the existing route with status 200.
#[utoipa::path(
    post,
    path = "/api/v1/routes",
    tag = "Routes",
    params(CreateRouteQuery),
    request_body(
        content = String,
        content_type = "application/gpx+xml",
        description = "GPX 1.1 document"
    ),
    responses(
        (status = 201, description = "Route created", body = CreateRouteResponse),
        (status = 200, description = "Route already existed", body = CreateRouteResponse),
        (status = 400, description = "Invalid GPX", body = ErrorResponse),
    )
)]
pub async fn create_route(
    State(state): State<AppState>,
    Query(params): Query<CreateRouteQuery>,
    body: String,
) -> Result<(StatusCode, Json<CreateRouteResponse>), AppError> {
    if body.trim().is_empty() {
        return Err(AppError::BadRequest("Request body must be a GPX document".to_string()));
    }

    let name = params.name.filter(|n| !n.trim().is_empty());
    let (route, created) = state.service.create_route(&body, name).await?;

    let (status, message) = if created {
        (StatusCode::CREATED, "Route created")
    } else {
        (StatusCode::OK, "Route already exists")
    };
    Ok((
        status,
        Json(CreateRouteResponse {
            route_id: route.id,
            message: message.to_string(),
            metadata: RouteMetadataResponse {
                length_km: route.length_km,
                bbox: route.bbox,
            },
        }),
    ))
}

/// Get route metadata.
#[utoipa::path(
    get,
    path = "/api/v1/routes/{id}",
    tag = "Routes",
    params(
        ("id" = String, Path, description = "Route id"),
    ),
    responses(
        (status = 200, description = "Route metadata", body = Route),
        (status = 404, description = "Route not found", body = ErrorResponse),
    )
)]
pub async fn get_route(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Route>, AppError> {
    let route = state
        .service
        .get_route(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Route {} not found", id)))?;
    Ok(Json(route))
}

/// Download the GPX document a route was created from.
#[utoipa::path(
    get,
    path = "/api/v1/routes/{id}/gpx",
    tag = "Routes",
    params(
        ("id" = String, Path, description = "Route id"),
    ),
    responses(
        (status = 200, description = "Original GPX document", body = String,
         content_type = "application/gpx+xml"),
        (status = 404, description = "Route not found", body = ErrorResponse),
    )
)]
pub async fn get_route_gpx(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<([(header::HeaderName, &'static str); 1], String), AppError> {
    let gpx = state
        .service
        .get_route_gpx(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Route {} not found", id)))?;
    Ok(([(header::CONTENT_TYPE, "application/gpx+xml")], gpx))
}

/// List recent analyses of a route, newest first.
#[utoipa::path(
    get,
    path = "/api/v1/routes/{id}/results",
    tag = "Routes",
    params(
        ("id" = String, Path, description = "Route id"),
        ResultsQuery,
    ),
    responses(
        (status = 200, description = "Recent analyses with summaries", body = Vec<ResultRecord>),
        (status = 400, description = "Invalid limit", body = ErrorResponse),
    )
)]
pub async fn get_route_results(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<ResultsQuery>,
) -> Result<Json<Vec<ResultRecord>>, AppError> {
    let limit = params.limit.unwrap_or(DEFAULT_RESULTS_LIMIT);
    if !(1..=MAX_RESULTS_LIMIT).contains(&limit) {
        return Err(AppError::BadRequest(format!(
            "limit must be between 1 and {}, got {}",
            MAX_RESULTS_LIMIT, limit
        )));
    }
    Ok(Json(state.service.recent_results(&id, limit).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_state;

    const GPX: &str = r#"<?xml version="1.0"?>
<gpx version="1.1" creator="test"><trk><trkseg>
  <trkpt lat="53.443" lon="-1.949"/>
  <trkpt lat="53.430" lon="-1.850"/>
  <trkpt lat="53.381" lon="-1.470"/>
</trkseg></trk></gpx>"#;

    fn no_name() -> Query<CreateRouteQuery> {
        Query(CreateRouteQuery { name: None })
    }

    #[tokio::test]
    async fn test_create_then_fetch_route() {
        let state = test_state();

        let (status, Json(created)) = create_route(
            State(state.clone()),
            Query(CreateRouteQuery {
                name: Some("Snake Pass".to_string()),
            }),
            GPX.to_string(),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created.metadata.bbox.len(), 4);
        assert!(created.metadata.length_km > 30.0);

        let (status, Json(again)) = create_route(State(state.clone()), no_name(), GPX.to_string())
            .await
            .unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(again.route_id, created.route_id);

        let Json(route) = get_route(State(state.clone()), Path(created.route_id.clone()))
            .await
            .unwrap();
        assert_eq!(route.name.as_deref(), Some("Snake Pass"));

        let (_, body) = get_route_gpx(State(state), Path(created.route_id))
            .await
            .unwrap();
        assert_eq!(body, GPX);
    }

    #[tokio::test]
    async fn test_invalid_gpx_is_bad_request() {
        let err = create_route(State(test_state()), no_name(), "<gpx/>".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        let err = create_route(State(test_state()), no_name(), "  ".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let err = get_route(State(test_state()), Path("nope".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let err = get_route_gpx(State(test_state()), Path("nope".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_gpx_for_path_like_id_is_not_found() {
        for id in ["..", "a/../..", "."] {
            let err = get_route_gpx(State(test_state()), Path(id.to_string()))
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::NotFound(_)), "id {:?}", id);
        }
    }

    #[tokio::test]
    async fn test_results_limit_bounds() {
        let state = test_state();
        for bad in [0, 101, -3] {
            let err = get_route_results(
                State(state.clone()),
                Path("r".to_string()),
                Query(ResultsQuery { limit: Some(bad) }),
            )
            .await
            .unwrap_err();
            assert!(matches!(err, AppError::BadRequest(_)));
        }

        let Json(results) = get_route_results(
            State(state),
            Path("r".to_string()),
            Query(ResultsQuery { limit: None }),
        )
        .await
        .unwrap();
        assert!(results.is_empty());
    }
}
