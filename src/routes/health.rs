use axum::extract::State;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use super::AppState;

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Service status ("ok" when healthy, "degraded" when storage is unreachable)
    pub status: String,
    /// API version
    pub version: String,
    /// Whether the route store is reachable
    pub database: bool,
    /// Route store backend ("postgres" or "memory")
    pub storage: String,
    /// Analyses currently held in the result cache
    pub cached_analyses: usize,
}

/// Health check endpoint.
///
/// Pings the route store. Returns status "degraded" (still 200) if it is
/// unreachable, so load balancers can distinguish partial failures.
#[utoipa::path(
    get,
    path = "/api/v1/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
    )
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let store = state.service.store();
    let db_ok = store.ping().await.is_ok();

    Json(HealthResponse {
        status: if db_ok {
            "ok".to_string()
        } else {
            "degraded".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: db_ok,
        storage: store.backend().to_string(),
        cached_analyses: state.service.cached_analyses().await,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_state;

    #[tokio::test]
    async fn test_health_on_memory_store() {
        let Json(health) = health_check(State(test_state())).await;
        assert_eq!(health.status, "ok");
        assert!(health.database);
        assert_eq!(health.storage, "memory");
        assert_eq!(health.cached_analyses, 0);
        assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
    }
}
