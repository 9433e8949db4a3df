use axum::extract::State;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use super::AppState;
use crate::services::analyze::DEFAULT_PROVIDER;

/// Response type for GET /api/v1/providers.
#[derive(Debug, Serialize, ToSchema)]
pub struct ProvidersResponse {
    /// Registered wind data providers, sorted by name
    pub providers: Vec<String>,
    /// Provider used when a request names none
    pub default: String,
}

/// List the wind data providers an analysis can use.
#[utoipa::path(
    get,
    path = "/api/v1/providers",
    tag = "Analysis",
    responses(
        (status = 200, description = "Available providers", body = ProvidersResponse),
    )
)]
pub async fn list_providers(State(state): State<AppState>) -> Json<ProvidersResponse> {
    Json(ProvidersResponse {
        providers: state.service.providers().list(),
        default: DEFAULT_PROVIDER.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_state;

    #[tokio::test]
    async fn test_lists_registered_providers() {
        let Json(resp) = list_providers(State(test_state())).await;
        assert_eq!(resp.providers, vec!["synthetic".to_string()]);
        assert_eq!(resp.default, "open-meteo");
    }
}
