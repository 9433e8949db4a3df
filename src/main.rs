// Against the Wind API v0.1
use axum::{
    routing::{get, post},
    Router,
};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod config;
mod db;
mod errors;
mod helpers;
mod routes;
mod services;

use config::AppConfig;
use db::store::{MemoryRouteStore, PgRouteStore, RouteStore};
use routes::AppState;
use services::analyze::AnalysisService;
use services::blob::LocalBlobStore;
use services::open_meteo::OpenMeteoClient;
use services::provider::ProviderRegistry;

/// Maximum number of connections in the database pool.
const DB_POOL_MAX_CONNECTIONS: u32 = 5;
/// Minimum number of connections kept alive in the database pool.
const DB_POOL_MIN_CONNECTIONS: u32 = 2;

/// OpenAPI document for the Against the Wind API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Against the Wind API",
        version = "0.1.0",
        description = "Wind exposure analysis for cycling routes. \
            Upload a GPX track, pick a departure time, and get per-kilometre \
            headwind, tailwind and crosswind estimates from forecast or \
            historical wind data, streamed as server-sent events.",
        license(name = "MIT"),
    ),
    tags(
        (name = "Health", description = "Service health check"),
        (name = "Routes", description = "Route upload and retrieval"),
        (name = "Analysis", description = "Wind analysis of a route"),
    ),
    paths(
        routes::health::health_check,
        routes::routes::create_route,
        routes::routes::get_route,
        routes::routes::get_route_gpx,
        routes::routes::get_route_results,
        routes::analyze::analyze_route,
        routes::providers::list_providers,
    ),
    components(
        schemas(
            routes::health::HealthResponse,
            routes::routes::CreateRouteResponse,
            routes::routes::RouteMetadataResponse,
            routes::analyze::AcceptedEvent,
            routes::providers::ProvidersResponse,
            db::models::Route,
            db::models::ForecastResult,
            db::models::ResultStatus,
            db::models::ResultRecord,
            services::analyze::Stage,
            services::analyze::ProgressUpdate,
            services::analyze::AnalysisPayload,
            services::analyze::AnalysisFailure,
            services::wind::SegmentWind,
            services::wind::WindClass,
            services::wind::AnalysisSummary,
            errors::ErrorResponse,
        )
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() {
    let config = AppConfig::from_env();

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "against_wind_api=debug,tower_http=debug".into());
    if config.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    // Postgres when configured, otherwise everything lives in memory
    let store: Arc<dyn RouteStore> = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(DB_POOL_MAX_CONNECTIONS)
                .min_connections(DB_POOL_MIN_CONNECTIONS)
                .connect(url)
                .await
                .expect("Failed to connect to database");

            sqlx::migrate!()
                .run(&pool)
                .await
                .expect("Failed to run database migrations");

            tracing::info!("Database migrations completed");
            Arc::new(PgRouteStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, routes and results are kept in memory");
            Arc::new(MemoryRouteStore::new())
        }
    };

    let blobs = Arc::new(LocalBlobStore::new(&config.blob_dir));

    let mut providers = ProviderRegistry::new();
    providers.register(Arc::new(OpenMeteoClient::new(
        &config.open_meteo_base_url,
        &config.open_meteo_archive_url,
        config.forecast_timeout,
    )));
    tracing::info!("Wind providers: {}", providers.list().join(", "));

    let app_state = AppState {
        service: Arc::new(AnalysisService::new(&config, store, blobs, providers)),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .route("/api/v1/routes", post(routes::routes::create_route))
        .route("/api/v1/routes/:id", get(routes::routes::get_route))
        .route("/api/v1/routes/:id/gpx", get(routes::routes::get_route_gpx))
        .route(
            "/api/v1/routes/:id/results",
            get(routes::routes::get_route_results),
        )
        .route("/api/v1/analyze", get(routes::analyze::analyze_route))
        .route("/api/v1/providers", get(routes::providers::list_providers))
        .with_state(app_state);

    let app = Router::new()
        .merge(api_routes)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("API server listening on {}", addr);
    tracing::info!(
        "Swagger UI available at http://localhost:{}/swagger-ui/",
        config.port
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind TCP listener");
    axum::serve(listener, app)
        .await
        .expect("Server terminated unexpectedly");
}
