//! Analysis orchestration.
//!
//! Runs route loading → arrival times → wind fetch → wind reduction →
//! summary → storage for one request, reporting each stage over a channel.
//! A completed payload is cached per route, provider and departure hour.
//!
//! The stream always ends with exactly one `complete` or `error` event,
//! unless the consumer hangs up first, in which case work stops at the next
//! stage boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::db::models::{ForecastResult, ResultRecord, ResultStatus, Route};
use crate::db::store::RouteStore;
use crate::errors::AnalysisError;
use crate::services::blob::{BlobError, BlobStore};
use crate::services::cache::{cache_key, AnalysisCache};
use crate::services::gpx::{self, RoutePoint};
use crate::services::provider::{fetch_wind, ProviderRegistry};
use crate::services::timing::{generate_forecast_points, TimingMode};
use crate::services::wind::{summarize, AnalysisSummary, SegmentWind, WindReducer};

/// Route id of the bundled demo route.
pub const DEMO_ROUTE_ID: &str = "demo-glossop-sheffield";

/// Display name of the bundled demo route.
const DEMO_ROUTE_NAME: &str = "Glossop to Sheffield (demo)";

/// File name of the demo route inside the data directory.
const DEMO_ROUTE_FILE: &str = "demo-route.gpx";

/// Provider used when a request does not name one.
pub const DEFAULT_PROVIDER: &str = "open-meteo";

/// Buffered events between the analysis task and the consumer.
const EVENT_BUFFER: usize = 16;

const NO_WIND_DATA_MSG: &str = "No wind data available for the requested time and location";

const NO_HISTORICAL_WIND_DATA_MSG: &str =
    "No historical wind data available for the requested time and location. \
     Historical data may not be available for dates older than 7 days or before 1940.";

// ---------------------------------------------------------------------------
// Request / event types
// ---------------------------------------------------------------------------

/// One analysis request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AnalysisRequest {
    pub route_id: String,
    pub depart_time: DateTime<Utc>,
    pub provider: String,
    /// Pacing preset name. Carried through for clients; arrival times use
    /// the timing flags.
    pub speed_profile: String,
    /// Shift recorded timestamps to start at `depart_time`
    pub use_gpx_timestamps: bool,
    /// Spread this many hours across the route by distance
    pub estimated_duration_hours: Option<f64>,
    /// Use recorded timestamps as-is and look up historical wind
    pub use_historical_mode: bool,
}

/// Pipeline stages, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    CacheCheck,
    LoadingRoute,
    GeneratingForecastPoints,
    FetchingWindData,
    ProcessingWindData,
    GeneratingSummary,
    StoringResults,
    Finalizing,
}

impl Stage {
    /// Fraction of the work done when this stage starts.
    pub fn progress(&self) -> f64 {
        match self {
            Stage::CacheCheck => 0.0,
            Stage::LoadingRoute => 0.1,
            Stage::GeneratingForecastPoints => 0.2,
            Stage::FetchingWindData => 0.3,
            Stage::ProcessingWindData => 0.5,
            Stage::GeneratingSummary => 0.8,
            Stage::StoringResults => 0.9,
            Stage::Finalizing => 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProgressUpdate {
    pub stage: Stage,
    pub progress: f64,
    pub message: String,
}

/// Everything a client needs to render a finished analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AnalysisPayload {
    pub result: ForecastResult,
    pub segments: Vec<SegmentWind>,
    pub summary: AnalysisSummary,
    pub map_style_url: Option<String>,
}

/// Terminal failure of an analysis.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AnalysisFailure {
    /// Stable error kind, e.g. `route_not_found`
    pub error: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub enum AnalysisEvent {
    Progress(ProgressUpdate),
    Complete(Box<AnalysisPayload>),
    Error(AnalysisFailure),
}

impl AnalysisEvent {
    /// Event name on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            AnalysisEvent::Progress(_) => "progress",
            AnalysisEvent::Complete(_) => "complete",
            AnalysisEvent::Error(_) => "error",
        }
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Owns the collaborators and the result cache.
pub struct AnalysisService {
    store: Arc<dyn RouteStore>,
    blobs: Arc<dyn BlobStore>,
    providers: ProviderRegistry,
    cache: AnalysisCache<AnalysisPayload>,
    reducer: WindReducer,
    sample_distance_km: f64,
    batch_width: usize,
    data_dir: PathBuf,
}

impl AnalysisService {
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn RouteStore>,
        blobs: Arc<dyn BlobStore>,
        providers: ProviderRegistry,
    ) -> Self {
        Self {
            store,
            blobs,
            providers,
            cache: AnalysisCache::new(config.cache_ttl, config.cache_capacity),
            reducer: WindReducer::new(
                config.rider_height_m,
                config.roughness_length_m,
                config.wind_matching,
            ),
            sample_distance_km: config.sample_distance_km,
            batch_width: config.max_concurrent_forecasts,
            data_dir: PathBuf::from(&config.data_dir),
        }
    }

    pub fn store(&self) -> &dyn RouteStore {
        self.store.as_ref()
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub async fn cached_analyses(&self) -> usize {
        self.cache.len().await
    }

    // --- Routes ---

    /// Register a route from GPX text.
    ///
    /// The id is derived from the text, so uploading the same file twice
    /// returns the existing route. The boolean is `true` when the route was
    /// created by this call.
    pub async fn create_route(
        &self,
        gpx_text: &str,
        name: Option<String>,
    ) -> Result<(Route, bool), AnalysisError> {
        let route_id = Uuid::new_v5(&Uuid::NAMESPACE_OID, gpx_text.as_bytes()).to_string();

        if let Some(existing) = self.store.get_route(&route_id).await? {
            tracing::info!("Returning existing route {}", route_id);
            return Ok((existing, false));
        }

        let (route, points) = self.ingest_route(route_id, name, gpx_text).await?;
        tracing::info!(
            "Created route {} ({:.1} km, {} points)",
            route.id,
            route.length_km,
            points.len()
        );
        Ok((route, true))
    }

    /// Look up a route, loading the demo route on first use.
    pub async fn get_route(&self, route_id: &str) -> Result<Option<Route>, AnalysisError> {
        if let Some(route) = self.store.get_route(route_id).await? {
            return Ok(Some(route));
        }
        if route_id == DEMO_ROUTE_ID {
            return Ok(self.load_demo_route().await?.map(|(route, _)| route));
        }
        Ok(None)
    }

    /// Original GPX text of a route. Ids that cannot name a stored blob have none.
    pub async fn get_route_gpx(&self, route_id: &str) -> Result<Option<String>, AnalysisError> {
        match self.blobs.get_text(&gpx_blob_key(route_id)).await {
            Ok(text) => Ok(text),
            Err(BlobError::InvalidKey(key)) => {
                tracing::debug!("No GPX for route {}: invalid blob key {}", route_id, key);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn recent_results(
        &self,
        route_id: &str,
        limit: i64,
    ) -> Result<Vec<ResultRecord>, AnalysisError> {
        Ok(self.store.recent_results(route_id, limit).await?)
    }

    /// Parse, store the raw text and persist the route with its points.
    async fn ingest_route(
        &self,
        route_id: String,
        name: Option<String>,
        gpx_text: &str,
    ) -> Result<(Route, Vec<RoutePoint>), AnalysisError> {
        let (points, metadata) = gpx::process_route(gpx_text, self.sample_distance_km)?;

        let gpx_url = self
            .blobs
            .put_text(&gpx_blob_key(&route_id), gpx_text)
            .await?;

        let route = Route {
            id: route_id,
            name,
            gpx_url,
            bbox: metadata.bbox,
            length_km: metadata.total_distance_km,
            created_at: Utc::now(),
        };
        self.store.save_route(&route, &points).await?;
        Ok((route, points))
    }

    /// Load the demo route from the data directory. `None` when the file is missing.
    async fn load_demo_route(&self) -> Result<Option<(Route, Vec<RoutePoint>)>, AnalysisError> {
        let path = self.data_dir.join(DEMO_ROUTE_FILE);
        let gpx_text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("Demo route unavailable at {}: {}", path.display(), e);
                return Ok(None);
            }
        };
        tracing::info!("Loading demo route from {}", path.display());
        let loaded = self
            .ingest_route(
                DEMO_ROUTE_ID.to_string(),
                Some(DEMO_ROUTE_NAME.to_string()),
                &gpx_text,
            )
            .await?;
        Ok(Some(loaded))
    }

    async fn load_route_points(&self, route_id: &str) -> Result<Vec<RoutePoint>, AnalysisError> {
        if let Some(points) = self.store.load_resampled_points(route_id).await? {
            return Ok(points);
        }
        if route_id == DEMO_ROUTE_ID {
            if let Some((_, points)) = self.load_demo_route().await? {
                return Ok(points);
            }
        }
        Err(AnalysisError::RouteNotFound(route_id.to_string()))
    }

    // --- Analysis ---

    /// Start an analysis in the background and return its event stream.
    pub fn analyze_route_stream(
        self: &Arc<Self>,
        request: AnalysisRequest,
    ) -> mpsc::Receiver<AnalysisEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let service = Arc::clone(self);
        tokio::spawn(async move { service.run(request, tx).await });
        rx
    }

    /// Run one analysis to its terminal event.
    pub(crate) async fn run(&self, request: AnalysisRequest, tx: mpsc::Sender<AnalysisEvent>) {
        let terminal = match self.execute(&request, &tx).await {
            Ok(Some(payload)) => AnalysisEvent::Complete(Box::new(payload)),
            Ok(None) => {
                tracing::info!(
                    "Analysis of route {} cancelled by consumer",
                    request.route_id
                );
                return;
            }
            Err(e) => {
                tracing::error!("Analysis of route {} failed: {}", request.route_id, e);
                AnalysisEvent::Error(AnalysisFailure {
                    error: e.kind().to_string(),
                    message: e.to_string(),
                })
            }
        };
        if tx.send(terminal).await.is_err() {
            tracing::debug!("Consumer gone before terminal event");
        }
    }

    /// The stage sequence. `Ok(None)` means the consumer went away.
    async fn execute(
        &self,
        request: &AnalysisRequest,
        tx: &mpsc::Sender<AnalysisEvent>,
    ) -> Result<Option<AnalysisPayload>, AnalysisError> {
        if !emit(tx, Stage::CacheCheck, "Checking for a cached analysis...").await {
            return Ok(None);
        }
        let key = cache_key(&request.route_id, &request.provider, request.depart_time);
        if let Some(cached) = self.cache.get(&key).await {
            tracing::info!("Serving cached analysis for {}", key);
            return Ok(Some(cached));
        }
        tracing::debug!("Cache miss for {}", key);

        if !emit(tx, Stage::LoadingRoute, "Loading route data...").await {
            return Ok(None);
        }
        let route_points = self.load_route_points(&request.route_id).await?;

        if !emit(
            tx,
            Stage::GeneratingForecastPoints,
            "Generating forecast points...",
        )
        .await
        {
            return Ok(None);
        }
        let mode = TimingMode::select(
            &route_points,
            request.use_historical_mode,
            request.use_gpx_timestamps,
            request.estimated_duration_hours,
        );
        tracing::debug!("Timing mode {:?} for {} points", mode, route_points.len());
        let forecast_points =
            generate_forecast_points(&route_points, request.depart_time, mode)?;

        let fetching = format!("Fetching wind data from {}...", request.provider);
        if !emit(tx, Stage::FetchingWindData, &fetching).await {
            return Ok(None);
        }
        let provider = self.providers.get(&request.provider)?;
        let batch = fetch_wind(provider.as_ref(), &forecast_points, self.batch_width).await?;
        if batch.samples.is_empty() {
            return Err(no_wind_data(request));
        }

        if !emit(tx, Stage::ProcessingWindData, "Processing wind data...").await {
            return Ok(None);
        }
        let segments = self
            .reducer
            .reduce(&route_points, &forecast_points, &batch.samples);
        if segments.is_empty() {
            tracing::warn!(
                "{} samples but no usable match along route {}",
                batch.samples.len(),
                request.route_id
            );
            return Err(no_wind_data(request));
        }

        if !emit(tx, Stage::GeneratingSummary, "Generating analysis summary...").await {
            return Ok(None);
        }
        let summary = summarize(&segments);

        if !emit(tx, Stage::StoringResults, "Storing results...").await {
            return Ok(None);
        }
        let result = ForecastResult {
            id: Uuid::new_v4(),
            route_id: request.route_id.clone(),
            depart_time: request.depart_time,
            provider: request.provider.clone(),
            model_run_id: batch.model_run_id,
            created_at: Utc::now(),
            status: ResultStatus::Completed,
        };
        if let Err(e) = self.store.store_analysis(&result, &segments, &summary).await {
            tracing::warn!(
                "{}",
                AnalysisError::Storage(format!("result {} not persisted: {}", result.id, e))
            );
        }

        let payload = AnalysisPayload {
            map_style_url: Some(format!("/api/v1/map/style/{}", result.id)),
            result,
            segments,
            summary,
        };
        self.cache.insert(key, payload.clone()).await;

        if !emit(tx, Stage::Finalizing, "Finalizing analysis...").await {
            return Ok(None);
        }
        Ok(Some(payload))
    }
}

fn gpx_blob_key(route_id: &str) -> String {
    format!("routes/{}/original.gpx", route_id)
}

fn no_wind_data(request: &AnalysisRequest) -> AnalysisError {
    if request.use_historical_mode {
        AnalysisError::NoWindData(NO_HISTORICAL_WIND_DATA_MSG.to_string())
    } else {
        AnalysisError::NoWindData(NO_WIND_DATA_MSG.to_string())
    }
}

/// Send a progress event. `false` when the consumer has gone away.
async fn emit(tx: &mpsc::Sender<AnalysisEvent>, stage: Stage, message: &str) -> bool {
    let update = ProgressUpdate {
        stage,
        progress: stage.progress(),
        message: message.to_string(),
    };
    tx.send(AnalysisEvent::Progress(update)).await.is_ok()
}
