//! Route and analysis persistence behind one trait, with a Postgres
//! implementation and an in-memory one for running without a database.

use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::models::{ForecastResult, ResultRecord, Route};
use super::queries;
use crate::services::gpx::RoutePoint;
use crate::services::wind::{AnalysisSummary, SegmentWind};

#[async_trait]
pub trait RouteStore: Send + Sync {
    /// Persist a route and its resampled points. Re-saving an existing id
    /// keeps the original route record.
    async fn save_route(&self, route: &Route, points: &[RoutePoint]) -> Result<(), sqlx::Error>;

    async fn get_route(&self, id: &str) -> Result<Option<Route>, sqlx::Error>;

    /// `None` when the route is unknown.
    async fn load_resampled_points(
        &self,
        id: &str,
    ) -> Result<Option<Vec<RoutePoint>>, sqlx::Error>;

    async fn store_analysis(
        &self,
        result: &ForecastResult,
        segments: &[SegmentWind],
        summary: &AnalysisSummary,
    ) -> Result<(), sqlx::Error>;

    /// Newest first, at most `limit`.
    async fn recent_results(
        &self,
        route_id: &str,
        limit: i64,
    ) -> Result<Vec<ResultRecord>, sqlx::Error>;

    /// Cheap connectivity check for the health endpoint.
    async fn ping(&self) -> Result<(), sqlx::Error>;

    /// Human-readable backend name.
    fn backend(&self) -> &'static str;
}

// ---------------------------------------------------------------------------
// Postgres
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PgRouteStore {
    pool: PgPool,
}

impl PgRouteStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RouteStore for PgRouteStore {
    async fn save_route(&self, route: &Route, points: &[RoutePoint]) -> Result<(), sqlx::Error> {
        queries::insert_route(&self.pool, route, points).await
    }

    async fn get_route(&self, id: &str) -> Result<Option<Route>, sqlx::Error> {
        queries::get_route(&self.pool, id).await
    }

    async fn load_resampled_points(
        &self,
        id: &str,
    ) -> Result<Option<Vec<RoutePoint>>, sqlx::Error> {
        let points = queries::get_route_points(&self.pool, id).await?;
        Ok(if points.is_empty() { None } else { Some(points) })
    }

    async fn store_analysis(
        &self,
        result: &ForecastResult,
        segments: &[SegmentWind],
        summary: &AnalysisSummary,
    ) -> Result<(), sqlx::Error> {
        queries::insert_analysis(&self.pool, result, segments, summary).await
    }

    async fn recent_results(
        &self,
        route_id: &str,
        limit: i64,
    ) -> Result<Vec<ResultRecord>, sqlx::Error> {
        queries::get_recent_results(&self.pool, route_id, limit).await
    }

    async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map(|_| ())
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MemoryState {
    routes: HashMap<String, Route>,
    points: HashMap<String, Vec<RoutePoint>>,
    /// Per route, oldest first
    results: HashMap<String, Vec<(ResultRecord, Vec<SegmentWind>)>>,
}

/// Process-local store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryRouteStore {
    state: RwLock<MemoryState>,
}

impl MemoryRouteStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RouteStore for MemoryRouteStore {
    async fn save_route(&self, route: &Route, points: &[RoutePoint]) -> Result<(), sqlx::Error> {
        let mut state = self.state.write().await;
        state
            .routes
            .entry(route.id.clone())
            .or_insert_with(|| route.clone());
        state.points.insert(route.id.clone(), points.to_vec());
        Ok(())
    }

    async fn get_route(&self, id: &str) -> Result<Option<Route>, sqlx::Error> {
        Ok(self.state.read().await.routes.get(id).cloned())
    }

    async fn load_resampled_points(
        &self,
        id: &str,
    ) -> Result<Option<Vec<RoutePoint>>, sqlx::Error> {
        Ok(self
            .state
            .read()
            .await
            .points
            .get(id)
            .filter(|p| !p.is_empty())
            .cloned())
    }

    async fn store_analysis(
        &self,
        result: &ForecastResult,
        segments: &[SegmentWind],
        summary: &AnalysisSummary,
    ) -> Result<(), sqlx::Error> {
        let record = ResultRecord {
            result: result.clone(),
            summary: summary.clone(),
        };
        self.state
            .write()
            .await
            .results
            .entry(result.route_id.clone())
            .or_default()
            .push((record, segments.to_vec()));
        Ok(())
    }

    async fn recent_results(
        &self,
        route_id: &str,
        limit: i64,
    ) -> Result<Vec<ResultRecord>, sqlx::Error> {
        let state = self.state.read().await;
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(state
            .results
            .get(route_id)
            .map(|runs| {
                runs.iter()
                    .rev()
                    .take(limit)
                    .map(|(record, _)| record.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn ping(&self) -> Result<(), sqlx::Error> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
