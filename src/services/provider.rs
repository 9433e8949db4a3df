//! Forecast provider abstraction.
//!
//! A provider answers "what was/will the wind be near this point at this
//! time" one point at a time. [`fetch_wind`] fans a whole route out over a
//! provider in bounded concurrent batches.

use async_trait::async_trait;
use chrono::{DateTime, Timelike, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

use crate::services::timing::ForecastPoint;

/// Errors raised by forecast providers.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Forecast request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Forecast provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Could not decode forecast response: {0}")]
    Decode(String),
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),
    #[error("Provider {provider} does not cover any point of the route")]
    UnsupportedRegion { provider: String },
    #[error("Historical weather data not available: {0}")]
    HistoricalUnavailable(String),
}

/// Extra facts a provider attaches to a sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindMeta {
    /// Location the sample describes
    pub lat: f64,
    pub lon: f64,
    /// Gust speed at the sample height (m/s)
    pub gust_ms: Option<f64>,
    /// Set when the sample was derived from other samples
    pub interpolated: bool,
}

/// One wind vector from a provider.
///
/// `u_ms`/`v_ms` are the eastward/northward components of the air motion,
/// so a wind *from* the north has negative `v_ms`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindSample {
    pub u_ms: f64,
    pub v_ms: f64,
    pub height_m: f64,
    pub model_run_id: String,
    pub source: String,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    pub meta: WindMeta,
}

/// A pluggable wind source.
#[async_trait]
pub trait ForecastProvider: Send + Sync {
    fn name(&self) -> &str;

    fn supports_region(&self, lat: f64, lon: f64) -> bool;

    /// Identifier of the provider's current generation cycle.
    async fn model_run_id(&self) -> String;

    /// Samples near one point. An empty vector is a valid answer.
    async fn fetch_point_wind(
        &self,
        point: &ForecastPoint,
        model_run_id: &str,
    ) -> Result<Vec<WindSample>, ProviderError>;
}

/// Samples for a whole route plus the model run they came from.
#[derive(Debug, Clone)]
pub struct WindBatch {
    pub model_run_id: String,
    pub samples: Vec<WindSample>,
}

/// Drop points that would produce the same request: 4 decimal places of
/// lat/lon and the same minute.
fn deduplicate_points(points: &[ForecastPoint]) -> Vec<ForecastPoint> {
    let mut seen = HashSet::new();
    points
        .iter()
        .filter(|p| {
            let minute = p
                .time_utc
                .with_second(0)
                .and_then(|t| t.with_nanosecond(0))
                .unwrap_or(p.time_utc);
            seen.insert((
                (p.lat * 1e4).round() as i64,
                (p.lon * 1e4).round() as i64,
                minute,
            ))
        })
        .cloned()
        .collect()
}

/// Fetch wind for every point, `batch_width` lookups at a time.
///
/// Failed lookups are logged and skipped. The call only fails as a whole
/// when no point is in the provider's region, or when every lookup failed
/// and at least one failure was a historical range violation.
pub async fn fetch_wind(
    provider: &dyn ForecastProvider,
    points: &[ForecastPoint],
    batch_width: usize,
) -> Result<WindBatch, ProviderError> {
    let model_run_id = provider.model_run_id().await;

    let unique = deduplicate_points(points);
    let supported: Vec<ForecastPoint> = unique
        .into_iter()
        .filter(|p| provider.supports_region(p.lat, p.lon))
        .collect();

    if supported.is_empty() && !points.is_empty() {
        return Err(ProviderError::UnsupportedRegion {
            provider: provider.name().to_string(),
        });
    }

    tracing::debug!(
        "Fetching wind from {} for {} unique points ({} requested)",
        provider.name(),
        supported.len(),
        points.len()
    );

    let mut samples = Vec::new();
    let mut failures = 0usize;
    let mut historical_failure: Option<String> = None;

    for batch in supported.chunks(batch_width.max(1)) {
        let results = join_all(
            batch
                .iter()
                .map(|p| provider.fetch_point_wind(p, &model_run_id)),
        )
        .await;

        for (point, result) in batch.iter().zip(results) {
            match result {
                Ok(mut point_samples) => samples.append(&mut point_samples),
                Err(e) => {
                    failures += 1;
                    tracing::warn!(
                        "Wind lookup failed for {:.4},{:.4} at {}: {}",
                        point.lat,
                        point.lon,
                        point.time_utc,
                        e
                    );
                    if let ProviderError::HistoricalUnavailable(msg) = e {
                        historical_failure.get_or_insert(msg);
                    }
                }
            }
        }
    }

    if failures > 0 && failures == supported.len() {
        if let Some(msg) = historical_failure {
            return Err(ProviderError::HistoricalUnavailable(msg));
        }
    }

    tracing::info!(
        "Retrieved {} wind samples from {} ({} lookups failed)",
        samples.len(),
        provider.name(),
        failures
    );

    Ok(WindBatch {
        model_run_id,
        samples,
    })
}

/// Name → provider lookup.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn ForecastProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn ForecastProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ForecastProvider>, ProviderError> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownProvider(name.to_string()))
    }

    /// Registered provider names, sorted.
    pub fn list(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::SteadyWind;
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn fp(lat: f64, lon: f64, time: &str) -> ForecastPoint {
        ForecastPoint {
            lat,
            lon,
            time_utc: time.parse::<DateTime<Utc>>().unwrap(),
        }
    }

    /// Fails every lookup south of the equator, optionally as a historical error.
    struct Patchy {
        historical: bool,
        region_ok: bool,
    }

    #[async_trait]
    impl ForecastProvider for Patchy {
        fn name(&self) -> &str {
            "patchy"
        }

        fn supports_region(&self, _lat: f64, _lon: f64) -> bool {
            self.region_ok
        }

        async fn model_run_id(&self) -> String {
            "patchy_1".to_string()
        }

        async fn fetch_point_wind(
            &self,
            point: &ForecastPoint,
            model_run_id: &str,
        ) -> Result<Vec<WindSample>, ProviderError> {
            if point.lat < 0.0 {
                if self.historical {
                    return Err(ProviderError::HistoricalUnavailable("too old".to_string()));
                }
                return Err(ProviderError::Status {
                    status: 500,
                    body: "boom".to_string(),
                });
            }
            Ok(vec![WindSample {
                u_ms: 1.0,
                v_ms: 1.0,
                height_m: 10.0,
                model_run_id: model_run_id.to_string(),
                source: "patchy".to_string(),
                valid_from: point.time_utc,
                valid_to: point.time_utc,
                meta: WindMeta {
                    lat: point.lat,
                    lon: point.lon,
                    ..WindMeta::default()
                },
            }])
        }
    }

    #[test]
    fn test_deduplicate_points() {
        let points = vec![
            fp(53.00001, -1.0, "2024-05-01T08:00:10Z"),
            fp(53.00002, -1.0, "2024-05-01T08:00:50Z"),
            fp(53.0, -1.0, "2024-05-01T08:01:00Z"),
            fp(53.001, -1.0, "2024-05-01T08:00:00Z"),
        ];
        let unique = deduplicate_points(&points);
        assert_eq!(unique.len(), 3);
        assert_eq!(unique[0], points[0]);
    }

    #[tokio::test]
    async fn test_fetch_wind_batches_all_points() {
        let provider = SteadyWind::new(5.0, 270.0);
        let points: Vec<ForecastPoint> = (0..25)
            .map(|i| fp(53.0, -1.0 + i as f64 * 0.01, "2024-05-01T08:00:00Z"))
            .collect();
        let batch = assert_ok!(fetch_wind(&provider, &points, 10).await);
        assert_eq!(batch.samples.len(), 25);
        assert_eq!(batch.model_run_id, "synthetic_run");
        assert_eq!(provider.calls(), 25);
    }

    #[tokio::test]
    async fn test_fetch_wind_swallows_point_failures() {
        let provider = Patchy {
            historical: false,
            region_ok: true,
        };
        let points = vec![
            fp(-10.0, 0.0, "2024-05-01T08:00:00Z"),
            fp(10.0, 0.0, "2024-05-01T08:00:00Z"),
        ];
        let batch = assert_ok!(fetch_wind(&provider, &points, 10).await);
        assert_eq!(batch.samples.len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_wind_all_failed_generic_is_empty_batch() {
        let provider = Patchy {
            historical: false,
            region_ok: true,
        };
        let points = vec![fp(-10.0, 0.0, "2024-05-01T08:00:00Z")];
        let batch = assert_ok!(fetch_wind(&provider, &points, 10).await);
        assert!(batch.samples.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_wind_all_failed_historical() {
        let provider = Patchy {
            historical: true,
            region_ok: true,
        };
        let points = vec![
            fp(-10.0, 0.0, "1930-05-01T08:00:00Z"),
            fp(-11.0, 0.0, "1930-05-01T08:00:00Z"),
        ];
        let err = assert_err!(fetch_wind(&provider, &points, 1).await);
        assert!(matches!(err, ProviderError::HistoricalUnavailable(_)));
    }

    #[tokio::test]
    async fn test_fetch_wind_unsupported_region() {
        let provider = Patchy {
            historical: false,
            region_ok: false,
        };
        let points = vec![fp(10.0, 0.0, "2024-05-01T08:00:00Z")];
        let err = assert_err!(fetch_wind(&provider, &points, 10).await);
        assert!(matches!(err, ProviderError::UnsupportedRegion { .. }));
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(SteadyWind::new(1.0, 0.0)));
        assert!(registry.get("synthetic").is_ok());
        assert!(matches!(
            registry.get("met-office"),
            Err(ProviderError::UnknownProvider(_))
        ));
        assert_eq!(registry.list(), vec!["synthetic".to_string()]);
    }
}
