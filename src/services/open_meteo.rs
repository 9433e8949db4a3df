//! Open-Meteo client.
//!
//! Recent and future times go to the forecast API (which also serves the
//! last 16 days via `past_days`). Older dates go to the ERA5 reanalysis
//! archive, which starts in 1940.
//! See: https://open-meteo.com/en/docs

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;

use crate::services::provider::{ForecastProvider, ProviderError, WindMeta, WindSample};
use crate::services::timing::ForecastPoint;
use crate::services::wind::uv_from_speed_direction;

pub const PROVIDER_NAME: &str = "open-meteo";

const HOURLY_VARS: &str = "windspeed_10m,winddirection_10m,windgusts_10m";

/// How far back the forecast API can serve via `past_days`.
const RECENT_WINDOW_DAYS: i64 = 16;

/// Maximum for both `past_days` and `forecast_days`.
const MAX_DAYS: i64 = 16;

/// Hours further than this from the requested time are dropped (seconds).
const MAX_SAMPLE_OFFSET_SECS: i64 = 7200;

/// Height of the reported wind (m).
const SAMPLE_HEIGHT_M: f64 = 10.0;

/// Client for the Open-Meteo forecast and archive APIs.
#[derive(Debug, Clone)]
pub struct OpenMeteoClient {
    client: reqwest::Client,
    base_url: String,
    archive_url: String,
}

// --- Open-Meteo JSON response types ---

#[derive(Debug, Deserialize)]
struct OpenMeteoResponse {
    generationtime_ms: Option<f64>,
    hourly: Option<OpenMeteoHourly>,
}

#[derive(Debug, Deserialize)]
struct OpenMeteoHourly {
    #[serde(default)]
    time: Vec<String>,
    #[serde(default)]
    windspeed_10m: Vec<Option<f64>>,
    #[serde(default)]
    winddirection_10m: Vec<Option<f64>>,
    #[serde(default)]
    windgusts_10m: Vec<Option<f64>>,
}

/// Parse an Open-Meteo hourly timestamp (`2024-05-01T08:00`, UTC).
fn parse_hour(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M")
        .map(|naive| naive.and_utc())
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
        })
}

impl OpenMeteoClient {
    pub fn new(base_url: &str, archive_url: &str, timeout: std::time::Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            archive_url: archive_url.trim_end_matches('/').to_string(),
        }
    }

    /// Pick the endpoint and query parameters for a point, relative to `now`.
    fn request_for(
        &self,
        point: &ForecastPoint,
        now: DateTime<Utc>,
    ) -> Result<(String, Vec<(&'static str, String)>), ProviderError> {
        let today = now.date_naive();
        let target = point.time_utc.date_naive();

        let mut params: Vec<(&'static str, String)> = vec![
            ("latitude", format!("{:.4}", point.lat)),
            ("longitude", format!("{:.4}", point.lon)),
            ("hourly", HOURLY_VARS.to_string()),
            ("wind_speed_unit", "ms".to_string()),
            ("timezone", "UTC".to_string()),
        ];

        if target >= today - Duration::days(RECENT_WINDOW_DAYS) {
            let past_days = (today - target).num_days().max(0);
            let forecast_days = ((target - today).num_days() + 1).max(0);
            if past_days > 0 {
                params.push(("past_days", past_days.min(MAX_DAYS).to_string()));
            }
            if forecast_days > 0 {
                params.push(("forecast_days", forecast_days.min(MAX_DAYS).to_string()));
            }
            tracing::debug!(
                "Fetching forecast (past_days={}, forecast_days={}) for {:.4},{:.4}",
                past_days,
                forecast_days,
                point.lat,
                point.lon
            );
            Ok((format!("{}/forecast", self.base_url), params))
        } else {
            let earliest = NaiveDate::from_ymd_opt(1940, 1, 1).unwrap_or(NaiveDate::MIN);
            if target < earliest {
                return Err(ProviderError::HistoricalUnavailable(format!(
                    "no archive data before {} (requested {})",
                    earliest, target
                )));
            }
            let day = target.format("%Y-%m-%d").to_string();
            params.push(("start_date", day.clone()));
            params.push(("end_date", day));
            tracing::debug!(
                "Fetching ERA5 archive for {} at {:.4},{:.4}",
                target,
                point.lat,
                point.lon
            );
            Ok((format!("{}/era5", self.archive_url), params))
        }
    }

    async fn get_json(
        &self,
        url: &str,
        params: &[(&'static str, String)],
    ) -> Result<OpenMeteoResponse, ProviderError> {
        let response = self.client.get(url).query(params).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status { status, body });
        }

        response
            .json::<OpenMeteoResponse>()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))
    }

    /// Fetch samples for one point, with an explicit notion of "now".
    pub async fn fetch_point_wind_at(
        &self,
        point: &ForecastPoint,
        model_run_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<WindSample>, ProviderError> {
        let (url, params) = self.request_for(point, now)?;
        let data = self.get_json(&url, &params).await?;
        Ok(parse_response(&data, point, model_run_id))
    }
}

/// Turn the hourly arrays into u/v samples near the requested time.
fn parse_response(
    data: &OpenMeteoResponse,
    point: &ForecastPoint,
    model_run_id: &str,
) -> Vec<WindSample> {
    let Some(hourly) = &data.hourly else {
        return Vec::new();
    };

    hourly
        .time
        .iter()
        .enumerate()
        .filter_map(|(i, time_str)| {
            let valid = parse_hour(time_str)?;
            if (valid - point.time_utc).num_seconds().abs() > MAX_SAMPLE_OFFSET_SECS {
                return None;
            }
            let speed = hourly.windspeed_10m.get(i).copied().flatten()?;
            let direction = hourly.winddirection_10m.get(i).copied().flatten()?;
            let gust = hourly.windgusts_10m.get(i).copied().flatten();

            let (u_ms, v_ms) = uv_from_speed_direction(speed, direction);
            Some(WindSample {
                u_ms,
                v_ms,
                height_m: SAMPLE_HEIGHT_M,
                model_run_id: model_run_id.to_string(),
                source: PROVIDER_NAME.to_string(),
                valid_from: valid,
                valid_to: valid,
                meta: WindMeta {
                    lat: point.lat,
                    lon: point.lon,
                    gust_ms: gust,
                    interpolated: false,
                },
            })
        })
        .collect()
}

#[async_trait]
impl ForecastProvider for OpenMeteoClient {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    /// Global coverage.
    fn supports_region(&self, lat: f64, lon: f64) -> bool {
        (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)
    }

    async fn model_run_id(&self) -> String {
        let params = [
            ("latitude", "0".to_string()),
            ("longitude", "0".to_string()),
            ("hourly", "windspeed_10m".to_string()),
            ("forecast_days", "1".to_string()),
        ];
        let url = format!("{}/forecast", self.base_url);
        match self.get_json(&url, &params).await {
            Ok(OpenMeteoResponse {
                generationtime_ms: Some(ms),
                ..
            }) => format!("openmeteo_{}", ms as i64),
            Ok(_) => fallback_model_run_id(Utc::now()),
            Err(e) => {
                tracing::warn!("Failed to get Open-Meteo model run id: {}", e);
                fallback_model_run_id(Utc::now())
            }
        }
    }

    async fn fetch_point_wind(
        &self,
        point: &ForecastPoint,
        model_run_id: &str,
    ) -> Result<Vec<WindSample>, ProviderError> {
        self.fetch_point_wind_at(point, model_run_id, Utc::now()).await
    }
}

fn fallback_model_run_id(now: DateTime<Utc>) -> String {
    format!("openmeteo_{}", now.format("%Y%m%d_%H"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DurationRound, TimeDelta};
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> OpenMeteoClient {
        OpenMeteoClient::new(
            &server.uri(),
            &server.uri(),
            std::time::Duration::from_secs(5),
        )
    }

    fn hour_str(t: DateTime<Utc>) -> String {
        t.format("%Y-%m-%dT%H:%M").to_string()
    }

    #[test]
    fn test_parse_hour() {
        assert_eq!(
            parse_hour("2024-05-01T08:00"),
            Some("2024-05-01T08:00:00Z".parse::<DateTime<Utc>>().unwrap())
        );
        assert!(parse_hour("yesterday").is_none());
    }

    #[test]
    fn test_request_selection() {
        let client =
            OpenMeteoClient::new("http://f", "http://a", std::time::Duration::from_secs(1));
        let now = "2024-05-10T12:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let at = |s: &str| ForecastPoint {
            lat: 53.0,
            lon: -1.0,
            time_utc: s.parse::<DateTime<Utc>>().unwrap(),
        };

        let (url, params) = client.request_for(&at("2024-05-12T08:00:00Z"), now).unwrap();
        assert_eq!(url, "http://f/forecast");
        assert!(params.contains(&("forecast_days", "3".to_string())));
        assert!(!params.iter().any(|(k, _)| *k == "past_days"));

        let (url, params) = client.request_for(&at("2024-05-01T08:00:00Z"), now).unwrap();
        assert_eq!(url, "http://f/forecast");
        assert!(params.contains(&("past_days", "9".to_string())));

        let (url, params) = client.request_for(&at("2020-05-01T08:00:00Z"), now).unwrap();
        assert_eq!(url, "http://a/era5");
        assert!(params.contains(&("start_date", "2020-05-01".to_string())));
        assert!(params.contains(&("end_date", "2020-05-01".to_string())));

        let err = client.request_for(&at("1939-12-31T08:00:00Z"), now).unwrap_err();
        assert!(matches!(err, ProviderError::HistoricalUnavailable(_)));
    }

    #[tokio::test]
    async fn test_fetch_forecast_converts_and_filters() {
        let server = MockServer::start().await;
        let target = Utc::now().duration_trunc(TimeDelta::hours(1)).unwrap();

        Mock::given(method("GET"))
            .and(path("/forecast"))
            .and(query_param("wind_speed_unit", "ms"))
            .and(query_param("latitude", "53.4000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "generationtime_ms": 0.5,
                "hourly": {
                    "time": [
                        hour_str(target - TimeDelta::hours(3)),
                        hour_str(target),
                        hour_str(target + TimeDelta::hours(1)),
                    ],
                    "windspeed_10m": [1.0, 10.0, null],
                    "winddirection_10m": [0.0, 90.0, 180.0],
                    "windgusts_10m": [2.0, 15.0, 5.0]
                }
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let point = ForecastPoint {
            lat: 53.4,
            lon: -1.7,
            time_utc: target,
        };
        let samples = client
            .fetch_point_wind_at(&point, "run", Utc::now())
            .await
            .unwrap();

        // -3h is too far away, +1h has no speed
        assert_eq!(samples.len(), 1);
        let s = &samples[0];
        assert_eq!(s.valid_from, target);
        // Wind from the east blows westward
        assert!((s.u_ms + 10.0).abs() < 1e-9);
        assert!(s.v_ms.abs() < 1e-9);
        assert_eq!(s.meta.gust_ms, Some(15.0));
        assert_eq!(s.meta.lat, 53.4);
        assert_eq!(s.source, PROVIDER_NAME);
        assert_eq!(s.model_run_id, "run");
    }

    #[tokio::test]
    async fn test_fetch_archive_for_old_dates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/era5"))
            .and(query_param("start_date", "2000-06-01"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "hourly": {
                    "time": ["2000-06-01T11:00", "2000-06-01T12:00"],
                    "windspeed_10m": [4.0, 5.0],
                    "winddirection_10m": [270.0, 270.0],
                    "windgusts_10m": [null, null]
                }
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let point = ForecastPoint {
            lat: 47.0,
            lon: 8.0,
            time_utc: "2000-06-01T12:00:00Z".parse::<DateTime<Utc>>().unwrap(),
        };
        let samples = client
            .fetch_point_wind_at(&point, "run", Utc::now())
            .await
            .unwrap();
        assert_eq!(samples.len(), 2);
        assert!(samples.iter().all(|s| s.meta.gust_ms.is_none()));
    }

    #[tokio::test]
    async fn test_fetch_http_error_is_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/forecast"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let point = ForecastPoint {
            lat: 47.0,
            lon: 8.0,
            time_utc: Utc::now(),
        };
        let err = client
            .fetch_point_wind_at(&point, "run", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_model_run_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/forecast"))
            .and(query_param("forecast_days", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "generationtime_ms": 42.7
            })))
            .mount(&server)
            .await;

        assert_eq!(client_for(&server).model_run_id().await, "openmeteo_42");
    }

    #[tokio::test]
    async fn test_model_run_id_falls_back_to_hour() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let id = client_for(&server).model_run_id().await;
        assert!(id.starts_with("openmeteo_"));
        assert_eq!(id.len(), "openmeteo_20240501_08".len());
    }

    #[test]
    fn test_supports_region() {
        let client =
            OpenMeteoClient::new("http://f", "http://a", std::time::Duration::from_secs(1));
        assert!(client.supports_region(53.4, -1.7));
        assert!(!client.supports_region(91.0, 0.0));
    }
}
