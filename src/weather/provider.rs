//! Weather provider (C3): forecast window + archive daily fetch, in the
//! style of the teacher's `YrClient` — a `reqwest::Client` with a fixed
//! timeout, a hand-rolled retry loop, and header-driven caching concerns
//! left to the caller (here there's nothing to cache client-side; C4 owns
//! the archive-derived cache).

use chrono::NaiveDate;
use serde::Deserialize;

use crate::db::models::{DailySample, WeatherForecastWindow};
use crate::geo::Coord;

/// HTTP request timeout for both the primary and fallback weather endpoints.
const WEATHER_HTTP_TIMEOUT_SECS: u64 = 10;

/// Maximum retry attempts per endpoint before giving up on it.
const MAX_RETRIES_PER_ENDPOINT: u32 = 3;

/// Base delay for exponential backoff between retries (milliseconds).
const RETRY_BASE_DELAY_MS: u64 = 200;

/// Client for the forecast and archive weather endpoints. Mirrors the
/// commercial→public fallback mandated by §4.2: `archive_daily` always
/// tries the primary (commercial) endpoint first when a key is configured,
/// and falls back to the public endpoint without forwarding the key.
#[derive(Debug, Clone)]
pub struct WeatherClient {
    client: reqwest::Client,
    user_agent: String,
    primary_base_url: String,
    primary_api_key: Option<String>,
    fallback_base_url: String,
}

#[derive(Debug, Deserialize)]
struct DailyResponse {
    daily: DailyBlock,
}

#[derive(Debug, Deserialize)]
struct DailyBlock {
    time: Vec<String>,
    temperature_2m_mean: Vec<Option<f64>>,
    temperature_2m_min: Vec<Option<f64>>,
    temperature_2m_max: Vec<Option<f64>>,
    precipitation_sum: Vec<Option<f64>>,
    wind_speed_10m_max: Vec<Option<f64>>,
    visibility_mean: Vec<Option<f64>>,
    cloud_cover_mean: Vec<Option<f64>>,
}

impl DailyResponse {
    fn into_samples(self) -> Vec<DailySample> {
        let n = self.daily.time.len();
        (0..n)
            .map(|i| DailySample {
                temperature_mean_c: self.daily.temperature_2m_mean.get(i).copied().flatten().unwrap_or(0.0),
                temperature_min_c: self.daily.temperature_2m_min.get(i).copied().flatten().unwrap_or(0.0),
                temperature_max_c: self.daily.temperature_2m_max.get(i).copied().flatten().unwrap_or(0.0),
                precipitation_total_mm: self.daily.precipitation_sum.get(i).copied().flatten().unwrap_or(0.0),
                wind_speed_mean_ms: self.daily.wind_speed_10m_max.get(i).copied().flatten().unwrap_or(0.0),
                visibility_mean_km: self.daily.visibility_mean.get(i).copied().flatten().unwrap_or(10.0),
                cloud_cover_mean_pct: self.daily.cloud_cover_mean.get(i).copied().flatten().unwrap_or(0.0),
            })
            .collect()
    }
}

impl WeatherClient {
    pub fn new(
        user_agent: &str,
        primary_base_url: &str,
        primary_api_key: Option<String>,
        fallback_base_url: &str,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(WEATHER_HTTP_TIMEOUT_SECS))
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            user_agent: user_agent.to_string(),
            primary_base_url: primary_base_url.to_string(),
            primary_api_key,
            fallback_base_url: fallback_base_url.to_string(),
        }
    }

    /// Fetch the 7-day forecast window for `coord`, anchored on `anchor_date`
    /// (day 0). Network errors are retried with bounded exponential backoff;
    /// final failure yields `None` (§4.2) — the caller treats `None` as
    /// "forecast unavailable" and the weather kernel falls back to neutral.
    pub async fn forecast_window(
        &self,
        coord: Coord,
        anchor_date: NaiveDate,
    ) -> Option<WeatherForecastWindow> {
        let end_date = anchor_date;
        let start_date = anchor_date - chrono::Duration::days(6);
        let url = format!(
            "{}/forecast?latitude={:.4}&longitude={:.4}&daily={}&start_date={}&end_date={}&timezone=UTC",
            self.fallback_base_url,
            coord.lat,
            coord.lon,
            DAILY_FIELDS,
            start_date,
            end_date,
        );
        let days = self.fetch_with_retries(&url).await?;
        Some(WeatherForecastWindow { days })
    }

    /// Fetch up to ~5 years of daily archive data for `coord` between
    /// `start` and `end`. Tries the commercial endpoint first (with the
    /// configured key) if present, then on any failure retries the public
    /// endpoint without forwarding the key (§4.2 — this fallback is
    /// mandatory, not conditional on the primary's failure mode). Unlike
    /// `forecast_window`, neither endpoint gets a backoff-retry loop: one
    /// request to the commercial endpoint, and on failure exactly one
    /// request to the public endpoint (§8 Scenario 5).
    pub async fn archive_daily(
        &self,
        coord: Coord,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Option<Vec<DailySample>> {
        if let Some(key) = &self.primary_api_key {
            let url = format!(
                "{}/archive?latitude={:.4}&longitude={:.4}&daily={}&start_date={}&end_date={}&timezone=UTC&apikey={}",
                self.primary_base_url, coord.lat, coord.lon, DAILY_FIELDS, start, end, key,
            );
            match self.fetch_once(&url).await {
                Ok(days) => return Some(days),
                Err(e) => tracing::warn!("archive_daily: primary endpoint failed, falling back to public endpoint: {}", e),
            }
        }

        let url = format!(
            "{}/archive?latitude={:.4}&longitude={:.4}&daily={}&start_date={}&end_date={}&timezone=UTC",
            self.fallback_base_url, coord.lat, coord.lon, DAILY_FIELDS, start, end,
        );
        self.fetch_once(&url).await.ok()
    }

    /// Only used by `forecast_window` — §4.1 scopes backoff-retry to the
    /// forecast endpoint; `archive_daily` retries its own way (single
    /// attempt per endpoint, see above).
    async fn fetch_with_retries(&self, url: &str) -> Option<Vec<DailySample>> {
        for attempt in 0..MAX_RETRIES_PER_ENDPOINT {
            match self.fetch_once(url).await {
                Ok(days) => return Some(days),
                Err(e) => {
                    tracing::warn!(
                        "weather fetch attempt {}/{} failed: {}",
                        attempt + 1,
                        MAX_RETRIES_PER_ENDPOINT,
                        e
                    );
                    if attempt + 1 < MAX_RETRIES_PER_ENDPOINT {
                        let delay = RETRY_BASE_DELAY_MS * 2u64.pow(attempt);
                        tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                    }
                }
            }
        }
        None
    }

    async fn fetch_once(&self, url: &str) -> Result<Vec<DailySample>, String> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status()));
        }

        let parsed: DailyResponse = response.json().await.map_err(|e| e.to_string())?;
        Ok(parsed.into_samples())
    }
}

const DAILY_FIELDS: &str = "temperature_2m_mean,temperature_2m_min,temperature_2m_max,\
    precipitation_sum,wind_speed_10m_max,visibility_mean,cloud_cover_mean";

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_body() -> serde_json::Value {
        serde_json::json!({
            "daily": {
                "time": ["2026-07-09", "2026-07-10", "2026-07-11"],
                "temperature_2m_mean": [10.0, 11.0, 12.0],
                "temperature_2m_min": [5.0, 6.0, 7.0],
                "temperature_2m_max": [15.0, 16.0, 17.0],
                "precipitation_sum": [0.0, 1.0, 2.0],
                "wind_speed_10m_max": [5.0, 6.0, 7.0],
                "visibility_mean": [20.0, 18.0, 15.0],
                "cloud_cover_mean": [30.0, 40.0, 50.0],
            }
        })
    }

    #[tokio::test]
    async fn archive_fallback_never_forwards_primary_key() {
        let primary = MockServer::start().await;
        let fallback = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/archive"))
            .and(header_exists("user-agent"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&primary)
            .await;

        Mock::given(method("GET"))
            .and(path("/archive"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_body()))
            .mount(&fallback)
            .await;

        let client = WeatherClient::new(
            "test-agent/1.0",
            &primary.uri(),
            Some("bogus-key".to_string()),
            &fallback.uri(),
        );

        let result = client
            .archive_daily(
                Coord::new(40.0, -105.0),
                NaiveDate::from_ymd_opt(2021, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            )
            .await;

        assert!(result.is_some(), "fallback should have produced a result");

        let primary_requests = primary.received_requests().await.unwrap();
        assert_eq!(primary_requests.len(), 1, "archive_daily must not retry the commercial endpoint");
        assert!(primary_requests[0].url.query().unwrap_or("").contains("apikey="));

        let fallback_requests = fallback.received_requests().await.unwrap();
        assert_eq!(fallback_requests.len(), 1);
        assert!(!fallback_requests[0].url.query().unwrap_or("").contains("apikey="));
    }

    #[tokio::test]
    async fn archive_uses_public_endpoint_when_no_key_configured() {
        let fallback = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/archive"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_body()))
            .mount(&fallback)
            .await;

        let client = WeatherClient::new("test-agent/1.0", "http://unused.invalid", None, &fallback.uri());
        let result = client
            .archive_daily(
                Coord::new(40.0, -105.0),
                NaiveDate::from_ymd_opt(2021, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            )
            .await;
        assert!(result.is_some());
    }

    #[tokio::test]
    async fn forecast_window_parses_daily_samples() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("user-agent", "test-agent/1.0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_body()))
            .mount(&server)
            .await;

        let client = WeatherClient::new("test-agent/1.0", "http://unused.invalid", None, &server.uri());
        let window = client
            .forecast_window(Coord::new(40.0, -105.0), NaiveDate::from_ymd_opt(2026, 7, 11).unwrap())
            .await
            .expect("forecast should succeed");
        assert_eq!(window.days.len(), 3);
        assert_eq!(window.days[0].temperature_mean_c, 10.0);
    }
}
