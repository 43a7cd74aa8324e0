use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info};

use crate::{error::Error, model::ForecastPayload};

use super::ForecastProvider;

const ONE_CALL_URL: &str = "https://api.openweathermap.org/data/3.0/onecall";

/// Blocks dropped from the One Call response; only `current` and `hourly` are read.
const EXCLUDE: &str = "minutely,daily,alerts";

/// OpenWeatherMap One Call 3.0 client for a single location.
#[derive(Clone)]
pub struct OpenWeatherProvider {
    api_key: String,
    lat: f64,
    lon: f64,
    base_url: String,
    http: Client,
}

impl std::fmt::Debug for OpenWeatherProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenWeatherProvider")
            .field("lat", &self.lat)
            .field("lon", &self.lon)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl OpenWeatherProvider {
    pub fn new(api_key: String, lat: f64, lon: f64) -> Self {
        Self {
            api_key,
            lat,
            lon,
            base_url: ONE_CALL_URL.to_string(),
            http: Client::new(),
        }
    }

    /// Point the client at a different endpoint, e.g. a local test server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn fetch_one_call(&self) -> Result<ForecastPayload> {
        info!("Fetching weather data...");

        let res = self
            .http
            .get(&self.base_url)
            .query(&[
                ("lat", self.lat.to_string()),
                ("lon", self.lon.to_string()),
                ("appid", self.api_key.clone()),
                ("exclude", EXCLUDE.to_string()),
            ])
            .send()
            .await
            .context("Failed to send request to OpenWeather (One Call)")?;

        let status = res.status();
        let body = res
            .text()
            .await
            .context("Failed to read OpenWeather One Call response body")?;

        if !status.is_success() {
            return Err(anyhow!(
                "OpenWeather One Call request failed with status {}: {}",
                status,
                truncate_body(&body),
            ));
        }

        let parsed: ForecastPayload =
            serde_json::from_str(&body).context("Failed to parse OpenWeather One Call JSON")?;

        debug!(hourly = parsed.hourly.len(), "Weather data fetched successfully");
        Ok(parsed)
    }
}

#[async_trait]
impl ForecastProvider for OpenWeatherProvider {
    async fn fetch_forecast(&self) -> crate::error::Result<ForecastPayload> {
        self.fetch_one_call().await.map_err(Error::fetch)
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() > MAX {
        let cut = (0..=MAX).rev().find(|i| body.is_char_boundary(*i)).unwrap_or(0);
        format!("{}...", &body[..cut])
    } else {
        body.to_string()
    }
}
