use async_trait::async_trait;
use std::fmt::Debug;

use crate::{Settings, error::Result, model::ForecastPayload};

pub mod openweather;

pub use openweather::OpenWeatherProvider;

/// Source of forecast snapshots for a fixed location.
#[async_trait]
pub trait ForecastProvider: Send + Sync + Debug {
    /// Fetch a fresh forecast. Every failure surfaces as [`crate::Error::Fetch`].
    async fn fetch_forecast(&self) -> Result<ForecastPayload>;
}

/// Construct the forecast provider described by validated settings.
pub fn provider_from_settings(settings: &Settings) -> Box<dyn ForecastProvider> {
    Box::new(OpenWeatherProvider::new(
        settings.api_key.clone(),
        settings.location.lat,
        settings.location.lon,
    ))
}
