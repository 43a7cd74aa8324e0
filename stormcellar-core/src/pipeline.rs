//! One poll → resolve → publish cycle.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tracing::info;

use crate::{
    config::Settings,
    error::{Error, Result},
    model::ConditionMessage,
    provider::ForecastProvider,
    publisher::ConditionPublisher,
    resolver::{self, Selection},
    scheduler::Clock,
};

/// Fetch a forecast and pick the condition for `now`, without publishing.
pub async fn fetch_and_select<Tz: TimeZone>(
    provider: &dyn ForecastProvider,
    now: &DateTime<Tz>,
) -> Result<Selection> {
    let forecast = provider.fetch_forecast().await?;
    resolver::select(&forecast, now)
}

/// Fetch and resolve context for one location, zone and topic.
///
/// The publisher is handed in per cycle so a dry run can resolve without a
/// broker connection.
pub struct Pipeline<Tz: TimeZone> {
    provider: Arc<dyn ForecastProvider>,
    topic: String,
    timezone: String,
    tz: Tz,
    clock: Clock,
}

impl<Tz: TimeZone> Pipeline<Tz> {
    /// `tz` drives hour truncation and is normally `settings.zone`;
    /// `settings.timezone` is the published label.
    pub fn new(provider: Arc<dyn ForecastProvider>, settings: &Settings, tz: Tz) -> Self {
        Self {
            provider,
            topic: settings.mqtt.topic.clone(),
            timezone: settings.timezone.clone(),
            tz,
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn now(&self) -> DateTime<Tz> {
        (self.clock)().with_timezone(&self.tz)
    }

    /// Fetch and resolve for the current local hour without publishing.
    pub async fn resolve_once(&self) -> Result<Selection> {
        fetch_and_select(self.provider.as_ref(), &self.now()).await
    }

    pub async fn run_cycle(&self, publisher: &dyn ConditionPublisher) -> Result<Selection> {
        let selection = self.resolve_once().await?;

        let published_at = (self.clock)();
        let message = ConditionMessage::new(selection.code, published_at, &self.timezone);
        let payload = serde_json::to_vec(&message).map_err(|e| Error::Publish(e.to_string()))?;

        publisher.publish(&self.topic, payload).await?;
        info!(
            source = %selection.source,
            "Published weather_id {} to {}", selection.code, self.topic
        );

        Ok(selection)
    }
}
