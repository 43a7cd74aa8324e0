use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize, Serializer};

/// Provider-defined weather category, e.g. `800` for clear sky.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConditionCode(pub u32);

impl std::fmt::Display for ConditionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One entry of a block's `weather` array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherCondition {
    pub id: ConditionCode,
    #[serde(default)]
    pub main: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CurrentConditions {
    #[serde(default)]
    pub dt: Option<i64>,
    #[serde(default)]
    pub weather: Vec<WeatherCondition>,
}

impl CurrentConditions {
    pub fn condition_code(&self) -> Option<ConditionCode> {
        self.weather.first().map(|w| w.id)
    }
}

/// Forecast for the hour starting at `dt` (epoch seconds).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HourlyForecast {
    pub dt: i64,
    #[serde(default)]
    pub weather: Vec<WeatherCondition>,
}

impl HourlyForecast {
    pub fn condition_code(&self) -> Option<ConditionCode> {
        self.weather.first().map(|w| w.id)
    }
}

/// The subset of a One Call response this service reads.
///
/// `hourly` is neither sorted nor guaranteed to contain the current hour.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForecastPayload {
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub current: Option<CurrentConditions>,
    #[serde(default)]
    pub hourly: Vec<HourlyForecast>,
}

/// Body published to the MQTT topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConditionMessage {
    pub weather_id: ConditionCode,
    #[serde(serialize_with = "iso_millis")]
    pub timestamp: DateTime<Utc>,
    pub timezone: String,
}

impl ConditionMessage {
    pub fn new(weather_id: ConditionCode, timestamp: DateTime<Utc>, timezone: &str) -> Self {
        Self {
            weather_id,
            timestamp,
            timezone: timezone.to_string(),
        }
    }
}

fn iso_millis<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}
