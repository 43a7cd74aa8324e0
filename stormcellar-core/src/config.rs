use anyhow::{Context, Result, anyhow};
use chrono_tz::Tz;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::error::Error;

/// Coordinates the forecast is requested for.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

impl Default for Location {
    fn default() -> Self {
        Self {
            lat: 40.7484,
            lon: -73.9967,
        }
    }
}

/// Broker connection and destination topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttSettings {
    pub broker: String,
    pub port: u16,
    pub topic: String,
    pub client_id: String,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            broker: "localhost".to_string(),
            port: 1883,
            topic: "weather/data".to_string(),
            client_id: "stormcellar".to_string(),
        }
    }
}

impl MqttSettings {
    pub fn url(&self) -> String {
        format!("mqtt://{}:{}", self.broker, self.port)
    }
}

/// Configuration as loaded from disk and environment, not yet validated.
///
/// Example TOML:
/// ```toml
/// api_key = "..."
/// timezone = "America/New_York"
///
/// [location]
/// lat = 40.7484
/// lon = -73.9967
///
/// [mqtt]
/// broker = "localhost"
/// port = 1883
/// topic = "weather/data"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_key: Option<String>,
    pub location: Location,
    pub mqtt: MqttSettings,
    /// IANA zone name. Defines the local hour and is published alongside each condition.
    pub timezone: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            location: Location::default(),
            mqtt: MqttSettings::default(),
            timezone: "America/New_York".to_string(),
        }
    }
}

/// Validated configuration; the API key is guaranteed present.
#[derive(Clone)]
pub struct Settings {
    pub api_key: String,
    pub location: Location,
    pub mqtt: MqttSettings,
    pub timezone: String,
    /// `timezone` parsed; used for hour truncation and scheduling.
    pub zone: Tz,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("api_key", &"<redacted>")
            .field("location", &self.location)
            .field("mqtt", &self.mqtt)
            .field("timezone", &self.timezone)
            .field("zone", &self.zone)
            .finish()
    }
}

impl Config {
    /// Defaults, then the config file (explicit `path` or the platform default),
    /// then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = Self::load_file(path)?;
        cfg.apply_env(|key| std::env::var(key).ok())?;
        Ok(cfg)
    }

    /// Defaults overlaid with the config file only.
    ///
    /// An explicit `path` must exist; the platform default may be absent.
    pub fn load_file(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }

        let path = Self::config_file_path()?;
        if !path.exists() {
            // First run: no config file, defaults only.
            return Ok(Self::default());
        }

        Self::from_file(&path)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Overlay environment variables read through `lookup`.
    ///
    /// Recognised keys: `OPENWEATHER_API_KEY`, `LAT`, `LON`, `MQTT_BROKER`,
    /// `MQTT_PORT`, `MQTT_TOPIC`, `TZ`. Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> std::result::Result<(), Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get("OPENWEATHER_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(lat) = get("LAT") {
            self.location.lat = parse_env("LAT", &lat)?;
        }
        if let Some(lon) = get("LON") {
            self.location.lon = parse_env("LON", &lon)?;
        }
        if let Some(broker) = get("MQTT_BROKER") {
            self.mqtt.broker = broker;
        }
        if let Some(port) = get("MQTT_PORT") {
            self.mqtt.port = parse_env("MQTT_PORT", &port)?;
        }
        if let Some(topic) = get("MQTT_TOPIC") {
            self.mqtt.topic = topic;
        }
        if let Some(tz) = get("TZ") {
            self.timezone = tz;
        }

        Ok(())
    }

    /// Check the loaded values once, before anything is scheduled.
    pub fn validate(self) -> std::result::Result<Settings, Error> {
        let api_key = self
            .api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| Error::Configuration("OPENWEATHER_API_KEY is required".to_string()))?;

        let Location { lat, lon } = self.location;
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(Error::Configuration(format!(
                "location out of range: lat {lat}, lon {lon}"
            )));
        }
        if self.mqtt.topic.is_empty() {
            return Err(Error::Configuration("MQTT topic must not be empty".to_string()));
        }

        let zone: Tz = self.timezone.trim().parse().map_err(|_| {
            Error::Configuration(format!("unknown timezone: {:?}", self.timezone))
        })?;

        Ok(Settings {
            api_key,
            location: self.location,
            mqtt: self.mqtt,
            timezone: self.timezone,
            zone,
        })
    }

    /// Save config to `path` or the platform default, creating parent directories as needed.
    pub fn save(&self, path: Option<&Path>) -> Result<PathBuf> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::config_file_path()?,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(&path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(path)
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("net", "foureyed", "stormcellar")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> std::result::Result<T, Error> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Configuration(format!("{key} has an invalid value: {value:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();

        assert_eq!(cfg.location, Location { lat: 40.7484, lon: -73.9967 });
        assert_eq!(cfg.mqtt.url(), "mqtt://localhost:1883");
        assert_eq!(cfg.mqtt.topic, "weather/data");
        assert_eq!(cfg.timezone, "America/New_York");
        assert!(cfg.api_key.is_none());
    }

    #[test]
    fn validate_errors_when_api_key_missing() {
        let err = Config::default().validate().unwrap_err();

        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.to_string().contains("OPENWEATHER_API_KEY is required"));
    }

    #[test]
    fn validate_rejects_blank_api_key() {
        let cfg = Config {
            api_key: Some("   ".into()),
            ..Config::default()
        };

        assert!(matches!(cfg.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn env_overrides_every_field() {
        let mut cfg = Config::default();
        cfg.apply_env(env(&[
            ("OPENWEATHER_API_KEY", "ENV_KEY"),
            ("LAT", "51.5072"),
            ("LON", "-0.1276"),
            ("MQTT_BROKER", "broker.lan"),
            ("MQTT_PORT", "8883"),
            ("MQTT_TOPIC", "home/weather"),
            ("TZ", "Europe/London"),
        ]))
        .unwrap();

        let settings = cfg.validate().unwrap();
        assert_eq!(settings.api_key, "ENV_KEY");
        assert_eq!(settings.location, Location { lat: 51.5072, lon: -0.1276 });
        assert_eq!(settings.mqtt.url(), "mqtt://broker.lan:8883");
        assert_eq!(settings.mqtt.topic, "home/weather");
        assert_eq!(settings.timezone, "Europe/London");
        assert_eq!(settings.zone, chrono_tz::Europe::London);
    }

    #[test]
    fn empty_env_values_keep_defaults() {
        let mut cfg = Config::default();
        cfg.apply_env(env(&[("LAT", ""), ("MQTT_TOPIC", "  ")])).unwrap();

        assert_eq!(cfg.location.lat, 40.7484);
        assert_eq!(cfg.mqtt.topic, "weather/data");
    }

    #[test]
    fn invalid_numeric_env_is_configuration_error() {
        let mut cfg = Config::default();
        let err = cfg.apply_env(env(&[("MQTT_PORT", "not-a-port")])).unwrap_err();

        assert!(matches!(err, Error::Configuration(ref msg) if msg.contains("MQTT_PORT")));
    }

    #[test]
    fn validate_rejects_out_of_range_location() {
        let mut cfg = Config {
            api_key: Some("KEY".into()),
            ..Config::default()
        };
        cfg.location.lat = 123.0;

        assert!(matches!(cfg.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn validate_rejects_unknown_timezone() {
        let cfg = Config {
            api_key: Some("KEY".into()),
            timezone: "Mars/Olympus_Mons".into(),
            ..Config::default()
        };

        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, Error::Configuration(ref msg) if msg.contains("Mars/Olympus_Mons")));
    }

    #[test]
    fn validate_parses_timezone_independent_of_host() {
        let cfg = Config {
            api_key: Some("KEY".into()),
            timezone: "Asia/Kolkata".into(),
            ..Config::default()
        };

        let settings = cfg.validate().unwrap();
        assert_eq!(settings.zone, chrono_tz::Asia::Kolkata);
        assert_eq!(settings.timezone, "Asia/Kolkata");
    }

    #[test]
    fn settings_debug_redacts_api_key() {
        let cfg = Config {
            api_key: Some("TOP_SECRET".into()),
            ..Config::default()
        };

        let debug = format!("{:?}", cfg.validate().unwrap());
        assert!(!debug.contains("TOP_SECRET"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            api_key = "FILE_KEY"

            [mqtt]
            topic = "lab/weather"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.api_key.as_deref(), Some("FILE_KEY"));
        assert_eq!(cfg.mqtt.topic, "lab/weather");
        assert_eq!(cfg.mqtt.port, 1883);
        assert_eq!(cfg.location, Location::default());
    }

    #[test]
    fn save_then_load_from_explicit_path() {
        let dir = std::env::temp_dir().join(format!("stormcellar-config-{}", std::process::id()));
        let path = dir.join("config.toml");

        let mut cfg = Config {
            api_key: Some("SAVED".into()),
            ..Config::default()
        };
        cfg.mqtt.broker = "10.0.0.2".into();
        let written = cfg.save(Some(&path)).unwrap();
        assert_eq!(written, path);

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.api_key.as_deref(), Some("SAVED"));
        assert_eq!(loaded.mqtt.broker, "10.0.0.2");

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let err = Config::from_file(Path::new("/nonexistent/stormcellar.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
