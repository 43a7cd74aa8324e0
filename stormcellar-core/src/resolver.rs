//! Picks the single condition code that represents "now" from a forecast.
//!
//! The lookup is a fallback chain, each step tried only when the previous one
//! produced no structurally usable entry (one whose `weather` list is non-empty):
//!
//! 1. the first hourly block whose local hour equals the local hour of `now`;
//! 2. the latest hourly block stamped at or before `now` (untruncated);
//! 3. the `current` block.
//!
//! If all three come up empty the result is [`Error::NoDataAvailable`].

use chrono::{DateTime, DurationRound, TimeZone};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::model::{ConditionCode, ForecastPayload, HourlyForecast};

/// Which step of the fallback chain produced a [`Selection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionSource {
    ExactHour,
    MostRecentPast,
    Current,
}

impl ConditionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionSource::ExactHour => "exact-hour",
            ConditionSource::MostRecentPast => "most-recent-past",
            ConditionSource::Current => "current",
        }
    }
}

impl std::fmt::Display for ConditionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub code: ConditionCode,
    pub source: ConditionSource,
    /// Timestamp of the hourly block used; `None` for the current block.
    pub dt: Option<i64>,
}

/// Start of the local hour containing `dt`, in `dt`'s own zone.
pub(crate) fn hour_start<Tz: TimeZone>(dt: &DateTime<Tz>) -> Option<DateTime<Tz>> {
    dt.clone().duration_trunc(chrono::Duration::hours(1)).ok()
}

/// Select the condition code for `now` from `forecast`.
///
/// The input is only read; calling this twice with the same arguments yields
/// the same result.
pub fn select<Tz: TimeZone>(forecast: &ForecastPayload, now: &DateTime<Tz>) -> Result<Selection> {
    if let Some(entry) = exact_hour(forecast, now) {
        match entry.condition_code() {
            Some(code) => {
                info!(dt = entry.dt, %code, "Found current hour weather data");
                return Ok(Selection {
                    code,
                    source: ConditionSource::ExactHour,
                    dt: Some(entry.dt),
                });
            }
            None => debug!(dt = entry.dt, "Current hour entry has no conditions"),
        }
    }

    warn!("Current hour data not available, using most recent hour");
    if let Some(entry) = most_recent_past(forecast, now) {
        match entry.condition_code() {
            Some(code) => {
                let local = now.timezone().timestamp_opt(entry.dt, 0).single();
                info!(dt = entry.dt, at = ?local, %code, "Using weather data from earlier hour");
                return Ok(Selection {
                    code,
                    source: ConditionSource::MostRecentPast,
                    dt: Some(entry.dt),
                });
            }
            None => debug!(dt = entry.dt, "Most recent hourly entry has no conditions"),
        }
    }

    if let Some(code) = forecast.current.as_ref().and_then(|c| c.condition_code()) {
        warn!(%code, "Using current weather data as final fallback");
        return Ok(Selection {
            code,
            source: ConditionSource::Current,
            dt: None,
        });
    }

    Err(Error::NoDataAvailable)
}

/// First hourly entry (in payload order) whose local hour matches `now`'s.
fn exact_hour<'a, Tz: TimeZone>(
    forecast: &'a ForecastPayload,
    now: &DateTime<Tz>,
) -> Option<&'a HourlyForecast> {
    let target = hour_start(now)?.timestamp();
    let tz = now.timezone();

    forecast.hourly.iter().find(|entry| {
        tz.timestamp_opt(entry.dt, 0)
            .single()
            .and_then(|local| hour_start(&local))
            .is_some_and(|start| start.timestamp() == target)
    })
}

/// Latest hourly entry stamped at or before the raw `now`.
fn most_recent_past<'a, Tz: TimeZone>(
    forecast: &'a ForecastPayload,
    now: &DateTime<Tz>,
) -> Option<&'a HourlyForecast> {
    let now_ts = now.timestamp();

    forecast
        .hourly
        .iter()
        .filter(|entry| entry.dt <= now_ts)
        .max_by_key(|entry| entry.dt)
}
