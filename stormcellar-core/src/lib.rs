//! Core library for the `stormcellar` daemon.
//!
//! This crate defines:
//! - Configuration loading & validation
//! - The forecast provider and message bus abstractions
//! - Selection of the condition code that represents "now"
//! - Hour-aligned scheduling of the poll → resolve → publish cycle
//!
//! It is used by `stormcellar-cli`, but the resolver and scheduler have no I/O of
//! their own and can be driven by any provider or publisher implementation.

pub mod config;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod provider;
pub mod publisher;
pub mod resolver;
pub mod scheduler;

pub use config::{Config, Location, MqttSettings, Settings};
pub use error::{Error, Result};
pub use model::{ConditionCode, ConditionMessage, ForecastPayload};
pub use pipeline::{Pipeline, fetch_and_select};
pub use provider::{ForecastProvider, OpenWeatherProvider, provider_from_settings};
pub use publisher::{ConditionPublisher, MqttPublisher};
pub use resolver::{ConditionSource, Selection, select};
pub use scheduler::{HourlyScheduler, ScheduleState};
