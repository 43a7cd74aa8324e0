use anyhow::Context;
use clap::{Parser, Subcommand};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use stormcellar_core::{
    Config, ConditionPublisher, ForecastProvider, HourlyScheduler, MqttPublisher, Pipeline,
    Settings, provider_from_settings,
};
use tracing::{info, warn};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(
    name = "stormcellar",
    version,
    about = "Publishes the current weather condition code to MQTT every hour"
)]
pub struct Cli {
    /// Config file to read instead of the platform default.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Publish now and then every hour at two minutes past (the default).
    Run,

    /// Run a single fetch/resolve/publish cycle and exit.
    Once {
        /// Print the resolved condition without connecting to the broker.
        #[arg(long)]
        dry_run: bool,
    },

    /// Interactively write the config file.
    Configure,
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        let path = self.config.as_deref();

        match self.command.clone().unwrap_or(Command::Run) {
            Command::Run => run_daemon(path).await,
            Command::Once { dry_run } => run_once(path, dry_run).await,
            Command::Configure => configure(path),
        }
    }
}

/// `sysexits` EX_CONFIG for configuration problems, 1 for anything else.
pub fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<stormcellar_core::Error>() {
        Some(core) if core.is_fatal() => 78,
        _ => 1,
    }
}

fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    let settings = Config::load(path)?.validate()?;
    Ok(settings)
}

fn banner(settings: &Settings) {
    info!("StormCellar v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded Following Configuration:");
    info!("Lat: {}", settings.location.lat);
    info!("Lon: {}", settings.location.lon);
    info!("MQTT Broker Address: {}", settings.mqtt.broker);
    info!("MQTT Port: {}", settings.mqtt.port);
    info!("MQTT Topic: {}", settings.mqtt.topic);
    info!("Timezone: {}", settings.timezone);
}

async fn run_daemon(path: Option<&Path>) -> anyhow::Result<()> {
    let settings = load_settings(path)?;
    banner(&settings);

    let mut shutdown = Shutdown::install()?;

    let provider: Arc<dyn ForecastProvider> = Arc::from(provider_from_settings(&settings));
    let publisher = MqttPublisher::connect(&settings.mqtt).await;
    let pipeline = Pipeline::new(provider, &settings, settings.zone);
    let mut scheduler = HourlyScheduler::new(settings.zone);

    let cycle = || pipeline.run_cycle(&publisher);
    tokio::select! {
        _ = scheduler.run(cycle, cycle) => {}
        signal = shutdown.recv() => info!("Received {signal}, shutting down gracefully..."),
    }

    if let Err(err) = publisher.disconnect().await {
        warn!(error = %err, "Failed to close MQTT connection");
    }
    Ok(())
}

async fn run_once(path: Option<&Path>, dry_run: bool) -> anyhow::Result<()> {
    let settings = load_settings(path)?;
    let pipeline = Pipeline::new(
        Arc::from(provider_from_settings(&settings)),
        &settings,
        settings.zone,
    );

    if dry_run {
        let selection = pipeline.resolve_once().await?;
        println!("{} ({})", selection.code, selection.source);
        return Ok(());
    }

    let publisher = MqttPublisher::connect(&settings.mqtt).await;
    let result = pipeline.run_cycle(&publisher).await;
    publisher.disconnect().await?;

    let selection = result?;
    println!("{} ({})", selection.code, selection.source);
    Ok(())
}

fn configure(path: Option<&Path>) -> anyhow::Result<()> {
    let mut cfg = Config::load_file(path)?;

    let api_key = inquire::Password::new("OpenWeather API key:")
        .with_help_message("Leave empty to keep the current key")
        .without_confirmation()
        .prompt()?;
    if !api_key.trim().is_empty() {
        cfg.api_key = Some(api_key.trim().to_string());
    }

    cfg.location.lat = inquire::CustomType::<f64>::new("Latitude:")
        .with_default(cfg.location.lat)
        .prompt()?;
    cfg.location.lon = inquire::CustomType::<f64>::new("Longitude:")
        .with_default(cfg.location.lon)
        .prompt()?;
    let broker = inquire::Text::new("MQTT broker host:")
        .with_default(&cfg.mqtt.broker)
        .prompt()?;
    cfg.mqtt.broker = broker;
    cfg.mqtt.port = inquire::CustomType::<u16>::new("MQTT port:")
        .with_default(cfg.mqtt.port)
        .prompt()?;
    let topic = inquire::Text::new("MQTT topic:")
        .with_default(&cfg.mqtt.topic)
        .prompt()?;
    cfg.mqtt.topic = topic;
    let timezone = inquire::Text::new("Timezone (IANA name):")
        .with_default(&cfg.timezone)
        .prompt()?;
    cfg.timezone = timezone;

    // surface problems now rather than at the next daemon start
    cfg.clone().validate()?;

    let written = cfg.save(path)?;
    println!("Saved configuration to {}", written.display());
    Ok(())
}

/// SIGINT and, on Unix, SIGTERM.
struct Shutdown {
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl Shutdown {
    fn install() -> anyhow::Result<Self> {
        Ok(Self {
            #[cfg(unix)]
            terminate: tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .context("Failed to install SIGTERM handler")?,
        })
    }

    #[cfg(unix)]
    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            Ok(()) = tokio::signal::ctrl_c() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }

    #[cfg(not(unix))]
    async fn recv(&mut self) -> &'static str {
        let _ = tokio::signal::ctrl_c().await;
        "SIGINT"
    }
}
