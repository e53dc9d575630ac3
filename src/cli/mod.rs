pub mod commands;
pub mod config;
pub mod url;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use config::LogFormat;

#[derive(Parser)]
#[command(name = "sensorpipe")]
#[command(about = "Cache, stream and persist sensor telemetry")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the ingest, streaming and flush service
    Serve(ServeArgs),
    /// Stream live registry and window updates
    Tail(TailArgs),
    /// List registered sensors of a metric
    Sensors(SensorsArgs),
    /// Show cached or persisted readings of a sensor
    Readings(ReadingsArgs),
    /// Publish random readings for a sensor
    Simulate(SimulateArgs),
}

#[derive(clap::Args, Default)]
pub struct ServeArgs {
    /// Path to config file (defaults to sensorpipe.toml, then the user config dir)
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Listen address, e.g. 0.0.0.0:3003
    #[arg(long, env = "SENSORPIPE_LISTEN")]
    pub listen: Option<String>,

    /// Seconds between flushes to the database
    #[arg(long)]
    pub flush_interval_secs: Option<u64>,

    /// Expire idle sensor windows after this many seconds
    #[arg(long)]
    pub cache_ttl_secs: Option<u64>,

    /// SQLite database path (in-memory store if unset)
    #[arg(long, env = "SENSORPIPE_DATABASE")]
    pub database: Option<PathBuf>,

    /// MQTT broker host; enables the MQTT adapter
    #[arg(long, env = "SENSORPIPE_MQTT_HOST")]
    pub mqtt_host: Option<String>,

    /// Log output format
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormat>,
}

#[derive(clap::Args)]
pub struct TailArgs {
    /// Metric to tail (temperature, humidity) or "system" for activity
    pub metric: String,

    /// Sensor whose window updates should be streamed
    pub sensor: Option<String>,

    /// Server URL
    #[arg(long, env = "SENSORPIPE_URL")]
    pub url: Option<String>,
}

#[derive(clap::Args)]
pub struct SensorsArgs {
    /// Metric name
    pub metric: String,

    /// Server URL
    #[arg(long, env = "SENSORPIPE_URL")]
    pub url: Option<String>,
}

#[derive(clap::Args)]
pub struct ReadingsArgs {
    /// Metric name
    pub metric: String,

    /// Sensor id
    pub sensor: String,

    /// Query persisted rows instead of the cache
    #[arg(long)]
    pub db: bool,

    /// Server URL
    #[arg(long, env = "SENSORPIPE_URL")]
    pub url: Option<String>,
}

#[derive(clap::Args)]
pub struct SimulateArgs {
    /// Metric name
    pub metric: String,

    /// Sensor id to publish as
    pub sensor: String,

    /// Seconds between readings
    #[arg(long, default_value = "2")]
    pub interval_secs: u64,

    /// Stop after this many readings
    #[arg(long)]
    pub count: Option<u64>,

    /// Lowest generated value
    #[arg(long, default_value = "10")]
    pub min: f64,

    /// Highest generated value
    #[arg(long, default_value = "25")]
    pub max: f64,

    /// Server URL
    #[arg(long, env = "SENSORPIPE_URL")]
    pub url: Option<String>,
}
