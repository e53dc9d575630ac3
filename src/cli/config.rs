use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::ServeArgs;
use crate::events::DEFAULT_EVENT_CAPACITY;
use crate::ingest::mqtt::MqttSettings;
use crate::ingest::DEFAULT_INGEST_CAPACITY;
use crate::pipeline::PipelineOptions;

pub const CONFIG_FILENAME: &str = "sensorpipe.toml";

/// Upper bound for `flush_interval_secs` and `cache_ttl_secs`: one year.
pub const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen: String,
    pub flush_interval_secs: u64,
    pub cache_ttl_secs: Option<u64>,
    pub database: Option<PathBuf>,
    pub log_format: LogFormat,
    pub event_capacity: usize,
    pub ingest_capacity: usize,
    pub mqtt: Option<MqttSettings>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:3003".to_string(),
            flush_interval_secs: 120,
            cache_ttl_secs: None,
            database: None,
            log_format: LogFormat::Text,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            ingest_capacity: DEFAULT_INGEST_CAPACITY,
            mqtt: None,
        }
    }
}

impl Config {
    /// Load from `explicit`, else `sensorpipe.toml`, else the user config
    /// dir, else defaults. Only an explicit path is required to exist.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return load_config_from_path(path);
        }

        let local = Path::new(CONFIG_FILENAME);
        if local.exists() {
            return load_config_from_path(local);
        }

        match default_config_path() {
            Some(path) if path.exists() => load_config_from_path(path),
            _ => Ok(Self::default()),
        }
    }

    /// Command-line flags win over file values.
    pub fn apply_overrides(&mut self, args: &ServeArgs) {
        if let Some(listen) = &args.listen {
            self.listen = listen.clone();
        }
        if let Some(secs) = args.flush_interval_secs {
            self.flush_interval_secs = secs;
        }
        if let Some(secs) = args.cache_ttl_secs {
            self.cache_ttl_secs = Some(secs);
        }
        if let Some(database) = &args.database {
            self.database = Some(database.clone());
        }
        if let Some(host) = &args.mqtt_host {
            let mut mqtt = self.mqtt.clone().unwrap_or_default();
            mqtt.host = host.clone();
            self.mqtt = Some(mqtt);
        }
        if let Some(format) = args.log_format {
            self.log_format = format;
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.listen
            .parse::<SocketAddr>()
            .with_context(|| format!("Invalid listen address '{}'", self.listen))?;
        if self.flush_interval_secs == 0 {
            bail!("flush_interval_secs must be greater than zero");
        }
        if self.flush_interval_secs > MAX_DURATION_SECS {
            bail!(
                "flush_interval_secs must be at most {} (one year)",
                MAX_DURATION_SECS
            );
        }
        match self.cache_ttl_secs {
            Some(0) => bail!("cache_ttl_secs must be greater than zero when set"),
            Some(secs) if secs > MAX_DURATION_SECS => bail!(
                "cache_ttl_secs must be at most {} (one year)",
                MAX_DURATION_SECS
            ),
            _ => {}
        }
        Ok(())
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            window_ttl: self.cache_ttl_secs.map(Duration::from_secs),
            event_capacity: self.event_capacity,
            flush_interval: Duration::from_secs(self.flush_interval_secs),
        }
    }
}

/// `<config_dir>/sensorpipe/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("sensorpipe").join("config.toml"))
}

pub fn load_config_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read {}", path.as_ref().display()))?;
    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.as_ref().display()))?;
    Ok(config)
}
