use serde::{Deserialize, Serialize};
use std::fmt;

/// Cache key holding the cross-metric activity map.
pub const ACTIVITY_KEY: &str = "sensors:active";

/// Event name used when pushing the activity map to system subscribers.
pub const SYSTEM_SENSORS_EVENT: &str = "system-registered-sensors";

/// Type-safe representation of the measured quantities
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Temperature,
    Humidity,
}

impl Metric {
    /// Name used in routes, cache keys and topics
    pub fn name(&self) -> &'static str {
        match self {
            Metric::Temperature => "temperature",
            Metric::Humidity => "humidity",
        }
    }

    /// All supported metrics
    pub fn all() -> &'static [Metric] {
        &[Metric::Temperature, Metric::Humidity]
    }

    /// Parse from metric name string
    pub fn from_name(name: &str) -> Option<Metric> {
        match name {
            "temperature" => Some(Metric::Temperature),
            "humidity" => Some(Metric::Humidity),
            _ => None,
        }
    }

    /// Cache key of the registered-sensor list: `sensors:<metric>`
    pub fn registry_key(&self) -> String {
        format!("sensors:{}", self.name())
    }

    /// Cache key of a sensor window: `data:<metric>:<sensor_id>`
    pub fn window_key(&self, sensor_id: &str) -> String {
        format!("data:{}:{}", self.name(), sensor_id)
    }

    /// Event name for registry broadcasts of this metric.
    pub fn registered_event(&self) -> &'static str {
        match self {
            Metric::Temperature => "temperature-registered-sensors",
            Metric::Humidity => "humidity-registered-sensors",
        }
    }

    /// Per-sensor topic: fixed prefix followed by the sensor id.
    pub fn update_topic(&self, sensor_id: &str) -> String {
        format!("{}-cache-data-update-{}", self.name(), sensor_id)
    }

    /// Transport topic suffix for readings, appended to the base topic.
    pub fn data_topic_suffix(&self) -> &'static str {
        match self {
            Metric::Temperature => "temperature-sensor/data",
            Metric::Humidity => "humidity-sensor/data",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Build the `{sensor}:{metric}` name used to key per-sensor results.
pub fn sensor_key(sensor_id: &str, metric: Metric) -> String {
    format!("{}:{}", sensor_id, metric.name())
}
