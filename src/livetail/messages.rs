//! Wire format of the live WebSocket stream.

use serde::{Deserialize, Serialize};

use crate::cache::SensorWindow;
use crate::registry::ActivityMap;

/// Message types sent to WebSocket clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    /// Full registered list of a metric, under `<metric>-registered-sensors`.
    RegisteredSensors { event: String, data: Vec<String> },
    /// Full window of one sensor, under `<metric>-cache-data-update-<id>`.
    WindowUpdate {
        event: String,
        sensor_id: String,
        data: SensorWindow,
    },
    /// Activity map, under `system-registered-sensors`.
    SystemSensors { event: String, data: ActivityMap },
    /// Events were skipped because this client fell behind.
    Dropped { count: u64 },
    Error { message: String },
}

/// Requests accepted from WebSocket clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe { sensor_id: String },
    Unsubscribe { sensor_id: String },
    /// Re-send the namespace snapshot.
    Sync,
}
