// src/store/mod.rs
//! Durable storage for flushed readings.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::Reading;
use crate::metric::Metric;

/// A persisted reading row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReading {
    /// Append sequence, increasing with every insert.
    pub id: i64,
    pub sensor_id: String,
    pub metric: Metric,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("invalid stored row: {0}")]
    InvalidRow(String),
    #[error("store task failed: {0}")]
    Task(String),
}

/// Create/find/append operations on the backing store.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Create the sensor row if missing. Returns true when it was created.
    async fn ensure_sensor(&self, sensor_id: &str) -> Result<bool, StoreError>;

    /// Append one reading row for a sensor.
    async fn append_reading(
        &self,
        metric: Metric,
        sensor_id: &str,
        reading: &Reading,
    ) -> Result<StoredReading, StoreError>;

    /// Persisted rows for a sensor, newest insert first.
    async fn readings(&self, metric: Metric, sensor_id: &str)
        -> Result<Vec<StoredReading>, StoreError>;
}
