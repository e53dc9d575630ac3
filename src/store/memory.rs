use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use super::{DurableStore, StoreError, StoredReading};
use crate::cache::Reading;
use crate::metric::Metric;

#[derive(Default)]
struct Tables {
    sensors: HashSet<String>,
    readings: Vec<StoredReading>,
    next_id: i64,
}

/// Process-local store, used when no database is configured and in tests.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }

    pub fn sensor_count(&self) -> usize {
        self.tables().map(|t| t.sensors.len()).unwrap_or(0)
    }

    pub fn reading_count(&self) -> usize {
        self.tables().map(|t| t.readings.len()).unwrap_or(0)
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn ensure_sensor(&self, sensor_id: &str) -> Result<bool, StoreError> {
        Ok(self.tables()?.sensors.insert(sensor_id.to_string()))
    }

    async fn append_reading(
        &self,
        metric: Metric,
        sensor_id: &str,
        reading: &Reading,
    ) -> Result<StoredReading, StoreError> {
        let mut tables = self.tables()?;
        if !tables.sensors.contains(sensor_id) {
            return Err(StoreError::InvalidRow(format!(
                "unknown sensor {}",
                sensor_id
            )));
        }
        tables.next_id += 1;
        let row = StoredReading {
            id: tables.next_id,
            sensor_id: sensor_id.to_string(),
            metric,
            value: reading.value,
            timestamp: reading.timestamp,
        };
        tables.readings.push(row.clone());
        Ok(row)
    }

    async fn readings(
        &self,
        metric: Metric,
        sensor_id: &str,
    ) -> Result<Vec<StoredReading>, StoreError> {
        let tables = self.tables()?;
        Ok(tables
            .readings
            .iter()
            .rev()
            .filter(|r| r.metric == metric && r.sensor_id == sensor_id)
            .cloned()
            .collect())
    }
}
