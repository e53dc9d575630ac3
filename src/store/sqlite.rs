//! SQLite-backed [`DurableStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::{DurableStore, StoreError, StoredReading};
use crate::cache::Reading;
use crate::metric::Metric;

const DDL: &str = "
    PRAGMA foreign_keys = ON;
    CREATE TABLE IF NOT EXISTS sensors (
        id TEXT PRIMARY KEY
    );
    CREATE TABLE IF NOT EXISTS readings (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        sensor_id TEXT NOT NULL REFERENCES sensors(id),
        metric TEXT NOT NULL,
        value REAL NOT NULL,
        timestamp_ms INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS readings_by_sensor ON readings (sensor_id, metric, id);
";

/// Single-connection SQLite store. Blocking calls run on the blocking pool.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(DDL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| StoreError::Unavailable("sqlite connection lock poisoned".into()))?;
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

#[async_trait]
impl DurableStore for SqliteStore {
    async fn ensure_sensor(&self, sensor_id: &str) -> Result<bool, StoreError> {
        let sensor_id = sensor_id.to_string();
        self.with_conn(move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO sensors (id) VALUES (?1)",
                params![sensor_id],
            )?;
            Ok(inserted > 0)
        })
        .await
    }

    async fn append_reading(
        &self,
        metric: Metric,
        sensor_id: &str,
        reading: &Reading,
    ) -> Result<StoredReading, StoreError> {
        let sensor_id = sensor_id.to_string();
        let reading = reading.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO readings (sensor_id, metric, value, timestamp_ms) VALUES (?1, ?2, ?3, ?4)",
                params![
                    sensor_id,
                    metric.name(),
                    reading.value,
                    reading.timestamp.timestamp_millis()
                ],
            )?;
            Ok(StoredReading {
                id: conn.last_insert_rowid(),
                sensor_id,
                metric,
                value: reading.value,
                timestamp: reading.timestamp,
            })
        })
        .await
    }

    async fn readings(
        &self,
        metric: Metric,
        sensor_id: &str,
    ) -> Result<Vec<StoredReading>, StoreError> {
        let sensor_id = sensor_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, value, timestamp_ms FROM readings
                 WHERE sensor_id = ?1 AND metric = ?2
                 ORDER BY id DESC",
            )?;
            let rows = stmt
                .query_map(params![sensor_id, metric.name()], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, f64>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(id, value, timestamp_ms)| -> Result<StoredReading, StoreError> {
                    let timestamp = DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
                        .ok_or_else(|| {
                            StoreError::InvalidRow(format!("row {} has bad timestamp", id))
                        })?;
                    Ok(StoredReading {
                        id,
                        sensor_id: sensor_id.clone(),
                        metric,
                        value,
                        timestamp,
                    })
                })
                .collect()
        })
        .await
    }
}
