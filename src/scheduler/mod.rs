// src/scheduler/mod.rs
//! Periodic flush of cached telemetry to the durable store.
//!
//! On every tick, for each metric, the newest cached reading of every sensor
//! that is both registered for that metric and currently active is appended to
//! the store. A failing sensor is logged and skipped; the rest of the batch
//! still runs.

mod stats;

pub use stats::{FlushReport, FlushStats, FlushStatsSnapshot};

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::cache::{CacheError, TelemetryCache};
use crate::metric::{sensor_key, Metric};
use crate::registry::SensorRegistry;
use crate::store::{DurableStore, StoreError, StoredReading};

/// Reference flush interval: every two minutes.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(120);

/// Longest accepted flush interval. Longer periods are clamped to it.
pub const MAX_FLUSH_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, thiserror::Error)]
pub enum FlushError {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct FlushScheduler {
    cache: Arc<TelemetryCache>,
    registry: Arc<SensorRegistry>,
    store: Arc<dyn DurableStore>,
    interval: Duration,
    stats: Arc<FlushStats>,
}

impl FlushScheduler {
    pub fn new(
        cache: Arc<TelemetryCache>,
        registry: Arc<SensorRegistry>,
        store: Arc<dyn DurableStore>,
        interval: Duration,
    ) -> Self {
        Self {
            cache,
            registry,
            store,
            // tokio intervals reject a zero period and overflow on huge ones
            interval: interval.clamp(Duration::from_millis(1), MAX_FLUSH_INTERVAL),
            stats: Arc::new(FlushStats::default()),
        }
    }

    /// Share counters with an externally owned [`FlushStats`].
    pub fn with_stats(mut self, stats: Arc<FlushStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats(&self) -> Arc<FlushStats> {
        self.stats.clone()
    }

    /// Run one flush over every metric.
    #[tracing::instrument(name = "flush_tick", skip(self))]
    pub async fn tick(&self) -> FlushReport {
        let mut report = FlushReport::default();

        for metric in Metric::all() {
            let sensors = match self.registry.registered_and_active(*metric).await {
                Ok(sensors) => sensors,
                Err(e) => {
                    error!(metric = %metric, error = %e, "failed to compute flush set");
                    report
                        .failed
                        .insert(format!("*:{}", metric.name()), e.to_string());
                    continue;
                }
            };

            for sensor_id in sensors {
                let key = sensor_key(&sensor_id, *metric);
                match self.flush_sensor(*metric, &sensor_id).await {
                    Ok(Some(row)) => {
                        info!(
                            metric = %metric,
                            sensor_id = %sensor_id,
                            value = row.value,
                            "reading persisted"
                        );
                        report.flushed.insert(key, row.value);
                    }
                    Ok(None) => {
                        debug!(metric = %metric, sensor_id = %sensor_id, "nothing cached, skipping");
                        report.empty.push(key);
                    }
                    Err(e) => {
                        error!(
                            metric = %metric,
                            sensor_id = %sensor_id,
                            error = %e,
                            "flush failed, reading dropped for this tick"
                        );
                        report.failed.insert(key, e.to_string());
                    }
                }
            }
        }

        self.stats.record(&report, Utc::now().timestamp_millis());
        if report.is_clean() {
            info!(
                flushed = report.flushed.len(),
                empty = report.empty.len(),
                "flush tick complete"
            );
        } else {
            warn!(
                flushed = report.flushed.len(),
                empty = report.empty.len(),
                failed = report.failed.len(),
                "flush tick complete with failures"
            );
        }
        report
    }

    async fn flush_sensor(
        &self,
        metric: Metric,
        sensor_id: &str,
    ) -> Result<Option<StoredReading>, FlushError> {
        let window = self.cache.get_window(metric, sensor_id).await?;
        let Some(latest) = window.latest() else {
            return Ok(None);
        };

        if self.store.ensure_sensor(sensor_id).await? {
            debug!(sensor_id, "created sensor row");
        }
        let row = self.store.append_reading(metric, sensor_id, latest).await?;
        Ok(Some(row))
    }

    /// Run ticks in the background until the handle is stopped.
    ///
    /// The first tick fires one interval after spawning.
    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let stats = self.stats.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_secs = self.interval.as_secs(), "flush scheduler started");

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        // Shutdown is not polled while a tick runs.
                        self.tick().await;
                    }
                }
            }

            info!("flush scheduler stopped");
        });

        SchedulerHandle {
            shutdown_tx,
            handle,
            stats,
        }
    }
}

/// Handle to a spawned [`FlushScheduler`].
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
    stats: Arc<FlushStats>,
}

impl SchedulerHandle {
    pub fn stats(&self) -> Arc<FlushStats> {
        self.stats.clone()
    }

    /// Stop future ticks and wait for an in-flight tick to finish.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            error!(error = %e, "flush scheduler task failed");
        }
    }
}
