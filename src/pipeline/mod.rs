// src/pipeline/mod.rs
//! Wiring of cache, registry, bus and store.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheError, KvStore, MemoryKv, SensorWindow, TelemetryCache};
use crate::events::{EventBus, DEFAULT_EVENT_CAPACITY};
use crate::metric::Metric;
use crate::registry::{ActivityChange, SensorRegistry};
use crate::scheduler::{FlushScheduler, FlushStats, DEFAULT_FLUSH_INTERVAL};
use crate::store::{DurableStore, MemoryStore};

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub window_ttl: Option<Duration>,
    pub event_capacity: usize,
    pub flush_interval: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            window_ttl: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

/// Shared handles to every component. Cheap to clone behind an `Arc`.
pub struct Pipeline {
    bus: EventBus,
    registry: Arc<SensorRegistry>,
    cache: Arc<TelemetryCache>,
    store: Arc<dyn DurableStore>,
    flush_stats: Arc<FlushStats>,
    flush_interval: Duration,
}

impl Pipeline {
    pub fn new(kv: Arc<dyn KvStore>, store: Arc<dyn DurableStore>, options: PipelineOptions) -> Self {
        let bus = EventBus::new(options.event_capacity);
        let registry = Arc::new(SensorRegistry::new(kv.clone(), bus.clone()));
        let cache = Arc::new(
            TelemetryCache::new(kv, registry.clone(), bus.clone())
                .with_window_ttl(options.window_ttl),
        );

        Self {
            bus,
            registry,
            cache,
            store,
            flush_stats: Arc::new(FlushStats::default()),
            flush_interval: options.flush_interval,
        }
    }

    /// Memory cache and memory store with default options.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryKv::new()),
            Arc::new(MemoryStore::new()),
            PipelineOptions::default(),
        )
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn registry(&self) -> &Arc<SensorRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<TelemetryCache> {
        &self.cache
    }

    pub fn store(&self) -> &Arc<dyn DurableStore> {
        &self.store
    }

    pub fn flush_stats(&self) -> Arc<FlushStats> {
        self.flush_stats.clone()
    }

    pub async fn record_reading(
        &self,
        metric: Metric,
        sensor_id: &str,
        value: f64,
    ) -> Result<SensorWindow, CacheError> {
        self.cache.record_reading(metric, sensor_id, value).await
    }

    pub async fn set_activity(
        &self,
        sensor_id: &str,
        activated: bool,
    ) -> Result<ActivityChange, CacheError> {
        if activated {
            self.registry.activate(sensor_id).await
        } else {
            self.registry.deactivate(sensor_id).await
        }
    }

    /// Scheduler over this pipeline, reporting into [`Pipeline::flush_stats`].
    pub fn scheduler(&self) -> FlushScheduler {
        FlushScheduler::new(
            self.cache.clone(),
            self.registry.clone(),
            self.store.clone(),
            self.flush_interval,
        )
        .with_stats(self.flush_stats.clone())
    }
}
