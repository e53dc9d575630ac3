//! Per-metric set of sensors that have ever produced a reading.

use std::sync::Arc;
use tracing::info;

use crate::cache::kv::{get_or_default, put, CacheError, KvStore};
use crate::cache::KeyedLocks;
use crate::events::{EventBus, PipelineEvent};
use crate::metric::Metric;

/// Grow-only registry stored under `sensors:<metric>`.
pub struct RegisteredSensors {
    kv: Arc<dyn KvStore>,
    bus: EventBus,
    locks: KeyedLocks,
}

impl RegisteredSensors {
    pub fn new(kv: Arc<dyn KvStore>, bus: EventBus) -> Self {
        Self {
            kv,
            bus,
            locks: KeyedLocks::new(),
        }
    }

    /// Add a sensor if absent. Returns true when it was newly added, in
    /// which case the full list is published as a registry change.
    pub async fn register_if_absent(
        &self,
        metric: Metric,
        sensor_id: &str,
    ) -> Result<bool, CacheError> {
        let key = metric.registry_key();
        let _guard = self.locks.lock(&key).await;

        let mut sensors: Vec<String> = get_or_default(self.kv.as_ref(), &key).await?;
        if sensors.iter().any(|s| s == sensor_id) {
            return Ok(false);
        }

        sensors.push(sensor_id.to_string());
        put(self.kv.as_ref(), &key, &sensors, None).await?;
        info!(metric = %metric, sensor_id, "registered new sensor");

        self.bus
            .publish(PipelineEvent::RegistryChanged { metric, sensors });
        Ok(true)
    }

    /// All sensors registered for a metric, in registration order.
    pub async fn list(&self, metric: Metric) -> Result<Vec<String>, CacheError> {
        get_or_default(self.kv.as_ref(), &metric.registry_key()).await
    }
}
