// src/registry/mod.rs
//! Sensor registry: which sensors ever reported (per metric) and which are
//! currently streaming (cross-metric).

mod activity;
mod registered;

pub use activity::{ActivityChange, ActivityMap, SensorActivity};
pub use registered::RegisteredSensors;

use std::collections::HashSet;
use std::sync::Arc;

use crate::cache::kv::{CacheError, KvStore};
use crate::events::EventBus;
use crate::metric::Metric;

/// Facade over the two independent sub-registries.
pub struct SensorRegistry {
    registered: RegisteredSensors,
    activity: SensorActivity,
}

impl SensorRegistry {
    pub fn new(kv: Arc<dyn KvStore>, bus: EventBus) -> Self {
        Self {
            registered: RegisteredSensors::new(kv.clone(), bus.clone()),
            activity: SensorActivity::new(kv, bus),
        }
    }

    pub async fn register_if_absent(
        &self,
        metric: Metric,
        sensor_id: &str,
    ) -> Result<bool, CacheError> {
        self.registered.register_if_absent(metric, sensor_id).await
    }

    pub async fn list_registered(&self, metric: Metric) -> Result<Vec<String>, CacheError> {
        self.registered.list(metric).await
    }

    pub async fn activate(&self, sensor_id: &str) -> Result<ActivityChange, CacheError> {
        self.activity.activate(sensor_id).await
    }

    pub async fn deactivate(&self, sensor_id: &str) -> Result<ActivityChange, CacheError> {
        self.activity.deactivate(sensor_id).await
    }

    pub async fn list_active(&self) -> Result<ActivityMap, CacheError> {
        self.activity.list().await
    }

    /// Sensors registered for `metric` that are currently active, in
    /// registration order.
    pub async fn registered_and_active(&self, metric: Metric) -> Result<Vec<String>, CacheError> {
        let active: HashSet<String> = self
            .list_active()
            .await?
            .into_iter()
            .filter_map(|(id, on)| on.then_some(id))
            .collect();

        Ok(self
            .list_registered(metric)
            .await?
            .into_iter()
            .filter(|id| active.contains(id))
            .collect())
    }
}
