//! Cross-metric activity flags toggled by explicit transport signals.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cache::kv::{get_or_default, put, CacheError, KvStore};
use crate::cache::KeyedLocks;
use crate::events::{EventBus, PipelineEvent};
use crate::metric::ACTIVITY_KEY;

/// `sensor_id -> is streaming` map.
pub type ActivityMap = BTreeMap<String, bool>;

/// Outcome of an activate/deactivate request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActivityChange {
    Changed,
    /// The sensor was already in the requested state.
    Unchanged,
}

/// Activity map stored under a single cache key.
pub struct SensorActivity {
    kv: Arc<dyn KvStore>,
    bus: EventBus,
    locks: KeyedLocks,
}

impl SensorActivity {
    pub fn new(kv: Arc<dyn KvStore>, bus: EventBus) -> Self {
        Self {
            kv,
            bus,
            locks: KeyedLocks::new(),
        }
    }

    pub async fn activate(&self, sensor_id: &str) -> Result<ActivityChange, CacheError> {
        self.set_state(sensor_id, true).await
    }

    pub async fn deactivate(&self, sensor_id: &str) -> Result<ActivityChange, CacheError> {
        self.set_state(sensor_id, false).await
    }

    pub async fn list(&self) -> Result<ActivityMap, CacheError> {
        get_or_default(self.kv.as_ref(), ACTIVITY_KEY).await
    }

    async fn set_state(&self, sensor_id: &str, active: bool) -> Result<ActivityChange, CacheError> {
        let _guard = self.locks.lock(ACTIVITY_KEY).await;
        let mut sensors = self.list().await?;

        // Unknown sensors count as inactive.
        let current = sensors.get(sensor_id).copied().unwrap_or(false);
        if current == active {
            if active {
                warn!(sensor_id, "sensor is already activated");
            } else {
                warn!(sensor_id, "sensor is already deactivated");
            }
            return Ok(ActivityChange::Unchanged);
        }

        sensors.insert(sensor_id.to_string(), active);
        put(self.kv.as_ref(), ACTIVITY_KEY, &sensors, None).await?;

        if active {
            info!(sensor_id, "sensor is streaming data");
        } else {
            info!(sensor_id, "sensor is no longer streaming data");
        }

        self.bus.publish(PipelineEvent::ActivityChanged { sensors });
        Ok(ActivityChange::Changed)
    }
}
