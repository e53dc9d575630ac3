//! Bounded per-sensor telemetry cache.
//!
//! Each `(metric, sensor)` pair owns a window of its most recent readings,
//! stored in a [`KvStore`] under `data:<metric>:<sensor>`. Updates to one key
//! are serialized; different sensors never wait on each other.

pub mod kv;
mod locks;
mod window;

pub use kv::{CacheError, KvStore, MemoryKv};
pub use locks::KeyedLocks;
pub use window::{Reading, SensorWindow, MAX_WINDOW};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

use crate::events::{EventBus, PipelineEvent};
use crate::metric::Metric;
use crate::registry::SensorRegistry;
use kv::{get_or_default, put};

pub struct TelemetryCache {
    kv: Arc<dyn KvStore>,
    registry: Arc<SensorRegistry>,
    bus: EventBus,
    locks: KeyedLocks,
    /// Per-key update counter, bumped under the key lock.
    sequences: Mutex<HashMap<String, u64>>,
    window_ttl: Option<Duration>,
}

impl TelemetryCache {
    pub fn new(kv: Arc<dyn KvStore>, registry: Arc<SensorRegistry>, bus: EventBus) -> Self {
        Self {
            kv,
            registry,
            bus,
            locks: KeyedLocks::new(),
            sequences: Mutex::new(HashMap::new()),
            window_ttl: None,
        }
    }

    /// Expire idle windows after `ttl`; an expired window restarts empty.
    pub fn with_window_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.window_ttl = ttl;
        self
    }

    /// Append a reading stamped now and return the resulting window.
    ///
    /// Registers the sensor on its first reading and publishes the updated
    /// window to subscribers of the sensor topic.
    pub async fn record_reading(
        &self,
        metric: Metric,
        sensor_id: &str,
        value: f64,
    ) -> Result<SensorWindow, CacheError> {
        self.registry.register_if_absent(metric, sensor_id).await?;

        let key = metric.window_key(sensor_id);
        let _guard = self.locks.lock(&key).await;

        let mut window: SensorWindow = get_or_default(self.kv.as_ref(), &key).await?;
        window.push(Reading::now(value));
        put(self.kv.as_ref(), &key, &window, self.window_ttl).await?;
        let seq = self.bump_sequence(&key);

        debug!(metric = %metric, sensor_id, value, seq, len = window.len(), "reading cached");

        // Published under the key lock so subscribers see snapshots in order.
        self.bus.publish(PipelineEvent::ReadingUpdated {
            metric,
            sensor_id: sensor_id.to_string(),
            seq,
            window: window.clone(),
        });

        Ok(window)
    }

    /// Current window, empty when the sensor has nothing cached.
    pub async fn get_window(
        &self,
        metric: Metric,
        sensor_id: &str,
    ) -> Result<SensorWindow, CacheError> {
        get_or_default(self.kv.as_ref(), &metric.window_key(sensor_id)).await
    }

    /// Current window together with the sequence of the update that produced
    /// it. Both are read under the key lock; `0` means no reading yet.
    pub async fn versioned_window(
        &self,
        metric: Metric,
        sensor_id: &str,
    ) -> Result<(u64, SensorWindow), CacheError> {
        let key = metric.window_key(sensor_id);
        let _guard = self.locks.lock(&key).await;
        let window = get_or_default(self.kv.as_ref(), &key).await?;
        Ok((self.sequence(&key), window))
    }

    fn sequences(&self) -> std::sync::MutexGuard<'_, HashMap<String, u64>> {
        // Counters stay valid even if a holder panicked.
        self.sequences.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn sequence(&self, key: &str) -> u64 {
        self.sequences().get(key).copied().unwrap_or(0)
    }

    fn bump_sequence(&self, key: &str) -> u64 {
        let mut sequences = self.sequences();
        let seq = sequences.entry(key.to_string()).or_insert(0);
        *seq += 1;
        *seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> (Arc<TelemetryCache>, Arc<SensorRegistry>, EventBus) {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let bus = EventBus::default();
        let registry = Arc::new(SensorRegistry::new(kv.clone(), bus.clone()));
        let cache = Arc::new(TelemetryCache::new(kv, registry.clone(), bus.clone()));
        (cache, registry, bus)
    }

    #[tokio::test]
    async fn miss_returns_empty_window() {
        let (cache, _, _) = cache();
        let window = cache.get_window(Metric::Temperature, "nope").await.unwrap();
        assert!(window.is_empty());
    }

    #[tokio::test]
    async fn recorded_value_is_head_of_window() {
        let (cache, _, _) = cache();
        cache
            .record_reading(Metric::Temperature, "S1", 21.5)
            .await
            .unwrap();
        let window = cache.get_window(Metric::Temperature, "S1").await.unwrap();
        assert_eq!(window.latest().map(|r| r.value), Some(21.5));
    }

    #[tokio::test]
    async fn thirty_one_readings_keep_last_thirty() {
        let (cache, _, _) = cache();
        for v in 1..=31 {
            cache
                .record_reading(Metric::Temperature, "S1", v as f64)
                .await
                .unwrap();
        }
        let window = cache.get_window(Metric::Temperature, "S1").await.unwrap();
        assert_eq!(window.len(), 30);
        assert_eq!(window.latest().map(|r| r.value), Some(31.0));
        assert_eq!(window.oldest().map(|r| r.value), Some(2.0));
    }

    #[tokio::test]
    async fn metrics_do_not_share_windows() {
        let (cache, _, _) = cache();
        cache
            .record_reading(Metric::Temperature, "S1", 20.0)
            .await
            .unwrap();
        let humidity = cache.get_window(Metric::Humidity, "S1").await.unwrap();
        assert!(humidity.is_empty());
    }

    #[tokio::test]
    async fn first_reading_registers_sensor() {
        let (cache, registry, _) = cache();
        cache
            .record_reading(Metric::Humidity, "H1", 40.0)
            .await
            .unwrap();
        cache
            .record_reading(Metric::Humidity, "H1", 41.0)
            .await
            .unwrap();
        assert_eq!(
            registry.list_registered(Metric::Humidity).await.unwrap(),
            vec!["H1".to_string()]
        );
    }

    #[tokio::test]
    async fn publishes_registry_change_then_window_update() {
        let (cache, _, bus) = cache();
        let mut rx = bus.subscribe();
        cache
            .record_reading(Metric::Temperature, "S1", 1.0)
            .await
            .unwrap();
        cache
            .record_reading(Metric::Temperature, "S1", 2.0)
            .await
            .unwrap();

        assert!(matches!(
            rx.try_recv(),
            Ok(PipelineEvent::RegistryChanged { .. })
        ));
        match rx.try_recv() {
            Ok(PipelineEvent::ReadingUpdated { window, .. }) => assert_eq!(window.len(), 1),
            other => panic!("unexpected {:?}", other),
        }
        match rx.try_recv() {
            Ok(PipelineEvent::ReadingUpdated {
                window,
                sensor_id,
                seq,
                ..
            }) => {
                assert_eq!(sensor_id, "S1");
                assert_eq!(seq, 2);
                assert_eq!(window.len(), 2);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(rx.try_recv().is_err(), "second reading must not re-register");
    }

    #[tokio::test]
    async fn sequences_count_updates_per_key() {
        let (cache, _, _) = cache();
        assert_eq!(
            cache
                .versioned_window(Metric::Temperature, "S1")
                .await
                .unwrap()
                .0,
            0
        );
        for v in 0..3 {
            cache
                .record_reading(Metric::Temperature, "S1", v as f64)
                .await
                .unwrap();
        }
        cache
            .record_reading(Metric::Humidity, "S1", 50.0)
            .await
            .unwrap();

        let (seq, window) = cache
            .versioned_window(Metric::Temperature, "S1")
            .await
            .unwrap();
        assert_eq!(seq, 3);
        assert_eq!(window.len(), 3);
        let (seq, _) = cache.versioned_window(Metric::Humidity, "S1").await.unwrap();
        assert_eq!(seq, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_readings_for_same_sensor_are_not_lost() {
        let (cache, _, _) = cache();
        let mut handles = Vec::new();
        for v in 0..20 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .record_reading(Metric::Temperature, "S3", v as f64)
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let window = cache.get_window(Metric::Temperature, "S3").await.unwrap();
        assert_eq!(window.len(), 20);
        let mut values: Vec<i64> = window.iter().map(|r| r.value as i64).collect();
        values.sort();
        assert_eq!(values, (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn huge_window_ttl_still_records() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let bus = EventBus::default();
        let registry = Arc::new(SensorRegistry::new(kv.clone(), bus.clone()));
        let cache = TelemetryCache::new(kv, registry, bus)
            .with_window_ttl(Some(Duration::from_secs(i64::MAX as u64)));

        let window = cache
            .record_reading(Metric::Temperature, "S1", 1.0)
            .await
            .unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(
            cache.get_window(Metric::Temperature, "S1").await.unwrap(),
            window
        );
    }

    #[tokio::test(start_paused = true)]
    async fn expired_window_restarts_empty() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let bus = EventBus::default();
        let registry = Arc::new(SensorRegistry::new(kv.clone(), bus.clone()));
        let cache = TelemetryCache::new(kv, registry.clone(), bus)
            .with_window_ttl(Some(Duration::from_secs(60)));

        cache
            .record_reading(Metric::Temperature, "S1", 1.0)
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache
            .get_window(Metric::Temperature, "S1")
            .await
            .unwrap()
            .is_empty());

        let window = cache
            .record_reading(Metric::Temperature, "S1", 2.0)
            .await
            .unwrap();
        assert_eq!(window.len(), 1);
        // Registration does not expire with the window.
        assert_eq!(
            registry.list_registered(Metric::Temperature).await.unwrap(),
            vec!["S1".to_string()]
        );
    }
}
