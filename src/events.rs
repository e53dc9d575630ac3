//! In-process event bus between producers (cache, registry) and the gateway.

use std::collections::BTreeMap;
use tokio::sync::broadcast;

use crate::cache::SensorWindow;
use crate::metric::Metric;

/// Default number of events buffered per subscriber before it starts lagging.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// State changes published by the pipeline.
#[derive(Clone, Debug)]
pub enum PipelineEvent {
    /// The registered-sensor list of a metric grew.
    RegistryChanged { metric: Metric, sensors: Vec<String> },
    /// A sensor window changed; carries the full window and the per-sensor
    /// update sequence that produced it.
    ReadingUpdated {
        metric: Metric,
        sensor_id: String,
        seq: u64,
        window: SensorWindow,
    },
    /// The cross-metric activity map changed.
    ActivityChanged { sensors: BTreeMap<String, bool> },
}

/// Fan-out channel. Publishing never waits on subscribers.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event, returning how many subscribers will see it.
    pub fn publish(&self, event: PipelineEvent) -> usize {
        // No subscribers is not an error.
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::RecvError;

    #[test]
    fn publish_without_subscribers_is_ok() {
        let bus = EventBus::default();
        let delivered = bus.publish(PipelineEvent::ActivityChanged {
            sensors: BTreeMap::new(),
        });
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn every_subscriber_receives_event() {
        let bus = EventBus::default();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(PipelineEvent::RegistryChanged {
            metric: Metric::Temperature,
            sensors: vec!["S1".to_string()],
        });

        for rx in [&mut a, &mut b] {
            match rx.recv().await.unwrap() {
                PipelineEvent::RegistryChanged { metric, sensors } => {
                    assert_eq!(metric, Metric::Temperature);
                    assert_eq!(sensors, vec!["S1".to_string()]);
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn slow_subscriber_lags_instead_of_blocking() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for _ in 0..5 {
            bus.publish(PipelineEvent::ActivityChanged {
                sensors: BTreeMap::new(),
            });
        }
        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(3))));
    }
}
