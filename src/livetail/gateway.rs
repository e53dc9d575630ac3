//! Per-connection fan-out from the event bus to one WebSocket client.

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::messages::{ClientMessage, WsMessage};
use crate::cache::{CacheError, SensorWindow};
use crate::events::PipelineEvent;
use crate::metric::{Metric, SYSTEM_SENSORS_EVENT};
use crate::pipeline::Pipeline;

/// What a connection listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    /// Registry changes of one metric, plus windows of subscribed sensors.
    Metric(Metric),
    /// Activity map changes.
    System,
}

impl Namespace {
    pub fn label(&self) -> &'static str {
        match self {
            Namespace::Metric(m) => m.name(),
            Namespace::System => "system",
        }
    }
}

/// Routing state of one client.
#[derive(Debug)]
pub struct Subscription {
    namespace: Namespace,
    /// Subscribed sensors and the newest update sequence sent for each.
    sensors: HashMap<String, Option<u64>>,
}

impl Subscription {
    pub fn new(namespace: Namespace) -> Self {
        Self {
            namespace,
            sensors: HashMap::new(),
        }
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    /// Start (or restart) following a sensor; the next window is always sent.
    pub fn subscribe(&mut self, sensor_id: &str) {
        self.sensors.insert(sensor_id.to_string(), None);
    }

    pub fn unsubscribe(&mut self, sensor_id: &str) -> bool {
        self.sensors.remove(sensor_id).is_some()
    }

    pub fn is_subscribed(&self, sensor_id: &str) -> bool {
        self.sensors.contains_key(sensor_id)
    }

    /// Build the window message for a subscribed sensor, or `None` when the
    /// window at `seq` or a later one was already sent.
    pub fn window_message(
        &mut self,
        metric: Metric,
        sensor_id: &str,
        seq: u64,
        window: &SensorWindow,
    ) -> Option<WsMessage> {
        let sent = self.sensors.get_mut(sensor_id)?;
        if sent.is_some_and(|prev| seq <= prev) {
            return None;
        }
        *sent = Some(seq);
        Some(WsMessage::WindowUpdate {
            event: metric.update_topic(sensor_id),
            sensor_id: sensor_id.to_string(),
            data: window.clone(),
        })
    }

    /// Map a bus event to the message this client should see, if any.
    pub fn route(&mut self, event: &PipelineEvent) -> Option<WsMessage> {
        match (self.namespace, event) {
            (Namespace::Metric(ns), PipelineEvent::RegistryChanged { metric, sensors })
                if ns == *metric =>
            {
                Some(WsMessage::RegisteredSensors {
                    event: metric.registered_event().to_string(),
                    data: sensors.clone(),
                })
            }
            (
                Namespace::Metric(ns),
                PipelineEvent::ReadingUpdated {
                    metric,
                    sensor_id,
                    seq,
                    window,
                },
            ) if ns == *metric => self.window_message(*metric, sensor_id, *seq, window),
            (Namespace::System, PipelineEvent::ActivityChanged { sensors }) => {
                Some(WsMessage::SystemSensors {
                    event: SYSTEM_SENSORS_EVENT.to_string(),
                    data: sensors.clone(),
                })
            }
            _ => None,
        }
    }
}

/// Current state of a namespace: registered list or activity map.
pub async fn snapshot(namespace: Namespace, pipeline: &Pipeline) -> Result<WsMessage, CacheError> {
    match namespace {
        Namespace::Metric(metric) => Ok(WsMessage::RegisteredSensors {
            event: metric.registered_event().to_string(),
            data: pipeline.registry().list_registered(metric).await?,
        }),
        Namespace::System => Ok(WsMessage::SystemSensors {
            event: SYSTEM_SENSORS_EVENT.to_string(),
            data: pipeline.registry().list_active().await?,
        }),
    }
}

/// Apply a client request, returning the reply to send.
pub async fn handle_client_message(
    text: &str,
    subscription: &mut Subscription,
    pipeline: &Pipeline,
) -> Option<WsMessage> {
    let request: ClientMessage = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(e) => {
            return Some(WsMessage::Error {
                message: format!("invalid request: {}", e),
            })
        }
    };

    let result = match request {
        ClientMessage::Subscribe { sensor_id } => {
            let Namespace::Metric(metric) = subscription.namespace() else {
                return Some(WsMessage::Error {
                    message: "subscribe requires a metric stream".to_string(),
                });
            };
            subscription.subscribe(&sensor_id);
            pipeline
                .cache()
                .versioned_window(metric, &sensor_id)
                .await
                .map(|(seq, window)| subscription.window_message(metric, &sensor_id, seq, &window))
        }
        ClientMessage::Unsubscribe { sensor_id } => {
            subscription.unsubscribe(&sensor_id);
            Ok(None)
        }
        ClientMessage::Sync => snapshot(subscription.namespace(), pipeline).await.map(Some),
    };

    result.unwrap_or_else(|e| {
        Some(WsMessage::Error {
            message: e.to_string(),
        })
    })
}

async fn send(sink: &mut SplitSink<WebSocket, Message>, msg: &WsMessage) -> Result<(), axum::Error> {
    match serde_json::to_string(msg) {
        Ok(json) => sink.send(Message::Text(json)).await,
        Err(e) => {
            warn!(error = %e, "failed to serialize WebSocket message");
            Ok(())
        }
    }
}

/// Drive one upgraded connection until either side closes.
pub async fn serve_socket(socket: WebSocket, namespace: Namespace, pipeline: Arc<Pipeline>) {
    // Subscribe before taking the snapshot so no change falls in between.
    let mut events = pipeline.bus().subscribe();
    let (mut sink, mut stream) = socket.split();
    let mut subscription = Subscription::new(namespace);

    info!(namespace = namespace.label(), "live stream client connected");

    let initial = snapshot(namespace, &pipeline)
        .await
        .unwrap_or_else(|e| WsMessage::Error {
            message: e.to_string(),
        });
    if send(&mut sink, &initial).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reply) = handle_client_message(&text, &mut subscription, &pipeline).await {
                        if send(&mut sink, &reply).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(error = %e, "WebSocket receive error");
                    break;
                }
            },
            event = events.recv() => match event {
                Ok(event) => {
                    if let Some(msg) = subscription.route(&event) {
                        if send(&mut sink, &msg).await.is_err() {
                            break;
                        }
                    }
                }
                Err(RecvError::Lagged(count)) => {
                    warn!(namespace = namespace.label(), count, "live stream client lagged");
                    if send(&mut sink, &WsMessage::Dropped { count }).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    info!(namespace = namespace.label(), "live stream client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Reading;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    fn window_at(secs: i64, value: f64) -> SensorWindow {
        let mut window = SensorWindow::new();
        window.push(Reading::new(Utc.timestamp_opt(secs, 0).unwrap(), value));
        window
    }

    #[test]
    fn metric_namespace_ignores_other_metrics_and_activity() {
        let mut sub = Subscription::new(Namespace::Metric(Metric::Temperature));
        assert!(sub
            .route(&PipelineEvent::RegistryChanged {
                metric: Metric::Humidity,
                sensors: vec!["H1".into()],
            })
            .is_none());
        assert!(sub
            .route(&PipelineEvent::ActivityChanged {
                sensors: BTreeMap::new(),
            })
            .is_none());
        assert_eq!(
            sub.route(&PipelineEvent::RegistryChanged {
                metric: Metric::Temperature,
                sensors: vec!["S1".into()],
            }),
            Some(WsMessage::RegisteredSensors {
                event: "temperature-registered-sensors".into(),
                data: vec!["S1".into()],
            })
        );
    }

    #[test]
    fn window_updates_need_a_subscription() {
        let mut sub = Subscription::new(Namespace::Metric(Metric::Temperature));
        let event = PipelineEvent::ReadingUpdated {
            metric: Metric::Temperature,
            sensor_id: "S1".into(),
            seq: 1,
            window: window_at(10, 1.0),
        };
        assert!(sub.route(&event).is_none());

        sub.subscribe("S1");
        match sub.route(&event) {
            Some(WsMessage::WindowUpdate {
                event, sensor_id, ..
            }) => {
                assert_eq!(event, "temperature-cache-data-update-S1");
                assert_eq!(sensor_id, "S1");
            }
            other => panic!("unexpected {:?}", other),
        }

        assert!(sub.unsubscribe("S1"));
        assert!(sub.route(&event).is_none());
    }

    #[test]
    fn already_sent_sequence_is_skipped() {
        let mut sub = Subscription::new(Namespace::Metric(Metric::Humidity));
        sub.subscribe("H1");
        assert!(sub
            .window_message(Metric::Humidity, "H1", 2, &window_at(20, 2.0))
            .is_some());
        assert!(sub
            .window_message(Metric::Humidity, "H1", 1, &window_at(10, 1.0))
            .is_none());
        assert!(sub
            .window_message(Metric::Humidity, "H1", 2, &window_at(20, 2.0))
            .is_none());
        assert!(sub
            .window_message(Metric::Humidity, "H1", 3, &window_at(30, 3.0))
            .is_some());
    }

    #[test]
    fn newer_update_with_older_clock_is_delivered() {
        let mut sub = Subscription::new(Namespace::Metric(Metric::Temperature));
        sub.subscribe("S1");
        let first = window_at(1000, 1.0);
        let mut second = first.clone();
        // Wall clock stepped back between the two readings.
        second.push(Reading::new(Utc.timestamp_opt(995, 0).unwrap(), 2.0));

        let routed = |sub: &mut Subscription, seq, window: &SensorWindow| {
            sub.route(&PipelineEvent::ReadingUpdated {
                metric: Metric::Temperature,
                sensor_id: "S1".into(),
                seq,
                window: window.clone(),
            })
        };
        assert!(routed(&mut sub, 1, &first).is_some());
        match routed(&mut sub, 2, &second) {
            Some(WsMessage::WindowUpdate { data, .. }) => assert_eq!(data.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn resubscribe_sends_current_window_again() {
        let mut sub = Subscription::new(Namespace::Metric(Metric::Temperature));
        sub.subscribe("S1");
        assert!(sub
            .window_message(Metric::Temperature, "S1", 4, &window_at(10, 1.0))
            .is_some());
        sub.subscribe("S1");
        assert!(sub
            .window_message(Metric::Temperature, "S1", 4, &window_at(10, 1.0))
            .is_some());
    }

    #[test]
    fn system_namespace_sees_activity_only() {
        let mut sub = Subscription::new(Namespace::System);
        let mut sensors = BTreeMap::new();
        sensors.insert("S1".to_string(), true);
        assert_eq!(
            sub.route(&PipelineEvent::ActivityChanged {
                sensors: sensors.clone()
            }),
            Some(WsMessage::SystemSensors {
                event: SYSTEM_SENSORS_EVENT.into(),
                data: sensors,
            })
        );
        assert!(sub
            .route(&PipelineEvent::RegistryChanged {
                metric: Metric::Temperature,
                sensors: vec![],
            })
            .is_none());
    }

    #[tokio::test]
    async fn subscribe_replies_with_current_window() {
        let pipeline = Pipeline::in_memory();
        pipeline
            .record_reading(Metric::Temperature, "S1", 21.0)
            .await
            .unwrap();
        let mut sub = Subscription::new(Namespace::Metric(Metric::Temperature));

        let reply = handle_client_message(
            r#"{"type":"subscribe","sensor_id":"S1"}"#,
            &mut sub,
            &pipeline,
        )
        .await;
        match reply {
            Some(WsMessage::WindowUpdate { data, .. }) => {
                assert_eq!(data.latest().map(|r| r.value), Some(21.0))
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(sub.is_subscribed("S1"));

        // The update already covered by the reply is not sent twice.
        let (seq, window) = pipeline
            .cache()
            .versioned_window(Metric::Temperature, "S1")
            .await
            .unwrap();
        assert!(sub
            .route(&PipelineEvent::ReadingUpdated {
                metric: Metric::Temperature,
                sensor_id: "S1".into(),
                seq,
                window,
            })
            .is_none());
    }

    #[tokio::test]
    async fn subscribe_on_system_stream_is_an_error() {
        let pipeline = Pipeline::in_memory();
        let mut sub = Subscription::new(Namespace::System);
        let reply = handle_client_message(
            r#"{"type":"subscribe","sensor_id":"S1"}"#,
            &mut sub,
            &pipeline,
        )
        .await;
        assert!(matches!(reply, Some(WsMessage::Error { .. })));
    }

    #[tokio::test]
    async fn sync_and_garbage_requests() {
        let pipeline = Pipeline::in_memory();
        pipeline.set_activity("S1", true).await.unwrap();
        let mut sub = Subscription::new(Namespace::System);

        let reply = handle_client_message(r#"{"type":"sync"}"#, &mut sub, &pipeline).await;
        match reply {
            Some(WsMessage::SystemSensors { data, .. }) => assert_eq!(data.get("S1"), Some(&true)),
            other => panic!("unexpected {:?}", other),
        }

        let reply = handle_client_message("hello", &mut sub, &pipeline).await;
        assert!(matches!(reply, Some(WsMessage::Error { .. })));
    }
}
