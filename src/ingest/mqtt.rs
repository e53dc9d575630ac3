// src/ingest/mqtt.rs
//! MQTT ingestion adapter.

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::{ActivationEvent, DecodeError, IngestEvent, ReadingPayload};
use crate::metric::Metric;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Broker connection settings, the `[mqtt]` config section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub base_topic: String,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "sensorpipe".to_string(),
            base_topic: "iot-car-gd".to_string(),
        }
    }
}

/// Topic layout under a base prefix.
#[derive(Debug, Clone)]
pub struct MqttTopics {
    base: String,
}

impl MqttTopics {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
        }
    }

    /// `<base>/<metric>-sensor/data`
    pub fn data_topic(&self, metric: Metric) -> String {
        format!("{}/{}", self.base, metric.data_topic_suffix())
    }

    /// `<base>/sensor/connection`
    pub fn connection_topic(&self) -> String {
        format!("{}/sensor/connection", self.base)
    }

    pub fn all(&self) -> Vec<String> {
        let mut topics: Vec<String> = Metric::all().iter().map(|m| self.data_topic(*m)).collect();
        topics.push(self.connection_topic());
        topics
    }
}

/// Decode one publish into an inbound event.
pub fn route_publish(
    topics: &MqttTopics,
    topic: &str,
    payload: &[u8],
) -> Result<IngestEvent, DecodeError> {
    if topic == topics.connection_topic() {
        let event: ActivationEvent = serde_json::from_slice(payload)?;
        event.validate()?;
        return Ok(IngestEvent::Activation(event));
    }

    let metric = Metric::all()
        .iter()
        .copied()
        .find(|m| topic == topics.data_topic(*m))
        .ok_or_else(|| DecodeError::UnknownTopic(topic.to_string()))?;

    let payload: ReadingPayload = serde_json::from_slice(payload)?;
    let event = payload.into_event(metric)?;
    Ok(IngestEvent::Reading { metric, event })
}

/// Consume broker messages until `shutdown` flips or the inbound channel closes.
pub async fn run_mqtt(
    settings: MqttSettings,
    tx: mpsc::Sender<IngestEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let topics = MqttTopics::new(&settings.base_topic);
    let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
    options.set_keep_alive(Duration::from_secs(30));
    let (client, mut eventloop) = AsyncClient::new(options, 64);

    info!(host = %settings.host, port = settings.port, base = %settings.base_topic, "mqtt adapter started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            polled = eventloop.poll() => match polled {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    // Subscriptions do not survive a clean-session reconnect.
                    for topic in topics.all() {
                        if let Err(e) = client.subscribe(&topic, QoS::AtLeastOnce).await {
                            warn!(topic = %topic, error = %e, "mqtt subscribe failed");
                        }
                    }
                    info!("mqtt connected");
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    match route_publish(&topics, &publish.topic, &publish.payload) {
                        Ok(event) => {
                            if tx.send(event).await.is_err() {
                                debug!("ingest channel closed");
                                break;
                            }
                        }
                        Err(e) => warn!(topic = %publish.topic, error = %e, "dropping mqtt message"),
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "mqtt connection error, retrying");
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                    }
                }
            }
        }
    }

    let _ = client.try_disconnect();
    info!("mqtt adapter stopped");
}
