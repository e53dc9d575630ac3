// src/ingest/mod.rs
//! Inbound events and the single dispatch loop feeding the pipeline.
//!
//! Transport adapters (HTTP handlers, MQTT) decode payloads into
//! [`IngestEvent`]s and push them onto one mpsc channel; [`run_dispatch`]
//! applies them to the pipeline in arrival order.

pub mod mqtt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::cache::CacheError;
use crate::metric::Metric;
use crate::pipeline::Pipeline;

/// Default depth of the inbound channel.
pub const DEFAULT_INGEST_CAPACITY: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no handler for topic {0}")]
    UnknownTopic(String),
    #[error("sensorId must not be empty")]
    EmptySensorId,
    #[error("value {0} is not a finite number")]
    NonFiniteValue(f64),
    #[error("field {field} is not numeric: {raw}")]
    NotNumeric { field: String, raw: String },
    #[error("{metric} reading needs a `value` or `{metric}` field")]
    MissingValue { metric: Metric },
    #[error("{metric} reading carries both `value` and `{metric}`")]
    AmbiguousValue { metric: Metric },
    #[error("{metric} reading carries a `{field}` field")]
    WrongMetricField { metric: Metric, field: &'static str },
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Invalid(#[from] DecodeError),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// One measurement for a sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingEvent {
    pub sensor_id: String,
    pub value: f64,
}

/// A reading as it arrives on the wire, before its metric is applied.
///
/// The value may be sent as `value` or under the metric's own name, as a
/// JSON number or a numeric string. Other fields are ignored, except the
/// name of a different metric.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingPayload {
    pub sensor_id: String,
    #[serde(default)]
    pub value: Option<JsonValue>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl ReadingPayload {
    /// Resolve the value for `metric` and validate the result.
    pub fn into_event(self, metric: Metric) -> Result<ReadingEvent, DecodeError> {
        if let Some(other) = Metric::all()
            .iter()
            .find(|m| **m != metric && self.extra.contains_key(m.name()))
        {
            return Err(DecodeError::WrongMetricField {
                metric,
                field: other.name(),
            });
        }

        let value = match (&self.value, self.extra.get(metric.name())) {
            (Some(_), Some(_)) => return Err(DecodeError::AmbiguousValue { metric }),
            (Some(raw), None) => parse_number("value", raw)?,
            (None, Some(raw)) => parse_number(metric.name(), raw)?,
            (None, None) => return Err(DecodeError::MissingValue { metric }),
        };

        let event = ReadingEvent {
            sensor_id: self.sensor_id,
            value,
        };
        event.validate()?;
        Ok(event)
    }
}

fn parse_number(field: &str, raw: &JsonValue) -> Result<f64, DecodeError> {
    let parsed = match raw {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| DecodeError::NotNumeric {
        field: field.to_string(),
        raw: raw.to_string(),
    })
}

impl ReadingEvent {
    pub fn new(sensor_id: impl Into<String>, value: f64) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            value,
        }
    }

    pub fn validate(&self) -> Result<(), DecodeError> {
        if self.sensor_id.trim().is_empty() {
            return Err(DecodeError::EmptySensorId);
        }
        if !self.value.is_finite() {
            return Err(DecodeError::NonFiniteValue(self.value));
        }
        Ok(())
    }
}

/// Explicit start/stop signal for a sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationEvent {
    pub sensor_id: String,
    pub activated: bool,
}

impl ActivationEvent {
    pub fn validate(&self) -> Result<(), DecodeError> {
        if self.sensor_id.trim().is_empty() {
            return Err(DecodeError::EmptySensorId);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IngestEvent {
    Reading { metric: Metric, event: ReadingEvent },
    Activation(ActivationEvent),
}

impl IngestEvent {
    pub fn validate(&self) -> Result<(), DecodeError> {
        match self {
            IngestEvent::Reading { event, .. } => event.validate(),
            IngestEvent::Activation(event) => event.validate(),
        }
    }
}

pub fn channel(capacity: usize) -> (mpsc::Sender<IngestEvent>, mpsc::Receiver<IngestEvent>) {
    mpsc::channel(capacity.max(1))
}

/// Apply one event to the pipeline.
pub async fn dispatch(pipeline: &Pipeline, event: IngestEvent) -> Result<(), IngestError> {
    event.validate()?;
    match event {
        IngestEvent::Reading { metric, event } => {
            pipeline
                .record_reading(metric, &event.sensor_id, event.value)
                .await?;
        }
        IngestEvent::Activation(event) => {
            pipeline
                .set_activity(&event.sensor_id, event.activated)
                .await?;
        }
    }
    Ok(())
}

/// Drain the inbound channel until every sender is dropped.
pub async fn run_dispatch(mut rx: mpsc::Receiver<IngestEvent>, pipeline: Arc<Pipeline>) {
    info!("ingest dispatcher started");
    while let Some(event) = rx.recv().await {
        debug!(?event, "dispatching");
        match dispatch(&pipeline, event).await {
            Ok(()) => {}
            Err(IngestError::Invalid(e)) => warn!(error = %e, "rejected inbound event"),
            Err(IngestError::Cache(e)) => error!(error = %e, "failed to apply inbound event"),
        }
    }
    info!("ingest dispatcher stopped");
}
