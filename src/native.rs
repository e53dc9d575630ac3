use axum::{
    extract::{rejection::JsonRejection, ws::WebSocketUpgrade, Path, State},
    http::StatusCode,
    response::{Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::cache::SensorWindow;
use crate::ingest::{ActivationEvent, IngestEvent, ReadingPayload};
use crate::livetail::{serve_socket, Namespace};
use crate::metric::Metric;
use crate::pipeline::Pipeline;
use crate::registry::ActivityMap;
use crate::scheduler::FlushStatsSnapshot;
use crate::store::{DurableStore, StoredReading};

type HandlerError = (StatusCode, String);

/// Initialize the tracing subscriber.
/// Uses RUST_LOG env var for filtering (defaults to info).
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true))
            .with(filter)
            .init();
    }
}

#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
    ingest: mpsc::Sender<IngestEvent>,
}

/// `{ "data": ... }` envelope used by every query endpoint.
#[derive(Debug, Serialize)]
pub struct DataResponse<T> {
    pub data: T,
}

pub fn build_router(pipeline: Arc<Pipeline>, ingest: mpsc::Sender<IngestEvent>) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/v1/sensors/activation", post(handle_activation))
        .route("/v1/sensors/:metric", get(handle_registered))
        .route("/v1/sensors/:metric/readings", post(handle_reading))
        .route("/v1/sensors/:metric/cache/:sensor_id", get(handle_cache))
        .route("/v1/sensors/:metric/db/:sensor_id", get(handle_db))
        .route("/v1/activity", get(handle_activity))
        .route("/v1/flush/stats", get(handle_flush_stats))
        .route("/v1/ws/sensors/:metric", get(handle_ws_metric))
        .route("/v1/ws/system", get(handle_ws_system))
        .with_state(AppState { pipeline, ingest })
}

fn parse_metric(name: &str) -> Result<Metric, HandlerError> {
    Metric::from_name(name).ok_or_else(|| (StatusCode::NOT_FOUND, format!("unknown metric: {}", name)))
}

fn internal(e: impl std::fmt::Display) -> HandlerError {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

fn enqueue(state: &AppState, event: IngestEvent) -> Result<StatusCode, HandlerError> {
    event
        .validate()
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    match state.ingest.try_send(event) {
        Ok(()) => Ok(StatusCode::ACCEPTED),
        Err(TrySendError::Full(_)) => {
            warn!("ingest queue full, rejecting request");
            Err((
                StatusCode::SERVICE_UNAVAILABLE,
                "ingest queue full".to_string(),
            ))
        }
        Err(TrySendError::Closed(_)) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "ingest stopped".to_string(),
        )),
    }
}

async fn handle_reading(
    State(state): State<AppState>,
    Path(metric): Path<String>,
    body: Result<Json<ReadingPayload>, JsonRejection>,
) -> Result<StatusCode, HandlerError> {
    let metric = parse_metric(&metric)?;
    let Json(payload) = body.map_err(|e| (StatusCode::BAD_REQUEST, e.body_text()))?;
    let event = payload
        .into_event(metric)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    enqueue(&state, IngestEvent::Reading { metric, event })
}

async fn handle_activation(
    State(state): State<AppState>,
    body: Result<Json<ActivationEvent>, JsonRejection>,
) -> Result<StatusCode, HandlerError> {
    let Json(event) = body.map_err(|e| (StatusCode::BAD_REQUEST, e.body_text()))?;
    enqueue(&state, IngestEvent::Activation(event))
}

async fn handle_registered(
    State(state): State<AppState>,
    Path(metric): Path<String>,
) -> Result<Json<DataResponse<Vec<String>>>, HandlerError> {
    let metric = parse_metric(&metric)?;
    let data = state
        .pipeline
        .registry()
        .list_registered(metric)
        .await
        .map_err(internal)?;
    Ok(Json(DataResponse { data }))
}

async fn handle_activity(
    State(state): State<AppState>,
) -> Result<Json<DataResponse<ActivityMap>>, HandlerError> {
    let data = state
        .pipeline
        .registry()
        .list_active()
        .await
        .map_err(internal)?;
    Ok(Json(DataResponse { data }))
}

async fn handle_cache(
    State(state): State<AppState>,
    Path((metric, sensor_id)): Path<(String, String)>,
) -> Result<Json<DataResponse<SensorWindow>>, HandlerError> {
    let metric = parse_metric(&metric)?;
    let data = state
        .pipeline
        .cache()
        .get_window(metric, &sensor_id)
        .await
        .map_err(internal)?;
    Ok(Json(DataResponse { data }))
}

async fn handle_db(
    State(state): State<AppState>,
    Path((metric, sensor_id)): Path<(String, String)>,
) -> Result<Json<DataResponse<Vec<StoredReading>>>, HandlerError> {
    let metric = parse_metric(&metric)?;
    let data = state
        .pipeline
        .store()
        .readings(metric, &sensor_id)
        .await
        .map_err(internal)?;
    Ok(Json(DataResponse { data }))
}

async fn handle_flush_stats(State(state): State<AppState>) -> Json<FlushStatsSnapshot> {
    Json(state.pipeline.flush_stats().snapshot())
}

async fn handle_ws_metric(
    State(state): State<AppState>,
    Path(metric): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<Response, HandlerError> {
    let metric = parse_metric(&metric)?;
    let pipeline = state.pipeline.clone();
    Ok(ws.on_upgrade(move |socket| serve_socket(socket, Namespace::Metric(metric), pipeline)))
}

async fn handle_ws_system(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let pipeline = state.pipeline.clone();
    ws.on_upgrade(move |socket| serve_socket(socket, Namespace::System, pipeline))
}
