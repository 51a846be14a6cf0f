use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::error::ForecastError;
use crate::pipeline::Forecaster;
use crate::store::SlidingWindowStore;
use crate::types::{BusTrack, EtaEstimate, GpsEntry, GpsPacket, PredictionOut};

// ---------- Server state ----------

#[derive(Clone)]
pub struct AppState {
    forecaster: Arc<Forecaster>,
    store: Arc<Mutex<SlidingWindowStore>>,
    default_steps: usize,
}

impl AppState {
    pub fn new(forecaster: Forecaster, default_steps: usize) -> Self {
        let store = SlidingWindowStore::new(forecaster.codec());
        Self::with_store(forecaster, store, default_steps)
    }

    pub fn with_store(forecaster: Forecaster, store: SlidingWindowStore, default_steps: usize) -> Self {
        Self {
            forecaster: Arc::new(forecaster),
            store: Arc::new(Mutex::new(store)),
            default_steps,
        }
    }

    pub fn store(&self) -> Arc<Mutex<SlidingWindowStore>> {
        Arc::clone(&self.store)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/gps", post(receive_gps))
        .route("/predict", post(predict_batch))
        .route("/predict/:bus_id", get(predict_bus))
        .route("/ws", get(ws_ingest))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------- Request types ----------

#[derive(Deserialize, Debug)]
struct PredictQuery {
    steps: Option<usize>,
}

#[derive(Deserialize, Debug)]
struct BatchRequest {
    bus_id: String,
    data: Vec<GpsEntry>,
    steps: Option<usize>,
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn api_error(e: ForecastError) -> ApiError {
    let status = match &e {
        ForecastError::InsufficientHistory { .. }
        | ForecastError::TimestampParse { .. }
        | ForecastError::InvalidHorizon
        | ForecastError::HorizonTooLong { .. } => StatusCode::BAD_REQUEST,
        ForecastError::Codec(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ForecastError::ModelInference(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    tracing::warn!("request failed ({}): {}", status, e);
    let body = match &e {
        ForecastError::InsufficientHistory { required, available } => json!({
            "error": "Not enough data",
            "required": required,
            "available": available,
        }),
        _ => json!({ "error": e.to_string() }),
    };
    (status, Json(body))
}

fn ingest_packet(state: &AppState, packet: &GpsPacket) -> Result<(), ForecastError> {
    let sample = packet.to_sample()?;
    state.store.lock().ingest(&packet.bus_id, &sample)?;
    Ok(())
}

fn prediction_out(bus_id: String, predictions: Vec<EtaEstimate>) -> PredictionOut {
    PredictionOut {
        bus_id,
        generated_at_ms: Utc::now().timestamp_millis(),
        predictions,
    }
}

// ---------- Handlers ----------

async fn home() -> &'static str {
    "Bus Location Predictor API is running!"
}

async fn receive_gps(
    State(state): State<AppState>,
    Json(packet): Json<GpsPacket>,
) -> Result<Json<serde_json::Value>, ApiError> {
    ingest_packet(&state, &packet).map_err(api_error)?;
    Ok(Json(json!({
        "status": "received",
        "bus_id": packet.bus_id,
        "timestamp": packet.entry.timestamp,
    })))
}

async fn predict_bus(
    State(state): State<AppState>,
    Path(bus_id): Path<String>,
    Query(query): Query<PredictQuery>,
) -> Result<Json<PredictionOut>, ApiError> {
    let steps = query.steps.unwrap_or(state.default_steps);
    let predictions = state
        .forecaster
        .forecast_entity(&state.store, &bus_id, steps)
        .map_err(api_error)?;
    Ok(Json(prediction_out(bus_id, predictions)))
}

async fn predict_batch(
    State(state): State<AppState>,
    Json(req): Json<BatchRequest>,
) -> Result<Json<PredictionOut>, ApiError> {
    let steps = req.steps.unwrap_or(state.default_steps);
    let track = BusTrack {
        bus_id: req.bus_id,
        data: req.data,
    };
    let predictions = state
        .forecaster
        .forecast_track(&track, steps)
        .map_err(api_error)?;
    Ok(Json(prediction_out(track.bus_id, predictions)))
}

async fn ws_ingest(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| stream_gps(socket, state))
}

/// Each text frame is one `GpsPacket`; every frame gets a JSON ack or error back.
async fn stream_gps(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!("websocket receive error: {}", e);
                break;
            }
        };

        let reply = match serde_json::from_str::<GpsPacket>(&text) {
            Ok(packet) => match ingest_packet(&state, &packet) {
                Ok(()) => json!({ "status": "received", "bus_id": packet.bus_id }),
                Err(e) => json!({ "error": e.to_string(), "bus_id": packet.bus_id }),
            },
            Err(e) => json!({ "error": format!("malformed packet: {}", e) }),
        };
        if sender.send(Message::Text(reply.to_string())).await.is_err() {
            break;
        }
    }
    tracing::debug!("websocket stream closed");
}
