//! LD2410 Monitor - HTTP API over an LD2410 presence radar

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use ld2410_protocol::{ProtocolError, SerialBus, BAUD_RATE};
use ld2410_sensor::{Attribute, Channel, DeviceConfig, Ld2410, SensorError, SensorValue};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub sensor: Arc<Ld2410<SerialBus>>,
}

/// API response wrapper using serde_json::Value for flexibility
#[derive(Serialize)]
struct ApiResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ApiResponse {
    fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: Some(serde_json::to_value(data).unwrap_or(serde_json::Value::Null)),
            error: None,
        }
    }

    fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// HTTP status for a failed sensor operation
fn error_status(err: &SensorError) -> StatusCode {
    match err {
        SensorError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        SensorError::NotSupported(_) | SensorError::NoData => StatusCode::NOT_FOUND,
        SensorError::Protocol(ProtocolError::Timeout) => StatusCode::GATEWAY_TIMEOUT,
        SensorError::Protocol(ProtocolError::Busy) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn respond<T: Serialize>(result: Result<T, SensorError>) -> (StatusCode, Json<ApiResponse>) {
    match result {
        Ok(data) => (StatusCode::OK, Json(ApiResponse::success(data))),
        Err(e) => (error_status(&e), Json(ApiResponse::error(e.to_string()))),
    }
}

/// Channel selector for attribute requests
#[derive(Deserialize)]
struct ChannelQuery {
    #[serde(default = "default_channel")]
    channel: Channel,
}

fn default_channel() -> Channel {
    Channel::All
}

/// Attribute write request, `{"value": n}` or `{"gates": [..]}`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AttributeRequest {
    Value { value: u32 },
    Gates { gates: [u8; 9] },
}

impl From<AttributeRequest> for SensorValue {
    fn from(req: AttributeRequest) -> Self {
        match req {
            AttributeRequest::Value { value } => SensorValue::Scalar(value),
            AttributeRequest::Gates { gates } => SensorValue::Gates(gates),
        }
    }
}

/// Fetch a fresh data frame and return it
async fn get_sample(State(state): State<AppState>) -> impl IntoResponse {
    let result = match state.sensor.sample_fetch().await {
        Ok(()) => state.sensor.last_sample().ok_or(SensorError::NoData),
        Err(e) => Err(e),
    };
    respond(result.map(|sample| {
        serde_json::json!({
            "sample": sample,
            "presence": state.sensor.presence(),
        })
    }))
}

/// Read the module's parameter set
async fn get_settings(State(state): State<AppState>) -> impl IntoResponse {
    respond(state.sensor.read_settings().await)
}

/// Read the firmware version
async fn get_firmware(State(state): State<AppState>) -> impl IntoResponse {
    respond(state.sensor.firmware_version().await.map(|v| {
        serde_json::json!({
            "version": v.to_string(),
            "firmware_type": v.firmware_type,
        })
    }))
}

/// Read one attribute
async fn get_attribute(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<ChannelQuery>,
) -> impl IntoResponse {
    let result = match name.parse::<Attribute>() {
        Ok(attribute) => state.sensor.attr_get(query.channel, attribute).await,
        Err(e) => Err(e),
    };
    respond(result)
}

/// Write one attribute
async fn set_attribute(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<ChannelQuery>,
    Json(req): Json<AttributeRequest>,
) -> impl IntoResponse {
    let attribute = match name.parse::<Attribute>() {
        Ok(attribute) => attribute,
        Err(e) => return respond::<()>(Err(e)),
    };
    tracing::info!("Setting {} to {:?}", attribute.name(), req);
    let result = state
        .sensor
        .attr_set(query.channel, attribute, req.into())
        .await;
    respond(result.map(|()| serde_json::json!({ "attribute": attribute })))
}

/// Reboot the module
async fn restart(State(state): State<AppState>) -> impl IntoResponse {
    respond(
        state
            .sensor
            .restart()
            .await
            .map(|()| serde_json::json!({ "status": "restarting" })),
    )
}

/// Health check
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Load the device configuration named by `LD2410_CONFIG`, or the defaults
async fn load_config() -> anyhow::Result<DeviceConfig> {
    match std::env::var("LD2410_CONFIG") {
        Ok(path) => Ok(DeviceConfig::load(&PathBuf::from(path)).await?),
        Err(_) => Ok(DeviceConfig::default()),
    }
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/sample", get(get_sample))
        .route("/api/v1/settings", get(get_settings))
        .route("/api/v1/firmware", get(get_firmware))
        .route(
            "/api/v1/attributes/:name",
            get(get_attribute).put(set_attribute),
        )
        .route("/api/v1/restart", post(restart))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "ld2410_monitor=debug,ld2410_protocol=debug,ld2410_sensor=debug,info".into()
            }),
        )
        .init();

    tracing::info!("Starting LD2410 monitor");

    // Get serial port from env or use default
    let serial_port = std::env::var("LD2410_PORT").unwrap_or_else(|_| "/dev/ttyUSB0".to_string());
    let baud_rate = match std::env::var("LD2410_BAUD") {
        Ok(baud) => baud.parse()?,
        Err(_) => BAUD_RATE,
    };
    let listen: SocketAddr = std::env::var("LD2410_LISTEN")
        .unwrap_or_else(|_| "0.0.0.0:3000".to_string())
        .parse()?;

    let config = load_config().await?;

    tracing::info!("Opening LD2410 at {} ({} baud)", serial_port, baud_rate);
    let bus = Arc::new(SerialBus::open(&serial_port, baud_rate).await?);
    let sensor = Ld2410::new(bus, config, None).await?;

    match sensor.firmware_version().await {
        Ok(version) => tracing::info!("LD2410 firmware: {}", version),
        Err(e) => tracing::warn!("Failed to query firmware version: {}", e),
    }

    let app = router(AppState {
        sensor: Arc::new(sensor),
    });

    tracing::info!("Listening on http://{}", listen);
    let listener = tokio::net::TcpListener::bind(listen).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
