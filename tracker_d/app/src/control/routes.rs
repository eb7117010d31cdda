use api::{CalibrationKind, DeviceRole, StatusSnapshot};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use common::{CalibrationCommand, KalmanParams, SessionError};
use device::{CommandReply, SessionCommand, TrackingCoordinator};
use log::info;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

pub fn get_router(coordinator: Arc<TrackingCoordinator>) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .route("/calibration/:role/:action", post(calibration_handler))
        .route("/filter/:role", post(filter_handler))
        .route("/brightness/:role", post(brightness_handler))
        .with_state(coordinator)
}

#[derive(Debug)]
pub enum ControlError {
    BadRequest(String),
    NotFound(String),
    Session(SessionError),
    Internal(String),
}

impl ControlError {
    fn status_code(&self) -> StatusCode {
        match self {
            ControlError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ControlError::NotFound(_) => StatusCode::NOT_FOUND,
            ControlError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ControlError::Session(e) => match e {
                SessionError::NoSession(_) => StatusCode::NOT_FOUND,
                SessionError::Closed(_) => StatusCode::GONE,
                SessionError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                SessionError::Calibration(_) | SessionError::Connect(_) => StatusCode::CONFLICT,
                SessionError::Transport(_) => StatusCode::SERVICE_UNAVAILABLE,
                SessionError::InvalidParams(_) => StatusCode::BAD_REQUEST,
            },
        }
    }

    fn message(&self) -> String {
        match self {
            ControlError::BadRequest(m) | ControlError::NotFound(m) | ControlError::Internal(m) => {
                m.clone()
            }
            ControlError::Session(e) => e.to_string(),
        }
    }
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "status": "error",
            "message": self.message()
        }));
        (self.status_code(), body).into_response()
    }
}

fn parse_role(role: &str) -> Result<DeviceRole, ControlError> {
    DeviceRole::parse(role)
        .ok_or_else(|| ControlError::NotFound(format!("unknown device {}", role)))
}

/// Session commands block for up to the command timeout, so they run off
/// the async workers.
async fn run_command(
    coordinator: Arc<TrackingCoordinator>,
    role: DeviceRole,
    command: SessionCommand,
) -> Result<CommandReply, ControlError> {
    tokio::task::spawn_blocking(move || coordinator.command(role, command))
        .await
        .map_err(|e| ControlError::Internal(e.to_string()))?
        .map_err(ControlError::Session)
}

async fn status_handler(
    State(coordinator): State<Arc<TrackingCoordinator>>,
) -> Json<StatusSnapshot> {
    Json(coordinator.status())
}

#[derive(Debug, Default, Deserialize)]
struct CalibrationPayload {
    kind: Option<String>,
}

async fn calibration_handler(
    State(coordinator): State<Arc<TrackingCoordinator>>,
    Path((role, action)): Path<(String, String)>,
    payload: Option<Json<CalibrationPayload>>,
) -> Result<Json<Value>, ControlError> {
    let role = parse_role(&role)?;
    let command = match action.as_str() {
        "start" => {
            let kind = payload
                .and_then(|Json(p)| p.kind)
                .ok_or_else(|| ControlError::BadRequest("start needs a \"kind\"".to_string()))?;
            let kind = CalibrationKind::parse(&kind).ok_or_else(|| {
                ControlError::BadRequest(format!("unknown calibration kind {}", kind))
            })?;
            CalibrationCommand::Start(kind)
        }
        "cancel" => CalibrationCommand::Cancel,
        "commit" => CalibrationCommand::Commit,
        other => {
            return Err(ControlError::NotFound(format!(
                "unknown calibration action {}",
                other
            )))
        }
    };

    info!("Calibration request for {}: {:?}", role, command);
    let outcome = match run_command(coordinator, role, SessionCommand::Calibrate(command)).await? {
        CommandReply::Calibration(outcome) => outcome,
        CommandReply::Done => None,
    };
    Ok(Json(json!({
        "status": "ok",
        "role": role,
        "outcome": outcome
    })))
}

#[derive(Debug, Default, Deserialize)]
struct FilterPayload {
    enabled: Option<bool>,
    dt: Option<f32>,
    q: Option<f32>,
    r: Option<f32>,
}

async fn filter_handler(
    State(coordinator): State<Arc<TrackingCoordinator>>,
    Path(role): Path<String>,
    Json(payload): Json<FilterPayload>,
) -> Result<Json<Value>, ControlError> {
    let role = parse_role(&role)?;
    let params = match (payload.dt, payload.q, payload.r) {
        (Some(dt), Some(q), Some(r)) => Some(KalmanParams::new(dt, q, r)),
        (None, None, None) => None,
        _ => {
            return Err(ControlError::BadRequest(
                "dt, q and r must be given together".to_string(),
            ))
        }
    };
    if payload.enabled.is_none() && params.is_none() {
        return Err(ControlError::BadRequest("nothing to change".to_string()));
    }

    if let Some(params) = params {
        run_command(coordinator.clone(), role, SessionCommand::SetKalmanParams(params)).await?;
    }
    if let Some(enabled) = payload.enabled {
        run_command(coordinator.clone(), role, SessionCommand::SetFilterEnabled(enabled)).await?;
    }

    Ok(Json(json!({
        "status": "ok",
        "role": role,
        "filter_enabled": coordinator.status().device(role).map(|d| d.filter_enabled)
    })))
}

#[derive(Debug, Deserialize)]
struct BrightnessPayload {
    value: u8,
}

async fn brightness_handler(
    State(coordinator): State<Arc<TrackingCoordinator>>,
    Path(role): Path<String>,
    Json(payload): Json<BrightnessPayload>,
) -> Result<Json<Value>, ControlError> {
    let role = parse_role(&role)?;
    run_command(coordinator, role, SessionCommand::SetBrightness(payload.value)).await?;
    Ok(Json(json!({
        "status": "ok",
        "role": role,
        "brightness": payload.value
    })))
}
