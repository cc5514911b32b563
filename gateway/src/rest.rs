use crate::errors::Error;
use crate::gate::{GatePolicy, InactiveStatus};
use crate::gateway::Gateway;
use crate::model::{AppInterfaceStatus, Snapshot, TelemetryResponse, UpdateAppInterface};
use crate::validate::parse_payload;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error};

#[derive(Clone)]
struct AppState {
    gateway: Arc<Gateway>,
}

pub fn create_router(gateway: Arc<Gateway>) -> Router {
    let state = AppState { gateway };

    Router::new()
        .route("/", get(index))
        .route("/add-data", post(add_data))
        .route("/update-app-interface", post(update_app_interface))
        .route("/get-data", get(get_data))
        .route("/get-data/:cursor", get(get_data_since))
        .route("/health", get(health))
        .with_state(state)
}

async fn index(State(state): State<AppState>) -> Result<Json<Snapshot>, AppError> {
    let snapshot = state.gateway.get_all().await.map_err(|e| state.reject(e))?;
    Ok(Json(snapshot))
}

async fn add_data(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let auth = headers.get(AUTHORIZATION).map(|value| value.as_bytes());

    let accepted = state
        .gateway
        .ingest(&body, auth)
        .await
        .map_err(|e| state.reject(e))?;

    Ok(Json(accepted))
}

async fn update_app_interface(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<AppInterfaceStatus>, AppError> {
    // Same envelope handling as /add-data.
    let update: UpdateAppInterface = parse_payload(&body)
        .and_then(|object| serde_json::from_value(Value::Object(object)).map_err(Error::from))
        .map_err(|e| state.reject(e))?;

    state
        .gateway
        .set_active(update.api_is_active)
        .await
        .map_err(|e| state.reject(e))?;

    Ok(Json(AppInterfaceStatus {
        api_is_active: update.api_is_active,
    }))
}

async fn get_data(State(state): State<AppState>) -> Result<Json<TelemetryResponse>, AppError> {
    let snapshot = state.gateway.get_all().await.map_err(|e| state.reject(e))?;
    Ok(Json(snapshot.data.into()))
}

async fn get_data_since(
    State(state): State<AppState>,
    Path(cursor): Path<String>,
) -> Result<Json<TelemetryResponse>, AppError> {
    let records = state
        .gateway
        .get_since(&cursor)
        .await
        .map_err(|e| state.reject(e))?;

    Ok(Json(records.into()))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    match state.gateway.store().health_check().await {
        Ok(true) => (StatusCode::OK, "ok"),
        Ok(false) => (StatusCode::SERVICE_UNAVAILABLE, "unhealthy"),
        Err(e) => {
            error!("Health check failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
        }
    }
}

impl AppState {
    fn reject(&self, error: Error) -> AppError {
        AppError::new(error, self.gateway.policy())
    }
}

/// HTTP status for a rejection under the given deployment policy.
pub fn status_for(error: &Error, policy: &GatePolicy) -> StatusCode {
    match error {
        Error::ConfigurationMissing | Error::CursorNotFound(_) => StatusCode::NOT_FOUND,
        Error::ApiInactive => match policy.inactive_status {
            InactiveStatus::Forbidden => StatusCode::FORBIDDEN,
            InactiveStatus::BadRequest => StatusCode::BAD_REQUEST,
        },
        Error::ShutdownWindow(_) => StatusCode::FORBIDDEN,
        Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        Error::MalformedPayload(_) | Error::MissingFields(_) => StatusCode::BAD_REQUEST,
        Error::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

struct AppError {
    status: StatusCode,
    error: Error,
}

impl AppError {
    fn new(error: Error, policy: &GatePolicy) -> Self {
        Self {
            status: status_for(&error, policy),
            error,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("API error: {}", self.error);
        } else {
            debug!("API rejection ({}): {}", self.status, self.error);
        }

        let body = json!({
            "error": {
                "kind": self.error.kind(),
                "message": self.error.to_string(),
            }
        });
        (self.status, Json(body)).into_response()
    }
}
