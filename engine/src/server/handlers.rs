//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use engine_api::{DeployRequest, ErrorResponse, HealthResponse, TrafficRequest};
use tracing::error;
use uuid::Uuid;

use crate::errors::{EngineError, ErrorKind};
use crate::models::slot::Slot;
use crate::server::state::ServerState;
use crate::utils::version_info;

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let status = match kind {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::ValidationError => StatusCode::BAD_REQUEST,
            ErrorKind::CollaboratorUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::LaunchError | ErrorKind::HealthCheckTimeout | ErrorKind::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }

        let body = ErrorResponse {
            kind: kind.as_str().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "bluegreen-engine".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    Json(version_info())
}

// ================================ SERVICES ====================================== //

pub async fn services_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(state.orchestrator.services_status())
}

pub async fn service_handler(
    State(state): State<Arc<ServerState>>,
    Path(service): Path<String>,
) -> Result<impl IntoResponse, EngineError> {
    Ok(Json(state.orchestrator.service_status(&service)?))
}

// ================================ OPERATIONS ==================================== //

/// Accepts the deployment; the outcome is polled on `/deployments/{id}`
pub async fn deploy_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<DeployRequest>,
) -> Result<impl IntoResponse, EngineError> {
    let slot = request
        .slot
        .as_deref()
        .map(str::parse::<Slot>)
        .transpose()
        .map_err(EngineError::ValidationError)?;

    let deployment = state
        .orchestrator
        .deploy(&request.service, &request.version, slot)?;
    Ok((StatusCode::ACCEPTED, Json(deployment)))
}

pub async fn rollback_handler(
    State(state): State<Arc<ServerState>>,
    Path(service): Path<String>,
) -> Result<impl IntoResponse, EngineError> {
    Ok(Json(state.orchestrator.rollback(&service).await?))
}

pub async fn restart_handler(
    State(state): State<Arc<ServerState>>,
    Path((service, slot)): Path<(String, String)>,
) -> Result<impl IntoResponse, EngineError> {
    let slot: Slot = slot.parse().map_err(EngineError::NotFound)?;
    Ok(Json(state.orchestrator.restart(&service, slot).await?))
}

pub async fn traffic_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<TrafficRequest>,
) -> Result<impl IntoResponse, EngineError> {
    let primary = weight(request.primary)?;
    let secondary = weight(request.secondary)?;
    Ok(Json(
        state
            .orchestrator
            .set_weights(&request.service, primary, secondary)
            .await?,
    ))
}

fn weight(value: i64) -> Result<u32, EngineError> {
    u32::try_from(value).map_err(|_| {
        EngineError::ValidationError(format!("weight {} must be a non-negative integer", value))
    })
}

// ================================ DEPLOYMENTS =================================== //

pub async fn deployments_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(state.orchestrator.list_deployments())
}

pub async fn deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, EngineError> {
    Ok(Json(state.orchestrator.deployment_status(parse_id(&id)?)?))
}

pub async fn cancel_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, EngineError> {
    Ok(Json(state.orchestrator.cancel_deployment(parse_id(&id)?)?))
}

fn parse_id(id: &str) -> Result<Uuid, EngineError> {
    Uuid::parse_str(id)
        .map_err(|_| EngineError::ValidationError(format!("malformed deployment id '{}'", id)))
}

// ================================ RELEASES ====================================== //

pub async fn releases_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<impl IntoResponse, EngineError> {
    Ok(Json(state.orchestrator.list_releases()?))
}

pub async fn latest_release_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<impl IntoResponse, EngineError> {
    Ok(Json(state.orchestrator.latest_release()?))
}

pub async fn release_handler(
    State(state): State<Arc<ServerState>>,
    Path(tag): Path<String>,
) -> Result<impl IntoResponse, EngineError> {
    Ok(Json(state.orchestrator.get_release(&tag)?))
}
