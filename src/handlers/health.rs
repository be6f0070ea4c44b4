use axum::{extract::State, http::StatusCode, Json};
use tracing::{debug, error};

use crate::models::{ErrorResponse, HealthResponse, ReadyResponse};
use crate::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    debug!("Health check requested");
    Json(HealthResponse {
        status: "ok".to_string(),
        service: state.config.cloud_service_name.clone(),
        message: "Server is running".to_string(),
    })
}

/// Readiness check endpoint
///
/// Ready means the relay loop is alive and answering.
pub async fn ready_check(
    State(state): State<AppState>,
) -> Result<Json<ReadyResponse>, (StatusCode, Json<ErrorResponse>)> {
    debug!("Readiness check requested");
    match state.relay.stats().await {
        Ok(stats) => Ok(Json(ReadyResponse {
            status: "ok".to_string(),
            message: "Service is ready".to_string(),
            store: stats.store.to_string(),
        })),
        Err(e) => {
            error!("Readiness check failed: {}", e);
            let status = StatusCode::SERVICE_UNAVAILABLE;
            Err((status, Json(ErrorResponse::new(status, e.to_string()))))
        }
    }
}
