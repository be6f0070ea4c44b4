use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use tracing::{error, info};

use crate::models::ErrorResponse;
use crate::services::auth_service::{get_auth_token, validate_jwt};
use crate::AppState;

/// Require a valid service token on operational endpoints.
///
/// Only active when a JWT secret is configured; otherwise requests pass.
pub async fn auth_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(secret) = state.config.cloud_auth_jwt_secret.as_deref() else {
        return next.run(req).await;
    };

    // 1. Get the auth token from the request
    let token = match get_auth_token(req.headers()) {
        Ok(token) => token,
        Err(e) => return unauthorized(e.to_string()),
    };

    // 2. Validate Token
    let token_data = match validate_jwt(&token, secret) {
        Ok(token_data) => token_data,
        Err(e) => {
            error!("JWT validation failed: {}", e);
            return unauthorized(format!("JWT validation failed: {}", e));
        }
    };

    // 3. Only service tokens may read operational data
    match token_data.claims.get("type").and_then(|v| v.as_str()) {
        Some("service") => {
            info!("Service token validated successfully");
            next.run(req).await
        }
        other => {
            error!("Invalid token type: {:?}", other);
            let status = StatusCode::FORBIDDEN;
            (status, Json(ErrorResponse::new(status, "Service token required"))).into_response()
        }
    }
}

fn unauthorized(message: String) -> Response {
    let status = StatusCode::UNAUTHORIZED;
    (status, Json(ErrorResponse::new(status, message))).into_response()
}
