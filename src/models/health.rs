use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// API response for the health probe
#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub message: String,
}
