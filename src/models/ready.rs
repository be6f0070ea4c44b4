use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// API response for the readiness probe
#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct ReadyResponse {
    pub status: String,
    pub message: String,
    /// Document store backend the relay persists to
    pub store: String,
}
