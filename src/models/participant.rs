use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Presence entry as sent in `users-update`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantInfo {
    pub user_id: String,
    pub user_name: String,
    pub color: String,
    pub cursor_position: Value,
}
