use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::ParticipantInfo;

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct JoinDocumentMessage {
    pub document_id: String,
    pub user_id: String,
    pub user_name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LeaveDocumentMessage {
    pub document_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TextChangeMessage {
    pub document_id: String,
    #[serde(default)]
    pub delta: Option<Value>,
    pub content: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CursorChangeMessage {
    pub document_id: String,
    pub position: Value,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TitleChangeMessage {
    pub document_id: String,
    pub title: String,
}

/// Messages a connection may send to the relay.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type")]
pub enum ReceivedMessage {
    #[serde(rename = "join-document")]
    JoinDocument(JoinDocumentMessage),
    #[serde(rename = "leave-document")]
    LeaveDocument(LeaveDocumentMessage),
    #[serde(rename = "text-change")]
    TextChange(TextChangeMessage),
    #[serde(rename = "cursor-change")]
    CursorChange(CursorChangeMessage),
    #[serde(rename = "title-change")]
    TitleChange(TitleChangeMessage),
}

impl ReceivedMessage {
    pub fn document_id(&self) -> &str {
        match self {
            ReceivedMessage::JoinDocument(m) => &m.document_id,
            ReceivedMessage::LeaveDocument(m) => &m.document_id,
            ReceivedMessage::TextChange(m) => &m.document_id,
            ReceivedMessage::CursorChange(m) => &m.document_id,
            ReceivedMessage::TitleChange(m) => &m.document_id,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentDataMessage {
    pub content: String,
    pub title: String,
    pub last_modified: DateTime<Utc>,
}

/// Payload of both `participant-joined` and `participant-left`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantMessage {
    pub user_id: String,
    pub user_name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UsersUpdateMessage {
    pub users: Vec<ParticipantInfo>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTextChangeMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<Value>,
    pub content: String,
    pub sender_id: String,
    pub user_name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTitleChangeMessage {
    pub title: String,
    pub sender_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCursorChangeMessage {
    pub user_id: String,
    pub user_name: String,
    pub position: Value,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorMessage {
    pub message: String,
}

/// Messages the relay delivers to connections.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum SendMessage {
    #[serde(rename = "document-data")]
    DocumentData(DocumentDataMessage),
    #[serde(rename = "participant-joined")]
    ParticipantJoined(ParticipantMessage),
    #[serde(rename = "participant-left")]
    ParticipantLeft(ParticipantMessage),
    #[serde(rename = "users-update")]
    UsersUpdate(UsersUpdateMessage),
    #[serde(rename = "text-change")]
    TextChange(RemoteTextChangeMessage),
    #[serde(rename = "title-change")]
    TitleChange(RemoteTitleChangeMessage),
    #[serde(rename = "cursor-change")]
    CursorChange(RemoteCursorChangeMessage),
    #[serde(rename = "error")]
    Error(ErrorMessage),
}

impl SendMessage {
    pub fn error(message: impl Into<String>) -> Self {
        SendMessage::Error(ErrorMessage { message: message.into() })
    }

    /// Cursor traffic may be shed when a connection falls behind.
    pub fn is_droppable(&self) -> bool {
        matches!(self, SendMessage::CursorChange(_))
    }
}
