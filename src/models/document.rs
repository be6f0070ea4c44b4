use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Title given to documents created implicitly by a join.
pub const DEFAULT_TITLE: &str = "Untitled Document";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    #[default]
    Write,
    Admin,
}

/// Collaborator entry on a document. Not enforced by the relay.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Collaborator {
    pub user_id: String,
    #[serde(default)]
    pub permission: Permission,
    pub added_at: DateTime<Utc>,
}

/// Durable document record as held by the document store.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub title: String,
    pub content: String,
    pub owner: Option<String>,
    pub collaborators: Vec<Collaborator>,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

impl Document {
    /// A fresh document with the default title and empty content.
    pub fn with_defaults(id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            title: DEFAULT_TITLE.to_string(),
            content: String::new(),
            owner: None,
            collaborators: Vec::new(),
            is_public: false,
            created_at: now,
            last_modified: now,
        }
    }
}
