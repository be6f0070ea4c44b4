use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use thiserror::Error;

use crate::models::Document;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document store unavailable: {0}")]
    Unavailable(String),
    #[error("document '{0}' not found")]
    NotFound(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Durable home of document records.
///
/// The relay only ever needs three operations: fetch-or-create on join,
/// and unconditional overwrites of content or title. Writes return the
/// new `last_modified` value, which never moves backwards for a given id.
pub trait DocumentStore: Send + Sync + 'static {
    /// Load the document, creating it with default title and empty
    /// content if the id is unknown.
    fn fetch_or_create<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Document, StoreError>>;

    fn update_content<'a>(
        &'a self,
        id: &'a str,
        content: &'a str,
    ) -> BoxFuture<'a, Result<DateTime<Utc>, StoreError>>;

    fn update_title<'a>(
        &'a self,
        id: &'a str,
        title: &'a str,
    ) -> BoxFuture<'a, Result<DateTime<Utc>, StoreError>>;

    /// Short backend name for logs and diagnostics.
    fn backend(&self) -> &'static str;
}
