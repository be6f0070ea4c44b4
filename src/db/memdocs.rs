use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::store::{DocumentStore, StoreError};
use crate::models::Document;

/// In-process document store.
///
/// Used when no database is configured, and by tests. It can be switched
/// unavailable to exercise store-outage paths.
#[derive(Debug)]
pub struct MemoryDocumentStore {
    docs: RwLock<HashMap<String, Document>>,
    available: AtomicBool,
    fetches: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
            fetches: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of fetch-or-create calls served so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Number of content/title writes applied so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub async fn get(&self, id: &str) -> Option<Document> {
        self.docs.read().await.get(id).cloned()
    }

    pub async fn insert(&self, doc: Document) {
        self.docs.write().await.insert(doc.id.clone(), doc);
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store switched off".to_string()))
        }
    }

    async fn modify(
        &self,
        id: &str,
        apply: impl FnOnce(&mut Document),
    ) -> Result<DateTime<Utc>, StoreError> {
        self.ensure_available()?;
        let mut docs = self.docs.write().await;
        let doc = docs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        apply(doc);
        doc.last_modified = Utc::now().max(doc.last_modified);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(doc.last_modified)
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn fetch_or_create<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Document, StoreError>> {
        Box::pin(async move {
            self.ensure_available()?;
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let mut docs = self.docs.write().await;
            if let Some(doc) = docs.get(id) {
                debug!("Loaded document {} from memory", id);
                return Ok(doc.clone());
            }
            let doc = Document::with_defaults(id, Utc::now());
            docs.insert(id.to_string(), doc.clone());
            info!("Created document {} in memory", id);
            Ok(doc)
        })
    }

    fn update_content<'a>(
        &'a self,
        id: &'a str,
        content: &'a str,
    ) -> BoxFuture<'a, Result<DateTime<Utc>, StoreError>> {
        Box::pin(self.modify(id, move |doc| doc.content = content.to_string()))
    }

    fn update_title<'a>(
        &'a self,
        id: &'a str,
        title: &'a str,
    ) -> BoxFuture<'a, Result<DateTime<Utc>, StoreError>> {
        Box::pin(self.modify(id, move |doc| doc.title = title.to_string()))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DEFAULT_TITLE;

    #[tokio::test]
    async fn fetch_or_create_creates_once() {
        let store = MemoryDocumentStore::new();
        let first = store.fetch_or_create("doc1").await.unwrap();
        assert_eq!(first.title, DEFAULT_TITLE);
        assert_eq!(first.content, "");

        store.update_content("doc1", "Hello").await.unwrap();
        let second = store.fetch_or_create("doc1").await.unwrap();
        assert_eq!(second.content, "Hello");
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(store.fetch_count(), 2);
    }

    #[tokio::test]
    async fn last_modified_never_decreases() {
        let store = MemoryDocumentStore::new();
        let mut doc = Document::with_defaults("future", Utc::now());
        let ahead = Utc::now() + chrono::Duration::hours(1);
        doc.last_modified = ahead;
        store.insert(doc).await;

        let stamped = store.update_title("future", "Renamed").await.unwrap();
        assert_eq!(stamped, ahead);
        assert_eq!(store.get("future").await.unwrap().title, "Renamed");
    }

    #[tokio::test]
    async fn edits_bump_last_modified() {
        let store = MemoryDocumentStore::new();
        let mut doc = Document::with_defaults("stale", Utc::now());
        let before = Utc::now() - chrono::Duration::hours(1);
        doc.last_modified = before;
        store.insert(doc).await;

        let stamped = store.update_content("stale", "fresh").await.unwrap();
        assert!(stamped > before);
        let stored = store.get("stale").await.unwrap();
        assert_eq!(stored.last_modified, stamped);
        assert_eq!(stored.content, "fresh");

        let retitled = store.update_title("stale", "Fresh").await.unwrap();
        assert!(retitled >= stamped);
        assert_eq!(store.get("stale").await.unwrap().last_modified, retitled);
    }

    #[tokio::test]
    async fn updates_to_unknown_documents_fail() {
        let store = MemoryDocumentStore::new();
        let err = store.update_content("missing", "x").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(id) if id == "missing"));
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn unavailable_store_rejects_everything() {
        let store = MemoryDocumentStore::new();
        store.fetch_or_create("doc1").await.unwrap();
        store.set_available(false);
        assert!(matches!(store.fetch_or_create("doc1").await, Err(StoreError::Unavailable(_))));
        assert!(matches!(store.update_title("doc1", "t").await, Err(StoreError::Unavailable(_))));
        store.set_available(true);
        assert!(store.update_title("doc1", "t").await.is_ok());
    }
}
