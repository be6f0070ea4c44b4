//! Real-time synchronization relay for collaborative document editing.
//!
//! Clients connect over WebSocket, join a document room, and exchange
//! edits, title changes and cursor positions with the other participants.
//! Content and title edits are written through to a document store on a
//! last-write-wins basis.

pub mod config;
pub mod db;
pub mod docs;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;
pub mod ws;

use std::sync::Arc;

use config::Config;
use ws::RelayHandle;

/// State shared by every HTTP and WebSocket handler.
#[derive(Clone)]
pub struct AppState {
    pub relay: RelayHandle,
    pub config: Arc<Config>,
}
