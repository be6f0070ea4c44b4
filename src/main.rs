use std::panic;
use std::sync::Arc;

use collab_relay::config::Config;
use collab_relay::db::{DocumentStore, MemoryDocumentStore, PgDocumentStore};
use collab_relay::routes::build_router;
use collab_relay::ws::Relay;
use collab_relay::AppState;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {e}; using defaults");
        Config::default()
    });

    // Initialize tracing
    let fallback = format!(
        "collab_relay=debug,tower_http=debug,axum::rejection=trace,{}",
        config.log_level
    );
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)))
        .init();

    info!("Starting {} ({})", config.cloud_service_name, config.environment);
    if config.cloud_auth_jwt_secret.is_none() {
        if config.is_development() {
            warn!("No JWT secret configured - handshake identities are taken from query parameters");
        } else {
            error!(
                "No JWT secret configured in {} - any client can claim any identity",
                config.environment
            );
        }
    }

    let store = open_store(&config).await;
    info!("Using {} document store", store.backend());

    let (relay, handle) = Relay::new(store);
    tokio::spawn(relay.run());

    let address = config.server_address();
    let state = AppState {
        relay: handle,
        config: Arc::new(config),
    };
    let app = build_router(state);

    let listener = match tokio::net::TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", address, e);
            std::process::exit(1);
        }
    };

    info!("🚀 Server running on http://{}", address);
    info!("📡 WebSocket available at ws://{}/ws", address);
    info!("📚 Swagger UI available at http://{}/swagger", address);

    if let Err(e) = axum::serve(listener, app).await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}

/// Postgres when a database URL is configured and reachable, memory otherwise.
async fn open_store(config: &Config) -> Arc<dyn DocumentStore> {
    let Some(db_url) = config.db_url.as_deref() else {
        warn!("No database URL configured - documents are kept in memory only");
        return Arc::new(MemoryDocumentStore::new());
    };

    let store = match PgDocumentStore::connect(db_url, config.db_max_connections).await {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            warn!("Falling back to the in-memory document store");
            return Arc::new(MemoryDocumentStore::new());
        }
    };

    if let Err(e) = store.init_schema().await {
        error!("Failed to prepare document schema: {}", e);
        warn!("Falling back to the in-memory document store");
        return Arc::new(MemoryDocumentStore::new());
    }

    info!("Database initialized successfully");
    Arc::new(store)
}
