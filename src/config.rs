use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

/// Application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port, shared by the HTTP API and the WebSocket endpoint
    #[serde(default = "default_port")]
    pub port: u16,

    /// Environment (dev, staging, prod)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// CORS allowed origins, comma separated
    pub cors_origins: Option<String>,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_service_name")]
    pub cloud_service_name: String,

    /// JWT secret key. When set, handshakes must carry a valid token.
    pub cloud_auth_jwt_secret: Option<String>,

    /// Database URL. Without one, documents live in memory.
    pub db_url: Option<String>,

    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// Messages buffered per connection before the relay gives up on it
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,
}

impl Config {
    /// Load configuration from environment variables or app.env file
    pub fn load() -> Result<Self, ConfigError> {
        // Try to load from app.env file first
        if std::path::Path::new("app.env").exists() {
            dotenvy::from_filename("app.env").ok();
        } else {
            // Fallback to .env file
            dotenvy::dotenv().ok();
        }

        match envy::from_env::<Config>().map_err(ConfigError::from).and_then(Config::validate) {
            Ok(config) => {
                info!("Configuration loaded successfully");
                Ok(config)
            }
            Err(e) => {
                error!("Failed to load configuration: {}", e);
                Err(e)
            }
        }
    }

    /// Reject values that parse but leave the service unable to work.
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.db_max_connections == 0 {
            return Err(ConfigError::Invalid("DB_MAX_CONNECTIONS must be at least 1".to_string()));
        }
        if self.outbound_queue_capacity == 0 {
            return Err(ConfigError::Invalid("OUTBOUND_QUEUE_CAPACITY must be at least 1".to_string()));
        }
        Ok(self)
    }

    /// Get the full server address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if running in development mode
    pub fn is_development(&self) -> bool {
        matches!(self.environment.to_lowercase().as_str(), "dev" | "development")
    }

    /// Allowed CORS origins; empty means any origin.
    pub fn cors_origin_list(&self) -> Vec<String> {
        self.cors_origins
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(String::from)
            .collect()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            log_level: default_log_level(),
            cors_origins: None,
            cloud_service_name: default_service_name(),
            cloud_auth_jwt_secret: None,
            db_url: None,
            db_max_connections: default_db_max_connections(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Environment variable error: {0}")]
    EnvError(#[from] envy::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "collab-relay".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_db_max_connections() -> u32 {
    20
}

fn default_outbound_queue_capacity() -> usize {
    256
}
