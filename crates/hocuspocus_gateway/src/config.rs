use std::env;
use std::path::PathBuf;
use thiserror::Error;

use crate::models::ModelSpec;

/// Server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host (default: 0.0.0.0)
    pub host: String,
    /// Server port (default: 3040)
    pub port: u16,
    /// Database file path (default: ./hocuspocus_gateway.db)
    pub database_path: PathBuf,
    /// Webhook protocol configuration
    pub hocuspocus: HocuspocusConfig,
    /// Model types reachable through document names and collaborator identities
    pub models: Vec<ModelSpec>,
    /// Task queue configuration
    pub queue: QueueConfig,
    /// CORS allowed origins (comma-separated)
    pub cors_origins: Vec<String>,
}

/// Settings shared with the collaboration server.
///
/// Fixed for the lifetime of the process and threaded into the components
/// that need them.
#[derive(Debug, Clone)]
pub struct HocuspocusConfig {
    /// Route prefix for the webhook endpoints (default: /api/documents)
    pub route: String,
    /// Shared HMAC secret
    pub secret: String,
    /// Event names accepted by the webhook endpoint
    pub events: Vec<String>,
    /// Request parameter carrying the collaborator token (default: access_token)
    pub access_token_parameter: String,
    /// Ability name passed to the access gate (default: update)
    pub policy_method_name: String,
}

/// In-process task queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Channel capacity (default: 1024)
    pub capacity: usize,
    /// Attempts per task before it is dropped (default: 3)
    pub max_attempts: u32,
    /// Base delay between attempts in milliseconds (default: 250)
    pub retry_backoff_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            max_attempts: 3,
            retry_backoff_ms: 250,
        }
    }
}

pub const DEFAULT_EVENTS: &str = "create,connect,change,disconnect";

impl HocuspocusConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            route: "/api/documents".to_string(),
            secret: secret.into(),
            events: split_list(DEFAULT_EVENTS),
            access_token_parameter: "access_token".to_string(),
            policy_method_name: "update".to_string(),
        }
    }

    pub fn allows_event(&self, event: &str) -> bool {
        self.events.iter().any(|e| e == event)
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .unwrap_or_else(|_| "3040".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let database_path = PathBuf::from(
            env::var("DATABASE_PATH").unwrap_or_else(|_| "./hocuspocus_gateway.db".to_string()),
        );

        let route = normalize_route(
            &env::var("HOCUSPOCUS_ROUTE").unwrap_or_else(|_| "/api/documents".to_string()),
        )?;

        let hocuspocus = HocuspocusConfig {
            route,
            secret: env::var("HOCUSPOCUS_SECRET").unwrap_or_default(),
            events: split_list(
                &env::var("HOCUSPOCUS_EVENTS").unwrap_or_else(|_| DEFAULT_EVENTS.to_string()),
            ),
            access_token_parameter: env::var("HOCUSPOCUS_ACCESS_TOKEN_PARAMETER")
                .unwrap_or_else(|_| "access_token".to_string()),
            policy_method_name: env::var("HOCUSPOCUS_POLICY_METHOD_NAME")
                .unwrap_or_else(|_| "update".to_string()),
        };

        let models = match env::var("HOCUSPOCUS_MODELS") {
            Ok(raw) if !raw.trim().is_empty() => {
                serde_json::from_str(&raw).map_err(|e| ConfigError::InvalidModels(e.to_string()))?
            }
            _ => Vec::new(),
        };

        let defaults = QueueConfig::default();
        let queue = QueueConfig {
            capacity: env::var("QUEUE_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|v| *v > 0)
                .unwrap_or(defaults.capacity),
            max_attempts: env::var("QUEUE_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|v| *v > 0)
                .unwrap_or(defaults.max_attempts),
            retry_backoff_ms: env::var("QUEUE_RETRY_BACKOFF_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.retry_backoff_ms),
        };

        let cors_origins = split_list(&env::var("CORS_ORIGINS").unwrap_or_default());

        Ok(Config {
            host,
            port,
            database_path,
            hocuspocus,
            models,
            queue,
            cors_origins,
        })
    }

    /// Get the server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The webhook endpoints cannot run without a shared secret.
    pub fn require_secret(&self) -> Result<&str, ConfigError> {
        if self.hocuspocus.secret.is_empty() {
            return Err(ConfigError::MissingSecret);
        }
        Ok(&self.hocuspocus.secret)
    }
}

/// Ensure the route starts with a slash and has no trailing slash.
pub fn normalize_route(route: &str) -> Result<String, ConfigError> {
    let trimmed = route.trim().trim_matches('/');
    if trimmed.is_empty() {
        return Err(ConfigError::InvalidRoute(route.to_string()));
    }
    Ok(format!("/{}", trimmed))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid PORT environment variable")]
    InvalidPort,
    #[error("HOCUSPOCUS_SECRET must be set")]
    MissingSecret,
    #[error("Invalid HOCUSPOCUS_ROUTE \"{0}\"")]
    InvalidRoute(String),
    #[error("Invalid HOCUSPOCUS_MODELS: {0}")]
    InvalidModels(String),
}
