//! Application configuration module
//!
//! Environment variable loading and validation. Gateway credentials live
//! with each adapter's config (`providers::gateways`); this module covers
//! the service itself.

use std::env;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("missing configuration value: {0}")]
    MissingValue(String),
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub checkout: CheckoutConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    /// Public base URL of this service, used to build the provider
    /// return endpoints.
    pub public_url: String,
    /// Destination for failed checkout creations.
    pub home_url: String,
    /// Destination for failed verifications; a message is appended.
    pub error_url: String,
    /// Run against the in-memory ledger store (local development only).
    pub memory_store: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env(),
            checkout: CheckoutConfig::from_env(),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }
        if self.server.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }
        if !self.checkout.memory_store && self.database.url.is_none() {
            return Err(ConfigError::MissingValue("DATABASE_URL".to_string()));
        }
        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST")
                .or_else(|_| env::var("HOST"))
                .unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("SERVER_PORT")
                .or_else(|_| env::var("PORT"))
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".to_string()))?,
        })
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Self {
        DatabaseConfig {
            url: env::var("DATABASE_URL").ok(),
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            min_connections: env::var("DATABASE_MIN_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            connection_timeout_secs: env::var("DATABASE_CONNECTION_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            idle_timeout_secs: env::var("DATABASE_IDLE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(600),
        }
    }
}

impl CheckoutConfig {
    pub fn from_env() -> Self {
        let public_url = env::var("CHECKOUT_PUBLIC_URL")
            .unwrap_or_else(|_| "http://localhost:8000".to_string());
        CheckoutConfig {
            home_url: env::var("CHECKOUT_HOME_URL").unwrap_or_else(|_| "/".to_string()),
            error_url: env::var("CHECKOUT_ERROR_URL")
                .unwrap_or_else(|_| format!("{}/pay/error", public_url.trim_end_matches('/'))),
            memory_store: env::var("CHECKOUT_MEMORY_STORE")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(false),
            public_url,
        }
    }
}
