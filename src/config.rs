//! Process configuration, loaded from the environment.
//!
//! Reads an optional `.env` file via `dotenvy` and then falls back to
//! `std::env`, the way `PHiBBeRR-PulseArc`'s configuration layers a typed
//! struct with defaults over loosely-typed environment input.

use crate::error::{ConfigError, Result};

/// Engine process configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Connection string for the backing store (a Redis URL when running
    /// with the `redis` feature).
    pub store_url: String,
    /// Human-readable application name, surfaced in logs.
    pub app_name: String,
    /// Deployment environment name (`dev`, `staging`, `production`, ...).
    pub environment: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_url: "redis://localhost:6379/0".to_string(),
            app_name: "Distributed Rate Limiter".to_string(),
            environment: "dev".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from the process environment, applying an
    /// optional `.env` file first and falling back to the defaults above
    /// for anything unset.
    ///
    /// Recognized variables: `STORE_URL`, `APP_NAME`, `ENVIRONMENT`.
    pub fn from_env() -> Result<Self> {
        // Missing .env is not an error: it's absent in production deployments
        // that set real environment variables directly.
        let _ = dotenvy::dotenv();

        let defaults = Self::default();

        let store_url = match std::env::var("STORE_URL") {
            Ok(value) if !value.trim().is_empty() => value,
            Ok(_) => {
                return Err(ConfigError::Invalid {
                    key: "STORE_URL".into(),
                    message: "must not be empty".into(),
                }
                .into());
            }
            Err(_) => defaults.store_url,
        };

        let app_name = std::env::var("APP_NAME").unwrap_or(defaults.app_name);
        let environment = std::env::var("ENVIRONMENT").unwrap_or(defaults.environment);

        Ok(Self {
            store_url,
            app_name,
            environment,
        })
    }
}
