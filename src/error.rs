//! Error types for the rate-limit decision engine.
//!
//! The hierarchy mirrors the three error kinds called out by the decision
//! contract: bad input (never retried), store unavailability (surfaced to
//! the caller, never retried internally), and configuration problems
//! encountered at bootstrap. A deny decision is not an error — it is carried
//! as a normal [`crate::decision::DecisionEnvelope`] value.

use std::time::Duration;
use thiserror::Error;

/// Result type for rate limiting operations.
pub type Result<T> = std::result::Result<T, DeciderError>;

/// Top-level error returned by the decision engine and the HTTP surface.
#[derive(Debug, Error)]
pub enum DeciderError {
    /// Missing or non-positive rate parameter, or an unknown algorithm name.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The store could not complete the scripted call (connection failure,
    /// timeout, or script execution error).
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    /// Configuration could not be loaded or was invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors raised by a [`crate::store::Store`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Could not establish or obtain a connection to the store.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The store call did not complete within the configured timeout.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The scripted call itself failed at the store.
    #[error("script execution failed: {0}")]
    ScriptFailed(String),

    /// The connection pool had no connections available.
    #[error("connection pool exhausted")]
    PoolExhausted,
}

/// Errors raised while loading [`crate::config::EngineConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable was absent and had no default.
    #[error("missing required configuration: {0}")]
    MissingRequired(String),

    /// A present value failed to parse into the expected type.
    #[error("invalid configuration value for {key}: {message}")]
    Invalid {
        /// The offending configuration key.
        key: String,
        /// Why the value was rejected.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_request_display() {
        let err = DeciderError::BadRequest("refill_rate not found".into());
        assert_eq!(err.to_string(), "bad request: refill_rate not found");
    }

    #[test]
    fn store_unavailable_wraps_store_error() {
        let err: DeciderError = StoreError::PoolExhausted.into();
        assert!(matches!(
            err,
            DeciderError::StoreUnavailable(StoreError::PoolExhausted)
        ));
        assert_eq!(err.to_string(), "store unavailable: connection pool exhausted");
    }

    #[test]
    fn config_error_wraps_into_decider_error() {
        let err: DeciderError = ConfigError::MissingRequired("STORE_URL".into()).into();
        assert!(matches!(err, DeciderError::Config(_)));
    }
}
