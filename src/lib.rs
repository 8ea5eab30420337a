//! Distributed rate-limit decision engine.
//!
//! Three algorithms — token bucket, leaky bucket, and sliding window — are
//! each executed as a single atomic operation against a shared [`store::Store`]
//! backend, so that every replica of a calling service sees a consistent
//! view of a subject's quota. The engine is usable directly as a library, or
//! behind the thin HTTP surface in [`http`] (feature `axum`).
//!
//! # Quick start
//!
//! ```ignore
//! use ratelimit_decider::{DecisionEngine, MemoryStore};
//!
//! #[tokio::main]
//! async fn main() {
//!     let engine = DecisionEngine::new(MemoryStore::new());
//!
//!     let decision = engine
//!         .decide_token_bucket("user:123", 10.0, 1.0)
//!         .await
//!         .unwrap();
//!
//!     if decision.allowed {
//!         println!("allowed, {} tokens left", decision.remaining);
//!     } else {
//!         println!("rate limited");
//!     }
//! }
//! ```
//!
//! # Feature flags
//!
//! - `memory` (default): in-memory store backend, for a single process or tests.
//! - `redis`: Redis store backend, for a fleet of replicas sharing decisions.
//! - `axum` (default): the `POST /v1/check/{algorithm}` HTTP surface.
//! - `full`: all of the above.

pub mod clock;
pub mod config;
pub mod decision;
pub mod error;
pub mod store;

#[cfg(feature = "axum")]
pub mod http;

pub use clock::{Clock, SystemClock};
pub use config::EngineConfig;
pub use decision::{DecisionEngine, DecisionEnvelope};
pub use error::{ConfigError, DeciderError, Result, StoreError};
pub use store::{ScriptResult, Store};

#[cfg(feature = "memory")]
pub use store::MemoryStore;

#[cfg(feature = "redis")]
pub use store::{RedisConfig, RedisStore};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::clock::{Clock, SystemClock};
    pub use crate::decision::{DecisionEngine, DecisionEnvelope};
    pub use crate::error::{DeciderError, Result};
    pub use crate::store::Store;

    #[cfg(feature = "memory")]
    pub use crate::store::MemoryStore;

    #[cfg(feature = "redis")]
    pub use crate::store::{RedisConfig, RedisStore};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "memory")]
    #[tokio::test]
    async fn integration_token_bucket_allows_up_to_capacity() {
        use crate::prelude::*;

        let engine = DecisionEngine::new(MemoryStore::new());
        let quota = (5.0, 1.0);

        for i in 1..=5 {
            let decision = engine
                .decide_token_bucket("user:1", quota.0, quota.1)
                .await
                .unwrap();
            assert!(decision.allowed, "request {i} should be allowed");
        }

        let decision = engine
            .decide_token_bucket("user:1", quota.0, quota.1)
            .await
            .unwrap();
        assert!(!decision.allowed);
    }

    #[cfg(feature = "memory")]
    #[tokio::test]
    async fn integration_leaky_bucket_reports_remaining() {
        use crate::prelude::*;

        let engine = DecisionEngine::new(MemoryStore::new());
        let decision = engine
            .decide_leaky_bucket("user:1", 10.0, 2.0)
            .await
            .unwrap();

        assert!(decision.allowed);
        assert_eq!(decision.remaining, 9.0);
    }

    #[cfg(feature = "memory")]
    #[tokio::test]
    async fn integration_sliding_window_isolates_subjects() {
        use crate::prelude::*;

        let engine = DecisionEngine::new(MemoryStore::new());

        for _ in 0..3 {
            let decision = engine
                .decide_sliding_window("a", 3.0, 60.0)
                .await
                .unwrap();
            assert!(decision.allowed);
        }
        let denied = engine.decide_sliding_window("a", 3.0, 60.0).await.unwrap();
        assert!(!denied.allowed);

        let allowed_b = engine.decide_sliding_window("b", 3.0, 60.0).await.unwrap();
        assert!(allowed_b.allowed);
    }

    #[tokio::test]
    async fn integration_rejects_bad_request() {
        use crate::prelude::*;

        let engine = DecisionEngine::new(MemoryStore::new());
        let err = engine
            .decide_token_bucket("user:1", 0.0, 1.0)
            .await
            .unwrap_err();
        assert!(matches!(err, DeciderError::BadRequest(_)));
    }
}
